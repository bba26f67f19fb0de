//! rowgate Common Types and Utilities
//!
//! Shared configuration, error handling and response envelopes used by the
//! RLS engine and the REST layer.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::RowgateConfig;
pub use error::{Error, Result};
