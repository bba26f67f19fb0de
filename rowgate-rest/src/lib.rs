//! rowgate REST layer
//!
//! Turns REST requests into parameterized SQL and layers row-level security
//! decisions onto every statement:
//! - Identifier validation and quoting
//! - Condition compilation (eq, ne, gt, gte, lt, lte, like, ilike, is, in, not in, between)
//! - SELECT/INSERT/UPDATE/DELETE/COUNT builders with joins, aggregates and RLS filters
//! - actix-web handlers over a pluggable query backend

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admin;
pub mod backend;
pub mod builder;
pub mod condition;
pub mod filter;
pub mod handlers;
pub mod identifier;
pub mod options;
pub mod query;
pub mod server;

pub use backend::{DryRunBackend, QueryBackend, QueryResult, RecordingBackend};
pub use builder::{BuiltQuery, QueryBuilder};
pub use condition::{BindArgs, ConditionCompiler, ConditionOp};
pub use handlers::RestState;
pub use identifier::{quote_identifier, try_quote, validate as validate_identifier};
pub use options::{
    AggregateFunction, AggregateOption, JoinOption, JoinType, OrderBy, OrderDirection, QueryOptions,
};
pub use query::parse_query;
pub use server::RestServer;
