//! Row Level Security (RLS) Engine for rowgate
//!
//! Decides, per table, operation and caller, whether a request may proceed
//! and which row filter or write check must accompany it:
//! - Policy definition and storage with a per-table ceiling
//! - A small `field OP value` policy language and its evaluator
//! - DENY-first, priority ordered, default-deny decisions
//! - Decision caching with TTL expiry and table-wide invalidation

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod parser;
pub mod policy;

pub use cache::{CacheStats, PolicyCache};
pub use context::ExecutionContext;
pub use engine::{FilterClause, PolicyEvaluationResult, RlsEngine, RowFilter};
pub use evaluator::PolicyEvaluator;
pub use parser::{PolicyParser, PolicyRule, RuleOperator, RuleSet, RuleValue};
pub use policy::{CompiledPolicy, Operation, Policy, PolicyEffect, PolicyStore, PolicyType};
