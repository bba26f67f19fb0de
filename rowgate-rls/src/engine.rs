//! RLS decision engine
//!
//! Owns the policy store and the decision cache. A decision walks
//! `NoPolicy -> Evaluating -> {Allowed, Denied}`:
//!
//! 1. RLS disabled: allowed, no filter.
//! 2. Cached, unexpired decision for (table, operation, user, tenant, roles).
//! 3. Enabled policies for the operation (or `ALL`), highest priority first.
//! 4. Any matching DENY policy denies.
//! 5. The first matching ALLOW policy allows, carrying its USING and WITH CHECK.
//! 6. Otherwise denied by default.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use rowgate_common::config::RlsConfig;
use rowgate_common::{Error, Result};

use crate::cache::{CacheStats, PolicyCache};
use crate::context::ExecutionContext;
use crate::evaluator::{PolicyEvaluator, Reference};
use crate::parser::{Operand, PolicyParser, PolicyRule, RuleOperator, RuleSet, RuleValue};
use crate::policy::{CompiledPolicy, Operation, Policy, PolicyEffect, PolicyStore};

pub const REASON_DISABLED: &str = "RLS disabled";
pub const REASON_DENIED: &str = "Denied by policy";
pub const REASON_ALLOWED: &str = "Allowed by policy";
pub const REASON_DEFAULT_DENY: &str = "No matching policy found (default deny)";
pub const REASON_CHECK_FAILED: &str = "row check constraint failed";
pub const REASON_USING_FAILED: &str = "access denied by USING clause";

/// Outcome of a permission check
#[derive(Debug, Clone, Serialize)]
pub struct PolicyEvaluationResult {
    pub allowed: bool,
    #[serde(skip)]
    pub policy: Option<Arc<CompiledPolicy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// USING text of the matched policy; `None` is unrestricted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// WITH CHECK text of the matched policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
}

impl PolicyEvaluationResult {
    fn new(allowed: bool, policy: Option<&Arc<CompiledPolicy>>, reason: &str) -> Self {
        let with_clauses = allowed.then_some(policy).flatten();
        Self {
            allowed,
            policy: policy.cloned(),
            policy_id: policy.map(|p| p.id().to_string()),
            filter: with_clauses.and_then(|p| p.policy.using.clone()),
            check: with_clauses.and_then(|p| p.policy.with_check.clone()),
            reason: reason.to_string(),
            evaluated_at: Utc::now(),
        }
    }

    fn denied_by(&self, reason: &str) -> Self {
        Self {
            allowed: false,
            filter: None,
            check: None,
            reason: reason.to_string(),
            evaluated_at: Utc::now(),
            ..self.clone()
        }
    }

    fn using_rules(&self) -> Option<&RuleSet> {
        self.policy.as_ref().and_then(|p| p.using.as_ref())
    }

    fn check_rules(&self) -> Option<&RuleSet> {
        self.policy.as_ref().and_then(|p| p.check.as_ref())
    }
}

/// One compiled USING rule, ready to become a SQL predicate
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    /// Rule over caller context only, already decided
    Constant(bool),
    /// `column OP value`
    Compare {
        column: String,
        operator: RuleOperator,
        value: RuleValue,
        negated: bool,
    },
    /// `column OP column`
    Columns {
        left: String,
        operator: RuleOperator,
        right: String,
        negated: bool,
    },
}

/// Row filter for a read
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    /// USING text with `${var}` substituted, or `1=1`
    pub sql: String,
    /// Clauses to be AND-ed into the generated WHERE
    pub clauses: Vec<FilterClause>,
    pub policy_id: Option<String>,
}

impl RowFilter {
    pub fn unrestricted() -> Self {
        Self {
            sql: "1=1".to_string(),
            clauses: Vec::new(),
            policy_id: None,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.clauses
            .iter()
            .all(|c| matches!(c, FilterClause::Constant(true)))
    }
}

enum Side<'a> {
    Column(&'a str),
    Value(RuleValue),
    Missing,
}

/// Row-level security engine
pub struct RlsEngine {
    config: RlsConfig,
    store: PolicyStore,
    cache: PolicyCache<PolicyEvaluationResult>,
    parser: PolicyParser,
    evaluator: PolicyEvaluator,
}

impl RlsEngine {
    pub fn new(config: RlsConfig) -> Self {
        let capacity = if config.cache_enabled {
            config.cache_size
        } else {
            0
        };
        Self {
            store: PolicyStore::new(config.max_policies_per_table),
            cache: PolicyCache::new(capacity, Duration::from_secs(config.cache_ttl_secs)),
            parser: PolicyParser::new(),
            evaluator: PolicyEvaluator::new(),
            config,
        }
    }

    pub fn config(&self) -> &RlsConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    // ========================================================================
    // Policy administration
    // ========================================================================

    /// Validate, compile and register a policy
    pub fn add_policy(&self, policy: Policy) -> Result<()> {
        let compiled = CompiledPolicy::compile(policy, &self.parser)?;
        let table = compiled.policy.table.clone();
        let id = compiled.id().to_string();

        self.store.insert(compiled)?;
        self.invalidate_table(&table);
        info!(table = %table, policy_id = %id, "RLS policy added");
        Ok(())
    }

    /// Replace an existing policy, keeping its creation audit fields
    pub fn update_policy(&self, mut policy: Policy) -> Result<()> {
        let existing = self.get_policy(&policy.table, &policy.id)?;
        policy.created_at = existing.created_at;
        if policy.created_by.is_empty() {
            policy.created_by = existing.created_by;
        }
        policy.updated_at = Utc::now();

        let compiled = CompiledPolicy::compile(policy, &self.parser)?;
        let table = compiled.policy.table.clone();
        let id = compiled.id().to_string();

        self.store.replace(compiled)?;
        self.invalidate_table(&table);
        info!(table = %table, policy_id = %id, "RLS policy updated");
        Ok(())
    }

    pub fn remove_policy(&self, table: &str, policy_id: &str) -> Result<()> {
        self.store.remove(table, policy_id)?;
        self.invalidate_table(table);
        info!(table = %table, policy_id = %policy_id, "RLS policy removed");
        Ok(())
    }

    pub fn list_policies(&self, table: &str) -> Vec<Policy> {
        self.store.list(table)
    }

    pub fn get_policy(&self, table: &str, policy_id: &str) -> Result<Policy> {
        self.store
            .get(table, policy_id)
            .ok_or_else(|| Error::PolicyNotFound(policy_id.to_string()))
    }

    pub fn policy_count(&self, table: &str) -> usize {
        self.store.count(table)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("RLS decision cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn invalidate_table(&self, table: &str) {
        let removed = self.cache.invalidate(&table_pattern(table));
        debug!(table = %table, removed, "RLS cache invalidated");
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    /// Decide whether `ctx` may perform `operation` on `table`
    pub fn check_permission(
        &self,
        table: &str,
        operation: Operation,
        ctx: &ExecutionContext,
    ) -> PolicyEvaluationResult {
        if !self.config.enabled {
            return PolicyEvaluationResult::new(true, None, REASON_DISABLED);
        }

        let key = cache_key(table, operation, ctx);
        if let Some(cached) = self.cache.get(&key) {
            debug!(table = %table, operation = %operation, "RLS cache hit");
            return cached;
        }

        let (policies, generation) = self.store.applicable(table, operation);
        let result = self.evaluate_policies(&policies, ctx);
        self.log_decision(table, operation, ctx, &result);

        self.cache.insert_if(
            key,
            result.clone(),
            Duration::from_secs(self.config.cache_ttl_secs),
            || self.store.generation() == generation,
        );
        result
    }

    fn evaluate_policies(
        &self,
        policies: &[Arc<CompiledPolicy>],
        ctx: &ExecutionContext,
    ) -> PolicyEvaluationResult {
        let matches = |p: &&Arc<CompiledPolicy>| self.evaluator.evaluate(&p.definition, None, ctx);

        if let Some(deny) = policies
            .iter()
            .filter(|p| p.policy.effect == PolicyEffect::Deny)
            .find(matches)
        {
            return PolicyEvaluationResult::new(false, Some(deny), REASON_DENIED);
        }

        if let Some(allow) = policies
            .iter()
            .filter(|p| p.policy.effect == PolicyEffect::Allow)
            .find(matches)
        {
            return PolicyEvaluationResult::new(true, Some(allow), REASON_ALLOWED);
        }

        PolicyEvaluationResult::new(false, None, REASON_DEFAULT_DENY)
    }

    fn log_decision(
        &self,
        table: &str,
        operation: Operation,
        ctx: &ExecutionContext,
        result: &PolicyEvaluationResult,
    ) {
        let policy_id = result.policy_id.as_deref().unwrap_or("-");
        if self.config.debug_mode {
            info!(
                table = %table,
                operation = %operation,
                user_id = %ctx.user_id,
                tenant_id = %ctx.tenant_id,
                allowed = result.allowed,
                policy_id = %policy_id,
                reason = %result.reason,
                "RLS decision"
            );
        } else {
            debug!(
                table = %table,
                operation = %operation,
                allowed = result.allowed,
                policy_id = %policy_id,
                "RLS decision"
            );
        }
    }

    /// Apply the WITH CHECK constraint of an allowed decision to incoming row data
    pub fn enforce_check(
        &self,
        result: &PolicyEvaluationResult,
        data: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PolicyEvaluationResult {
        match result.check_rules() {
            Some(rules) if result.allowed && !self.evaluator.evaluate(rules, Some(data), ctx) => {
                result.denied_by(REASON_CHECK_FAILED)
            }
            _ => result.clone(),
        }
    }

    /// WITH CHECK for a partial update. Rules over row columns the patch does
    /// not set are skipped; the stored values of those columns already passed USING.
    pub fn enforce_patch_check(
        &self,
        result: &PolicyEvaluationResult,
        patch: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PolicyEvaluationResult {
        let Some(rules) = result.check_rules() else {
            return result.clone();
        };
        let touched = RuleSet {
            rules: rules
                .rules
                .iter()
                .filter(|rule| patch_sets_columns(rule, patch))
                .cloned()
                .collect(),
        };
        if result.allowed && !self.evaluator.evaluate(&touched, Some(patch), ctx) {
            result.denied_by(REASON_CHECK_FAILED)
        } else {
            result.clone()
        }
    }

    /// Apply the USING filter of an allowed decision to an existing row
    pub fn enforce_using(
        &self,
        result: &PolicyEvaluationResult,
        data: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PolicyEvaluationResult {
        match result.using_rules() {
            Some(rules) if result.allowed && !self.evaluator.evaluate(rules, Some(data), ctx) => {
                result.denied_by(REASON_USING_FAILED)
            }
            _ => result.clone(),
        }
    }

    pub fn validate_insert(
        &self,
        table: &str,
        data: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PolicyEvaluationResult {
        let result = self.check_permission(table, Operation::Insert, ctx);
        self.enforce_check(&result, data, ctx)
    }

    pub fn validate_update(
        &self,
        table: &str,
        old_data: &Map<String, Value>,
        new_data: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PolicyEvaluationResult {
        let result = self.check_permission(table, Operation::Update, ctx);
        let result = self.enforce_using(&result, old_data, ctx);
        self.enforce_check(&result, new_data, ctx)
    }

    pub fn validate_delete(
        &self,
        table: &str,
        data: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PolicyEvaluationResult {
        let result = self.check_permission(table, Operation::Delete, ctx);
        self.enforce_using(&result, data, ctx)
    }

    // ========================================================================
    // Row filters
    // ========================================================================

    /// Row filter for reads; a denied read is an error
    pub fn get_row_filter(&self, table: &str, ctx: &ExecutionContext) -> Result<RowFilter> {
        let result = self.check_permission(table, Operation::Select, ctx);
        self.row_filter(&result, ctx)
    }

    /// Row filter carried by any allowed decision
    pub fn row_filter(
        &self,
        result: &PolicyEvaluationResult,
        ctx: &ExecutionContext,
    ) -> Result<RowFilter> {
        if !result.allowed {
            return Err(Error::PermissionDenied(result.reason.clone()));
        }

        let (Some(rules), Some(text)) = (result.using_rules(), result.filter.as_deref()) else {
            return Ok(RowFilter {
                policy_id: result.policy_id.clone(),
                ..RowFilter::unrestricted()
            });
        };

        let clauses = rules
            .iter()
            .map(|rule| self.compile_clause(rule, ctx))
            .collect::<Result<Vec<_>>>()?;

        Ok(RowFilter {
            sql: ctx.substitute(text.trim()),
            clauses,
            policy_id: result.policy_id.clone(),
        })
    }

    fn side<'a>(&self, path: &'a str, ctx: &ExecutionContext) -> Side<'a> {
        match Reference::classify(path) {
            Reference::Row(column) | Reference::Bare(column) => Side::Column(column),
            Reference::Context(key) => ctx.lookup(key).map_or(Side::Missing, Side::Value),
        }
    }

    fn compile_clause(&self, rule: &PolicyRule, ctx: &ExecutionContext) -> Result<FilterClause> {
        let left = self.side(&rule.field, ctx);
        let right = match &rule.value {
            Operand::Field(path) => self.side(path, ctx),
            literal @ Operand::Literal(_) => self
                .evaluator
                .operand(literal, None, ctx)
                .map_or(Side::Missing, Side::Value),
        };
        let negated = rule.negated;

        let clause = match (left, right) {
            (Side::Missing, _) | (_, Side::Missing) => FilterClause::Constant(false),
            (Side::Column(column), Side::Value(value)) => FilterClause::Compare {
                column: column.to_string(),
                operator: rule.operator,
                value,
                negated,
            },
            (Side::Value(value), Side::Column(column)) => FilterClause::Compare {
                column: column.to_string(),
                operator: mirror(rule.operator).ok_or_else(|| unsupported(rule))?,
                value,
                negated,
            },
            (Side::Column(left), Side::Column(right)) => {
                if !matches!(
                    rule.operator,
                    RuleOperator::Eq | RuleOperator::Gt | RuleOperator::Lt
                ) {
                    return Err(unsupported(rule));
                }
                FilterClause::Columns {
                    left: left.to_string(),
                    operator: rule.operator,
                    right: right.to_string(),
                    negated,
                }
            }
            (Side::Value(_), Side::Value(_)) => {
                FilterClause::Constant(self.evaluator.evaluate_rule(rule, None, ctx))
            }
        };
        Ok(clause)
    }
}

fn patch_sets_columns(rule: &PolicyRule, patch: &Map<String, Value>) -> bool {
    let sets = |path: &str| match Reference::classify(path) {
        Reference::Row(column) => patch.contains_key(column),
        Reference::Context(_) | Reference::Bare(_) => true,
    };
    sets(&rule.field)
        && match &rule.value {
            Operand::Field(path) => sets(path),
            Operand::Literal(_) => true,
        }
}

fn mirror(operator: RuleOperator) -> Option<RuleOperator> {
    match operator {
        RuleOperator::Eq => Some(RuleOperator::Eq),
        RuleOperator::Gt => Some(RuleOperator::Lt),
        RuleOperator::Lt => Some(RuleOperator::Gt),
        RuleOperator::Contains | RuleOperator::In | RuleOperator::Like => None,
    }
}

fn unsupported(rule: &PolicyRule) -> Error {
    Error::InvalidExpression(format!(
        "cannot express `{} {} ...` as a row filter",
        rule.field, rule.operator
    ))
}

// Caller fields are length-prefixed so no two contexts share a key
fn cache_key(table: &str, operation: Operation, ctx: &ExecutionContext) -> String {
    format!(
        "{}{}:{}:{}:{}:{}:{}",
        table_pattern(table),
        operation,
        ctx.user_id.len(),
        ctx.user_id,
        ctx.tenant_id.len(),
        ctx.tenant_id,
        ctx.roles_key()
    )
}

fn table_pattern(table: &str) -> String {
    format!("policy:{table}:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyType;
    use serde_json::json;

    fn engine() -> RlsEngine {
        RlsEngine::new(RlsConfig::default())
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u1", "t1").with_roles(["member"])
    }

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    fn allow(id: &str, policy_type: PolicyType) -> Policy {
        Policy::new(id, "orders", "t1", policy_type, PolicyEffect::Allow)
    }

    fn deny(id: &str, policy_type: PolicyType) -> Policy {
        Policy::new(id, "orders", "t1", policy_type, PolicyEffect::Deny)
    }

    #[test]
    fn test_default_deny() {
        let engine = engine();
        for op in [
            Operation::Select,
            Operation::Insert,
            Operation::Update,
            Operation::Delete,
        ] {
            let result = engine.check_permission("orders", op, &ctx());
            assert!(!result.allowed);
            assert_eq!(result.reason, REASON_DEFAULT_DENY);
            assert!(result.policy.is_none());
        }
    }

    #[test]
    fn test_rls_disabled_allows() {
        let engine = RlsEngine::new(RlsConfig {
            enabled: false,
            ..RlsConfig::default()
        });
        let result = engine.check_permission("orders", Operation::Delete, &ctx());
        assert!(result.allowed);
        assert_eq!(result.reason, REASON_DISABLED);
        assert!(engine.get_row_filter("orders", &ctx()).unwrap().is_unrestricted());
    }

    #[test]
    fn test_deny_precedence_over_priority() {
        let engine = engine();
        engine
            .add_policy(allow("allow", PolicyType::All).with_priority(100))
            .unwrap();
        engine
            .add_policy(deny("deny", PolicyType::Select).with_priority(-5))
            .unwrap();

        let result = engine.check_permission("orders", Operation::Select, &ctx());
        assert!(!result.allowed);
        assert_eq!(result.reason, REASON_DENIED);
        assert_eq!(result.policy_id.as_deref(), Some("deny"));

        assert!(
            engine
                .check_permission("orders", Operation::Insert, &ctx())
                .allowed
        );
    }

    #[test]
    fn test_highest_priority_allow_wins() {
        let engine = engine();
        engine
            .add_policy(allow("low", PolicyType::Select).with_using("row.public = true"))
            .unwrap();
        engine
            .add_policy(
                allow("high", PolicyType::Select)
                    .with_priority(10)
                    .with_using("row.owner_id = ${user.id}"),
            )
            .unwrap();

        let result = engine.check_permission("orders", Operation::Select, &ctx());
        assert!(result.allowed);
        assert_eq!(result.policy_id.as_deref(), Some("high"));
        assert_eq!(result.filter.as_deref(), Some("row.owner_id = ${user.id}"));
    }

    #[test]
    fn test_definition_gates_on_roles() {
        let engine = engine();
        engine
            .add_policy(
                allow("admins", PolicyType::Delete)
                    .with_definition("${user.roles} CONTAINS 'admin'"),
            )
            .unwrap();

        assert!(
            !engine
                .check_permission("orders", Operation::Delete, &ctx())
                .allowed
        );
        let admin = ExecutionContext::new("u2", "t1").with_roles(["admin"]);
        assert!(
            engine
                .check_permission("orders", Operation::Delete, &admin)
                .allowed
        );
    }

    #[test]
    fn test_disabled_policy_is_ignored() {
        let engine = engine();
        engine
            .add_policy(allow("p1", PolicyType::All).disabled())
            .unwrap();
        assert!(
            !engine
                .check_permission("orders", Operation::Select, &ctx())
                .allowed
        );
    }

    #[test]
    fn test_cache_coherence_on_mutation() {
        let engine = engine();
        assert!(
            !engine
                .check_permission("orders", Operation::Select, &ctx())
                .allowed
        );
        assert_eq!(engine.cache_stats().entries, 1);

        engine.add_policy(allow("p1", PolicyType::Select)).unwrap();
        assert!(
            engine
                .check_permission("orders", Operation::Select, &ctx())
                .allowed
        );

        engine.remove_policy("orders", "p1").unwrap();
        assert!(
            !engine
                .check_permission("orders", Operation::Select, &ctx())
                .allowed
        );
    }

    #[test]
    fn test_cached_decision_is_reused() {
        let engine = engine();
        engine.add_policy(allow("p1", PolicyType::Select)).unwrap();
        engine.check_permission("orders", Operation::Select, &ctx());
        engine.check_permission("orders", Operation::Select, &ctx());

        let stats = engine.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);

        engine.clear_cache();
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[test]
    fn test_cache_keys_separate_callers_with_delimiters() {
        let engine = engine();
        engine
            .add_policy(
                Policy::new("only_a", "orders", "t1", PolicyType::Select, PolicyEffect::Allow)
                    .with_definition("user.id = 'a'"),
            )
            .unwrap();

        let a = ExecutionContext::new("a", "b:c");
        let ab = ExecutionContext::new("a:b", "c");
        assert_ne!(
            cache_key("orders", Operation::Select, &a),
            cache_key("orders", Operation::Select, &ab)
        );

        assert!(engine.check_permission("orders", Operation::Select, &a).allowed);
        assert!(!engine.check_permission("orders", Operation::Select, &ab).allowed);
        assert_eq!(engine.cache_stats().entries, 2);

        let roles_one = ExecutionContext::new("u1", "t1").with_roles(["x,y"]);
        let roles_two = ExecutionContext::new("u1", "t1").with_roles(["x", "y"]);
        assert_ne!(
            cache_key("orders", Operation::Select, &roles_one),
            cache_key("orders", Operation::Select, &roles_two)
        );
    }

    #[test]
    fn test_policy_limit() {
        let engine = RlsEngine::new(RlsConfig {
            max_policies_per_table: 1,
            ..RlsConfig::default()
        });
        engine.add_policy(allow("p1", PolicyType::All)).unwrap();
        let err = engine.add_policy(allow("p2", PolicyType::All)).unwrap_err();
        assert!(matches!(err, Error::PolicyLimitExceeded { .. }));
        assert_eq!(engine.policy_count("orders"), 1);
    }

    #[test]
    fn test_update_policy_keeps_created_at() {
        let engine = engine();
        engine
            .add_policy(allow("p1", PolicyType::All).created_by("admin"))
            .unwrap();
        let created = engine.get_policy("orders", "p1").unwrap();

        engine
            .update_policy(allow("p1", PolicyType::Select).with_name("readers"))
            .unwrap();
        let updated = engine.get_policy("orders", "p1").unwrap();
        assert_eq!(updated.name, "readers");
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.created_by, "admin");

        assert!(matches!(
            engine.update_policy(allow("nope", PolicyType::All)),
            Err(Error::PolicyNotFound(_))
        ));
    }

    #[test]
    fn test_row_filter_end_to_end() {
        let engine = engine();
        engine
            .add_policy(
                allow("tenant", PolicyType::Select).with_using("row.tenant_id = ${user.tenant_id}"),
            )
            .unwrap();

        let filter = engine.get_row_filter("orders", &ctx()).unwrap();
        assert_eq!(filter.sql, "row.tenant_id = t1");
        assert_eq!(
            filter.clauses,
            vec![FilterClause::Compare {
                column: "tenant_id".into(),
                operator: RuleOperator::Eq,
                value: RuleValue::String("t1".into()),
                negated: false,
            }]
        );
    }

    #[test]
    fn test_row_filter_unrestricted_and_denied() {
        let engine = engine();
        assert!(matches!(
            engine.get_row_filter("orders", &ctx()),
            Err(Error::PermissionDenied(_))
        ));

        engine.add_policy(allow("open", PolicyType::Select)).unwrap();
        let filter = engine.get_row_filter("orders", &ctx()).unwrap();
        assert_eq!(filter.sql, "1=1");
        assert!(filter.is_unrestricted());
    }

    #[test]
    fn test_row_filter_folds_and_mirrors() {
        let engine = engine();
        engine
            .add_policy(allow("p1", PolicyType::Select).with_using(
                "${user.roles} CONTAINS 'member'\ncurrent_user_id = row.user_id\n${user.id} > row.rank",
            ))
            .unwrap();

        let filter = engine.get_row_filter("orders", &ctx()).unwrap();
        assert_eq!(filter.clauses[0], FilterClause::Constant(true));
        assert!(matches!(
            &filter.clauses[1],
            FilterClause::Compare { column, operator: RuleOperator::Eq, .. } if column == "user_id"
        ));
        assert!(matches!(
            &filter.clauses[2],
            FilterClause::Compare { column, operator: RuleOperator::Lt, .. } if column == "rank"
        ));
    }

    #[test]
    fn test_missing_context_value_filters_everything() {
        let engine = engine();
        engine
            .add_policy(allow("p1", PolicyType::Select).with_using("row.project_id = ${user.project_id}"))
            .unwrap();
        let filter = engine.get_row_filter("orders", &ctx()).unwrap();
        assert_eq!(filter.clauses, vec![FilterClause::Constant(false)]);
        assert!(!filter.is_unrestricted());
    }

    #[test]
    fn test_validate_insert_check() {
        let engine = engine();
        engine
            .add_policy(allow("p1", PolicyType::Insert).with_check("row.tenant_id = ${user.tenant_id}"))
            .unwrap();

        let ok = engine.validate_insert("orders", &row(json!({"tenant_id": "t1"})), &ctx());
        assert!(ok.allowed);

        let bad = engine.validate_insert("orders", &row(json!({"tenant_id": "t2"})), &ctx());
        assert!(!bad.allowed);
        assert_eq!(bad.reason, REASON_CHECK_FAILED);
        assert_eq!(bad.policy_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_patch_check_covers_only_set_columns() {
        let engine = engine();
        engine
            .add_policy(
                allow("p1", PolicyType::Update)
                    .with_check("row.tenant_id = ${user.tenant_id}\nrow.status = 'open'"),
            )
            .unwrap();
        let decision = engine.check_permission("orders", Operation::Update, &ctx());

        let untouched = engine.enforce_patch_check(&decision, &row(json!({"title": "x"})), &ctx());
        assert!(untouched.allowed);

        let moved = engine.enforce_patch_check(&decision, &row(json!({"tenant_id": "t2"})), &ctx());
        assert!(!moved.allowed);
        assert_eq!(moved.reason, REASON_CHECK_FAILED);

        let closed = engine.enforce_patch_check(&decision, &row(json!({"status": "done"})), &ctx());
        assert!(!closed.allowed);

        let full = engine.enforce_check(&decision, &row(json!({"title": "x"})), &ctx());
        assert!(!full.allowed);
    }

    #[test]
    fn test_validate_update_and_delete() {
        let engine = engine();
        engine
            .add_policy(
                allow("p1", PolicyType::All)
                    .with_using("row.owner_id = ${user.id}")
                    .with_check("row.status IN ['open', 'closed']"),
            )
            .unwrap();

        let mine = row(json!({"owner_id": "u1", "status": "open"}));
        let theirs = row(json!({"owner_id": "u2", "status": "open"}));
        let invalid = row(json!({"owner_id": "u1", "status": "lost"}));

        assert!(engine.validate_update("orders", &mine, &mine, &ctx()).allowed);

        let denied = engine.validate_update("orders", &theirs, &mine, &ctx());
        assert_eq!(denied.reason, REASON_USING_FAILED);

        let denied = engine.validate_update("orders", &mine, &invalid, &ctx());
        assert_eq!(denied.reason, REASON_CHECK_FAILED);

        assert!(engine.validate_delete("orders", &mine, &ctx()).allowed);
        assert_eq!(
            engine.validate_delete("orders", &theirs, &ctx()).reason,
            REASON_USING_FAILED
        );
    }

    #[test]
    fn test_concurrent_checks_see_new_policy() {
        let engine = Arc::new(engine());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        engine.check_permission("orders", Operation::Select, &ctx());
                    }
                })
            })
            .collect();

        engine.add_policy(allow("p1", PolicyType::Select)).unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert!(
            engine
                .check_permission("orders", Operation::Select, &ctx())
                .allowed
        );
    }
}
