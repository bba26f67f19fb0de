//! RLS rule evaluator

use std::cmp::Ordering;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Map, Value};

use crate::context::{context_key, ExecutionContext};
use crate::parser::{Operand, PolicyRule, RuleOperator, RuleSet, RuleValue};

/// Where a field reference reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    /// `row.x` or `${row.x}`
    Row(&'a str),
    /// `user.x`, `current_user_x`, `current_x` or `${var}`
    Context(&'a str),
    /// Unprefixed name: row first, then context
    Bare(&'a str),
}

impl<'a> Reference<'a> {
    pub fn classify(path: &'a str) -> Self {
        if let Some(inner) = path.strip_prefix("${").and_then(|p| p.strip_suffix('}')) {
            let inner = inner.trim();
            return match inner.strip_prefix("row.") {
                Some(column) => Self::Row(column),
                None => Self::Context(context_key(inner).unwrap_or(inner)),
            };
        }
        if let Some(column) = path.strip_prefix("row.") {
            Self::Row(column)
        } else if let Some(key) = context_key(path) {
            Self::Context(key)
        } else {
            Self::Bare(path)
        }
    }
}

/// Evaluates parsed rules against row data and an execution context
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// All rules must hold. An empty rule set matches.
    pub fn evaluate(
        &self,
        rules: &RuleSet,
        row: Option<&Map<String, Value>>,
        ctx: &ExecutionContext,
    ) -> bool {
        rules.iter().all(|rule| self.evaluate_rule(rule, row, ctx))
    }

    /// Evaluate one rule. Unresolvable references never match, even when negated.
    pub fn evaluate_rule(
        &self,
        rule: &PolicyRule,
        row: Option<&Map<String, Value>>,
        ctx: &ExecutionContext,
    ) -> bool {
        let Some(left) = self.resolve(&rule.field, row, ctx) else {
            return false;
        };
        let Some(right) = self.operand(&rule.value, row, ctx) else {
            return false;
        };

        let outcome = match rule.operator {
            RuleOperator::Eq => left.loose_eq(&right),
            RuleOperator::Gt => left.compare(&right) == Some(Ordering::Greater),
            RuleOperator::Lt => left.compare(&right) == Some(Ordering::Less),
            RuleOperator::Contains => contains(&left, &right),
            RuleOperator::In => in_array(&left, &right),
            RuleOperator::Like => like(&left, &right),
        };

        outcome != rule.negated
    }

    /// Resolve a field reference
    pub fn resolve(
        &self,
        path: &str,
        row: Option<&Map<String, Value>>,
        ctx: &ExecutionContext,
    ) -> Option<RuleValue> {
        let from_row = |column: &str| row.and_then(|r| r.get(column)).map(RuleValue::from_json);
        match Reference::classify(path) {
            Reference::Row(column) => from_row(column),
            Reference::Context(key) => ctx.lookup(key),
            Reference::Bare(name) => from_row(name).or_else(|| ctx.lookup(name)),
        }
    }

    /// Resolve the right-hand side, substituting `${var}` inside string literals
    pub fn operand(
        &self,
        operand: &Operand,
        row: Option<&Map<String, Value>>,
        ctx: &ExecutionContext,
    ) -> Option<RuleValue> {
        match operand {
            Operand::Literal(RuleValue::String(s)) => Some(RuleValue::String(ctx.substitute(s))),
            Operand::Literal(value) => Some(value.clone()),
            Operand::Field(path) => self.resolve(path, row, ctx),
        }
    }
}

fn contains(haystack: &RuleValue, needle: &RuleValue) -> bool {
    match haystack {
        RuleValue::Array(items) => items.iter().any(|item| item.loose_eq(needle)),
        RuleValue::Null => false,
        _ => haystack.as_text().contains(&needle.as_text()),
    }
}

fn in_array(value: &RuleValue, set: &RuleValue) -> bool {
    match set {
        RuleValue::Array(items) => items.iter().any(|item| item.loose_eq(value)),
        _ => false,
    }
}

/// SQL `LIKE`: `%` matches any run, `_` one character
pub fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

const LIKE_CACHE_LIMIT: usize = 256;

/// Compiled LIKE patterns keyed by the substituted pattern text
static LIKE_PATTERNS: Lazy<RwLock<HashMap<String, Regex>>> = Lazy::new(|| RwLock::new(HashMap::new()));

fn like_regex(pattern: &str) -> Option<Regex> {
    if let Some(re) = LIKE_PATTERNS.read().get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(&like_to_regex(pattern)).ok()?;
    let mut patterns = LIKE_PATTERNS.write();
    if patterns.len() >= LIKE_CACHE_LIMIT {
        patterns.clear();
    }
    patterns.insert(pattern.to_string(), re.clone());
    Some(re)
}

fn like(value: &RuleValue, pattern: &RuleValue) -> bool {
    if matches!(value, RuleValue::Null) {
        return false;
    }
    like_regex(&pattern.as_text()).is_some_and(|re| re.is_match(&value.as_text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PolicyParser;
    use proptest::prelude::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    fn check(expr: &str, data: &Map<String, Value>, ctx: &ExecutionContext) -> bool {
        let rules = PolicyParser::new().parse(expr).unwrap();
        PolicyEvaluator::new().evaluate(&rules, Some(data), ctx)
    }

    #[test]
    fn test_like_patterns_are_compiled_once() {
        let ctx = ExecutionContext::new("u1", "t1");
        let data = row(json!({"email": "ann@corp.example"}));
        assert!(check("row.email LIKE '%@corp.example'", &data, &ctx));
        let first = like_regex("%@corp.example").unwrap();
        assert!(check("row.email LIKE '%@corp.example'", &data, &ctx));
        assert_eq!(like_regex("%@corp.example").unwrap().as_str(), first.as_str());
        assert!(!check("row.email LIKE '%@other.example'", &data, &ctx));
    }

    #[test]
    fn test_owner_match() {
        let ctx = ExecutionContext::new("u1", "t1");
        let data = row(json!({"user_id": "u1"}));
        assert!(check("current_user_id = row.user_id", &data, &ctx));
        assert!(!check(
            "current_user_id = row.user_id",
            &row(json!({"user_id": "u2"})),
            &ctx
        ));
    }

    #[test]
    fn test_numeric_ordering() {
        let ctx = ExecutionContext::anonymous();
        let data = row(json!({"amount": 10}));
        assert!(check("row.amount > 9", &data, &ctx));
        assert!(!check("row.amount < 9", &data, &ctx));
        assert!(check("row.name > 'abc'", &row(json!({"name": "abd"})), &ctx));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let ctx = ExecutionContext::anonymous();
        let data = row(json!({}));
        assert!(!check("row.owner = 'x'", &data, &ctx));
        assert!(!check("NOT row.owner = 'x'", &data, &ctx));
        assert!(!check("row.owner = ${user.id}", &row(json!({"owner": "u1"})), &ctx));
    }

    #[test]
    fn test_roles_contains() {
        let ctx = ExecutionContext::new("u1", "t1").with_roles(["viewer", "admin"]);
        let empty = Map::new();
        assert!(check("${user.roles} CONTAINS 'admin'", &empty, &ctx));
        assert!(!check("${user.roles} CONTAINS 'owner'", &empty, &ctx));
    }

    #[test]
    fn test_in_and_like() {
        let ctx = ExecutionContext::anonymous();
        let data = row(json!({"status": "open", "email": "ann@acme.io", "tier": 2}));
        assert!(check("row.status IN ['open', 'pending']", &data, &ctx));
        assert!(check("row.tier IN [1, 2]", &data, &ctx));
        assert!(check("NOT row.status IN ['closed']", &data, &ctx));
        assert!(check("row.email LIKE '%@acme.io'", &data, &ctx));
        assert!(check("row.email LIKE 'a_n@%'", &data, &ctx));
        assert!(!check("row.email LIKE 'bob%'", &data, &ctx));
    }

    #[test]
    fn test_bare_field_prefers_row() {
        let ctx = ExecutionContext::new("u1", "t1");
        let data = row(json!({"tenant_id": "t9"}));
        assert!(check("tenant_id = 't9'", &data, &ctx));
        assert!(check("tenant_id = 't1'", &Map::new(), &ctx));
    }

    #[test]
    fn test_substitution_inside_literal() {
        let ctx = ExecutionContext::new("u1", "t1");
        let data = row(json!({"path": "t1/docs"}));
        assert!(check("row.path LIKE '${user.tenant_id}/%'", &data, &ctx));
    }

    #[test]
    fn test_classify_references() {
        assert_eq!(Reference::classify("row.a"), Reference::Row("a"));
        assert_eq!(Reference::classify("${row.a}"), Reference::Row("a"));
        assert_eq!(Reference::classify("${user.id}"), Reference::Context("id"));
        assert_eq!(Reference::classify("${tenant_id}"), Reference::Context("tenant_id"));
        assert_eq!(Reference::classify("status"), Reference::Bare("status"));
    }

    proptest! {
        #[test]
        fn prop_ordering_is_numeric(a in -10_000i64..10_000, b in -10_000i64..10_000) {
            let data = row(json!({"n": a}));
            let ctx = ExecutionContext::anonymous();
            prop_assert_eq!(check(&format!("row.n > {b}"), &data, &ctx), a > b);
            prop_assert_eq!(check(&format!("row.n < {b}"), &data, &ctx), a < b);
            prop_assert_eq!(check(&format!("row.n = {b}"), &data, &ctx), a == b);
        }

        #[test]
        fn prop_parser_never_panics(expr in "\\PC{0,60}") {
            let _ = PolicyParser::new().parse(&expr);
        }
    }
}
