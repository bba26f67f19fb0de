//! RLS Policy definitions and storage

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rowgate_common::{Error, Result};

use crate::parser::{PolicyParser, RuleSet};

/// Data operation a request performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Ok(Self::Select),
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::UnsupportedOperation(other.to_string())),
        }
    }
}

/// RLS Policy command types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyType {
    Select,
    Insert,
    Update,
    Delete,
    #[default]
    All,
}

impl PolicyType {
    /// Check if this policy type applies to a given operation
    pub fn applies_to(self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (Self::All, _)
                | (Self::Select, Operation::Select)
                | (Self::Insert, Operation::Insert)
                | (Self::Update, Operation::Update)
                | (Self::Delete, Operation::Delete)
        )
    }
}

/// Whether a matching policy grants or refuses access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

fn default_enabled() -> bool {
    true
}

/// RLS Policy definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(rename = "type", default)]
    pub policy_type: PolicyType,
    pub effect: PolicyEffect,
    /// Gate condition over the caller context; empty matches everyone
    #[serde(default)]
    pub definition: String,
    /// Row filter for SELECT, UPDATE, DELETE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using: Option<String>,
    /// Write constraint for INSERT, UPDATE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_check: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher is evaluated first
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub updated_by: String,
}

impl Policy {
    /// Create a new enabled policy
    pub fn new(
        id: impl Into<String>,
        table: impl Into<String>,
        tenant_id: impl Into<String>,
        policy_type: PolicyType,
        effect: PolicyEffect,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: String::new(),
            table: table.into(),
            tenant_id: tenant_id.into(),
            policy_type,
            effect,
            definition: String::new(),
            using: None,
            with_check: None,
            enabled: true,
            priority: 0,
            check_groups: Vec::new(),
            attributes: HashMap::new(),
            created_at: now,
            updated_at: now,
            created_by: String::new(),
            updated_by: String::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the gate condition
    #[must_use]
    pub fn with_definition(mut self, definition: &str) -> Self {
        self.definition = definition.to_string();
        self
    }

    /// Set USING expression
    #[must_use]
    pub fn with_using(mut self, expr: &str) -> Self {
        self.using = Some(expr.to_string());
        self
    }

    /// Set WITH CHECK expression
    #[must_use]
    pub fn with_check(mut self, expr: &str) -> Self {
        self.with_check = Some(expr.to_string());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_check_groups(mut self, groups: Vec<String>) -> Self {
        self.check_groups = groups;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn created_by(mut self, user: &str) -> Self {
        self.created_by = user.to_string();
        self.updated_by = user.to_string();
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check required identity fields
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidPolicy("policy ID cannot be empty".into()));
        }
        if self.table.trim().is_empty() {
            return Err(Error::InvalidPolicy("policy table cannot be empty".into()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(Error::InvalidPolicy(
                "policy tenant ID cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

/// A policy with its expressions parsed, built once at registration
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub policy: Policy,
    pub definition: RuleSet,
    pub using: Option<RuleSet>,
    pub check: Option<RuleSet>,
}

impl CompiledPolicy {
    pub fn compile(policy: Policy, parser: &PolicyParser) -> Result<Self> {
        policy.validate()?;

        let parse = |clause: &str, expr: &str| {
            parser.parse(expr).map_err(|e| {
                Error::InvalidExpression(format!("{clause} of policy {}: {e}", policy.id))
            })
        };
        let optional = |clause: &str, expr: Option<&String>| {
            expr.filter(|e| !e.trim().is_empty())
                .map(|e| parse(clause, e))
                .transpose()
        };

        let definition = parse("definition", &policy.definition)?;
        let using = optional("USING clause", policy.using.as_ref())?;
        let check = optional("WITH CHECK clause", policy.with_check.as_ref())?;

        Ok(Self {
            policy,
            definition,
            using,
            check,
        })
    }

    pub fn id(&self) -> &str {
        &self.policy.id
    }
}

/// Policy store for managing RLS policies
pub struct PolicyStore {
    /// Policies by table, in registration order
    policies: RwLock<HashMap<String, Vec<Arc<CompiledPolicy>>>>,
    /// Bumped on every mutation
    generation: AtomicU64,
    max_per_table: usize,
}

impl PolicyStore {
    pub fn new(max_per_table: usize) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            max_per_table,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn check_ceiling(&self, list: &[Arc<CompiledPolicy>], compiled: &CompiledPolicy) -> Result<()> {
        if !compiled.policy.enabled {
            return Ok(());
        }
        let active = list
            .iter()
            .filter(|p| p.policy.enabled && p.id() != compiled.id())
            .count();
        if active >= self.max_per_table {
            return Err(Error::PolicyLimitExceeded {
                table: compiled.policy.table.clone(),
                max: self.max_per_table,
            });
        }
        Ok(())
    }

    /// Register a compiled policy. Only enabled policies count toward the
    /// per-table ceiling.
    pub fn insert(&self, compiled: CompiledPolicy) -> Result<Arc<CompiledPolicy>> {
        let mut policies = self.policies.write();
        let existing = policies
            .get(&compiled.policy.table)
            .map_or(&[][..], Vec::as_slice);

        if existing.iter().any(|p| p.id() == compiled.id()) {
            return Err(Error::ValidationError(format!(
                "policy {} already exists on table {}",
                compiled.id(),
                compiled.policy.table
            )));
        }
        self.check_ceiling(existing, &compiled)?;

        let compiled = Arc::new(compiled);
        policies
            .entry(compiled.policy.table.clone())
            .or_default()
            .push(Arc::clone(&compiled));
        self.bump();
        Ok(compiled)
    }

    /// Replace a policy with the same table and id, keeping its position
    pub fn replace(&self, compiled: CompiledPolicy) -> Result<Arc<CompiledPolicy>> {
        let mut policies = self.policies.write();
        let list = policies
            .get_mut(&compiled.policy.table)
            .ok_or_else(|| Error::PolicyNotFound(compiled.id().to_string()))?;
        let idx = list
            .iter()
            .position(|p| p.id() == compiled.id())
            .ok_or_else(|| Error::PolicyNotFound(compiled.id().to_string()))?;
        self.check_ceiling(list, &compiled)?;

        let compiled = Arc::new(compiled);
        list[idx] = Arc::clone(&compiled);
        self.bump();
        Ok(compiled)
    }

    /// Remove a policy, dropping the table entry once it is empty
    pub fn remove(&self, table: &str, id: &str) -> Result<Arc<CompiledPolicy>> {
        let mut policies = self.policies.write();
        let list = policies
            .get_mut(table)
            .ok_or_else(|| Error::PolicyNotFound(id.to_string()))?;
        let idx = list
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| Error::PolicyNotFound(id.to_string()))?;

        let removed = list.remove(idx);
        if list.is_empty() {
            policies.remove(table);
        }
        self.bump();
        Ok(removed)
    }

    /// Enabled policies for `operation`, highest priority first with ties in
    /// registration order, together with the generation they were read at
    pub fn applicable(&self, table: &str, operation: Operation) -> (Vec<Arc<CompiledPolicy>>, u64) {
        let policies = self.policies.read();
        let generation = self.generation();
        let mut matching: Vec<Arc<CompiledPolicy>> = policies
            .get(table)
            .map(|list| {
                list.iter()
                    .filter(|p| p.policy.enabled && p.policy.policy_type.applies_to(operation))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|p| Reverse(p.policy.priority));
        (matching, generation)
    }

    pub fn list(&self, table: &str) -> Vec<Policy> {
        self.policies
            .read()
            .get(table)
            .map(|list| list.iter().map(|p| p.policy.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, table: &str, id: &str) -> Option<Policy> {
        self.policies
            .read()
            .get(table)
            .and_then(|list| list.iter().find(|p| p.id() == id))
            .map(|p| p.policy.clone())
    }

    pub fn count(&self, table: &str) -> usize {
        self.policies.read().get(table).map_or(0, Vec::len)
    }

    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.policies.read().keys().cloned().collect();
        tables.sort();
        tables
    }
}
