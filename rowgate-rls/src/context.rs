//! Execution context for request-scoped security information

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::RuleValue;

/// Caller identity and request metadata used to evaluate policies.
///
/// Supplied by the surrounding auth layer and never mutated once a request
/// is being served. Empty strings mean "not provided" and never match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionContext {
    pub user_id: String,
    pub tenant_id: String,
    pub project_id: String,
    /// Ordered, de-duplicated role names
    pub roles: Vec<String>,
    pub claims: HashMap<String, serde_json::Value>,
    pub request_id: String,
    pub ip: String,
    pub user_agent: String,
    pub time: DateTime<Utc>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            tenant_id: String::new(),
            project_id: String::new(),
            roles: Vec::new(),
            claims: HashMap::new(),
            request_id: String::new(),
            ip: String::new(),
            user_agent: String::new(),
            time: Utc::now(),
        }
    }
}

impl ExecutionContext {
    /// Create a context for a user within a tenant
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    /// Create a context with no identity
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    /// Set roles, keeping first-seen order and dropping duplicates
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.clear();
        for role in roles {
            let role = role.into();
            if !role.is_empty() && !self.roles.contains(&role) {
                self.roles.push(role);
            }
        }
        self
    }

    #[must_use]
    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    #[must_use]
    pub fn with_client(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip = ip.into();
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Length-prefixed encoding of the roles, unambiguous for any role text
    pub fn roles_key(&self) -> String {
        let roles: String = self
            .roles
            .iter()
            .map(|role| format!(":{}:{role}", role.len()))
            .collect();
        format!("{}{roles}", self.roles.len())
    }

    /// Look up a context attribute (`id`, `tenant_id`, `roles`, a claim, ...)
    pub fn lookup(&self, key: &str) -> Option<RuleValue> {
        let text = |value: &str| (!value.is_empty()).then(|| RuleValue::String(value.to_string()));
        match key {
            "id" | "user_id" => text(&self.user_id),
            "tenant_id" | "tenant" => text(&self.tenant_id),
            "project_id" | "project" => text(&self.project_id),
            "request_id" => text(&self.request_id),
            "ip" => text(&self.ip),
            "user_agent" => text(&self.user_agent),
            "roles" => Some(RuleValue::Array(
                self.roles.iter().cloned().map(RuleValue::String).collect(),
            )),
            "time" => Some(RuleValue::String(self.time.to_rfc3339())),
            _ => {
                let claim = key.strip_prefix("claims.").unwrap_or(key);
                self.claims.get(claim).map(RuleValue::from_json)
            }
        }
    }

    /// Replace `${var}` placeholders with context values.
    ///
    /// Row references (`${row.x}`) and unknown variables are left in place.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                rest = &rest[start..];
                break;
            };
            let var = after[..end].trim();
            let resolved = if var.starts_with("row.") {
                None
            } else {
                self.lookup(context_key(var).unwrap_or(var))
            };
            match resolved {
                Some(value) => out.push_str(&value.as_text()),
                None => out.push_str(&rest[start..start + end + 3]),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// Map a context reference (`user.x`, `current_user_x`, `current_x`) to the
/// attribute name understood by [`ExecutionContext::lookup`]
pub fn context_key(path: &str) -> Option<&str> {
    path.strip_prefix("user.")
        .or_else(|| path.strip_prefix("current_user_"))
        .or_else(|| path.strip_prefix("current_"))
}
