//! Condition compiler for WHERE and HAVING clauses
//!
//! A filter map compiles to AND-ed SQL fragments with every value carried in
//! the bound argument list:
//!
//! | value                          | SQL                         |
//! |--------------------------------|-----------------------------|
//! | scalar                         | `"f" = $1`                  |
//! | `null`                         | `"f" IS NULL`               |
//! | array                          | `"f" IN ($1, $2)`           |
//! | `{"op": "gt", "value": 18}`    | `"f" > $1`                  |
//! | `{"op": "in", "value": []}`    | `1=0`                       |
//! | `{"op": "not in", "value": []}`| `1=1`                       |

use serde_json::{Map, Value};

use rowgate_common::config::PlaceholderStyle;
use rowgate_common::{Error, Result};

use crate::identifier::try_quote_qualified;

/// Predicate that matches no rows
pub const NEVER: &str = "1=0";
/// Predicate that matches every row
pub const ALWAYS: &str = "1=1";

/// Bound argument accumulator
#[derive(Debug, Clone)]
pub struct BindArgs {
    style: PlaceholderStyle,
    values: Vec<Value>,
}

impl BindArgs {
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            values: Vec::new(),
        }
    }

    /// Bind a value and return its placeholder
    pub fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        match self.style {
            PlaceholderStyle::Numbered => format!("${}", self.values.len()),
            PlaceholderStyle::Anonymous => "?".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Comparison operators accepted in complex conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    ILike,
    Is,
    IsNull,
    IsNotNull,
    In,
    NotIn,
    Between,
}

impl ConditionOp {
    /// Parse an operator name or symbol (`gte`, `>=`, `not in`, ...)
    pub fn parse(op: &str) -> Result<Self> {
        let normalized = op.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
        let parsed = match normalized.as_str() {
            "eq" | "=" | "==" => Self::Eq,
            "ne" | "neq" | "!=" | "<>" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" => Self::Gte,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" => Self::Lte,
            "like" => Self::Like,
            "not like" => Self::NotLike,
            "ilike" => Self::ILike,
            "is" => Self::Is,
            "is null" => Self::IsNull,
            "is not null" => Self::IsNotNull,
            "in" => Self::In,
            "not in" | "nin" => Self::NotIn,
            "between" => Self::Between,
            _ => return Err(Error::UnsupportedOperation(op.to_string())),
        };
        Ok(parsed)
    }

    fn comparison(self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::Ne => Some("!="),
            Self::Gt => Some(">"),
            Self::Gte => Some(">="),
            Self::Lt => Some("<"),
            Self::Lte => Some("<="),
            Self::Like => Some("LIKE"),
            Self::NotLike => Some("NOT LIKE"),
            Self::ILike => Some("ILIKE"),
            _ => None,
        }
    }
}

/// Compiles filter maps into parameterized SQL
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionCompiler;

impl ConditionCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Compile a whole map; `None` when it is empty
    pub fn compile(&self, filter: &Map<String, Value>, args: &mut BindArgs) -> Result<Option<String>> {
        if filter.is_empty() {
            return Ok(None);
        }
        let parts = filter
            .iter()
            .map(|(field, value)| self.compile_entry(field, value, args))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(parts.join(" AND ")))
    }

    /// Compile one `field -> value` entry
    pub fn compile_entry(&self, field: &str, value: &Value, args: &mut BindArgs) -> Result<String> {
        let column = try_quote_qualified(field)?;
        match value {
            Value::Object(clause) => {
                let op = match clause.get("op") {
                    None => ConditionOp::Eq,
                    Some(Value::String(op)) => ConditionOp::parse(op)?,
                    Some(other) => return Err(invalid(field, &format!("op must be a string, got {other}"))),
                };
                let operand = clause.get("value").unwrap_or(&Value::Null);
                self.compile_op(field, &column, op, operand, args)
            }
            Value::Array(items) => Ok(in_list(&column, items, false, args)),
            Value::Null => Ok(format!("{column} IS NULL")),
            scalar => Ok(format!("{column} = {}", args.push(scalar.clone()))),
        }
    }

    /// Compile `column op value` for an already quoted column
    pub fn compile_op(
        &self,
        field: &str,
        column: &str,
        op: ConditionOp,
        value: &Value,
        args: &mut BindArgs,
    ) -> Result<String> {
        match (op, value) {
            (ConditionOp::Eq, Value::Null) | (ConditionOp::IsNull, _) => {
                Ok(format!("{column} IS NULL"))
            }
            (ConditionOp::Ne, Value::Null) | (ConditionOp::IsNotNull, _) => {
                Ok(format!("{column} IS NOT NULL"))
            }
            (ConditionOp::Is, _) => is_condition(field, column, value),
            (ConditionOp::In | ConditionOp::NotIn, Value::Array(items)) => {
                Ok(in_list(column, items, op == ConditionOp::NotIn, args))
            }
            (ConditionOp::In | ConditionOp::NotIn, _) => {
                Err(invalid(field, "IN requires an array value"))
            }
            (ConditionOp::Between, Value::Array(bounds)) if bounds.len() == 2 => {
                let low = args.push(bounds[0].clone());
                let high = args.push(bounds[1].clone());
                Ok(format!("{column} BETWEEN {low} AND {high}"))
            }
            (ConditionOp::Between, _) => {
                Err(invalid(field, "BETWEEN requires exactly two values"))
            }
            (op, value) => {
                let sql_op = op
                    .comparison()
                    .ok_or_else(|| Error::UnsupportedOperation(format!("{op:?}")))?;
                Ok(format!("{column} {sql_op} {}", args.push(value.clone())))
            }
        }
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::InvalidCondition {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn in_list(column: &str, items: &[Value], negated: bool, args: &mut BindArgs) -> String {
    if items.is_empty() {
        return if negated { ALWAYS } else { NEVER }.to_string();
    }
    let placeholders: Vec<String> = items.iter().map(|v| args.push(v.clone())).collect();
    let keyword = if negated { "NOT IN" } else { "IN" };
    format!("{column} {keyword} ({})", placeholders.join(", "))
}

fn is_condition(field: &str, column: &str, value: &Value) -> Result<String> {
    let target = match value {
        Value::Null => "NULL",
        Value::Bool(true) => "TRUE",
        Value::Bool(false) => "FALSE",
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "null" => "NULL",
            "not null" => "NOT NULL",
            "true" => "TRUE",
            "false" => "FALSE",
            _ => return Err(invalid(field, "IS accepts null, not null, true or false")),
        },
        _ => return Err(invalid(field, "IS accepts null, not null, true or false")),
    };
    Ok(format!("{column} IS {target}"))
}
