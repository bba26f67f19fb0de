//! Policy expression parser
//!
//! Policies are written as newline separated rules of the form
//! `field OP value`:
//!
//! ```text
//! -- tenant isolation
//! row.tenant_id = ${user.tenant_id}
//! ${user.roles} CONTAINS 'admin'
//! NOT row.status IN ['archived', 'deleted']
//! ```
//!
//! Operators are matched in a fixed order (`=`, `>`, `<`, `CONTAINS`, `IN`,
//! `LIKE`) and the first one found outside a quoted literal splits the line.
//! Compound operators such as `>=` are not part of the language.

use std::cmp::Ordering;
use std::fmt;

use rowgate_common::{Error, Result};

/// A typed value decided at parse time
#[derive(Debug, Clone, PartialEq)]
pub enum RuleValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<RuleValue>),
}

impl RuleValue {
    /// Convert a JSON row or claim value
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map_or_else(|| Self::String(n.to_string()), Self::Number),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(_) => Self::String(value.to_string()),
        }
    }

    /// Convert back to JSON for use as a bound SQL argument
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) if is_integral(*n) => serde_json::Value::from(*n as i64),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// String form used for equality and substring checks
    pub fn as_text(&self) -> String {
        self.to_string()
    }

    /// Numeric view; numeric-looking strings count as numbers
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) if looks_numeric(s.trim()) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Equality on string forms. `Null` only equals `Null`.
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Self::Array(_), _) | (_, Self::Array(_)) => false,
            _ => self.as_text() == other.as_text(),
        }
    }

    /// Ordering: numeric when both sides are numbers, string otherwise
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (Self::Null | Self::Array(_), _) | (_, Self::Null | Self::Array(_)) => None,
            _ => Some(self.as_text().cmp(&other.as_text())),
        }
    }
}

impl fmt::Display for RuleValue {
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if is_integral(*n) => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Array(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

#[allow(clippy::float_cmp)]
fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15
}

fn looks_numeric(s: &str) -> bool {
    !s.is_empty()
        && s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
        && s.parse::<f64>().is_ok()
}

/// Right-hand side of a rule
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(RuleValue),
    /// Reference resolved at evaluation time (`row.x`, `user.x`, `${var}`)
    Field(String),
}

/// Rule operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOperator {
    Eq,
    Gt,
    Lt,
    Contains,
    In,
    Like,
}

impl RuleOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Contains => "CONTAINS",
            Self::In => "IN",
            Self::Like => "LIKE",
        }
    }
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parsed `field OP value` rule
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRule {
    pub field: String,
    pub operator: RuleOperator,
    pub value: Operand,
    pub negated: bool,
}

/// Parsed rules of one expression, AND-ed together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub rules: Vec<PolicyRule>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PolicyRule> {
        self.rules.iter()
    }
}

/// Parser for the policy rule language
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyParser;

const SYMBOL_OPERATORS: [(u8, RuleOperator); 3] = [
    (b'=', RuleOperator::Eq),
    (b'>', RuleOperator::Gt),
    (b'<', RuleOperator::Lt),
];

const KEYWORD_OPERATORS: [(&str, RuleOperator); 3] = [
    ("CONTAINS", RuleOperator::Contains),
    ("IN", RuleOperator::In),
    ("LIKE", RuleOperator::Like),
];

impl PolicyParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a multi-line expression. Blank lines and `--` comments are skipped.
    pub fn parse(&self, expression: &str) -> Result<RuleSet> {
        let rules = expression
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("--"))
            .map(|line| self.parse_rule(line))
            .collect::<Result<Vec<_>>>()?;
        Ok(RuleSet { rules })
    }

    /// Parse one rule line
    pub fn parse_rule(&self, line: &str) -> Result<PolicyRule> {
        let (negated, body) = strip_not(line.trim());

        let split = SYMBOL_OPERATORS
            .iter()
            .find_map(|(symbol, op)| {
                scan_unquoted(body, |bytes, i| bytes[i] == *symbol).map(|idx| (idx, 1, *op))
            })
            .or_else(|| {
                KEYWORD_OPERATORS.iter().find_map(|(keyword, op)| {
                    scan_unquoted(body, |bytes, i| keyword_at(bytes, i, keyword))
                        .map(|idx| (idx, keyword.len(), *op))
                })
            });

        let Some((idx, len, operator)) = split else {
            return Err(Error::InvalidExpression(format!(
                "no supported operator in `{line}`"
            )));
        };

        let field = body[..idx].trim();
        let value = body[idx + len..].trim();

        if !is_field_reference(field) {
            return Err(Error::InvalidExpression(format!(
                "unsupported left-hand side `{field}` in `{line}`"
            )));
        }
        if value.is_empty() {
            return Err(Error::InvalidExpression(format!("missing value in `{line}`")));
        }

        Ok(PolicyRule {
            field: field.to_string(),
            operator,
            value: parse_operand(value),
            negated,
        })
    }
}

fn strip_not(line: &str) -> (bool, &str) {
    let bytes = line.as_bytes();
    if bytes.len() > 4 && bytes[..4].eq_ignore_ascii_case(b"NOT ") {
        (true, line[4..].trim_start())
    } else {
        (false, line)
    }
}

/// Index of the first byte outside a quoted literal accepted by `matcher`
fn scan_unquoted(body: &str, mut matcher: impl FnMut(&[u8], usize) -> bool) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if matcher(bytes, i) => return Some(i),
            None => {}
        }
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn keyword_at(bytes: &[u8], i: usize, keyword: &str) -> bool {
    let end = i + keyword.len();
    end <= bytes.len()
        && bytes[i..end].eq_ignore_ascii_case(keyword.as_bytes())
        && (i == 0 || !is_word_byte(bytes[i - 1]))
        && (end == bytes.len() || !is_word_byte(bytes[end]))
}

fn is_field_reference(field: &str) -> bool {
    let path = field
        .strip_prefix("${")
        .and_then(|p| p.strip_suffix('}'))
        .unwrap_or(field);
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn is_reference(value: &str) -> bool {
    (value.starts_with("${") && value.ends_with('}'))
        || ["row.", "user.", "current_"]
            .iter()
            .any(|prefix| value.starts_with(prefix))
}

fn unquote(value: &str) -> Option<&str> {
    let bytes = value.as_bytes();
    let quoted = bytes.len() >= 2
        && (bytes[0] == b'\'' || bytes[0] == b'"')
        && bytes[bytes.len() - 1] == bytes[0];
    quoted.then(|| &value[1..value.len() - 1])
}

fn parse_operand(value: &str) -> Operand {
    if unquote(value).is_none() && is_reference(value) && is_field_reference(value) {
        Operand::Field(value.to_string())
    } else {
        Operand::Literal(parse_literal(value))
    }
}

fn parse_literal(value: &str) -> RuleValue {
    if let Some(inner) = unquote(value) {
        return RuleValue::String(inner.to_string());
    }
    if value.eq_ignore_ascii_case("true") {
        return RuleValue::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return RuleValue::Bool(false);
    }
    if value.eq_ignore_ascii_case("null") {
        return RuleValue::Null;
    }
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        return RuleValue::Array(
            split_unquoted(inner, b',')
                .into_iter()
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(parse_literal)
                .collect(),
        );
    }
    if looks_numeric(value) {
        if let Ok(n) = value.parse() {
            return RuleValue::Number(n);
        }
    }
    RuleValue::String(value.to_string())
}

fn split_unquoted(body: &str, separator: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = body;
    while let Some(idx) = scan_unquoted(rest, |bytes, i| bytes[i] == separator) {
        parts.push(&rest[..idx]);
        rest = &rest[idx + 1..];
    }
    parts.push(rest);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_equality() {
        let rule = PolicyParser::new()
            .parse_rule("row.tenant_id = ${user.tenant_id}")
            .unwrap();
        assert_eq!(rule.field, "row.tenant_id");
        assert_eq!(rule.operator, RuleOperator::Eq);
        assert_eq!(rule.value, Operand::Field("${user.tenant_id}".into()));
        assert!(!rule.negated);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let set = PolicyParser::new()
            .parse("-- owner only\n\ncurrent_user_id = row.user_id\n  \nrow.active = true")
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.rules[1].value, Operand::Literal(RuleValue::Bool(true)));
    }

    #[test]
    fn test_value_typing() {
        let parser = PolicyParser::new();
        let value = |line: &str| parser.parse_rule(line).unwrap().value;

        assert_eq!(
            value("row.name = 'ann'"),
            Operand::Literal(RuleValue::String("ann".into()))
        );
        assert_eq!(value("row.age > 18"), Operand::Literal(RuleValue::Number(18.0)));
        assert_eq!(value("row.deleted_at = null"), Operand::Literal(RuleValue::Null));
        assert_eq!(
            value("row.status IN ['open', 2]"),
            Operand::Literal(RuleValue::Array(vec![
                RuleValue::String("open".into()),
                RuleValue::Number(2.0),
            ]))
        );
        assert_eq!(
            value("row.kind = draft"),
            Operand::Literal(RuleValue::String("draft".into()))
        );
    }

    #[test]
    fn test_keyword_operators() {
        let parser = PolicyParser::new();

        let rule = parser.parse_rule("${user.roles} CONTAINS 'admin'").unwrap();
        assert_eq!(rule.field, "${user.roles}");
        assert_eq!(rule.operator, RuleOperator::Contains);

        let rule = parser.parse_rule("row.inbox CONTAINS 'x'").unwrap();
        assert_eq!(rule.field, "row.inbox");
        assert_eq!(rule.operator, RuleOperator::Contains);

        let rule = parser.parse_rule("row.email LIKE '%@acme.io'").unwrap();
        assert_eq!(rule.operator, RuleOperator::Like);
    }

    #[test]
    fn test_operator_inside_quotes_is_ignored() {
        let rule = PolicyParser::new()
            .parse_rule("row.note CONTAINS 'a=b'")
            .unwrap();
        assert_eq!(rule.operator, RuleOperator::Contains);
        assert_eq!(
            rule.value,
            Operand::Literal(RuleValue::String("a=b".into()))
        );
    }

    #[test]
    fn test_negation() {
        let rule = PolicyParser::new()
            .parse_rule("NOT row.status IN ['archived']")
            .unwrap();
        assert!(rule.negated);
        assert_eq!(rule.field, "row.status");
    }

    #[test]
    fn test_rejects_unsupported_lines() {
        let parser = PolicyParser::new();
        assert!(matches!(
            parser.parse_rule("row.owner"),
            Err(Error::InvalidExpression(_))
        ));
        // `=` is matched first, leaving `row.age >` as the field
        assert!(parser.parse_rule("row.age >= 18").is_err());
        assert!(parser.parse_rule("row.age =").is_err());
    }

    #[test]
    fn test_numeric_compare() {
        let ten = RuleValue::Number(10.0);
        let nine = RuleValue::String("9".into());
        assert_eq!(ten.compare(&nine), Some(Ordering::Greater));
        assert!(RuleValue::Number(5.0).loose_eq(&RuleValue::String("5".into())));
        assert!(!RuleValue::Null.loose_eq(&RuleValue::String("null".into())));
    }
}
