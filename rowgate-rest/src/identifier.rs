//! Identifier validation and quoting
//!
//! Every table and column name reaches SQL text through [`try_quote`] (or
//! [`quote_identifier`]).

use once_cell::sync::Lazy;
use regex::Regex;

use rowgate_common::{Error, Result};

/// Longest accepted identifier
pub const MAX_IDENTIFIER_LEN: usize = 64;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("identifier regex is valid"));

/// Substrings that never belong in an identifier (checked lowercase)
const FORBIDDEN: &[&str] = &["'", ";", "--", "/*", "*/", "xp_", "sp_", "0x"];

const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER",
    "TRUNCATE", "UNION", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "GROUP", "ORDER", "BY",
    "HAVING", "LIMIT", "OFFSET", "AND", "OR", "NOT", "NULL", "TRUE", "FALSE", "CASE", "WHEN",
    "THEN", "ELSE", "END", "IF", "EXISTS", "IN", "BETWEEN", "LIKE", "ILIKE", "IS", "DISTINCT",
    "ALL", "ANY", "SOME", "CAST", "AS", "ON", "USING", "INDEX", "TABLE", "VIEW", "DATABASE",
    "SCHEMA", "FUNCTION", "PROCEDURE", "TRIGGER", "CONSTRAINT", "PRIMARY", "FOREIGN", "KEY",
    "REFERENCES", "CHECK", "UNIQUE", "DEFAULT",
];

/// Whether `name` is an SQL reserved keyword (case-insensitive)
pub fn is_reserved(name: &str) -> bool {
    RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(name))
}

/// Validate a table or column name
pub fn validate(name: &str) -> Result<()> {
    let invalid = |reason: &str| Err(Error::InvalidIdentifier(format!("{name:?}: {reason}")));

    if name.is_empty() {
        return invalid("empty identifier");
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return invalid("longer than 64 characters");
    }
    let lower = name.to_ascii_lowercase();
    if let Some(pattern) = FORBIDDEN.iter().find(|p| lower.contains(*p)) {
        return invalid(&format!("contains forbidden sequence {pattern:?}"));
    }
    if !IDENTIFIER_RE.is_match(name) {
        return invalid("must start with a letter and contain only letters, digits and underscores");
    }
    if is_reserved(name) {
        return invalid("reserved keyword");
    }
    Ok(())
}

/// Validate and double-quote an identifier
pub fn try_quote(name: &str) -> Result<String> {
    validate(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Double-quote an identifier, or return an empty string if it is invalid
pub fn quote_identifier(name: &str) -> String {
    try_quote(name).unwrap_or_default()
}

/// Quote `column` or `table.column`, validating each part
pub fn try_quote_qualified(name: &str) -> Result<String> {
    match name.split_once('.') {
        Some((table, column)) => Ok(format!("{}.{}", try_quote(table)?, try_quote(column)?)),
        None => try_quote(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_identifiers() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("created_at2"), "\"created_at2\"");
        assert!(validate(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        for name in [
            "",
            "1users",
            "_users",
            "user name",
            "users;",
            "users--",
            "a/*b",
            "sp_who",
            "XP_cmdshell",
            "col0x1",
            "col0X1",
            "select",
            "Order",
            "public.users",
        ] {
            assert!(validate(name).is_err(), "{name} should be rejected");
            assert_eq!(quote_identifier(name), "");
        }
        assert!(validate(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_qualified() {
        assert_eq!(try_quote_qualified("o.total").unwrap(), "\"o\".\"total\"");
        assert_eq!(try_quote_qualified("total").unwrap(), "\"total\"");
        assert!(try_quote_qualified("o.select").is_err());
        assert!(try_quote_qualified("a.b.c").is_err());
    }

    proptest! {
        #[test]
        fn prop_quoted_never_breaks_out(name in "\\PC{0,80}") {
            let quoted = quote_identifier(&name);
            if !quoted.is_empty() {
                prop_assert!(quoted.starts_with('"') && quoted.ends_with('"'));
                let inner = &quoted[1..quoted.len() - 1];
                prop_assert!(!inner.contains('"'));
                prop_assert!(!inner.contains('\''));
                prop_assert!(!inner.contains(';'));
                prop_assert!(!inner.contains("--"));
                prop_assert!(!is_reserved(inner));
            }
        }

        #[test]
        fn prop_injection_payloads_rejected(
            prefix in "[a-z]{1,8}",
            payload in prop::sample::select(vec!["'", ";", "--", "/*", "*/", " ", "\""]),
            suffix in "[a-z ]{0,8}",
        ) {
            let name = format!("{prefix}{payload}{suffix}");
            prop_assert_eq!(quote_identifier(&name), "");
        }

        #[test]
        fn prop_keywords_rejected(idx in 0usize..RESERVED.len(), upper in any::<bool>()) {
            let kw = RESERVED[idx];
            let name = if upper { kw.to_string() } else { kw.to_ascii_lowercase() };
            prop_assert!(validate(&name).is_err());
        }
    }
}
