//! Rendering of RLS row filters as bound SQL predicates

use serde_json::Value;

use rowgate_common::Result;
use rowgate_rls::{FilterClause, RowFilter, RuleOperator, RuleValue};

use crate::condition::{BindArgs, ALWAYS, NEVER};
use crate::identifier::try_quote_qualified;

/// Render `filter` as a predicate; `None` when it restricts nothing
pub fn render_row_filter(filter: &RowFilter, args: &mut BindArgs) -> Result<Option<String>> {
    if filter.is_unrestricted() {
        return Ok(None);
    }
    let parts = filter
        .clauses
        .iter()
        .filter(|clause| !matches!(clause, FilterClause::Constant(true)))
        .map(|clause| render_clause(clause, args))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(parts.join(" AND ")))
}

fn render_clause(clause: &FilterClause, args: &mut BindArgs) -> Result<String> {
    let (sql, negated) = match clause {
        FilterClause::Constant(true) => return Ok(ALWAYS.to_string()),
        FilterClause::Constant(false) => return Ok(NEVER.to_string()),
        FilterClause::Compare {
            column,
            operator,
            value,
            negated,
        } => (compare(&try_quote_qualified(column)?, *operator, value, args), *negated),
        FilterClause::Columns {
            left,
            operator,
            right,
            negated,
        } => {
            let sql = format!(
                "{} {} {}",
                try_quote_qualified(left)?,
                symbol(*operator),
                try_quote_qualified(right)?
            );
            (sql, *negated)
        }
    };
    Ok(if negated { format!("NOT ({sql})") } else { sql })
}

fn compare(column: &str, operator: RuleOperator, value: &RuleValue, args: &mut BindArgs) -> String {
    match (operator, value) {
        (RuleOperator::Eq, RuleValue::Null) => format!("{column} IS NULL"),
        (RuleOperator::In, RuleValue::Array(items)) if items.is_empty() => NEVER.to_string(),
        (RuleOperator::In, RuleValue::Array(items)) => {
            let placeholders: Vec<String> = items.iter().map(|v| args.push(v.to_json())).collect();
            format!("{column} IN ({})", placeholders.join(", "))
        }
        (RuleOperator::In, _) | (_, RuleValue::Null) => NEVER.to_string(),
        (RuleOperator::Contains, value) => {
            let pattern = format!("%{}%", escape_like(&value.as_text()));
            format!("{column} LIKE {} ESCAPE '\\'", args.push(Value::String(pattern)))
        }
        (operator, value) => format!("{column} {} {}", symbol(operator), args.push(value.to_json())),
    }
}

/// Escape LIKE wildcards so the text matches literally
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn symbol(operator: RuleOperator) -> &'static str {
    match operator {
        RuleOperator::Eq => "=",
        RuleOperator::Gt => ">",
        RuleOperator::Lt => "<",
        RuleOperator::Like | RuleOperator::Contains => "LIKE",
        RuleOperator::In => "IN",
    }
}
