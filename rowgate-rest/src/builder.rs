//! Parameterized SQL generation
//!
//! Identifiers go through [`crate::identifier`], values through [`BindArgs`].
//! Only validated, non-negative LIMIT/OFFSET numbers are written into the SQL
//! text directly. Placeholders are numbered in the order they appear in the
//! statement: SET values, then the RLS filter, then WHERE, then HAVING.

use serde::Serialize;
use serde_json::{Map, Value};

use rowgate_common::config::PlaceholderStyle;
use rowgate_common::{Error, Result};

use crate::condition::{BindArgs, ConditionCompiler};
use crate::filter::render_row_filter;
use crate::identifier::{try_quote, try_quote_qualified};
use crate::options::{AggregateFunction, AggregateOption, JoinOption, QueryOptions};

/// SQL text plus its bound arguments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Stateless statement builder
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder {
    style: PlaceholderStyle,
    compiler: ConditionCompiler,
}

impl QueryBuilder {
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            compiler: ConditionCompiler::new(),
        }
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.style
    }

    fn args(&self) -> BindArgs {
        BindArgs::new(self.style)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub fn build_select(&self, table: &str, opts: &QueryOptions) -> Result<BuiltQuery> {
        let mut args = self.args();
        let mut sql = format!("SELECT {} FROM {}", projection(opts)?, try_quote(table)?);
        push_joins(&mut sql, &opts.joins)?;
        self.push_where(&mut sql, opts, &opts.filter, &mut args)?;
        push_group_by(&mut sql, &opts.group_by)?;
        if let Some(having) = self.compiler.compile(&opts.having, &mut args)? {
            sql.push_str(" HAVING ");
            sql.push_str(&having);
        }
        push_order(&mut sql, opts)?;
        push_pagination(&mut sql, opts)?;
        Ok(BuiltQuery {
            sql,
            args: args.into_values(),
        })
    }

    pub fn build_insert(
        &self,
        table: &str,
        data: &Map<String, Value>,
        opts: &QueryOptions,
    ) -> Result<BuiltQuery> {
        if data.is_empty() {
            return Err(Error::NoDataProvided);
        }
        let mut args = self.args();
        let mut columns = Vec::with_capacity(data.len());
        let mut placeholders = Vec::with_capacity(data.len());
        for (column, value) in data {
            columns.push(try_quote(column)?);
            placeholders.push(args.push(value.clone()));
        }
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            try_quote(table)?,
            columns.join(", "),
            placeholders.join(", ")
        );
        push_returning(&mut sql, &opts.returning)?;
        Ok(BuiltQuery {
            sql,
            args: args.into_values(),
        })
    }

    /// Without an explicit filter the update is narrowed to `id = data.id`
    pub fn build_update(
        &self,
        table: &str,
        data: &Map<String, Value>,
        opts: &QueryOptions,
    ) -> Result<BuiltQuery> {
        if data.is_empty() {
            return Err(Error::NoDataProvided);
        }
        let filter = if opts.filter.is_empty() {
            let id = data.get("id").ok_or_else(|| {
                Error::WhereRequiredForSafety(format!("UPDATE on {table} without a filter or id"))
            })?;
            let mut by_id = Map::new();
            by_id.insert("id".to_string(), id.clone());
            by_id
        } else {
            opts.filter.clone()
        };

        let mut args = self.args();
        let assignments = data
            .iter()
            .map(|(column, value)| Ok(format!("{} = {}", try_quote(column)?, args.push(value.clone()))))
            .collect::<Result<Vec<_>>>()?;
        let mut sql = format!("UPDATE {} SET {}", try_quote(table)?, assignments.join(", "));
        self.push_where(&mut sql, opts, &filter, &mut args)?;
        push_returning(&mut sql, &opts.returning)?;
        Ok(BuiltQuery {
            sql,
            args: args.into_values(),
        })
    }

    /// Refuses to build without an explicit filter, whatever the RLS filter says
    pub fn build_delete(&self, table: &str, opts: &QueryOptions) -> Result<BuiltQuery> {
        let quoted = try_quote(table)?;
        if opts.filter.is_empty() {
            return Err(Error::WhereRequiredForSafety(format!("DELETE on {table}")));
        }
        let mut args = self.args();
        let mut sql = format!("DELETE FROM {quoted}");
        self.push_where(&mut sql, opts, &opts.filter, &mut args)?;
        push_returning(&mut sql, &opts.returning)?;
        Ok(BuiltQuery {
            sql,
            args: args.into_values(),
        })
    }

    pub fn build_count_query(&self, table: &str, opts: &QueryOptions) -> Result<BuiltQuery> {
        let mut args = self.args();
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", try_quote(table)?);
        push_joins(&mut sql, &opts.joins)?;
        self.push_where(&mut sql, opts, &opts.filter, &mut args)?;
        push_group_by(&mut sql, &opts.group_by)?;
        Ok(BuiltQuery {
            sql,
            args: args.into_values(),
        })
    }

    /// First identifier error in the table, select, order or group-by fields
    pub fn validate_query(&self, table: &str, opts: &QueryOptions) -> Result<()> {
        try_quote(table)?;
        for field in &opts.select {
            select_field(field)?;
        }
        for order in &opts.order {
            try_quote_qualified(&order.field)?;
        }
        for field in &opts.group_by {
            try_quote_qualified(field)?;
        }
        Ok(())
    }

    fn push_where(
        &self,
        sql: &mut String,
        opts: &QueryOptions,
        filter: &Map<String, Value>,
        args: &mut BindArgs,
    ) -> Result<()> {
        let rls = match &opts.row_filter {
            Some(row_filter) => render_row_filter(row_filter, args)?,
            None => None,
        };
        let user = self.compiler.compile(filter, args)?;
        let clause = match (rls, user) {
            (Some(rls), Some(user)) => format!("({rls}) AND ({user})"),
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => return Ok(()),
        };
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
        Ok(())
    }
}

// ============================================================================
// Clause helpers
// ============================================================================

fn select_field(field: &str) -> Result<String> {
    if field == "*" {
        Ok(field.to_string())
    } else {
        try_quote_qualified(field)
    }
}

fn aggregate(agg: &AggregateOption) -> Result<String> {
    let target = if agg.field == "*" && agg.function == AggregateFunction::Count {
        "*".to_string()
    } else {
        try_quote_qualified(&agg.field)?
    };
    let mut out = format!("{}({target})", agg.function);
    if let Some(alias) = &agg.alias {
        out.push_str(" AS ");
        out.push_str(&try_quote(alias)?);
    }
    Ok(out)
}

fn projection(opts: &QueryOptions) -> Result<String> {
    let mut parts = opts
        .select
        .iter()
        .map(|f| select_field(f))
        .collect::<Result<Vec<_>>>()?;
    for agg in &opts.aggregates {
        parts.push(aggregate(agg)?);
    }
    if parts.is_empty() {
        Ok("*".to_string())
    } else {
        Ok(parts.join(", "))
    }
}

fn push_joins(sql: &mut String, joins: &[JoinOption]) -> Result<()> {
    for join in joins {
        sql.push(' ');
        sql.push_str(join.join_type.as_sql());
        sql.push(' ');
        sql.push_str(&try_quote(&join.table)?);
        if let Some(alias) = &join.alias {
            sql.push_str(" AS ");
            sql.push_str(&try_quote(alias)?);
        }
        sql.push_str(" ON ");
        sql.push_str(&join.condition);
    }
    Ok(())
}

fn push_group_by(sql: &mut String, fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Ok(());
    }
    let quoted = fields
        .iter()
        .map(|f| try_quote_qualified(f))
        .collect::<Result<Vec<_>>>()?;
    sql.push_str(" GROUP BY ");
    sql.push_str(&quoted.join(", "));
    Ok(())
}

fn push_order(sql: &mut String, opts: &QueryOptions) -> Result<()> {
    if opts.order.is_empty() {
        return Ok(());
    }
    let parts = opts
        .order
        .iter()
        .map(|o| Ok(format!("{} {}", try_quote_qualified(&o.field)?, o.direction.as_sql())))
        .collect::<Result<Vec<_>>>()?;
    sql.push_str(" ORDER BY ");
    sql.push_str(&parts.join(", "));
    Ok(())
}

fn non_negative(name: &str, value: i64) -> Result<i64> {
    if value < 0 {
        Err(Error::InvalidQueryParam(format!("{name} must be non-negative, got {value}")))
    } else {
        Ok(value)
    }
}

fn push_pagination(sql: &mut String, opts: &QueryOptions) -> Result<()> {
    if let Some(limit) = opts.limit {
        sql.push_str(&format!(" LIMIT {}", non_negative("limit", limit)?));
    }
    if let Some(offset) = opts.offset {
        sql.push_str(&format!(" OFFSET {}", non_negative("offset", offset)?));
    }
    Ok(())
}

fn push_returning(sql: &mut String, fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Ok(());
    }
    let parts = fields
        .iter()
        .map(|f| select_field(f))
        .collect::<Result<Vec<_>>>()?;
    sql.push_str(" RETURNING ");
    sql.push_str(&parts.join(", "));
    Ok(())
}
