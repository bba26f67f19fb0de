//! Query options consumed by the SQL builder

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use rowgate_common::{Error, Result};
use rowgate_rls::RowFilter;

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            other => Err(Error::InvalidQueryParam(format!(
                "order direction must be ASC or DESC, got {other}"
            ))),
        }
    }
}

/// One ORDER BY entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Join kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
        }
    }
}

/// Join descriptor. `condition` is trusted configuration and emitted as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOption {
    #[serde(rename = "type", default)]
    pub join_type: JoinType,
    pub table: String,
    #[serde(default)]
    pub alias: Option<String>,
    pub condition: String,
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        })
    }
}

/// Aggregate projection `FUNC(field) AS alias`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateOption {
    pub function: AggregateFunction,
    pub field: String,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Per-request query description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub select: Vec<String>,
    /// `field -> value` or `field -> {"op": ..., "value": ...}`
    #[serde(rename = "where")]
    pub filter: Map<String, Value>,
    pub order: Vec<OrderBy>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub joins: Vec<JoinOption>,
    pub group_by: Vec<String>,
    pub having: Map<String, Value>,
    pub aggregates: Vec<AggregateOption>,
    pub returning: Vec<String>,
    /// RLS row filter AND-ed ahead of `filter`
    #[serde(skip)]
    pub row_filter: Option<RowFilter>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn filter(mut self, field: &str, value: Value) -> Self {
        self.filter.insert(field.to_string(), value);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn join(mut self, join: JoinOption) -> Self {
        self.joins.push(join);
        self
    }

    #[must_use]
    pub fn group_by(mut self, fields: &[&str]) -> Self {
        self.group_by = fields.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn having(mut self, field: &str, value: Value) -> Self {
        self.having.insert(field.to_string(), value);
        self
    }

    #[must_use]
    pub fn aggregate(mut self, function: AggregateFunction, field: &str, alias: Option<&str>) -> Self {
        self.aggregates.push(AggregateOption {
            function,
            field: field.to_string(),
            alias: alias.map(ToString::to_string),
        });
        self
    }

    #[must_use]
    pub fn returning(mut self, fields: &[&str]) -> Self {
        self.returning = fields.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_row_filter(mut self, row_filter: RowFilter) -> Self {
        self.row_filter = Some(row_filter);
        self
    }
}
