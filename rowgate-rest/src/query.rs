//! Query string translation into [`QueryOptions`]
//!
//! `select=id,name&order=created_at.desc&limit=10&age={"op":"gt","value":18}`
//!
//! Every key other than `select`, `order`, `limit` and `offset` is a WHERE
//! entry. Values are JSON-decoded when possible and kept as literal strings
//! otherwise; a repeated key collects its values into an implicit IN list.

use serde_json::Value;

use rowgate_common::config::QueryConfig;
use rowgate_common::{Error, Result};

use crate::options::{OrderBy, OrderDirection, QueryOptions};

const RESERVED_PARAMS: &[&str] = &["select", "order", "limit", "offset"];

/// Parse a raw (still percent-encoded) query string
pub fn parse_query(query_string: &str, config: &QueryConfig) -> Result<QueryOptions> {
    let mut opts = QueryOptions::new();

    for (key, value) in url::form_urlencoded::parse(query_string.as_bytes()) {
        match key.as_ref() {
            "select" => opts.select = parse_select(&value),
            "order" => opts.order = parse_order(&value)?,
            "limit" => opts.limit = Some(parse_limit(&value, config.max_limit)?),
            "offset" => opts.offset = Some(parse_count("offset", &value)?),
            field => add_filter(&mut opts, field, decode_value(&value)),
        }
    }

    if opts.limit.is_none() {
        if let Some(default) = config.default_limit {
            opts.limit = Some(i64::try_from(default.min(config.max_limit)).unwrap_or(i64::MAX));
        }
    }
    Ok(opts)
}

/// Whether `key` is interpreted as a query option rather than a filter
pub fn is_reserved_param(key: &str) -> bool {
    RESERVED_PARAMS.contains(&key)
}

fn parse_select(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty() && *f != "*")
        .map(ToString::to_string)
        .collect()
}

/// `field`, `field DESC` or `field.desc`, comma separated
pub fn parse_order(value: &str) -> Result<Vec<OrderBy>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_order_part)
        .collect()
}

fn parse_order_part(part: &str) -> Result<OrderBy> {
    let words: Vec<&str> = part.split_whitespace().collect();
    let (field, direction) = match words.as_slice() {
        [field] => match field.rsplit_once('.') {
            Some((column, dir))
                if dir.eq_ignore_ascii_case("asc") || dir.eq_ignore_ascii_case("desc") =>
            {
                (column, OrderDirection::parse(dir)?)
            }
            _ => (*field, OrderDirection::Asc),
        },
        [field, dir] => (*field, OrderDirection::parse(dir)?),
        _ => {
            return Err(Error::InvalidQueryParam(format!(
                "cannot parse order entry {part:?}"
            )))
        }
    };
    Ok(OrderBy {
        field: field.to_string(),
        direction,
    })
}

fn parse_count(name: &str, value: &str) -> Result<i64> {
    let parsed: i64 = value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidQueryParam(format!("{name} must be an integer, got {value:?}")))?;
    if parsed < 0 {
        return Err(Error::InvalidQueryParam(format!(
            "{name} must be non-negative, got {parsed}"
        )));
    }
    Ok(parsed)
}

fn parse_limit(value: &str, max_limit: u64) -> Result<i64> {
    let limit = parse_count("limit", value)?;
    if limit.unsigned_abs() > max_limit {
        return Err(Error::InvalidQueryParam(format!(
            "limit {limit} exceeds the maximum of {max_limit}"
        )));
    }
    Ok(limit)
}

fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn add_filter(opts: &mut QueryOptions, field: &str, value: Value) {
    match opts.filter.get_mut(field) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            opts.filter.insert(field.to_string(), value);
        }
    }
}
