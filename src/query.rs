//! Per-request query values: criteria, logical operator, paging options, and results.

use crate::error::AppError;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// Request parameters that steer the query instead of filtering it.
pub const RESERVED_PARAMS: &[&str] = &["op", "offset", "limit", "order", "returnCount", "options"];

/// A single value or a list of values for one field.
#[derive(Clone, Debug, PartialEq)]
pub enum CriterionValue {
    One(Value),
    Many(Vec<Value>),
}

impl CriterionValue {
    /// Number of values this criterion binds.
    pub fn len(&self) -> usize {
        match self {
            CriterionValue::One(_) => 1,
            CriterionValue::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn merge(self, other: CriterionValue) -> CriterionValue {
        let mut values = match self {
            CriterionValue::One(v) => vec![v],
            CriterionValue::Many(vs) => vs,
        };
        match other {
            CriterionValue::One(v) => values.push(v),
            CriterionValue::Many(vs) => values.extend(vs),
        }
        CriterionValue::Many(values)
    }
}

/// Filter conditions, keyed by column name, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Criteria {
    terms: Vec<(String, CriterionValue)>,
}

impl Criteria {
    pub fn new() -> Self {
        Criteria::default()
    }

    /// Builder form of [`Criteria::insert`] for a single value.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, CriterionValue::One(value.into()));
        self
    }

    /// Add a criterion; a repeated field accumulates into a list.
    pub fn insert(&mut self, field: impl Into<String>, value: CriterionValue) {
        let field = field.into();
        match self.terms.iter_mut().find(|(f, _)| *f == field) {
            Some((_, existing)) => {
                let previous = std::mem::replace(existing, CriterionValue::Many(Vec::new()));
                *existing = previous.merge(value);
            }
            None => self.terms.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&CriterionValue> {
        self.terms.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CriterionValue)> {
        self.terms.iter().map(|(f, v)| (f.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Total number of values across all fields.
    pub fn value_count(&self) -> usize {
        self.terms.iter().map(|(_, v)| v.len()).sum()
    }
}

/// Single logical operator joining every predicate of a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogicalOp {
    #[default]
    And,
    Or,
}

impl LogicalOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            LogicalOp::And => " AND ",
            LogicalOp::Or => " OR ",
        }
    }

    /// Read the `op` request parameter; absent means `and`.
    pub fn from_query(params: &[(String, String)]) -> Result<Self, AppError> {
        match param(params, "op") {
            None => Ok(LogicalOp::And),
            Some(op) if op.eq_ignore_ascii_case("and") => Ok(LogicalOp::And),
            Some(op) if op.eq_ignore_ascii_case("or") => Ok(LogicalOp::Or),
            Some(op) => Err(AppError::invalid_value("op", format!("'{op}' is not and/or"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortOrder {
    pub field: String,
    pub descending: bool,
}

impl SortOrder {
    /// `"name"` sorts ascending, `"-name"` descending.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (field, descending) = match raw.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        if field.is_empty() {
            return None;
        }
        Some(SortOrder {
            field: field.to_string(),
            descending,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    pub offset: u32,
    pub limit: u32,
    pub order: Option<SortOrder>,
    pub return_count: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            offset: 0,
            limit: DEFAULT_LIMIT,
            order: None,
            return_count: false,
        }
    }
}

impl QueryOptions {
    /// Read `offset`, `limit`, `order`, and `returnCount` from request parameters.
    pub fn from_query(params: &[(String, String)]) -> Result<Self, AppError> {
        let mut options = QueryOptions::default();
        if let Some(raw) = param(params, "offset") {
            options.offset = raw
                .parse()
                .map_err(|_| AppError::invalid_value("offset", format!("'{raw}' is not a count")))?;
        }
        if let Some(raw) = param(params, "limit") {
            let limit: u32 = raw
                .parse()
                .map_err(|_| AppError::invalid_value("limit", format!("'{raw}' is not a count")))?;
            options.limit = limit.min(MAX_LIMIT);
        }
        options.order = param(params, "order").and_then(SortOrder::parse);
        options.return_count = param(params, "returnCount")
            .map(|raw| !matches!(raw.trim(), "false" | "0"))
            .unwrap_or(false);
        Ok(options)
    }

    pub fn ordered(mut self, order: &str) -> Self {
        self.order = SortOrder::parse(order);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.return_count = true;
        self
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.min(MAX_LIMIT)
    }
}

/// One page of rows, plus the total match count when it was requested.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct QueryResult<T> {
    pub rows: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl<T> QueryResult<T> {
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<QueryResult<U>, E> {
        Ok(QueryResult {
            rows: self.rows.into_iter().map(f).collect::<Result<_, _>>()?,
            count: self.count,
        })
    }
}

/// Last value of a request parameter.
pub fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .rev()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn options_default_when_absent() {
        let options = QueryOptions::from_query(&[]).unwrap();
        assert_eq!(options, QueryOptions::default());
        assert_eq!(options.limit, DEFAULT_LIMIT);
        assert!(!options.return_count);
    }

    #[test]
    fn options_parse_paging_order_and_count() {
        let options = QueryOptions::from_query(&pairs(&[
            ("offset", "20"),
            ("limit", "5000"),
            ("order", "-surname"),
            ("returnCount", "true"),
        ]))
        .unwrap();
        assert_eq!(options.offset, 20);
        assert_eq!(options.limit, MAX_LIMIT);
        assert_eq!(
            options.order,
            Some(SortOrder { field: "surname".into(), descending: true })
        );
        assert!(options.return_count);
    }

    #[test]
    fn bad_limit_is_invalid_value() {
        let err = QueryOptions::from_query(&pairs(&[("limit", "ten")])).unwrap_err();
        assert!(matches!(err, AppError::InvalidValue { ref field, .. } if field == "limit"));
    }

    #[test]
    fn op_parses_case_insensitively() {
        assert_eq!(LogicalOp::from_query(&pairs(&[("op", "OR")])).unwrap(), LogicalOp::Or);
        assert_eq!(LogicalOp::from_query(&[]).unwrap(), LogicalOp::And);
        assert!(LogicalOp::from_query(&pairs(&[("op", "xor")])).is_err());
    }

    #[test]
    fn repeated_fields_accumulate() {
        let mut criteria = Criteria::new().with("state", "ACTIVE");
        criteria.insert("state", CriterionValue::One(json!("INACTIVE")));
        assert_eq!(
            criteria.get("state"),
            Some(&CriterionValue::Many(vec![json!("ACTIVE"), json!("INACTIVE")]))
        );
        assert_eq!(criteria.value_count(), 2);
    }
}
