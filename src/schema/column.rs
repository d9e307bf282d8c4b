//! Column declarations: semantic domain, query operator, and metadata markers.

use crate::error::AppError;
use crate::query::CriterionValue;
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use serde_json::{Number, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Semantic type and legal values of one column.
#[derive(Clone, Debug)]
pub enum ColumnDomain {
    /// Free text; the pattern, when set, must match whole values.
    Text { pattern: Option<Regex> },
    Integer,
    Number,
    /// Calendar date, `YYYY-MM-DD` on the wire.
    Date,
    /// Closed set of legal string values.
    Enum(&'static [&'static str]),
}

impl ColumnDomain {
    pub const TEXT: ColumnDomain = ColumnDomain::Text { pattern: None };

    /// Text domain restricted to values matching `pattern`.
    ///
    /// # Panics
    /// When `pattern` is not a valid regular expression.
    pub fn pattern(pattern: &str) -> Self {
        let re = Regex::new(pattern)
            .unwrap_or_else(|e| panic!("invalid column pattern {pattern:?}: {e}"));
        ColumnDomain::Text { pattern: Some(re) }
    }

    /// Type name reported in field metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            ColumnDomain::Text { .. } => "text",
            ColumnDomain::Integer => "integer",
            ColumnDomain::Number => "number",
            ColumnDomain::Date => "date",
            ColumnDomain::Enum(_) => "enum",
        }
    }

    /// PostgreSQL cast applied to placeholders bound to this column.
    pub fn sql_cast(&self) -> Option<&'static str> {
        match self {
            ColumnDomain::Date => Some("date"),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ColumnDomain::Text { .. })
    }

    /// Parse a raw query-string value.
    pub fn parse(&self, field: &str, raw: &str) -> Result<Value, AppError> {
        match self {
            ColumnDomain::Text { pattern } => {
                if let Some(re) = pattern {
                    if !re.is_match(raw) {
                        return Err(AppError::invalid_value(field, "does not match the required format"));
                    }
                }
                Ok(Value::String(raw.to_string()))
            }
            ColumnDomain::Integer => raw
                .trim()
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .map_err(|_| AppError::invalid_value(field, format!("'{raw}' is not an integer"))),
            ColumnDomain::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| AppError::invalid_value(field, format!("'{raw}' is not a number"))),
            ColumnDomain::Date => NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
                .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
                .map_err(|_| AppError::invalid_value(field, format!("'{raw}' is not a date (YYYY-MM-DD)"))),
            ColumnDomain::Enum(values) => {
                if values.contains(&raw) {
                    Ok(Value::String(raw.to_string()))
                } else {
                    Err(AppError::invalid_value(
                        field,
                        format!("'{raw}' must be one of: {}", values.join(", ")),
                    ))
                }
            }
        }
    }

    /// Validate a JSON body value. `null` passes through as "no value".
    pub fn check(&self, field: &str, value: &Value) -> Result<Value, AppError> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (_, Value::String(s)) => self.parse(field, s),
            (ColumnDomain::Integer, Value::Number(n)) => n
                .as_i64()
                .map(|i| Value::Number(i.into()))
                .ok_or_else(|| AppError::invalid_value(field, format!("{n} is not an integer"))),
            (ColumnDomain::Number, Value::Number(_)) => Ok(value.clone()),
            (ColumnDomain::Text { .. }, Value::Number(n)) => self.parse(field, &n.to_string()),
            _ => Err(AppError::invalid_value(field, format!("expected {}", self.kind()))),
        }
    }
}

/// How a criterion value becomes a SQL predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryOp {
    /// `col = $n`, or membership for a list.
    Equals,
    /// `col ILIKE '%v%'`, case-insensitive.
    Contains,
}

#[derive(Clone, Debug)]
pub struct Column {
    name: &'static str,
    label: Option<&'static str>,
    query_op: QueryOp,
    domain: ColumnDomain,
    required: bool,
    internal: bool,
}

impl Column {
    pub fn new(name: &'static str) -> Self {
        Column {
            name,
            label: None,
            query_op: QueryOp::Equals,
            domain: ColumnDomain::TEXT,
            required: false,
            internal: false,
        }
    }

    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn contains(mut self) -> Self {
        self.query_op = QueryOp::Contains;
        self
    }

    pub fn domain(mut self, domain: ColumnDomain) -> Self {
        self.domain = domain;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn query_op(&self) -> QueryOp {
        self.query_op
    }

    pub fn column_domain(&self) -> &ColumnDomain {
        &self.domain
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// Parse a request filter value. `contains` columns take fragments, so
    /// text patterns are not applied; enum columns accept a comma-separated
    /// list and produce a membership test.
    pub fn parse_filter(&self, raw: &str) -> Result<CriterionValue, AppError> {
        match (&self.query_op, &self.domain) {
            (QueryOp::Contains, _) => Ok(CriterionValue::One(Value::String(raw.to_string()))),
            (QueryOp::Equals, ColumnDomain::Enum(_)) if raw.contains(',') => {
                let values = raw
                    .split(',')
                    .map(|part| self.domain.parse(self.name, part.trim()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CriterionValue::Many(values))
            }
            (QueryOp::Equals, domain) => domain.parse(self.name, raw).map(CriterionValue::One),
        }
    }

    pub fn metadata(&self) -> FieldMetadata {
        FieldMetadata {
            name: self.name,
            label: self.label.unwrap_or(self.name),
            required: self.required,
            kind: self.domain.kind(),
            values: match &self.domain {
                ColumnDomain::Enum(values) => Some(values),
                _ => None,
            },
        }
    }
}

/// Field description served to clients for form generation.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FieldMetadata {
    pub name: &'static str,
    pub label: &'static str,
    pub required: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<&'static [&'static str]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STATES: &[&str] = &["ACTIVE", "INACTIVE"];

    #[test]
    fn enum_domain_rejects_undeclared_values() {
        let domain = ColumnDomain::Enum(STATES);
        assert_eq!(domain.parse("state", "ACTIVE").unwrap(), json!("ACTIVE"));
        let err = domain.parse("state", "GONE").unwrap_err();
        assert!(matches!(err, AppError::InvalidValue { ref field, .. } if field == "state"));
    }

    #[test]
    fn integer_domain_parses_and_rejects() {
        assert_eq!(ColumnDomain::Integer.parse("n", " 42 ").unwrap(), json!(42));
        assert!(ColumnDomain::Integer.parse("n", "4x").is_err());
        assert!(ColumnDomain::Integer.check("n", &json!(1.5)).is_err());
        assert_eq!(ColumnDomain::Integer.check("n", &json!("7")).unwrap(), json!(7));
    }

    #[test]
    fn date_domain_normalizes() {
        assert_eq!(ColumnDomain::Date.parse("d", "2024-03-01").unwrap(), json!("2024-03-01"));
        assert!(ColumnDomain::Date.parse("d", "01.03.2024").is_err());
    }

    #[test]
    fn check_accepts_null_for_every_domain() {
        assert_eq!(ColumnDomain::Enum(STATES).check("state", &Value::Null).unwrap(), Value::Null);
        assert_eq!(ColumnDomain::Date.check("d", &Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn pattern_applies_to_values_not_fragments() {
        let column = Column::new("email")
            .contains()
            .domain(ColumnDomain::pattern(r"^[^@\s]+@[^@\s]+$"));
        assert!(column.column_domain().parse("email", "smith").is_err());
        assert_eq!(
            column.parse_filter("smith").unwrap(),
            CriterionValue::One(json!("smith"))
        );
    }

    #[test]
    fn enum_filter_splits_into_membership() {
        let column = Column::new("state").domain(ColumnDomain::Enum(STATES));
        assert_eq!(
            column.parse_filter("ACTIVE,INACTIVE").unwrap(),
            CriterionValue::Many(vec![json!("ACTIVE"), json!("INACTIVE")])
        );
        assert!(column.parse_filter("ACTIVE,NOPE").is_err());
    }

    #[test]
    fn metadata_defaults_label_to_name() {
        let meta = Column::new("phone").metadata();
        assert_eq!(meta.label, "phone");
        assert_eq!(meta.kind, "text");
        assert!(meta.values.is_none());
    }
}
