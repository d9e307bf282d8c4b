//! Request body validation against a table schema.

use crate::error::AppError;
use crate::schema::TableSchema;
use serde_json::{Map, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a new record. Every required column must be present and every
    /// supplied declared column domain-valid. Returns the column values to
    /// insert, in declaration order; the surrogate key and undeclared keys are
    /// dropped.
    pub fn validate(
        schema: &TableSchema,
        body: &Map<String, Value>,
    ) -> Result<Vec<(&'static str, Value)>, AppError> {
        let mut values = Vec::new();
        let mut offending = Vec::new();
        for column in schema.columns() {
            if Some(column.name()) == schema.surrogate_key() {
                continue;
            }
            let checked = match body.get(column.name()) {
                Some(v) => column.column_domain().check(column.name(), v),
                None => Ok(Value::Null),
            };
            match checked {
                Ok(v) if v.is_null() && column.is_required() => offending.push(column.name().to_string()),
                Ok(v) if v.is_null() && !body.contains_key(column.name()) => {}
                Ok(v) => values.push((column.name(), v)),
                Err(e) => {
                    tracing::debug!(table = schema.name(), error = %e, "rejected field");
                    offending.push(column.name().to_string());
                }
            }
        }
        if offending.is_empty() {
            Ok(values)
        } else {
            Err(AppError::Validation(offending))
        }
    }

    /// Validate only the fields present in body (partial update). Key columns
    /// are left out of the assignments; required columns may not be cleared.
    pub fn validate_partial(
        schema: &TableSchema,
        body: &Map<String, Value>,
    ) -> Result<Vec<(&'static str, Value)>, AppError> {
        let mut values = Vec::new();
        let mut offending = Vec::new();
        for column in schema.columns() {
            let name = column.name();
            if name == schema.natural_key().name() || Some(name) == schema.surrogate_key() {
                continue;
            }
            let Some(v) = body.get(name) else { continue };
            match column.column_domain().check(name, v) {
                Ok(v) if v.is_null() && column.is_required() => offending.push(name.to_string()),
                Ok(v) => values.push((name, v)),
                Err(e) => {
                    tracing::debug!(table = schema.name(), error = %e, "rejected field");
                    offending.push(name.to_string());
                }
            }
        }
        if offending.is_empty() {
            Ok(values)
        } else {
            Err(AppError::Validation(offending))
        }
    }
}
