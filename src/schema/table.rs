//! Table schema: ordered columns, natural key, and request-criteria parsing.

use crate::error::AppError;
use crate::query::{Criteria, RESERVED_PARAMS};
use crate::schema::column::{Column, FieldMetadata, QueryOp};

/// Immutable description of one entity table. Built once at startup.
#[derive(Clone, Debug)]
pub struct TableSchema {
    name: &'static str,
    natural_key: usize,
    surrogate_key: Option<&'static str>,
    columns: Vec<Column>,
}

/// Collects columns and checks the declaration invariants.
pub struct TableBuilder {
    name: &'static str,
    natural_key: &'static str,
    surrogate_key: Option<&'static str>,
    columns: Vec<Column>,
}

impl TableBuilder {
    /// Register a column.
    ///
    /// # Panics
    /// On a duplicate column name, or a `contains` operator on a non-text column.
    pub fn add_column(mut self, column: Column) -> Self {
        assert!(
            self.columns.iter().all(|c| c.name() != column.name()),
            "table {}: duplicate column {}",
            self.name,
            column.name()
        );
        assert!(
            column.query_op() != QueryOp::Contains || column.column_domain().is_text(),
            "table {}: contains operator on non-text column {}",
            self.name,
            column.name()
        );
        self.columns.push(column);
        self
    }

    /// Server-assigned id column, accepted by `update` in place of the natural key.
    pub fn surrogate_key(mut self, name: &'static str) -> Self {
        self.surrogate_key = Some(name);
        self
    }

    /// # Panics
    /// When the natural key or surrogate key names no declared column.
    pub fn build(self) -> TableSchema {
        let natural_key = self
            .columns
            .iter()
            .position(|c| c.name() == self.natural_key)
            .unwrap_or_else(|| {
                panic!("table {}: natural key {} is not a declared column", self.name, self.natural_key)
            });
        if let Some(surrogate) = self.surrogate_key {
            assert!(
                self.columns.iter().any(|c| c.name() == surrogate),
                "table {}: surrogate key {} is not a declared column",
                self.name,
                surrogate
            );
        }
        TableSchema {
            name: self.name,
            natural_key,
            surrogate_key: self.surrogate_key,
            columns: self.columns,
        }
    }
}

impl TableSchema {
    pub fn builder(name: &'static str, natural_key: &'static str) -> TableBuilder {
        TableBuilder {
            name,
            natural_key,
            surrogate_key: None,
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn natural_key(&self) -> &Column {
        &self.columns[self.natural_key]
    }

    pub fn surrogate_key(&self) -> Option<&'static str> {
        self.surrogate_key
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Non-internal columns, in declaration order.
    pub fn fields_metadata(&self) -> Vec<FieldMetadata> {
        self.columns
            .iter()
            .filter(|c| !c.is_internal())
            .map(Column::metadata)
            .collect()
    }

    /// Criteria selecting the single row identified by a path key.
    pub fn resolve_natural_key(&self, raw: &str) -> Result<Criteria, AppError> {
        let column = self.natural_key();
        let value = column
            .column_domain()
            .parse(column.name(), raw)
            .map_err(|_| AppError::InvalidKey {
                entity: self.name.to_string(),
                key: raw.to_string(),
            })?;
        Ok(Criteria::new().with(column.name(), value))
    }

    /// Build criteria from request parameters. Reserved parameters, undeclared
    /// and internal columns, and empty values are skipped.
    pub fn parse_criteria(&self, params: &[(String, String)]) -> Result<Criteria, AppError> {
        let mut criteria = Criteria::new();
        for (key, raw) in params {
            if RESERVED_PARAMS.contains(&key.as_str()) || raw.is_empty() {
                continue;
            }
            let Some(column) = self.column(key) else {
                tracing::trace!(table = self.name, param = %key, "ignoring unknown filter");
                continue;
            };
            if column.is_internal() {
                continue;
            }
            criteria.insert(column.name(), column.parse_filter(raw)?);
        }
        Ok(criteria)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CriterionValue;
    use crate::schema::column::ColumnDomain;
    use serde_json::json;

    fn people() -> TableSchema {
        TableSchema::builder("people", "number")
            .surrogate_key("id")
            .add_column(Column::new("id").domain(ColumnDomain::Integer).internal())
            .add_column(Column::new("number").domain(ColumnDomain::Integer))
            .add_column(Column::new("surname").label("Last name").contains())
            .add_column(Column::new("state").domain(ColumnDomain::Enum(&["A", "B"])).required())
            .build()
    }

    #[test]
    #[should_panic(expected = "duplicate column")]
    fn duplicate_column_is_rejected() {
        let _ = TableSchema::builder("t", "a")
            .add_column(Column::new("a"))
            .add_column(Column::new("a"));
    }

    #[test]
    #[should_panic(expected = "natural key")]
    fn natural_key_must_be_declared() {
        let _ = TableSchema::builder("t", "missing").add_column(Column::new("a")).build();
    }

    #[test]
    #[should_panic(expected = "contains operator")]
    fn contains_requires_text() {
        let _ = TableSchema::builder("t", "a")
            .add_column(Column::new("a").domain(ColumnDomain::Integer).contains());
    }

    #[test]
    fn metadata_hides_internal_columns() {
        let names: Vec<_> = people().fields_metadata().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["number", "surname", "state"]);
    }

    #[test]
    fn natural_key_resolution() {
        let schema = people();
        let criteria = schema.resolve_natural_key("12").unwrap();
        assert_eq!(criteria.get("number"), Some(&CriterionValue::One(json!(12))));
        let err = schema.resolve_natural_key("twelve").unwrap_err();
        assert!(matches!(err, AppError::InvalidKey { .. }));
    }

    #[test]
    fn criteria_skip_unknown_reserved_and_internal() {
        let params: Vec<(String, String)> = [
            ("surname", "Smith"),
            ("nickname", "Smitty"),
            ("limit", "10"),
            ("id", "3"),
            ("state", ""),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let criteria = people().parse_criteria(&params).unwrap();
        assert_eq!(criteria.iter().count(), 1);
        assert_eq!(criteria.get("surname"), Some(&CriterionValue::One(json!("Smith"))));
    }

    #[test]
    fn criteria_reject_bad_domain_values() {
        let params = vec![("state".to_string(), "C".to_string())];
        assert!(matches!(
            people().parse_criteria(&params),
            Err(AppError::InvalidValue { .. })
        ));
    }
}
