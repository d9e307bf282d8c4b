//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from table schemas.
//!
//! Identifiers only ever come from a [`TableSchema`]; every criterion value is a
//! bind parameter.

use crate::error::AppError;
use crate::query::{Criteria, CriterionValue, LogicalOp, QueryOptions};
use crate::schema::{Column, QueryOp, TableSchema};
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from schema declarations).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlQuery {
    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Bind `v` and return its placeholder, cast when the column's domain needs it.
    fn placeholder(&mut self, column: &Column, v: Value) -> String {
        let n = self.push_param(v);
        match column.column_domain().sql_cast() {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }

    /// Bind `v`, except that `null` is written as a literal.
    fn value_expr(&mut self, column: &Column, v: &Value) -> String {
        if v.is_null() {
            "NULL".to_string()
        } else {
            self.placeholder(column, v.clone())
        }
    }
}

/// Right-hand side of an UPDATE assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum SetValue {
    Value(Value),
    /// Copy another declared column of the same row.
    Column(&'static str),
}

fn column<'a>(schema: &'a TableSchema, field: &str) -> Result<&'a Column, AppError> {
    schema
        .column(field)
        .ok_or_else(|| AppError::UnknownField(field.to_string()))
}

fn select_column_list(schema: &TableSchema) -> String {
    schema
        .columns()
        .iter()
        .map(|c| quoted(c.name()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn like_pattern(v: &Value) -> Value {
    let text = match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Value::String(format!("%{}%", escape_like(&text)))
}

fn predicate(q: &mut SqlQuery, column: &Column, value: &CriterionValue) -> String {
    let col = quoted(column.name());
    match (column.query_op(), value) {
        (_, CriterionValue::One(Value::Null)) => format!("{} IS NULL", col),
        (_, CriterionValue::Many(values)) if values.is_empty() => "FALSE".to_string(),
        (QueryOp::Equals, CriterionValue::One(v)) => {
            format!("{} = {}", col, q.placeholder(column, v.clone()))
        }
        (QueryOp::Equals, CriterionValue::Many(values)) => {
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| q.placeholder(column, v.clone()))
                .collect();
            format!("{} IN ({})", col, placeholders.join(", "))
        }
        (QueryOp::Contains, CriterionValue::One(v)) => {
            format!("{} ILIKE {}", col, q.placeholder(column, like_pattern(v)))
        }
        (QueryOp::Contains, CriterionValue::Many(values)) => {
            let likes: Vec<String> = values
                .iter()
                .map(|v| format!("{} ILIKE {}", col, q.placeholder(column, like_pattern(v))))
                .collect();
            format!("({})", likes.join(" OR "))
        }
    }
}

/// WHERE clause for `criteria` joined by `op`; empty when there are no criteria.
fn where_clause(
    q: &mut SqlQuery,
    schema: &TableSchema,
    criteria: &Criteria,
    op: LogicalOp,
) -> Result<String, AppError> {
    let mut parts = Vec::new();
    for (field, value) in criteria.iter() {
        let c = column(schema, field)?;
        parts.push(predicate(q, c, value));
    }
    if parts.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", parts.join(op.as_sql())))
    }
}

/// ORDER BY the requested field, then the natural key so paging is stable.
fn order_clause(schema: &TableSchema, options: &QueryOptions) -> Result<String, AppError> {
    let key = schema.natural_key().name();
    let Some(order) = &options.order else {
        return Ok(format!(" ORDER BY {} ASC", quoted(key)));
    };
    let c = column(schema, &order.field)?;
    let direction = if order.descending { "DESC" } else { "ASC" };
    if c.name() == key {
        Ok(format!(" ORDER BY {} {}", quoted(key), direction))
    } else {
        Ok(format!(
            " ORDER BY {} {}, {} ASC",
            quoted(c.name()),
            direction,
            quoted(key)
        ))
    }
}

/// SELECT one page of rows matching `criteria`.
pub fn select(
    schema: &TableSchema,
    criteria: &Criteria,
    op: LogicalOp,
    options: &QueryOptions,
) -> Result<SqlQuery, AppError> {
    let mut q = SqlQuery::default();
    let where_sql = where_clause(&mut q, schema, criteria, op)?;
    let order_sql = order_clause(schema, options)?;
    q.sql = format!(
        "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
        select_column_list(schema),
        quoted(schema.name()),
        where_sql,
        order_sql,
        options.effective_limit(),
        options.offset
    );
    Ok(q)
}

/// SELECT every row matching `criteria` (AND-joined) whose `greater` column
/// exceeds its `lesser` column, nulls counting as zero. Not paged; only the
/// order of `options` applies.
pub fn select_exceeding(
    schema: &TableSchema,
    criteria: &Criteria,
    greater: &str,
    lesser: &str,
    options: &QueryOptions,
) -> Result<SqlQuery, AppError> {
    let mut q = SqlQuery::default();
    let mut where_sql = where_clause(&mut q, schema, criteria, LogicalOp::And)?;
    let comparison = format!(
        "COALESCE({}, 0) > COALESCE({}, 0)",
        quoted(column(schema, greater)?.name()),
        quoted(column(schema, lesser)?.name())
    );
    if where_sql.is_empty() {
        where_sql = format!(" WHERE {}", comparison);
    } else {
        where_sql = format!("{} AND {}", where_sql, comparison);
    }
    let order_sql = order_clause(schema, options)?;
    q.sql = format!(
        "SELECT {} FROM {}{}{}",
        select_column_list(schema),
        quoted(schema.name()),
        where_sql,
        order_sql
    );
    Ok(q)
}

/// COUNT of all rows matching `criteria`, independent of paging.
pub fn count(schema: &TableSchema, criteria: &Criteria, op: LogicalOp) -> Result<SqlQuery, AppError> {
    let mut q = SqlQuery::default();
    let where_sql = where_clause(&mut q, schema, criteria, op)?;
    q.sql = format!(
        "SELECT COUNT(*) AS count FROM {}{}",
        quoted(schema.name()),
        where_sql
    );
    Ok(q)
}

/// SELECT rows WHERE column IN (values). Used for batch-loading related rows.
pub fn select_where_in(
    schema: &TableSchema,
    column_name: &str,
    values: &[Value],
) -> Result<SqlQuery, AppError> {
    let c = column(schema, column_name)?;
    let mut q = SqlQuery::default();
    let cols = select_column_list(schema);
    let table = quoted(schema.name());
    if values.is_empty() {
        q.sql = format!("SELECT {} FROM {} WHERE 1 = 0", cols, table);
        return Ok(q);
    }
    let placeholders: Vec<String> = values.iter().map(|v| q.placeholder(c, v.clone())).collect();
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        cols,
        table,
        quoted(c.name()),
        placeholders.join(", "),
        quoted(schema.natural_key().name())
    );
    Ok(q)
}

/// INSERT the given column values, returning the stored row. Omitted columns
/// take their database defaults.
pub fn insert(schema: &TableSchema, values: &[(&str, Value)]) -> Result<SqlQuery, AppError> {
    let mut q = SqlQuery::default();
    let table = quoted(schema.name());
    let returning = select_column_list(schema);
    if values.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning);
        return Ok(q);
    }
    let mut cols = Vec::with_capacity(values.len());
    let mut exprs = Vec::with_capacity(values.len());
    for (name, v) in values {
        let c = column(schema, name)?;
        cols.push(quoted(c.name()));
        exprs.push(q.value_expr(c, v));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        cols.join(", "),
        exprs.join(", "),
        returning
    );
    Ok(q)
}

/// UPDATE rows matching `criteria` (AND-joined), returning the updated rows.
/// With no assignments this degrades to a SELECT of the matching rows.
pub fn update(
    schema: &TableSchema,
    criteria: &Criteria,
    assignments: &[(&str, SetValue)],
) -> Result<SqlQuery, AppError> {
    let mut q = SqlQuery::default();
    let table = quoted(schema.name());
    let cols = select_column_list(schema);
    if assignments.is_empty() {
        let where_sql = where_clause(&mut q, schema, criteria, LogicalOp::And)?;
        q.sql = format!("SELECT {} FROM {}{}", cols, table, where_sql);
        return Ok(q);
    }
    let mut sets = Vec::with_capacity(assignments.len());
    for (name, set) in assignments {
        let c = column(schema, name)?;
        let rhs = match set {
            SetValue::Value(v) => q.value_expr(c, v),
            SetValue::Column(other) => quoted(column(schema, other)?.name()),
        };
        sets.push(format!("{} = {}", quoted(c.name()), rhs));
    }
    let where_sql = where_clause(&mut q, schema, criteria, LogicalOp::And)?;
    q.sql = format!(
        "UPDATE {} SET {}{} RETURNING {}",
        table,
        sets.join(", "),
        where_sql,
        cols
    );
    Ok(q)
}

/// DELETE rows matching `criteria` (AND-joined).
pub fn delete(schema: &TableSchema, criteria: &Criteria) -> Result<SqlQuery, AppError> {
    let mut q = SqlQuery::default();
    let where_sql = where_clause(&mut q, schema, criteria, LogicalOp::And)?;
    q.sql = format!("DELETE FROM {}{}", quoted(schema.name()), where_sql);
    Ok(q)
}
