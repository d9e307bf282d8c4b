use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::entity::validation::RequestValidator;
use crate::entity::DeletePolicy;
use crate::error::AppError;
use crate::query::{Criteria, LogicalOp, QueryOptions, QueryResult};
use crate::schema::TableSchema;
use crate::sql::{self, SetValue};
use crate::store::Store;

/// Generic CRUD over one table, decoding rows into `T`.
pub struct EntityBase<T> {
    store: Arc<dyn Store>,
    schema: &'static TableSchema,
    _record: PhantomData<fn() -> T>,
}

impl<T> EntityBase<T>
where
    T: DeserializeOwned + Send,
{
    pub fn new(store: Arc<dyn Store>, schema: &'static TableSchema) -> Self {
        EntityBase {
            store,
            schema,
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.schema.name()
    }

    pub fn schema(&self) -> &'static TableSchema {
        self.schema
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn decode(row: Value) -> Result<T, AppError> {
        Ok(serde_json::from_value(row)?)
    }

    /// First row matching all `criteria`, if any.
    pub async fn find(&self, criteria: &Criteria) -> Result<Option<T>, AppError> {
        let options = QueryOptions {
            limit: 1,
            ..QueryOptions::default()
        };
        let q = sql::select(self.schema, criteria, LogicalOp::And, &options)?;
        self.store.fetch_optional(&q).await?.map(Self::decode).transpose()
    }

    pub async fn get(&self, key: &str) -> Result<T, AppError> {
        let criteria = self.schema.resolve_natural_key(key)?;
        self.find(&criteria)
            .await?
            .ok_or_else(|| AppError::not_found(self.name(), key))
    }

    /// One page of rows. The total count runs concurrently, and only when requested.
    pub async fn query(
        &self,
        criteria: &Criteria,
        op: LogicalOp,
        options: &QueryOptions,
    ) -> Result<QueryResult<T>, AppError> {
        let rows_q = sql::select(self.schema, criteria, op, options)?;
        let (rows, count) = if options.return_count {
            let count_q = sql::count(self.schema, criteria, op)?;
            let (rows, total) = tokio::try_join!(
                self.store.fetch_all(&rows_q),
                self.store.fetch_optional(&count_q)
            )?;
            (rows, Some(count_of(total)))
        } else {
            (self.store.fetch_all(&rows_q).await?, None)
        };
        Ok(QueryResult {
            rows: rows.into_iter().map(Self::decode).collect::<Result<_, _>>()?,
            count,
        })
    }

    /// Every row matching `criteria` where column `greater` exceeds `lesser`.
    pub async fn exceeding(
        &self,
        criteria: &Criteria,
        greater: &str,
        lesser: &str,
        options: &QueryOptions,
    ) -> Result<Vec<T>, AppError> {
        let q = sql::select_exceeding(self.schema, criteria, greater, lesser, options)?;
        self.store
            .fetch_all(&q)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    /// Query from raw request parameters.
    pub async fn read(
        &self,
        params: &[(String, String)],
        op: LogicalOp,
        options: &QueryOptions,
    ) -> Result<QueryResult<T>, AppError> {
        let criteria = self.schema.parse_criteria(params)?;
        self.query(&criteria, op, options).await
    }

    pub async fn create(&self, body: &Map<String, Value>) -> Result<T, AppError> {
        let values = RequestValidator::validate(self.schema, body)?;
        let q = sql::insert(self.schema, &values)?;
        let row = self
            .store
            .fetch_optional(&q)
            .await?
            .ok_or(AppError::Store(sqlx::Error::RowNotFound))?;
        tracing::info!(table = self.name(), "record created");
        Self::decode(row)
    }

    /// Partial update of the row named by the natural key in `body`, or by the
    /// surrogate key when the natural key is absent.
    pub async fn update(&self, body: &Map<String, Value>) -> Result<T, AppError> {
        let (criteria, key) = self.key_criteria(body)?;
        let sets: Vec<(&str, SetValue)> = RequestValidator::validate_partial(self.schema, body)?
            .into_iter()
            .map(|(c, v)| (c, SetValue::Value(v)))
            .collect();
        self.update_where(&criteria, &sets)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found(self.name(), key))
    }

    /// Apply `sets` to every row matching `criteria`, returning the updated rows.
    pub async fn update_where(
        &self,
        criteria: &Criteria,
        sets: &[(&str, SetValue)],
    ) -> Result<Vec<T>, AppError> {
        let q = sql::update(self.schema, criteria, sets)?;
        self.store
            .fetch_all(&q)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    pub async fn remove(&self, key: &str, policy: DeletePolicy) -> Result<(), AppError> {
        let criteria = self.schema.resolve_natural_key(key)?;
        let q = match policy {
            DeletePolicy::Hard => sql::delete(self.schema, &criteria)?,
            DeletePolicy::SetState { column, value } => sql::update(
                self.schema,
                &criteria,
                &[(column, SetValue::Value(Value::String(value.to_string())))],
            )?,
        };
        if self.store.execute(&q).await? == 0 {
            return Err(AppError::not_found(self.name(), key));
        }
        tracing::info!(table = self.name(), key, ?policy, "record removed");
        Ok(())
    }

    fn key_criteria(&self, body: &Map<String, Value>) -> Result<(Criteria, String), AppError> {
        let natural = self.schema.natural_key();
        let candidates = [Some(natural.name()), self.schema.surrogate_key()];
        for name in candidates.into_iter().flatten() {
            let Some(raw) = body.get(name).filter(|v| !v.is_null()) else {
                continue;
            };
            let key = match raw {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let column = self
                .schema
                .column(name)
                .ok_or_else(|| AppError::UnknownField(name.to_string()))?;
            let value = column
                .column_domain()
                .check(name, raw)
                .map_err(|_| AppError::InvalidKey {
                    entity: self.name().to_string(),
                    key: key.clone(),
                })?;
            return Ok((Criteria::new().with(name, value), key));
        }
        Err(AppError::Validation(vec![natural.name().to_string()]))
    }
}

fn count_of(row: Option<Value>) -> u64 {
    row.as_ref()
        .and_then(|r| r.get("count"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
