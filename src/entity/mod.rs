//! Entities: a table schema plus typed records, optional sub-loaders selected by
//! flags, custom methods, and extra routes.
//!
//! Concrete entities implement [`Entity`]. The registrar works with
//! `Arc<dyn DynEntity>`, which every `Entity` gets through a blanket impl that
//! converts records to JSON at the boundary.

mod base;
pub mod flags;
pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

pub use base::EntityBase;
pub use flags::{Flag, Flags, NoFlag};

use crate::error::AppError;
use crate::query::{LogicalOp, QueryOptions, QueryResult};
use crate::routes::RouteEntry;
use crate::schema::FieldMetadata;

/// What `remove` does to a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletePolicy {
    Hard,
    /// Keep the row and set `column` to `value`.
    SetState {
        column: &'static str,
        value: &'static str,
    },
}

#[async_trait]
pub trait Entity: Send + Sync + 'static {
    type Record: Serialize + DeserializeOwned + Send + Sync;
    type Flag: Flag;
    /// Output of one sub-loader, merged into the record by [`Entity::attach`].
    type Expansion: Send;

    fn base(&self) -> &EntityBase<Self::Record>;

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::Hard
    }

    /// Run the sub-loader for `flag` against a fetched record.
    async fn load(
        &self,
        record: &Self::Record,
        flag: Self::Flag,
    ) -> Result<Self::Expansion, AppError>;

    fn attach(record: &mut Self::Record, expansion: Self::Expansion);

    /// Fetch by natural key and run the requested sub-loaders concurrently.
    /// Any loader failure fails the whole call.
    async fn get(&self, key: &str, flags: &Flags<Self::Flag>) -> Result<Self::Record, AppError> {
        let mut record = self.base().get(key).await?;
        let expansions = {
            let fetched = &record;
            try_join_all(flags.iter().map(|flag| self.load(fetched, flag))).await?
        };
        for expansion in expansions {
            Self::attach(&mut record, expansion);
        }
        Ok(record)
    }

    async fn invoke(&self, method: &str, key: &str, body: Value) -> Result<Value, AppError> {
        let _ = (key, body);
        Err(AppError::UnknownMethod(method.to_string()))
    }

    /// Routes beyond the standard five, registered under the entity's prefix.
    fn routes(self: Arc<Self>) -> Vec<RouteEntry> {
        Vec::new()
    }
}

/// Object-safe view of an [`Entity`] with JSON records.
#[async_trait]
pub trait DynEntity: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn fields(&self) -> Vec<FieldMetadata>;

    async fn fetch(&self, key: &str, flags: Option<&str>) -> Result<Value, AppError>;

    async fn list(
        &self,
        params: &[(String, String)],
        op: LogicalOp,
        options: QueryOptions,
    ) -> Result<QueryResult<Value>, AppError>;

    async fn create_record(&self, body: Value) -> Result<Value, AppError>;

    async fn update_record(&self, body: Value) -> Result<Value, AppError>;

    async fn remove_record(&self, key: &str) -> Result<(), AppError>;

    async fn invoke_method(&self, method: &str, key: &str, body: Value) -> Result<Value, AppError>;

    fn extra_routes(self: Arc<Self>) -> Vec<RouteEntry>;
}

#[async_trait]
impl<E: Entity> DynEntity for E {
    fn name(&self) -> &'static str {
        self.base().name()
    }

    fn fields(&self) -> Vec<FieldMetadata> {
        self.base().schema().fields_metadata()
    }

    async fn fetch(&self, key: &str, flags: Option<&str>) -> Result<Value, AppError> {
        let flags: Flags<E::Flag> = Flags::parse(flags);
        let record = Entity::get(self, key, &flags).await?;
        Ok(serde_json::to_value(record)?)
    }

    async fn list(
        &self,
        params: &[(String, String)],
        op: LogicalOp,
        options: QueryOptions,
    ) -> Result<QueryResult<Value>, AppError> {
        let result = self.base().read(params, op, &options).await?;
        Ok(result.try_map(serde_json::to_value)?)
    }

    async fn create_record(&self, body: Value) -> Result<Value, AppError> {
        let body = body_to_map(body)?;
        let record = self.base().create(&body).await?;
        Ok(serde_json::to_value(record)?)
    }

    async fn update_record(&self, body: Value) -> Result<Value, AppError> {
        let body = body_to_map(body)?;
        let record = self.base().update(&body).await?;
        Ok(serde_json::to_value(record)?)
    }

    async fn remove_record(&self, key: &str) -> Result<(), AppError> {
        self.base().remove(key, self.delete_policy()).await
    }

    async fn invoke_method(&self, method: &str, key: &str, body: Value) -> Result<Value, AppError> {
        Entity::invoke(self, method, key, body).await
    }

    fn extra_routes(self: Arc<Self>) -> Vec<RouteEntry> {
        Entity::routes(self)
    }
}

/// Request bodies for create and update must be JSON objects.
pub fn body_to_map(body: Value) -> Result<Map<String, Value>, AppError> {
    match body {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}
