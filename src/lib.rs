//! Library API: declarative entity tables over PostgreSQL, exposed as REST routes.

pub mod auth;
pub mod config;
pub mod domain;
pub mod entity;
pub mod error;
pub mod query;
pub mod routes;
pub mod schema;
pub mod sql;
pub mod state;
pub mod store;

pub use auth::{Action, Authorizer, Caller, PermissionAuthorizer};
pub use config::AppConfig;
pub use domain::Library;
pub use entity::{DeletePolicy, DynEntity, Entity, EntityBase, Flag, Flags};
pub use error::AppError;
pub use query::{Criteria, LogicalOp, QueryOptions, QueryResult};
pub use routes::{common_routes, RouteEntry, RouteRegistrar};
pub use schema::{Column, ColumnDomain, TableSchema};
pub use state::AppState;
pub use store::{PgStore, Store};
