//! Declarative table schemas: columns, domains, and natural keys.

pub mod column;
pub mod table;

pub use column::{Column, ColumnDomain, FieldMetadata, QueryOp};
pub use table::{TableBuilder, TableSchema};
