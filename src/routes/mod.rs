//! HTTP surface: health routes and the entity route registrar.

pub mod common;
pub mod registrar;

pub use common::common_routes;
pub use registrar::{Reply, RouteCall, RouteEntry, RouteRegistrar};
