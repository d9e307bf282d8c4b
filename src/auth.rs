//! Authorization of route actions against the caller's permissions.
//!
//! Authentication happens outside this crate: an outer layer inserts a
//! [`Caller`] into the request extensions.

use crate::error::AuthFailure;
use serde::{Deserialize, Serialize};

/// The authenticated caller of a request.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Caller {
    pub user: String,
    /// `None` when the caller has no permission set at all. An empty set
    /// grants nothing.
    pub permissions: Option<Vec<String>>,
}

impl Caller {
    pub fn new(user: impl Into<String>, permissions: Vec<String>) -> Self {
        Caller {
            user: user.into(),
            permissions: Some(permissions),
        }
    }
}

/// What a route does: `{resource, operation}`, e.g. `items:checkout`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub resource: String,
    pub operation: String,
}

impl Action {
    pub fn new(resource: impl Into<String>, operation: impl Into<String>) -> Self {
        Action {
            resource: resource.into(),
            operation: operation.into(),
        }
    }
}

pub trait Authorizer: Send + Sync {
    fn authorize(&self, caller: Option<&Caller>, action: &Action) -> Result<(), AuthFailure>;
}

/// Grants an action when the caller holds `resource:operation`,
/// `resource:*`, or `*`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissionAuthorizer;

impl Authorizer for PermissionAuthorizer {
    fn authorize(&self, caller: Option<&Caller>, action: &Action) -> Result<(), AuthFailure> {
        let caller = caller.ok_or(AuthFailure::NoUser)?;
        let permissions = caller.permissions.as_ref().ok_or(AuthFailure::NoPermissions)?;
        let granted = permissions.iter().any(|p| match p.split_once(':') {
            Some((resource, operation)) => {
                resource == action.resource && (operation == "*" || operation == action.operation)
            }
            None => p == "*",
        });
        if granted {
            Ok(())
        } else {
            tracing::debug!(user = %caller.user, resource = %action.resource, operation = %action.operation, "denied");
            Err(AuthFailure::NotAuthorized)
        }
    }
}
