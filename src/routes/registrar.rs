//! Maps entities and ad-hoc handlers onto axum routes, checking each route's
//! action with the [`Authorizer`] before the handler runs.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::{Extension, Json, Router};
use futures::future::BoxFuture;
use serde_json::Value;

use crate::auth::{Action, Authorizer, Caller};
use crate::entity::DynEntity;
use crate::error::AppError;
use crate::query::{param, LogicalOp, QueryOptions};

/// Everything a handler gets from the request.
#[derive(Clone, Debug, Default)]
pub struct RouteCall {
    pub params: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    /// `null` when the request had no body.
    pub body: Value,
    pub caller: Option<Caller>,
}

impl RouteCall {
    pub fn param(&self, name: &str) -> Result<&str, AppError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| AppError::BadRequest(format!("missing path parameter {name}")))
    }
}

pub enum Reply {
    Json(Value),
    NoContent,
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Json(v) => Json(v).into_response(),
            Reply::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

type Handle = Arc<dyn Fn(RouteCall) -> BoxFuture<'static, Result<Reply, AppError>> + Send + Sync>;

pub struct RouteEntry {
    method: Method,
    path: String,
    action: Option<Action>,
    handle: Handle,
}

impl RouteEntry {
    pub fn new<F, Fut>(method: Method, path: impl Into<String>, handle: F) -> Self
    where
        F: Fn(RouteCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, AppError>> + Send + 'static,
    {
        RouteEntry {
            method,
            path: path.into(),
            action: None,
            handle: Arc::new(move |call| -> BoxFuture<'static, Result<Reply, AppError>> {
                Box::pin(handle(call))
            }),
        }
    }

    /// Require the caller to be authorized for `resource:operation`.
    pub fn action(mut self, resource: impl Into<String>, operation: impl Into<String>) -> Self {
        self.action = Some(Action::new(resource, operation));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn required_action(&self) -> Option<&Action> {
        self.action.as_ref()
    }
}

pub struct RouteRegistrar {
    authorizer: Arc<dyn Authorizer>,
    entries: Vec<RouteEntry>,
}

impl RouteRegistrar {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        RouteRegistrar {
            authorizer,
            entries: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, entry: RouteEntry) -> &mut Self {
        tracing::debug!(method = %entry.method, path = %entry.path, "route registered");
        self.entries.push(entry);
        self
    }

    /// Register fields, get, list, update, create and delete for `entity`,
    /// one `POST /{name}/:key/{method}` per extra method, and the entity's own
    /// routes.
    pub fn register_entity(&mut self, entity: Arc<dyn DynEntity>, extra_methods: &[&str]) -> &mut Self {
        let name = entity.name();
        let base = format!("/{name}");
        let keyed = format!("/{name}/:key");

        let e = entity.clone();
        self.add_handler(
            RouteEntry::new(Method::GET, format!("{base}/fields"), move |_| {
                let fields = e.fields();
                async move { Ok::<_, AppError>(Reply::Json(serde_json::to_value(fields)?)) }
            })
            .action(name, "read"),
        );

        let e = entity.clone();
        self.add_handler(
            RouteEntry::new(Method::GET, keyed.clone(), move |call| {
                let e = e.clone();
                async move {
                    let record = e.fetch(call.param("key")?, param(&call.query, "options")).await?;
                    Ok::<_, AppError>(Reply::Json(record))
                }
            })
            .action(name, "read"),
        );

        let e = entity.clone();
        self.add_handler(
            RouteEntry::new(Method::GET, base.clone(), move |call| {
                let e = e.clone();
                async move {
                    let op = LogicalOp::from_query(&call.query)?;
                    let options = QueryOptions::from_query(&call.query)?;
                    let result = e.list(&call.query, op, options).await?;
                    Ok::<_, AppError>(Reply::Json(serde_json::to_value(result)?))
                }
            })
            .action(name, "read"),
        );

        let e = entity.clone();
        self.add_handler(
            RouteEntry::new(Method::PUT, base.clone(), move |call| {
                let e = e.clone();
                async move { Ok::<_, AppError>(Reply::Json(e.update_record(call.body).await?)) }
            })
            .action(name, "update"),
        );

        let e = entity.clone();
        self.add_handler(
            RouteEntry::new(Method::POST, base.clone(), move |call| {
                let e = e.clone();
                async move { Ok::<_, AppError>(Reply::Json(e.create_record(call.body).await?)) }
            })
            .action(name, "create"),
        );

        let e = entity.clone();
        self.add_handler(
            RouteEntry::new(Method::DELETE, keyed.clone(), move |call| {
                let e = e.clone();
                async move {
                    e.remove_record(call.param("key")?).await?;
                    Ok::<_, AppError>(Reply::NoContent)
                }
            })
            .action(name, "delete"),
        );

        for method in extra_methods {
            let e = entity.clone();
            let method = method.to_string();
            let path = format!("{keyed}/{method}");
            let operation = method.clone();
            self.add_handler(
                RouteEntry::new(Method::POST, path, move |call| {
                    let e = e.clone();
                    let method = method.clone();
                    async move {
                        let key = call.param("key")?;
                        Ok::<_, AppError>(Reply::Json(e.invoke_method(&method, key, call.body.clone()).await?))
                    }
                })
                .action(name, operation),
            );
        }

        for entry in entity.extra_routes() {
            self.add_handler(entry);
        }
        self
    }

    /// `(method, path)` of every registered route, in registration order.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.entries
            .iter()
            .map(|e| (e.method.clone(), e.path.clone()))
            .collect()
    }

    pub fn into_router(self) -> Router {
        let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();
        for entry in self.entries {
            let filter = match entry.method {
                Method::GET => MethodFilter::GET,
                Method::POST => MethodFilter::POST,
                Method::PUT => MethodFilter::PUT,
                Method::PATCH => MethodFilter::PATCH,
                Method::DELETE => MethodFilter::DELETE,
                _ => {
                    tracing::warn!(method = %entry.method, path = %entry.path, "unsupported method; route skipped");
                    continue;
                }
            };
            let handler = route_handler(self.authorizer.clone(), entry.action, entry.handle);
            let router = by_path.remove(&entry.path).unwrap_or_else(MethodRouter::new);
            by_path.insert(entry.path, router.on(filter, handler));
        }
        by_path
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| router.route(&path, methods))
    }
}

fn route_handler(
    authorizer: Arc<dyn Authorizer>,
    action: Option<Action>,
    handle: Handle,
) -> impl Fn(
    Option<Path<HashMap<String, String>>>,
    Query<Vec<(String, String)>>,
    Option<Extension<Caller>>,
    Bytes,
) -> BoxFuture<'static, Result<Reply, AppError>>
       + Clone
       + Send
       + Sync
       + 'static {
    move |params: Option<Path<HashMap<String, String>>>,
          Query(query): Query<Vec<(String, String)>>,
          caller: Option<Extension<Caller>>,
          body: Bytes|
          -> BoxFuture<'static, Result<Reply, AppError>> {
        let authorizer = authorizer.clone();
        let action = action.clone();
        let handle = handle.clone();
        Box::pin(async move {
            let caller = caller.map(|Extension(c)| c);
            if let Some(action) = &action {
                authorizer
                    .authorize(caller.as_ref(), action)
                    .map_err(AppError::Unauthorized)?;
            }
            let body = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&body)
                    .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))?
            };
            let call = RouteCall {
                params: params.map(|Path(p)| p).unwrap_or_default(),
                query,
                body,
                caller,
            };
            handle(call).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PermissionAuthorizer;
    use crate::domain::Library;
    use crate::store::{MockStore, Store};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn registrar(store: MockStore) -> RouteRegistrar {
        let store: Arc<dyn Store> = Arc::new(store);
        let mut registrar = RouteRegistrar::new(Arc::new(PermissionAuthorizer));
        Library::new(store, 21).register(&mut registrar);
        registrar
    }

    fn app(store: MockStore, permissions: Option<&[&str]>) -> Router {
        let router = registrar(store).into_router();
        match permissions {
            Some(p) => router.layer(Extension(Caller::new(
                "librarian",
                p.iter().map(|s| s.to_string()).collect(),
            ))),
            None => router,
        }
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(b) => Body::from(b.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[test]
    fn entity_registration_covers_crud_and_methods() {
        let routes = registrar(MockStore::new()).routes();
        let has = |m: Method, p: &str| routes.iter().any(|(rm, rp)| *rm == m && rp == p);
        assert!(has(Method::GET, "/items/fields"));
        assert!(has(Method::GET, "/items/:key"));
        assert!(has(Method::GET, "/items"));
        assert!(has(Method::PUT, "/items"));
        assert!(has(Method::POST, "/items"));
        assert!(has(Method::DELETE, "/items/:key"));
        assert!(has(Method::POST, "/items/:key/checkout"));
        assert!(has(Method::POST, "/borrowers/:key/renewAllItems"));
        assert!(has(Method::POST, "/history/:key/payFee"));
        assert!(has(Method::GET, "/borrowers/:key/history"));
        assert!(has(Method::GET, "/borrowers/me"));
    }

    #[tokio::test]
    async fn missing_caller_is_rejected_before_handler() {
        let mut store = MockStore::new();
        store.expect_fetch_optional().never();
        let (status, body) = send(app(store, None), "GET", "/items/X1", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], json!("NO_USER"));
    }

    #[tokio::test]
    async fn own_profile_needs_a_caller() {
        let mut store = MockStore::new();
        store.expect_fetch_optional().never();
        let (status, body) = send(app(store, None), "GET", "/borrowers/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], json!("NO_USER"));
    }

    #[tokio::test]
    async fn own_profile_returns_caller_with_items_and_fees() {
        let mut store = MockStore::new();
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "borrowers""#) && q.params == vec![json!(4)])
            .times(1)
            .returning(|_| {
                Ok(Some(json!({
                    "id": 1, "borrowernumber": 4, "surname": "Smith", "firstname": null,
                    "contactname": null, "phone": null, "emailaddress": "jo@example.org",
                    "sycamoreid": null, "state": "ACTIVE"
                })))
            });
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "checkouts""#))
            .returning(|_| {
                Ok(vec![json!({
                    "id": 3, "barcode": "X1", "borrowernumber": 4,
                    "checkout_date": "2024-03-01", "date_due": "2024-03-22",
                    "fine_due": 1.5, "fine_paid": 0.0
                })])
            });
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "history""#))
            .returning(|_| Ok(vec![]));
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "items""#))
            .returning(|_| Ok(vec![]));

        let router = registrar(store)
            .into_router()
            .layer(Extension(Caller::new("4", vec!["profile:read".to_string()])));
        let (status, body) = send(router, "GET", "/borrowers/me", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["borrowernumber"], json!(4));
        assert_eq!(body["items"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["fees"]["total"], json!(1.5));
        assert!(body.get("history").is_none());
    }

    #[tokio::test]
    async fn insufficient_permission_is_not_authorized() {
        let (status, body) = send(
            app(MockStore::new(), Some(&["items:read"])),
            "POST",
            "/items",
            Some(json!({ "barcode": "X9", "state": "CIRCULATING" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], json!("NOT_AUTHORIZED"));
    }

    #[tokio::test]
    async fn fields_route_wins_over_key() {
        let (status, body) = send(app(MockStore::new(), Some(&["items:read"])), "GET", "/items/fields", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f["name"].as_str())
            .collect();
        assert_eq!(names[..3], ["id", "barcode", "title"]);
        assert_eq!(body[8]["values"], json!(["CIRCULATING", "STORED", "DELETED", "LOST"]));
    }

    #[tokio::test]
    async fn missing_key_answers_404() {
        let mut store = MockStore::new();
        store.expect_fetch_optional().returning(|_| Ok(None));
        let (status, body) = send(app(store, Some(&["*"])), "GET", "/borrowers/99?options=fees", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], json!("ENTITY_NOT_FOUND"));
    }

    #[tokio::test]
    async fn list_parses_filters_and_count() {
        let mut store = MockStore::new();
        store
            .expect_fetch_all()
            .withf(|q| {
                q.sql.contains(r#"WHERE "surname" ILIKE $1 OR "state" = $2"#)
                    && q.sql.ends_with("LIMIT 10 OFFSET 20")
                    && q.params == vec![json!("%Smith%"), json!("ACTIVE")]
            })
            .returning(|_| Ok(vec![]));
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.starts_with("SELECT COUNT(*)"))
            .returning(|_| Ok(Some(json!({ "count": 23 }))));
        let (status, body) = send(
            app(store, Some(&["borrowers:read"])),
            "GET",
            "/borrowers?surname=Smith&state=ACTIVE&op=or&offset=20&limit=10&returnCount=true&nickname=x",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "rows": [], "count": 23 }));
    }

    #[tokio::test]
    async fn delete_answers_no_content() {
        let mut store = MockStore::new();
        store
            .expect_execute()
            .withf(|q| q.sql.starts_with(r#"DELETE FROM "items""#))
            .returning(|_| Ok(1));
        let (status, body) = send(app(store, Some(&["items:*"])), "DELETE", "/items/X1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn create_validation_lists_fields() {
        let (status, body) = send(
            app(MockStore::new(), Some(&["borrowers:create"])),
            "POST",
            "/borrowers",
            Some(json!({ "surname": "Smith" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["details"]["fields"], json!(["emailaddress", "state"]));
    }

    #[tokio::test]
    async fn unknown_extra_method_is_not_routed() {
        let (status, _) = send(app(MockStore::new(), Some(&["*"])), "POST", "/items/X1/shred", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
