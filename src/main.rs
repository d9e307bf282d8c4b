//! Library server: loads configuration, connects to PostgreSQL and serves the
//! entity routes under the configured API prefix.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use library_api::config::{AppConfig, LogFormat};
use library_api::{
    common_routes, AppState, Caller, Library, PermissionAuthorizer, PgStore, RouteRegistrar, Store,
};

const MAX_BODY_BYTES: usize = 1 << 20;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "library_api={level},library_server={level},tower_http=info",
            level = config.logging.level
        ))
    });
    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Requests without an authenticated caller act as `anonymous` with the given permissions.
fn with_anonymous_caller(api: Router, permissions: Vec<String>) -> Router {
    let anonymous = Caller::new("anonymous", permissions);
    api.layer(middleware::from_fn(move |mut req: Request, next: Next| {
        let anonymous = anonymous.clone();
        async move {
            if req.extensions().get::<Caller>().is_none() {
                req.extensions_mut().insert(anonymous);
            }
            next.run(req).await
        }
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;
    init_tracing(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting library server");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;
    tracing::info!("connected to database");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let library = Library::new(store, config.library.loan_days);
    let mut registrar = RouteRegistrar::new(Arc::new(PermissionAuthorizer));
    library.register(&mut registrar);

    let mut api = registrar.into_router();
    if let Some(permissions) = config.auth.anonymous_permissions.clone() {
        tracing::warn!(?permissions, "anonymous access enabled");
        api = with_anonymous_caller(api, permissions);
    }

    let prefix = config.server.api_prefix.clone();
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let state = AppState {
        pool,
        config: Arc::new(config),
    };
    let app = if prefix.is_empty() {
        common_routes(state).merge(api)
    } else {
        common_routes(state).nest(&prefix, api)
    }
    .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
    .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, api = %prefix, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
