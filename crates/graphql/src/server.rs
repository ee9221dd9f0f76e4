//! GraphQL HTTP server.

use std::future::Future;

use async_graphql::http::GraphiQLSource;
use async_graphql::{EmptyMutation, EmptySubscription, ObjectType, Schema};
use axum::{
    Json, Router,
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
};
use tracing::{debug, info};

use folio_core::services::ConnectionLoader;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_playground: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            enable_playground: true,
        }
    }
}

/// Shared handler state.
///
/// `loader` is a template: each request runs with a fork of it, so
/// batching and memoization never leak across requests.
pub struct AppState<Q> {
    schema: Schema<Q, EmptyMutation, EmptySubscription>,
    loader: ConnectionLoader,
}

impl<Q> Clone for AppState<Q> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            loader: self.loader.clone(),
        }
    }
}

impl<Q> AppState<Q> {
    pub fn new(schema: Schema<Q, EmptyMutation, EmptySubscription>, loader: ConnectionLoader) -> Self {
        Self { schema, loader }
    }
}

/// Build the application router.
pub fn router<Q>(state: AppState<Q>, config: &ServerConfig) -> Router
where
    Q: ObjectType + 'static,
{
    let mut app = Router::new()
        .route("/graphql", get(graphql_playground).post(graphql_handler::<Q>))
        .route("/health", get(health_check))
        .with_state(state);

    if config.enable_playground {
        app = app.route("/", get(graphql_playground));
    }

    app
}

/// Start the GraphQL server.
pub async fn serve<Q>(state: AppState<Q>, config: ServerConfig) -> Result<(), std::io::Error>
where
    Q: ObjectType + 'static,
{
    let app = router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("⚡ GraphQL server listening on http://{}", addr);

    axum::serve(listener, app).await
}

/// Start the GraphQL server with graceful shutdown support.
pub async fn serve_with_shutdown<Q, F>(
    state: AppState<Q>,
    config: ServerConfig,
    shutdown_signal: F,
) -> Result<(), std::io::Error>
where
    Q: ObjectType + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    debug!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
}

/// GraphQL query handler.
async fn graphql_handler<Q>(
    State(state): State<AppState<Q>>,
    Json(request): Json<async_graphql::Request>,
) -> Json<async_graphql::Response>
where
    Q: ObjectType + 'static,
{
    let request = request.data(state.loader.fork());
    Json(state.schema.execute(request).await)
}

/// GraphQL Playground UI.
async fn graphql_playground() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
