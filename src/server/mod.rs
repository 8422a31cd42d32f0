use crate::tracker::JobTracker;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod handlers;

/// Settings of the jobs the service submits.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Container image used when a request does not name one
    pub default_image: String,
    /// Program invoked inside the job container
    pub job_program: String,
    /// Reported as the `source` of every notification
    pub source: String,
}

pub struct AppState {
    pub tracker: JobTracker,
    pub settings: ServiceSettings,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::help))
        .route("/build", post(handlers::build))
        .route("/status/:id", get(handlers::status))
        .route("/delete/:id", post(handlers::delete).delete(handlers::delete))
        .route("/health", get(handlers::health))
        .route("/readiness", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let app = router(state);
    tracing::info!(%addr, "vauban build service listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
