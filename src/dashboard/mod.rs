//! Status server: Axum JSON API over the ledger and the scheduler.
//!
//! Read-only apart from `POST /api/trigger/:task`, which fires a workflow
//! through the same single-flight path as the control loop.
//! CORS enabled for local development.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{AppState, StatusState};

/// Start the status server.
///
/// This spawns a background task. Bind or serve failures are logged and
/// never take the control loop down.
pub fn spawn_dashboard(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(port, error = %e, "Failed to bind status port");
                return;
            }
        };
        info!(port, "Status server listening on http://localhost:{port}");

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Status server error");
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/activity", get(routes::get_activity))
        .route("/api/snapshot", get(routes::get_snapshot))
        .route("/api/schedule", get(routes::get_schedule))
        .route("/api/trigger/:task", post(routes::trigger))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
