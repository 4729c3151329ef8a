//! SEMS API Library
//!
//! HTTP adapter over [`StationController`]: every route maps onto one
//! controller operation and every failure onto an [`ApiError`].

mod error;
mod session;
mod station;

pub use error::{ApiError, ErrorResponse};
pub use session::{CreateSessionRequest, PowerUpdateRequest, SessionResponse};

use axum::{
    Router,
    routing::{get, post},
};
use sems_engine::StationController;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Create the application router with all endpoints
pub fn create_app(controller: StationController) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/station/config",
            get(station::get_station_config).post(station::update_station_config),
        )
        .route("/station/status", get(station::get_station_status))
        .route("/sessions", post(session::create_session))
        .route("/sessions/{session_id}/stop", post(session::stop_session))
        .route(
            "/sessions/{session_id}/power-update",
            post(session::power_update),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(controller))
}

#[cfg(test)]
async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
