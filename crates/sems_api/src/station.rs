use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use sems_core::{StationConfig, StationStatus};
use sems_engine::StationController;
use std::sync::Arc;

use crate::error::ApiError;

/// Get current station configuration
pub async fn get_station_config(
    State(controller): State<Arc<StationController>>,
) -> Json<StationConfig> {
    tracing::info!("Getting station configuration");
    Json(controller.get_config())
}

/// Replace the station configuration, keeping the sessions it still hosts
pub async fn update_station_config(
    State(controller): State<Arc<StationController>>,
    new_config: Result<Json<StationConfig>, JsonRejection>,
) -> Result<Json<StationConfig>, ApiError> {
    let Json(new_config) = new_config?;
    tracing::info!("Updating station configuration");
    let config = controller.set_config(new_config)?;
    Ok(Json(config))
}

/// Get station status with all current sessions
pub async fn get_station_status(
    State(controller): State<Arc<StationController>>,
) -> Json<StationStatus> {
    tracing::info!("Getting station status");
    Json(controller.get_status())
}
