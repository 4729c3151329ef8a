use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use sems_core::{ConnectorId, Kilowatts, Session};
use sems_engine::StationController;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub connector_id: ConnectorId,
    pub vehicle_max_power: Kilowatts,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session: Session,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUpdateRequest {
    pub consumed_power: Kilowatts,
}

/// Create a new charging session
pub async fn create_session(
    State(controller): State<Arc<StationController>>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Json(payload) = payload?;
    let session = controller.create_session(payload.connector_id, payload.vehicle_max_power)?;
    Ok(Json(SessionResponse { session }))
}

/// Stop an existing charging session
pub async fn stop_session(
    State(controller): State<Arc<StationController>>,
    session_id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(session_id) = session_id?;
    controller.stop_session(session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Update the power consumption for an existing session
pub async fn power_update(
    State(controller): State<Arc<StationController>>,
    session_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<PowerUpdateRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Path(session_id) = session_id?;
    let Json(payload) = payload?;
    let session = controller.report_power(session_id, payload.consumed_power)?;
    Ok(Json(SessionResponse { session }))
}
