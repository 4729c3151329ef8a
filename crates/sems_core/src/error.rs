use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ConnectorId, Kilowatts};

/// A single problem found while validating a station configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("grid capacity must be a positive number of kW, got {0}")]
    GridCapacity(Kilowatts),

    #[error("charger id cannot be empty")]
    EmptyChargerId,

    #[error("duplicate charger id: {0}")]
    DuplicateChargerId(String),

    #[error("charger '{charger_id}': max power must be a positive number of kW, got {max_power}")]
    ChargerMaxPower {
        charger_id: String,
        max_power: Kilowatts,
    },

    #[error("charger '{charger_id}' must expose at least one connector")]
    NoConnectors { charger_id: String },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid station configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error(
        "connector {connector_id} is occupied by session {session_id} and absent from the new configuration"
    )]
    InUse {
        connector_id: ConnectorId,
        session_id: uuid::Uuid,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Connector {connector_id} does not exist in the station configuration")]
    ConnectorNotFound { connector_id: ConnectorId },

    #[error("Connector {connector_id} is already in use by another session")]
    ConnectorOccupied { connector_id: ConnectorId },

    #[error("Vehicle max power must be a positive number of kW, got {vehicle_max_power}")]
    InvalidDemand { vehicle_max_power: Kilowatts },

    #[error("Consumed power must be a non-negative number of kW, got {consumed_power}")]
    InvalidConsumption { consumed_power: Kilowatts },

    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: uuid::Uuid },
}

/// Defects detected in an allocation before it is committed. None of these
/// can be caused by caller input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("session {session_id} references charger '{charger_id}' missing from the configuration")]
    UnknownCharger {
        session_id: uuid::Uuid,
        charger_id: String,
    },

    #[error("charger '{charger_id}' allocated {allocated_w} W above its {max_power_w} W ceiling")]
    ChargerOverCapacity {
        charger_id: String,
        allocated_w: u64,
        max_power_w: u64,
    },

    #[error("station allocated {allocated_w} W above its {grid_capacity_w} W grid capacity")]
    GridOverCapacity {
        allocated_w: u64,
        grid_capacity_w: u64,
    },

    #[error("session {session_id} allocated {allocated_w} W above its {demand_w} W vehicle ceiling")]
    SessionOverDemand {
        session_id: uuid::Uuid,
        allocated_w: u64,
        demand_w: u64,
    },
}

/// Coarse classification of failures, used by transports to pick a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Malformed input, nothing was mutated
    Validation,
    /// Well-formed request violating the current state
    Conflict,
    /// Reference to an entity that does not exist
    NotFound,
    /// Engine defect
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl StationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StationError::Config(ConfigError::Validation(_)) => ErrorKind::Validation,
            StationError::Config(ConfigError::InUse { .. }) => ErrorKind::Conflict,
            StationError::Session(error) => match error {
                SessionError::InvalidDemand { .. } | SessionError::InvalidConsumption { .. } => {
                    ErrorKind::Validation
                }
                SessionError::ConnectorOccupied { .. } => ErrorKind::Conflict,
                SessionError::ConnectorNotFound { .. } | SessionError::SessionNotFound { .. } => {
                    ErrorKind::NotFound
                }
            },
            StationError::Allocation(_) => ErrorKind::Internal,
        }
    }
}
