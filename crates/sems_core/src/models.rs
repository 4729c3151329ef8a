use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::allocator::sum_kilowatts;

/// Power figures are expressed in kW on every public type.
pub type Kilowatts = f64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    #[serde(default)]
    pub station_id: String,
    /// Grid capacity in kW, shared by every charger of the station
    pub grid_capacity: Kilowatts,
    pub chargers: Vec<ChargerConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerConfig {
    pub id: String,
    /// Maximum power in kW (shared between connectors)
    pub max_power: Kilowatts,
    /// Number of connectors, addressed from 1
    pub connectors: u8,
}

impl StationConfig {
    pub fn charger(&self, charger_id: &str) -> Option<&ChargerConfig> {
        self.chargers.iter().find(|charger| charger.id == charger_id)
    }

    /// Whether the connector is addressable under this configuration.
    pub fn has_connector(&self, connector_id: &ConnectorId) -> bool {
        self.charger(&connector_id.charger_id)
            .is_some_and(|charger| connector_id.idx >= 1 && connector_id.idx <= charger.connectors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Active,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: uuid::Uuid,
    pub connector_id: ConnectorId,
    pub vehicle_max_power: Kilowatts,
    pub allocated_power: Kilowatts,
    #[serde(default)]
    pub consumed_power: Kilowatts,
    #[serde(default)]
    pub state: SessionState,
}

impl Session {
    pub fn new(connector_id: ConnectorId, vehicle_max_power: Kilowatts) -> Self {
        Session {
            session_id: uuid::Uuid::new_v4(),
            connector_id,
            vehicle_max_power,
            allocated_power: 0.0,
            consumed_power: 0.0,
            state: SessionState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorId {
    pub charger_id: String,
    pub idx: u8,
}

impl ConnectorId {
    pub fn new(charger_id: impl Into<String>, idx: u8) -> Self {
        ConnectorId {
            charger_id: charger_id.into(),
            idx,
        }
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.charger_id, self.idx)
    }
}

/// Read-only view of the active sessions and their current allocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatus {
    pub sessions: HashMap<uuid::Uuid, Session>,
    pub total_allocated_power: Kilowatts,
}

impl StationStatus {
    pub fn from_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        let sessions: HashMap<uuid::Uuid, Session> = sessions
            .into_iter()
            .map(|session| (session.session_id, session))
            .collect();
        let total_allocated_power = sum_kilowatts(sessions.values().map(|s| s.allocated_power));
        StationStatus {
            sessions,
            total_allocated_power,
        }
    }
}
