//! In-memory set of active charging sessions

use std::collections::HashMap;

use crate::{Allocation, ConnectorId, Kilowatts, Session, SessionError, SessionState, StationConfig};

/// Authoritative set of active sessions, keyed by session id.
///
/// A connector hosts at most one active session. Stopped sessions leave the
/// registry and are never allocated again.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: HashMap<uuid::Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, session_id: &uuid::Uuid) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    fn occupant(&self, connector_id: &ConnectorId) -> Option<&Session> {
        self.sessions
            .values()
            .find(|session| &session.connector_id == connector_id)
    }

    /// Register a new session on `connector_id` with no power assigned yet.
    pub fn create(
        &mut self,
        config: &StationConfig,
        connector_id: ConnectorId,
        vehicle_max_power: Kilowatts,
    ) -> Result<Session, SessionError> {
        if !config.has_connector(&connector_id) {
            return Err(SessionError::ConnectorNotFound { connector_id });
        }

        if self.occupant(&connector_id).is_some() {
            return Err(SessionError::ConnectorOccupied { connector_id });
        }

        if !(vehicle_max_power.is_finite() && vehicle_max_power > 0.0) {
            return Err(SessionError::InvalidDemand { vehicle_max_power });
        }

        let session = Session::new(connector_id, vehicle_max_power);
        tracing::debug!(
            session_id = %session.session_id,
            connector = %session.connector_id,
            "Registered session"
        );
        self.sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    /// Move a session to its terminal state and drop it from the active set.
    pub fn stop(&mut self, session_id: uuid::Uuid) -> Result<Session, SessionError> {
        let mut session = self
            .sessions
            .remove(&session_id)
            .ok_or(SessionError::SessionNotFound { session_id })?;
        session.state = SessionState::Stopped;
        tracing::debug!(%session_id, connector = %session.connector_id, "Released connector");
        Ok(session)
    }

    /// Record the latest reported draw. Does not touch allocations.
    pub fn update_consumption(
        &mut self,
        session_id: uuid::Uuid,
        consumed_power: Kilowatts,
    ) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::SessionNotFound { session_id })?;

        if !(consumed_power.is_finite() && consumed_power >= 0.0) {
            return Err(SessionError::InvalidConsumption { consumed_power });
        }

        session.consumed_power = consumed_power;
        Ok(session.clone())
    }

    /// Active sessions ordered by connector, so callers iterate deterministically.
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));
        sessions
    }

    /// The first active session whose connector would not exist under `config`.
    pub fn first_orphan(&self, config: &StationConfig) -> Option<&Session> {
        self.sessions
            .values()
            .filter(|session| !config.has_connector(&session.connector_id))
            .min_by(|a, b| a.connector_id.cmp(&b.connector_id))
    }

    /// Write allocated power to every matching session.
    ///
    /// Sessions of the allocation that are no longer active are skipped; the
    /// first one is reported as `SessionNotFound` once every other session has
    /// been updated.
    pub fn apply_allocations(&mut self, allocation: &Allocation) -> Result<(), SessionError> {
        let mut missing = None;
        for (session_id, allocated_power) in allocation.iter() {
            match self.sessions.get_mut(&session_id) {
                Some(session) => session.allocated_power = allocated_power,
                None => {
                    missing.get_or_insert(session_id);
                }
            }
        }

        match missing {
            Some(session_id) => Err(SessionError::SessionNotFound { session_id }),
            None => Ok(()),
        }
    }
}
