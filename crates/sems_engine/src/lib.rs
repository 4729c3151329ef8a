//! Station controller
//!
//! Entry point for every lifecycle event of the station. Mutations are
//! serialized, recomputed from scratch by the [`AllocationEngine`] on a private
//! copy of the station, and committed in one swap so status readers always
//! observe a fully allocated state.

use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard};

use sems_core::{
    AllocationEngine, ConfigError, ConnectorId, GridPolicy, Kilowatts, Session, SessionError,
    SessionRegistry, StationConfig, StationError, StationStatus,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct Station {
    config: StationConfig,
    registry: SessionRegistry,
}

impl Station {
    fn session(&self, session_id: &uuid::Uuid) -> Result<Session, StationError> {
        self.registry
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound { session_id: *session_id }.into())
    }
}

pub struct StationController {
    engine: AllocationEngine,
    /// Held for the whole read-modify-write of a mutating operation
    writer: Mutex<()>,
    station: RwLock<Station>,
}

impl StationController {
    pub fn new(config: StationConfig) -> Result<Self, StationError> {
        Self::with_policy(config, GridPolicy::default())
    }

    pub fn with_policy(config: StationConfig, policy: GridPolicy) -> Result<Self, StationError> {
        config.validate()?;
        info!(
            station_id = %config.station_id,
            grid_capacity_kw = config.grid_capacity,
            chargers = config.chargers.len(),
            ?policy,
            "Station controller initialized"
        );
        Ok(StationController {
            engine: AllocationEngine::new(policy),
            writer: Mutex::new(()),
            station: RwLock::new(Station {
                config,
                registry: SessionRegistry::new(),
            }),
        })
    }

    pub fn policy(&self) -> GridPolicy {
        self.engine.policy()
    }

    // Every write is a single swap, a poisoned lock still guards a consistent station
    fn read(&self) -> RwLockReadGuard<'_, Station> {
        self.station.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` on a private copy of the station and commit the copy if it succeeds.
    fn transaction<T>(
        &self,
        op: impl FnOnce(&mut Station) -> Result<T, StationError>,
    ) -> Result<T, StationError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.read().clone();
        let output = op(&mut next)?;
        *self.station.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(output)
    }

    /// Recompute every allocation of `station` and write it back to its registry.
    fn reallocate(&self, station: &mut Station) -> Result<(), StationError> {
        let snapshot = station.registry.snapshot();
        let allocation = self
            .engine
            .allocate(&station.config, &snapshot)
            .inspect_err(|error| {
                error!(
                    %error,
                    sessions = snapshot.len(),
                    grid_capacity_kw = station.config.grid_capacity,
                    "Allocation violates a capacity invariant, nothing committed"
                );
            })?;

        if let Err(error) = station.registry.apply_allocations(&allocation) {
            warn!(%error, "Session vanished before its allocation was applied");
        }

        debug!(
            sessions = allocation.len(),
            total_allocated_kw = allocation.total_power(),
            "Reallocated station power"
        );
        Ok(())
    }

    pub fn get_config(&self) -> StationConfig {
        self.read().config.clone()
    }

    /// Replace the station configuration and reallocate the sessions under it.
    ///
    /// Rejected when an active session sits on a connector the new
    /// configuration does not have.
    pub fn set_config(&self, config: StationConfig) -> Result<StationConfig, StationError> {
        config.validate()?;
        let sessions = self.transaction(|station| {
            if let Some(session) = station.registry.first_orphan(&config) {
                return Err(ConfigError::InUse {
                    connector_id: session.connector_id.clone(),
                    session_id: session.session_id,
                }
                .into());
            }
            station.config = config.clone();
            self.reallocate(station)?;
            Ok(station.registry.len())
        })?;

        info!(
            station_id = %config.station_id,
            grid_capacity_kw = config.grid_capacity,
            chargers = config.chargers.len(),
            sessions,
            "Station configuration replaced"
        );
        Ok(config)
    }

    /// Active sessions with their current allocations. Never triggers a reallocation.
    pub fn get_status(&self) -> StationStatus {
        StationStatus::from_sessions(self.read().registry.snapshot())
    }

    pub fn get_session(&self, session_id: &uuid::Uuid) -> Option<Session> {
        self.read().registry.get(session_id).cloned()
    }

    pub fn create_session(
        &self,
        connector_id: ConnectorId,
        vehicle_max_power: Kilowatts,
    ) -> Result<Session, StationError> {
        let session = self.transaction(|station| {
            let created =
                station
                    .registry
                    .create(&station.config, connector_id, vehicle_max_power)?;
            self.reallocate(station)?;
            station.session(&created.session_id)
        })?;

        info!(
            session_id = %session.session_id,
            connector = %session.connector_id,
            vehicle_max_kw = session.vehicle_max_power,
            allocated_kw = session.allocated_power,
            "Session started"
        );
        Ok(session)
    }

    pub fn stop_session(&self, session_id: uuid::Uuid) -> Result<(), StationError> {
        let stopped = self.transaction(|station| {
            let stopped = station.registry.stop(session_id)?;
            self.reallocate(station)?;
            Ok(stopped)
        })?;

        info!(
            %session_id,
            connector = %stopped.connector_id,
            "Session stopped"
        );
        Ok(())
    }

    /// Record the power a vehicle reports drawing and reallocate the station.
    ///
    /// The reported figure is informational: allocations depend on the vehicle
    /// ceilings only, so repeating a report yields the same allocation.
    pub fn report_power(
        &self,
        session_id: uuid::Uuid,
        consumed_power: Kilowatts,
    ) -> Result<Session, StationError> {
        let session = self.transaction(|station| {
            station
                .registry
                .update_consumption(session_id, consumed_power)?;
            self.reallocate(station)?;
            station.session(&session_id)
        })?;

        info!(
            %session_id,
            consumed_kw = session.consumed_power,
            allocated_kw = session.allocated_power,
            "Power reported"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use sems_core::{ChargerConfig, ErrorKind, sum_kilowatts};

    use super::*;

    fn charger(id: &str, max_power: f64, connectors: u8) -> ChargerConfig {
        ChargerConfig {
            id: id.into(),
            max_power,
            connectors,
        }
    }

    fn config(grid_capacity: f64, chargers: Vec<ChargerConfig>) -> StationConfig {
        StationConfig {
            station_id: "ELECTRA_PARIS_15".into(),
            grid_capacity,
            chargers,
        }
    }

    fn two_chargers() -> StationController {
        StationController::new(config(
            400.0,
            vec![charger("CP001", 300.0, 2), charger("CP002", 300.0, 2)],
        ))
        .unwrap()
    }

    fn assert_power(controller: &StationController, session: &Session, expected: f64) {
        let allocated = controller
            .get_session(&session.session_id)
            .expect("Could not find session")
            .allocated_power;
        assert!(
            (allocated - expected).abs() < 1e-3,
            "session on {} got {allocated} kW, expected {expected} kW",
            session.connector_id
        );
    }

    /// Every capacity invariant over the committed status
    fn assert_invariants(controller: &StationController) {
        let config = controller.get_config();
        let status = controller.get_status();

        let mut per_charger: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut per_connector: HashMap<&ConnectorId, usize> = HashMap::new();
        for session in status.sessions.values() {
            assert!(session.allocated_power >= 0.0);
            assert!(session.allocated_power <= session.vehicle_max_power);
            per_charger
                .entry(session.connector_id.charger_id.as_str())
                .or_default()
                .push(session.allocated_power);
            *per_connector.entry(&session.connector_id).or_default() += 1;
        }

        for (charger_id, allocated) in per_charger {
            let max_power = config.charger(charger_id).unwrap().max_power;
            assert!(sum_kilowatts(allocated) <= max_power, "{charger_id} over capacity");
        }
        assert!(status.total_allocated_power <= config.grid_capacity);
        assert!(per_connector.values().all(|&count| count == 1));
    }

    #[test]
    fn test_invalid_initial_config() {
        let result = StationController::new(config(0.0, vec![charger("CP001", 100.0, 1)]));
        assert!(matches!(
            result,
            Err(StationError::Config(ConfigError::Validation(_)))
        ));
    }

    #[test]
    fn test_scenario_equal_split_on_one_charger() {
        let controller =
            StationController::new(config(400.0, vec![charger("CP001", 200.0, 2)])).unwrap();

        let a = controller
            .create_session(ConnectorId::new("CP001", 1), 150.0)
            .expect("Could not create the session");
        assert_eq!(a.allocated_power, 150.0);

        let b = controller
            .create_session(ConnectorId::new("CP001", 2), 150.0)
            .expect("Could not create the session");
        assert_eq!(b.allocated_power, 100.0);

        assert_power(&controller, &a, 100.0);
        assert_power(&controller, &b, 100.0);
        assert_invariants(&controller);
    }

    #[test]
    fn test_scenario_arrivals_and_departure() {
        let controller = two_chargers();

        let v1 = controller
            .create_session(ConnectorId::new("CP001", 1), 150.0)
            .unwrap();
        let v2 = controller
            .create_session(ConnectorId::new("CP001", 2), 150.0)
            .unwrap();
        assert_power(&controller, &v1, 150.0);
        assert_power(&controller, &v2, 150.0);
        assert_invariants(&controller);

        // Third vehicle, 450 kW wanted against a 400 kW grid
        let v3 = controller
            .create_session(ConnectorId::new("CP002", 1), 150.0)
            .unwrap();
        for session in [&v1, &v2, &v3] {
            assert_power(&controller, session, 133.333);
        }
        assert_invariants(&controller);

        // Fourth vehicle, 600 kW wanted
        let v4 = controller
            .create_session(ConnectorId::new("CP002", 2), 150.0)
            .unwrap();
        for session in [&v1, &v2, &v3, &v4] {
            assert_power(&controller, session, 100.0);
        }
        assert_invariants(&controller);

        // First vehicle leaves
        controller.stop_session(v1.session_id).unwrap();
        assert!(controller.get_session(&v1.session_id).is_none());
        for session in [&v2, &v3, &v4] {
            assert_power(&controller, session, 133.333);
        }
        assert_eq!(controller.get_status().sessions.len(), 3);
        assert_invariants(&controller);
    }

    #[test]
    fn test_scenario_connector_index_out_of_range() {
        let controller = two_chargers();

        let result = controller.create_session(ConnectorId::new("CP001", 3), 150.0);
        let Err(error) = result else {
            panic!("Expected ConnectorNotFound error");
        };
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(
            error,
            StationError::Session(SessionError::ConnectorNotFound {
                connector_id: ConnectorId::new("CP001", 3)
            })
        );
        assert!(controller.get_status().sessions.is_empty());
    }

    #[test]
    fn test_scenario_connector_occupied() {
        let controller = two_chargers();
        let connector_id = ConnectorId::new("CP001", 1);

        let first = controller
            .create_session(connector_id.clone(), 100.0)
            .unwrap();

        let result = controller.create_session(connector_id.clone(), 50.0);
        assert_eq!(
            result,
            Err(StationError::Session(SessionError::ConnectorOccupied {
                connector_id
            }))
        );
        assert_power(&controller, &first, 100.0);
        assert_eq!(controller.get_status().sessions.len(), 1);
    }

    #[test]
    fn test_invalid_demand_leaves_state_untouched() {
        let controller = two_chargers();
        let result = controller.create_session(ConnectorId::new("CP001", 1), 0.0);
        assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::Validation));
        assert!(controller.get_status().sessions.is_empty());
    }

    #[test]
    fn test_stop_unknown_session() {
        let controller = two_chargers();
        let session_id = uuid::Uuid::new_v4();
        assert_eq!(
            controller.stop_session(session_id),
            Err(StationError::Session(SessionError::SessionNotFound {
                session_id
            }))
        );
    }

    #[test]
    fn test_report_power_is_idempotent() {
        let controller = two_chargers();
        let v1 = controller
            .create_session(ConnectorId::new("CP001", 1), 150.0)
            .unwrap();
        controller
            .create_session(ConnectorId::new("CP002", 1), 300.0)
            .unwrap();

        let first = controller.report_power(v1.session_id, 80.0).unwrap();
        let second = controller.report_power(v1.session_id, 80.0).unwrap();

        assert_eq!(first.consumed_power, 80.0);
        assert_eq!(first.allocated_power, second.allocated_power);
        // The ceiling is fixed at creation, the report does not lower it
        assert_eq!(second.vehicle_max_power, 150.0);
    }

    #[test]
    fn test_report_power_unknown_session() {
        let controller = two_chargers();
        let session_id = uuid::Uuid::new_v4();
        let result = controller.report_power(session_id, 10.0);
        assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::NotFound));
    }

    #[test]
    fn test_report_negative_power() {
        let controller = two_chargers();
        let v1 = controller
            .create_session(ConnectorId::new("CP001", 1), 150.0)
            .unwrap();
        let result = controller.report_power(v1.session_id, -1.0);
        assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::Validation));
        assert_eq!(
            controller.get_session(&v1.session_id).map(|s| s.consumed_power),
            Some(0.0)
        );
    }

    #[test]
    fn test_set_config_reallocates_surviving_sessions() {
        let controller = two_chargers();
        let v1 = controller
            .create_session(ConnectorId::new("CP001", 1), 150.0)
            .unwrap();
        let v2 = controller
            .create_session(ConnectorId::new("CP001", 2), 150.0)
            .unwrap();

        let updated = controller
            .set_config(config(500.0, vec![charger("CP001", 200.0, 2)]))
            .unwrap();
        assert_eq!(updated.grid_capacity, 500.0);
        assert_eq!(controller.get_config(), updated);

        assert_power(&controller, &v1, 100.0);
        assert_power(&controller, &v2, 100.0);
        assert_invariants(&controller);
    }

    #[test]
    fn test_set_config_in_use() {
        let controller = two_chargers();
        let on_cp002 = controller
            .create_session(ConnectorId::new("CP002", 2), 150.0)
            .unwrap();
        let before = controller.get_config();

        let result = controller.set_config(config(
            400.0,
            vec![charger("CP001", 300.0, 2), charger("CP002", 300.0, 1)],
        ));
        assert_eq!(
            result,
            Err(StationError::Config(ConfigError::InUse {
                connector_id: ConnectorId::new("CP002", 2),
                session_id: on_cp002.session_id,
            }))
        );
        assert_eq!(controller.get_config(), before);
        assert_power(&controller, &on_cp002, 150.0);
    }

    #[test]
    fn test_set_config_validation() {
        let controller = two_chargers();
        let before = controller.get_config();

        let result = controller.set_config(config(
            400.0,
            vec![charger("CP001", 300.0, 2), charger("CP001", 100.0, 1)],
        ));
        assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::Validation));
        assert_eq!(controller.get_config(), before);
    }

    #[test]
    fn test_max_min_policy() {
        let controller = StationController::with_policy(
            config(
                300.0,
                vec![charger("CP001", 300.0, 2), charger("CP002", 300.0, 2)],
            ),
            GridPolicy::MaxMinFair,
        )
        .unwrap();
        assert_eq!(controller.policy(), GridPolicy::MaxMinFair);

        let small = controller
            .create_session(ConnectorId::new("CP001", 1), 50.0)
            .unwrap();
        let medium = controller
            .create_session(ConnectorId::new("CP001", 2), 100.0)
            .unwrap();
        let large = controller
            .create_session(ConnectorId::new("CP002", 1), 200.0)
            .unwrap();

        assert_power(&controller, &small, 50.0);
        assert_power(&controller, &medium, 100.0);
        assert_power(&controller, &large, 150.0);
        assert_invariants(&controller);
    }

    #[test]
    fn test_concurrent_events_keep_invariants() {
        let controller = StationController::new(config(
            250.0,
            vec![
                charger("CP001", 150.0, 4),
                charger("CP002", 150.0, 4),
                charger("CP003", 150.0, 4),
            ],
        ))
        .unwrap();

        std::thread::scope(|scope| {
            for charger_id in ["CP001", "CP002", "CP003"] {
                let controller = &controller;
                scope.spawn(move || {
                    for idx in 1..=4 {
                        let session = controller
                            .create_session(ConnectorId::new(charger_id, idx), 40.0 * idx as f64)
                            .unwrap();
                        controller.report_power(session.session_id, 10.0).unwrap();
                        if idx % 2 == 0 {
                            controller.stop_session(session.session_id).unwrap();
                        }
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..50 {
                    let status = controller.get_status();
                    assert!(status.total_allocated_power <= 250.0);
                }
            });
        });

        assert_eq!(controller.get_status().sessions.len(), 6);
        assert_invariants(&controller);
    }
}
