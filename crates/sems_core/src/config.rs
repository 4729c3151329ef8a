//! Station configuration validation

use std::collections::HashSet;

use crate::{ConfigError, StationConfig, ValidationError};

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

impl StationConfig {
    /// Collect every problem with this configuration.
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !is_positive(self.grid_capacity) {
            errors.push(ValidationError::GridCapacity(self.grid_capacity));
        }

        let mut seen_ids = HashSet::new();
        for charger in &self.chargers {
            if charger.id.is_empty() {
                errors.push(ValidationError::EmptyChargerId);
            } else if !seen_ids.insert(charger.id.as_str()) {
                errors.push(ValidationError::DuplicateChargerId(charger.id.clone()));
            }

            if !is_positive(charger.max_power) {
                errors.push(ValidationError::ChargerMaxPower {
                    charger_id: charger.id.clone(),
                    max_power: charger.max_power,
                });
            }

            if charger.connectors == 0 {
                errors.push(ValidationError::NoConnectors {
                    charger_id: charger.id.clone(),
                });
            }
        }

        errors
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}
