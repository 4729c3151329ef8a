use anyhow::{Context, Result};
use sems_core::StationConfig;
use std::path::Path;

/// Read a station configuration JSON file and validate it.
pub async fn load_station_config(path: &Path) -> Result<StationConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

    let config: StationConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;

    config
        .validate()
        .with_context(|| format!("Invalid station configuration in '{}'", path.display()))?;

    Ok(config)
}
