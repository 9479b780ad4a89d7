pub mod document;

pub use document::{
    parse_fleet_config, validate_fleet_config, DataCenterEntry, DeploymentEntry,
    FailoverPolicyEntry, FailoverSection, FleetConfig, FleetConfigError, HealthSection,
    LatencyEntry, RecoveryPlanEntry, RegionEntry, RoutingSection, ScalingPolicyEntry,
    ScalingSection, ServerEntry,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Fleet config error: {0}")]
    FleetConfigError(#[from] FleetConfigError),
}

/// Default fleet file location (~/.fleetguard/fleet.yaml)
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleetguard")
        .join("fleet.yaml")
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load, parse and validate a fleet file from disk.
pub fn load_fleet_file(path: &Path) -> Result<FleetConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = content.parse::<FleetConfig>()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_fleet_file() {
        let content = r#"
regions:
  - name: us-east
    latitude: 39.0
    longitude: -77.5
    servers:
      - { id: use-1, endpoint: 10.0.0.1, port: 8080 }
"#;

        let file = create_temp_file(content);
        let config = load_fleet_file(file.path()).unwrap();
        assert_eq!(config.server_count(), 1);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_fleet_file(Path::new("/nonexistent/fleet.yaml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_load_invalid_file() {
        let file = create_temp_file("regions: [");
        let result = load_fleet_file(file.path());
        assert!(matches!(
            result,
            Err(ConfigError::FleetConfigError(FleetConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with(".fleetguard/fleet.yaml"));
    }
}
