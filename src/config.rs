use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Longer edge of marker thumbnails in pixels.
    pub thumbnail_max_edge: u32,
    /// Refuse anchor placement until tracking reports enough mapped surface.
    pub require_scan_quality: bool,
    /// Prefix for marker ids. A random one is drawn per coordinator when unset.
    pub marker_id_prefix: Option<String>,
    /// A frozen pose older than this (relative to the newest motion or
    /// location sample) is logged as stale.
    pub max_pose_age_secs: f64,
    /// Capacity of the sample channel between sources and the coordinator.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            thumbnail_max_edge: 160,
            require_scan_quality: true,
            marker_id_prefix: None,
            max_pose_age_secs: 0.5,
            event_capacity: 1024,
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: &str) -> Result<SessionConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thumbnail_max_edge == 0 {
            return Err(ConfigError::Invalid(
                "thumbnail_max_edge must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be positive".to_string(),
            ));
        }
        if !(self.max_pose_age_secs >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_pose_age_secs must be non-negative, got {}",
                self.max_pose_age_secs
            )));
        }
        Ok(())
    }
}
