//! Configuration types and defaults

use crate::error::{LoopCamError, LoopCamResult};
use loopcam_core::{Partition, ResumePolicy, Schema, DEFAULT_CHANNEL, DEFAULT_DB_NAME, SCHEMA_VERSION};
use loopcam_media::{PlaybackConfig, VideoResolution};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global loopcam configuration
///
/// Every field has a default, so a JSON document only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopCamConfig {
    /// Enable debug logging
    pub debug_logging: bool,
    /// Durable store name
    pub db_name: String,
    /// Durable store schema version
    pub schema_version: u32,
    /// Sync bus channel name
    pub channel_name: String,
    /// Synthetic surface bound width
    pub surface_width: u32,
    /// Synthetic surface bound height
    pub surface_height: u32,
    /// Capture stream frame rate
    pub fps: f64,
    /// Minimum spacing between applied seek/sync commands
    pub seek_throttle_ms: u64,
    /// Producer sync broadcast period
    pub sync_interval_ms: u64,
    /// Producer checkpoint period while playing
    pub autosave_interval_ms: u64,
    /// Loop the video
    pub loop_playback: bool,
    /// How saved offsets turn into resume positions
    pub resume_policy: ResumePolicy,
    /// Largest accepted upload, unlimited when unset
    pub max_upload_bytes: Option<usize>,
}

impl Default for LoopCamConfig {
    fn default() -> Self {
        Self {
            debug_logging: false,
            db_name: DEFAULT_DB_NAME.to_string(),
            schema_version: SCHEMA_VERSION,
            channel_name: DEFAULT_CHANNEL.to_string(),
            surface_width: 640,
            surface_height: 480,
            fps: 30.0,
            seek_throttle_ms: 100,
            sync_interval_ms: 1000,
            autosave_interval_ms: 10_000,
            loop_playback: true,
            resume_policy: ResumePolicy::Extrapolated,
            max_upload_bytes: None,
        }
    }
}

impl LoopCamConfig {
    /// Parse from a JSON document
    pub fn from_json_str(json: &str) -> LoopCamResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LoopCamError::Configuration {
                message: format!("invalid config JSON: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> LoopCamResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| LoopCamError::Configuration {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    /// Validate configuration
    pub fn validate(&self) -> LoopCamResult<()> {
        if self.db_name.trim().is_empty() {
            return Err(LoopCamError::Configuration {
                message: "db_name must not be empty".to_string(),
            });
        }

        if self.channel_name.trim().is_empty() {
            return Err(LoopCamError::Configuration {
                message: "channel_name must not be empty".to_string(),
            });
        }

        if self.schema_version == 0 {
            return Err(LoopCamError::Configuration {
                message: "schema_version must be at least 1".to_string(),
            });
        }

        if self.sync_interval_ms == 0 {
            return Err(LoopCamError::Configuration {
                message: "sync_interval_ms must be positive".to_string(),
            });
        }

        if !(1_000..=60_000).contains(&self.autosave_interval_ms) {
            return Err(LoopCamError::Configuration {
                message: "autosave_interval_ms must be between 1000 and 60000".to_string(),
            });
        }

        if self.max_upload_bytes == Some(0) {
            return Err(LoopCamError::Configuration {
                message: "max_upload_bytes must be positive when set".to_string(),
            });
        }

        self.playback().validate()?;
        Ok(())
    }

    /// Store schema derived from this configuration
    pub fn schema(&self) -> Schema {
        Schema {
            name: self.db_name.clone(),
            version: self.schema_version,
            partitions: Partition::ALL.to_vec(),
        }
    }

    /// Playback settings for coordinators
    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            looping: self.loop_playback,
            seek_throttle: Duration::from_millis(self.seek_throttle_ms),
            fps: self.fps,
            surface_bounds: VideoResolution::new(self.surface_width, self.surface_height),
            resume_policy: self.resume_policy,
        }
    }

    /// Producer sync broadcast period
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Producer checkpoint period
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoopCamConfig::default();
        assert_eq!(config.db_name, "virtualCameraDB");
        assert_eq!(config.schema_version, 2);
        assert_eq!(config.channel_name, "virtual_camera_channel");
        assert_eq!(config.sync_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());

        let playback = config.playback();
        assert_eq!(playback.surface_bounds, VideoResolution::VGA);
        assert_eq!(playback.seek_throttle, Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json() {
        let config = LoopCamConfig::from_json_str(
            r#"{ "channel_name": "tab-sync", "resume_policy": "exact", "max_upload_bytes": 1024 }"#,
        )
        .unwrap();
        assert_eq!(config.channel_name, "tab-sync");
        assert_eq!(config.resume_policy, ResumePolicy::Exact);
        assert_eq!(config.max_upload_bytes, Some(1024));
        assert_eq!(config.fps, 30.0);
    }

    #[test]
    fn test_invalid_values() {
        let config = LoopCamConfig {
            autosave_interval_ms: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LoopCamConfig {
            fps: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LoopCamError::Media { .. })
        ));

        assert!(LoopCamConfig::from_json_str("{ not json").is_err());
        assert!(LoopCamConfig::from_json_str(r#"{ "resume_policy": "later" }"#).is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loopcam.json");
        std::fs::write(&path, r#"{ "debug_logging": true }"#).unwrap();
        let config = LoopCamConfig::from_json_file(&path).unwrap();
        assert!(config.debug_logging);

        assert!(LoopCamConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
