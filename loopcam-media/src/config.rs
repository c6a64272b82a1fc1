//! Playback configuration

use crate::decoder::VideoResolution;
use crate::error::{MediaError, MediaResult};
use loopcam_core::ResumePolicy;
use std::time::Duration;

/// Settings for one playback coordinator
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Wrap to the start at the end of the clip
    pub looping: bool,
    /// Minimum spacing between applied seek/sync commands
    pub seek_throttle: Duration,
    /// Capture stream frame rate
    pub fps: f64,
    /// Bounds the synthetic surface is fitted into
    pub surface_bounds: VideoResolution,
    /// How a saved offset maps to a resume position
    pub resume_policy: ResumePolicy,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            looping: true,
            seek_throttle: Duration::from_millis(100),
            fps: 30.0,
            surface_bounds: VideoResolution::VGA,
            resume_policy: ResumePolicy::default(),
        }
    }
}

impl PlaybackConfig {
    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.surface_bounds.is_empty() {
            return Err(MediaError::InvalidConfiguration {
                message: "Invalid surface bounds".to_string(),
            });
        }

        if !(self.fps > 0.0 && self.fps <= 120.0) {
            return Err(MediaError::InvalidConfiguration {
                message: "Frame rate must be between 0 and 120".to_string(),
            });
        }

        if self.seek_throttle > Duration::from_secs(10) {
            return Err(MediaError::InvalidConfiguration {
                message: "Seek throttle window above 10s".to_string(),
            });
        }

        Ok(())
    }

    /// Interval between timer-driven draws
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}
