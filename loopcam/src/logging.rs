//! Structured logging bootstrap

use crate::config::LoopCamConfig;
use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber
///
/// `RUST_LOG` wins when set; otherwise `debug_logging` picks between `debug`
/// and `info` for loopcam crates. Returns `false` if a subscriber was already
/// installed, which is not an error.
pub fn init_logging(config: &LoopCamConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if config.debug_logging { "debug" } else { "info" };
        EnvFilter::new(format!(
            "warn,loopcam={level},loopcam_core={level},loopcam_media={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
