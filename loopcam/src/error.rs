//! Facade error type

use loopcam_core::{ErrorCategory, StoreError};
use loopcam_media::MediaError;
use thiserror::Error;

/// Main error type for loopcam operations
#[derive(Error, Debug)]
pub enum LoopCamError {
    /// Durable store failed
    #[error("Storage error: {source}")]
    Store {
        /// Underlying store error
        #[from]
        source: StoreError,
    },

    /// Playback or capture failed
    #[error("Media error: {source}")]
    Media {
        /// Underlying media error
        #[from]
        source: MediaError,
    },

    /// Upload is not a video
    #[error("Upload rejected: {reason}")]
    UploadRejected {
        /// Why the upload was rejected
        reason: String,
    },

    /// Upload exceeds the configured size limit
    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    UploadTooLarge {
        /// Upload size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Initialization failed
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Failure reason
        reason: String,
    },
}

/// Result type alias for loopcam operations
pub type LoopCamResult<T> = Result<T, LoopCamError>;

impl LoopCamError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            LoopCamError::Store { source } => source.is_recoverable(),
            LoopCamError::Media { source } => source.is_recoverable(),
            LoopCamError::UploadRejected { .. } => true,
            LoopCamError::UploadTooLarge { .. } => true,
            LoopCamError::Configuration { .. } => false,
            LoopCamError::Initialization { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            LoopCamError::Store { source } => source.category(),
            LoopCamError::Media { source } => source.category(),
            LoopCamError::UploadRejected { .. } => ErrorCategory::Validation,
            LoopCamError::UploadTooLarge { .. } => ErrorCategory::Validation,
            LoopCamError::Configuration { .. } => ErrorCategory::Configuration,
            LoopCamError::Initialization { .. } => ErrorCategory::Configuration,
        }
    }
}
