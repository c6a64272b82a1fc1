//! Media error types and handling
//!
//! Decode failures, capture failures and invalid playback states all surface
//! through [`MediaError`]. Storage errors from the core crate are wrapped so
//! callers only deal with one error type.

use loopcam_core::{ErrorCategory, StoreError};
use thiserror::Error;

/// Main error type for playback and capture operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// Storage layer failed
    #[error("Storage error: {source}")]
    Storage {
        /// Underlying store error
        #[from]
        source: StoreError,
    },

    /// No media blob has been stored yet
    #[error("No video available")]
    NoMedia,

    /// Decoder rejected the media
    #[error("Decoding failed: {reason}")]
    DecodingFailed {
        /// Failure reason
        reason: String,
    },

    /// Media is not in a format the decoder understands
    #[error("Unsupported format: {format}")]
    UnsupportedFormat {
        /// Format description
        format: String,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Invalid state for operation
    #[error("Invalid state: {message}")]
    InvalidState {
        /// State error message
        message: String,
    },

    /// The real capture mechanism failed
    #[error("Capture failed: {reason}")]
    CaptureFailed {
        /// Failure reason
        reason: String,
    },

    /// Permission denied error
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Timeout error
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// Duration after which timeout occurred
        duration: std::time::Duration,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    ///
    /// Decode failures are final: retrying a corrupt source will not succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Storage { source } => source.is_recoverable(),
            MediaError::NoMedia => true,
            MediaError::Timeout { .. } => true,
            MediaError::CaptureFailed { .. } => true,
            MediaError::DecodingFailed { .. } => false,
            MediaError::UnsupportedFormat { .. } => false,
            MediaError::PermissionDenied { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Storage { source } => source.category(),
            MediaError::NoMedia => ErrorCategory::State,
            MediaError::DecodingFailed { .. } => ErrorCategory::Decode,
            MediaError::UnsupportedFormat { .. } => ErrorCategory::Decode,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::InvalidState { .. } => ErrorCategory::State,
            MediaError::CaptureFailed { .. } => ErrorCategory::Capture,
            MediaError::PermissionDenied { .. } => ErrorCategory::Capture,
            MediaError::Timeout { .. } => ErrorCategory::Capture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let decode = MediaError::DecodingFailed {
            reason: "truncated header".to_string(),
        };
        assert_eq!(decode.category(), ErrorCategory::Decode);
        assert!(!decode.is_recoverable());

        let missing = MediaError::NoMedia;
        assert_eq!(missing.category(), ErrorCategory::State);
        assert!(missing.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::UnsupportedFormat {
            format: "image/png".to_string(),
        };
        assert_eq!(error.to_string(), "Unsupported format: image/png");
    }

    #[test]
    fn test_error_from_store() {
        let store_error = StoreError::TransactionAborted {
            reason: "quota".to_string(),
        };
        let media_error = MediaError::from(store_error);

        match media_error {
            MediaError::Storage { .. } => (),
            _ => panic!("Expected Storage error variant"),
        }
        assert_eq!(media_error.category(), ErrorCategory::Storage);
    }
}
