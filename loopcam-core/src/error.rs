//! Error types for loopcam core

use thiserror::Error;

/// Main error type for storage, fingerprint and bus operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation on the backing engine failed
    #[error("Storage I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("Serialization error: {reason}")]
    Serialization {
        /// Reason for the failure
        reason: String,
    },

    /// The transaction was aborted before commit
    #[error("Transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for the abort
        reason: String,
    },

    /// A write was attempted inside a read-only transaction
    #[error("Transaction over {partitions} is read-only")]
    ReadOnlyTransaction {
        /// Partitions the transaction was opened over
        partitions: String,
    },

    /// A partition was touched outside the scope of its transaction
    #[error("Partition {partition} is not part of this transaction")]
    PartitionNotInScope {
        /// Partition name
        partition: String,
    },

    /// The engine does not know the partition
    #[error("Unknown partition: {partition}")]
    UnknownPartition {
        /// Partition name
        partition: String,
    },

    /// Stored schema is newer than the one requested
    #[error("Schema mismatch for {name}: stored version {stored}, requested {requested}")]
    SchemaMismatch {
        /// Database name
        name: String,
        /// Version found in the engine
        stored: u32,
        /// Version requested by the caller
        requested: u32,
    },

    /// Fingerprint text was not a valid digest
    #[error("Invalid fingerprint: {value}")]
    InvalidFingerprint {
        /// Offending text
        value: String,
    },

    /// Bus message could not be decoded into a command
    #[error("Malformed bus message: {reason}")]
    MalformedMessage {
        /// Reason for the failure
        reason: String,
    },
}

/// Result type alias for core operations
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Check if the caller may simply retry or fall back
    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::Io { .. } => true,
            StoreError::TransactionAborted { .. } => true,
            StoreError::MalformedMessage { .. } => true,
            StoreError::Serialization { .. } => false,
            StoreError::SchemaMismatch { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Io { .. } => ErrorCategory::Storage,
            StoreError::Serialization { .. } => ErrorCategory::Serialization,
            StoreError::TransactionAborted { .. } => ErrorCategory::Storage,
            StoreError::ReadOnlyTransaction { .. } => ErrorCategory::State,
            StoreError::PartitionNotInScope { .. } => ErrorCategory::State,
            StoreError::UnknownPartition { .. } => ErrorCategory::Storage,
            StoreError::SchemaMismatch { .. } => ErrorCategory::Storage,
            StoreError::InvalidFingerprint { .. } => ErrorCategory::Validation,
            StoreError::MalformedMessage { .. } => ErrorCategory::Serialization,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Error categories shared by every loopcam crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Durable store failures (transactions, quota, schema)
    Storage,
    /// Media could not be decoded
    Decode,
    /// Input rejected before any side effect
    Validation,
    /// Operation not valid in the current state
    State,
    /// Real or synthetic capture failed
    Capture,
    /// Invalid configuration values
    Configuration,
    /// Encoding or decoding of records and messages
    Serialization,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let io_error = StoreError::Io {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "manifest missing"),
        };
        assert_eq!(io_error.category(), ErrorCategory::Storage);
        assert!(io_error.is_recoverable());

        let schema = StoreError::SchemaMismatch {
            name: "virtualCameraDB".to_string(),
            stored: 3,
            requested: 2,
        };
        assert_eq!(schema.category(), ErrorCategory::Storage);
        assert!(!schema.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = StoreError::PartitionNotInScope {
            partition: "media".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Partition media is not part of this transaction"
        );
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<bool>("not json").unwrap_err();
        match StoreError::from(json_err) {
            StoreError::Serialization { .. } => (),
            other => panic!("Expected Serialization variant, got {other:?}"),
        }
    }
}
