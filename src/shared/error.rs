//! Shared Error Types
//!
//! This module defines the error taxonomy surfaced by the sync layer to its
//! consumers. Transport-level failures are reported by the remote client as
//! [`RemoteError`](crate::client::remote::RemoteError) and converted into
//! [`SyncError`] at the façade boundary.
//!
//! # Error Categories
//!
//! - `Timeout` - a remote call exceeded its caller-supplied deadline
//! - `Network` - no response was received from the remote service
//! - `Server` - the remote service answered with a non-success status
//! - `Validation` - a client-side check rejected a write before it was applied
//! - `NotFound` - a record addressed by key is absent from the store
//!
//! # Usage
//!
//! ```rust
//! use qms_sync::shared::error::SyncError;
//!
//! let error = SyncError::validation("UnrestrictedQuantity", "exceeds remaining quantity");
//! assert!(error.is_validation());
//! ```
use thiserror::Error;

/// Errors reported by the sync façade and mutation coordinator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// A remote call did not complete within its deadline
    #[error("Request timed out after {elapsed_ms} ms")]
    Timeout {
        /// Deadline that was exceeded, in milliseconds
        elapsed_ms: u64,
    },

    /// No response was received from the remote service
    #[error("Network error: {message}")]
    Network {
        /// Human-readable error message
        message: String,
    },

    /// The remote service answered with a non-success status
    #[error("Server error: HTTP {status}")]
    Server {
        /// HTTP status code
        status: u16,
    },

    /// Client-side validation rejected the write
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// Record absent when binding to a specific key
    #[error("Record '{key}' not found in collection '{collection}'")]
    NotFound {
        /// Collection that was searched
        collection: String,
        /// Key that was not found
        key: String,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// The operation requires a live session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The collection is not configured
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// No pending mutation carries the given correlation id
    #[error("Unknown mutation: {0}")]
    UnknownMutation(uuid::Uuid),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether this error was raised by client-side validation
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Whether this error came from the remote transport
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network { .. } | Self::Server { .. }
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<crate::shared::config::ConfigError> for SyncError {
    fn from(err: crate::shared::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias used across the crate
pub type SyncResult<T> = Result<T, SyncError>;
