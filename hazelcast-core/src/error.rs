//! Error types for Hazelcast operations.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// The main error type for Hazelcast operations.
///
/// Errors are `Clone` so that a single cause (for example a connection going
/// down) can be delivered to every invocation waiting on that connection.
#[derive(Debug, Clone, Error)]
pub enum HazelcastError {
    /// Connection-related errors (network failures, disconnections).
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol-related errors (malformed frames, fragment mismatches,
    /// unexpected messages). Always fatal to the connection they occur on.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The invocation deadline elapsed before a response arrived.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Authentication errors (invalid credentials, failed login).
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The connection carrying a request went down, or the targeted member
    /// has no active connection.
    #[error("target disconnected: {0}")]
    TargetDisconnected(String),

    /// The targeted member or partition owner is not known to the client.
    #[error("target unknown: {0}")]
    TargetUnknown(String),

    /// An error reported by the cluster in an error response.
    #[error("remote error {code} ({class_name}): {message}")]
    Remote {
        /// Protocol error code.
        code: i32,
        /// Server-side exception class name.
        class_name: String,
        /// Server-side message.
        message: String,
        /// Whether the cluster classifies this failure as transient.
        retryable: bool,
    },

    /// An API was used in a state where it is not allowed.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A distributed object exists under the requested key with another type.
    #[error(
        "distributed object {service_name}/{name} exists with type {existing}, not {requested}"
    )]
    TypeMismatch {
        /// Service name of the object.
        service_name: String,
        /// Name of the object.
        name: String,
        /// Type of the registered proxy.
        existing: &'static str,
        /// Type requested by the caller.
        requested: &'static str,
    },

    /// The component has been disposed.
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl HazelcastError {
    /// Returns true if the failure is transient and an operation marked
    /// retryable may be re-sent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TargetDisconnected(_) | Self::TargetUnknown(_) | Self::Io(_) => true,
            Self::Connection(_) => true,
            Self::Remote { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns true if this is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<io::Error> for HazelcastError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// A specialized `Result` type for Hazelcast operations.
pub type Result<T> = std::result::Result<T, HazelcastError>;
