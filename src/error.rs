//! Crate-level error types.

use std::error::Error as StdError;

use crate::types::TransferFailure;

/// Crate-level error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No device matched the selector.
    #[error("device not found")]
    NotFound,

    /// The device exists but could not be opened or claimed.
    #[error("access to device denied: {0}")]
    AccessDenied(String),

    /// A transport-level failure with context describing what operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A bulk transfer completed with an error status.
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferFailure),

    /// The transport refused a transfer submission.
    #[error("failed to submit transfer: {0}")]
    SubmitFailed(#[source] Box<Error>),

    /// A completion did not consist of whole native packets.
    #[error("transfer length {length} is not a multiple of the {packet_size}-byte packet size")]
    Framing { length: usize, packet_size: usize },

    /// A buffer was requested from a pool with no free buffers.
    #[error("transfer pool has no free buffers")]
    PoolEmpty,

    /// Buffer ownership bookkeeping was violated.
    #[error("transfer pool protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Memory for the transfer pool could not be reserved.
    #[error("could not reserve {bytes} bytes for the transfer pool")]
    ResourceExhausted { bytes: usize },

    /// Another session currently owns the connection.
    #[error("connection is claimed by another session")]
    Busy,

    /// Stream or device configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// In-flight transfers did not report back after cancellation.
    #[error("{outstanding} transfers still outstanding after drain timeout")]
    DrainTimeout { outstanding: usize },
}

impl Error {
    /// Create a transport error with context wrapping another error.
    pub fn io(context: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Io {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this error reflects a logic defect rather than the environment.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::PoolEmpty | Error::ProtocolViolation(_))
    }

    /// Whether the device went away.
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            Error::NotFound | Error::Transfer(TransferFailure::Disconnected)
        )
    }

    /// Whether the connection should be reopened before further use.
    ///
    /// Configuration and busy errors leave the connection untouched.
    pub fn is_fatal(&self) -> bool {
        self.is_disconnected()
            || self.is_protocol_violation()
            || matches!(self, Error::DrainTimeout { .. } | Error::AccessDenied(_))
    }
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;
