//! Error types for tunnelled bulk transfers.
//!
//! Two layers exist:
//! - [`TransportError`] is returned by the wire-level helpers (tunnel handshake,
//!   HTTP parsing, chunk framing).
//! - [`TransferError`] is what a caller of an import or export observes. Exactly one
//!   of them is raised per failed transfer, chosen by root cause.

use thiserror::Error;

use crate::codec::CodecError;

/// Boxed error used for caller-supplied encode/decode capabilities.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the wire-level transport helpers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Socket or pipe I/O failed.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The peer violated the tunnel or HTTP protocol.
    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

/// Errors that can occur while running a bulk import or export.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The tunnel handshake with the database failed before any task was started.
    #[error("Tunnel handshake failed: {0}")]
    Handshake(String),

    /// The database sent malformed HTTP (bad chunk delimiter, bad chunk size, ...).
    #[error("HTTP protocol error: {0}")]
    Protocol(String),

    /// Socket or pipe failure while relaying data.
    #[error("I/O error during transfer: {0}")]
    Io(String),

    /// The triggering EXPORT/IMPORT statement failed.
    #[error("SQL execution failed: {message}")]
    Statement { message: String },

    /// The encode/decode capability returned an error.
    #[error("Transfer callback failed: {0}")]
    Callback(#[source] BoxError),

    /// The endpoint stopped before the database requested any data.
    #[error("Endpoint closed before the database requested data")]
    EndpointClosed,

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    TaskFailed(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Table data did not fit the selected codec.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<TransportError> for TransferError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::IoError(message) => TransferError::Io(message),
            TransportError::ProtocolError(message) => TransferError::Protocol(message),
        }
    }
}

impl TransferError {
    /// Returns true if this error came from the triggering SQL statement.
    #[must_use]
    pub fn is_statement_error(&self) -> bool {
        matches!(self, TransferError::Statement { .. })
    }

    /// Returns true if this error was reported by the encode/decode capability.
    #[must_use]
    pub fn is_callback_error(&self) -> bool {
        matches!(self, TransferError::Callback(_))
    }
}
