//! Error types for HearthKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using HearthError
pub type Result<T> = std::result::Result<T, HearthError>;

/// Unified error type for HearthKV operations
///
/// The first six variants are fatal for a connection: the worker stops
/// writing, closes the socket, and exits. `Engine` errors are reported to
/// the client and the connection stays healthy (PUT_MULTI logs and
/// continues instead).
#[derive(Debug, Error)]
pub enum HearthError {
    /// The peer closed the stream before all expected bytes arrived.
    /// A clean disconnect at a request boundary; never logged at error
    /// severity.
    #[error("peer closed connection")]
    PeerClosed,

    /// A readiness wait expired with no progress.
    #[error("i/o timed out")]
    Timeout,

    /// The process-wide shutdown flag was observed.
    #[error("shutdown in progress")]
    Shutdown,

    /// A fatal socket error: bad descriptor, reset, not connected, etc.
    #[error("socket error: {0}")]
    Socket(String),

    /// Unknown opcode or a length exceeding the configured maximum.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Allocation failure.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Storage engine failure. A point-get miss is not an error; the
    /// adapter returns `Ok(None)` instead.
    #[error("engine error: {0}")]
    Engine(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rocksdb::Error> for HearthError {
    fn from(err: rocksdb::Error) -> Self {
        HearthError::Engine(err.into_string())
    }
}
