//! Error types and result handling for cdc-sync.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Control-plane callers see errors in two shapes: the structured [`Error`]
//! value itself, and the stable numeric code from [`Error::code`] used by the
//! procedural command surface, where `0` always means success.
//!
//! # Example
//!
//! ```rust
//! use cdc_sync::{Error, Result};
//!
//! fn open_source() -> Result<()> {
//!     Err(Error::Connection("source unreachable".to_string()))
//! }
//!
//! match open_source() {
//!     Ok(()) => println!("connected"),
//!     Err(Error::Connection(msg)) => eprintln!("connection error: {}", msg),
//!     Err(e) => eprintln!("other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for cdc-sync operations.
///
/// Variants follow the engine's error taxonomy: configuration problems are
/// rejected synchronously, connection errors are retried with bounded
/// backoff, mapping and transform errors are non-fatal per-object
/// conditions, and fatal errors park the connector in the `error` state
/// until it is manually restarted.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing connection info, unknown vendor tag, bad mode.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source unreachable or authentication failure. Retried with bounded
    /// backoff before escalating to `Fatal`.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unmapped or ambiguous type/object. Non-fatal: the engine falls back
    /// to a safe textual representation and keeps going.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Malformed transform expression, or a transform that cannot be applied
    /// to a row value. The offending transform is skipped per policy.
    #[error("Transform error: {0}")]
    Transform(String),

    /// Invalid state transition, e.g. pausing a stopped connector.
    #[error("State error: {0}")]
    State(String),

    /// Unrecoverable failure. The connector leaves `polling`, enters the
    /// `error` state and requires a manual restart. Never retried.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// I/O error, typically from metadata file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error when persisting metadata or encoding rows.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error mechanism
    /// to cleanly exit the worker loop.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Stable result code for the procedural control surface. `0` is reserved
    /// for success and never returned here.
    pub fn code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            Error::Connection(_) => 2,
            Error::Mapping(_) => 3,
            Error::Transform(_) => 4,
            Error::State(_) => 5,
            Error::Fatal(_) => 6,
            Error::Io(_) => 7,
            Error::Serialization(_) => 8,
            Error::Timeout { .. } => 9,
            Error::Shutdown => 10,
        }
    }

    /// Whether a worker-internal failure of this kind is retried before the
    /// connector escalates to the `error` state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout { .. })
    }
}

/// A convenient Result type alias for cdc-sync operations.
///
/// This is equivalent to `std::result::Result<T, cdc_sync::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
