//! # Cache Error Types
//!
//! Errors raised by the cache store and the cache-aware data source.

use bridge_traits::BridgeError;
use std::io;
use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Failure reported by an upstream or cache-read source, or by the cache
    /// write sink.
    #[error("Source error: {0}")]
    Source(#[from] BridgeError),

    /// Reading or writing the local cache store failed.
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    /// A blocking hole-lock wait timed out or was cancelled.
    #[error("Lock acquisition interrupted: {0}")]
    LockAcquisitionInterrupted(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("Invalid cache state: {0}")]
    InvalidState(String),

    /// The cache configuration is invalid.
    #[error("Cache configuration error: {0}")]
    Config(String),

    /// A long-running cache job was cancelled by its caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Returns `true` if any error in the `source()` chain reports a read
    /// position past the end of the resource.
    pub fn is_position_out_of_range(&self) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(bridge) = err.downcast_ref::<BridgeError>() {
                if bridge.is_position_out_of_range() {
                    return true;
                }
            }
            // io::Error::source() skips the wrapped error itself.
            if let Some(inner) = err
                .downcast_ref::<io::Error>()
                .and_then(|io_err| io_err.get_ref())
            {
                if let Some(bridge) = inner.downcast_ref::<BridgeError>() {
                    if bridge.is_position_out_of_range() {
                        return true;
                    }
                }
            }
            current = err.source();
        }
        false
    }

    /// Returns `true` for failures of the local cache store, as opposed to
    /// upstream failures.
    pub fn is_cache_error(&self) -> bool {
        match self {
            CacheError::CacheIo(_) | CacheError::Io(_) => true,
            CacheError::Source(err) => err.is_sink_error(),
            _ => false,
        }
    }
}

impl From<CacheError> for BridgeError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Source(err) => err,
            CacheError::Io(err) => BridgeError::Io(err),
            CacheError::CacheIo(message) => BridgeError::Sink(io::Error::other(message)),
            CacheError::LockAcquisitionInterrupted(message) => {
                BridgeError::Io(io::Error::new(io::ErrorKind::Interrupted, message))
            }
            CacheError::Cancelled(message) => {
                BridgeError::Io(io::Error::new(io::ErrorKind::Interrupted, message))
            }
            CacheError::InvalidState(message) | CacheError::Config(message) => {
                BridgeError::OperationFailed(message)
            }
        }
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
