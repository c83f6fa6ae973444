use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The requested position lies at or beyond the end of the resource.
    ///
    /// Sources report this distinctly (HTTP 416) so that callers probing an
    /// unbounded resource can recognise end-of-stream.
    #[error("Position {position} is out of range")]
    PositionOutOfRange { position: u64 },

    #[error("HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    /// Failure while writing into a data sink (e.g. the cache store).
    #[error("Data sink error: {0}")]
    Sink(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` if the error reports a read position past the end of
    /// the resource.
    pub fn is_position_out_of_range(&self) -> bool {
        matches!(self, BridgeError::PositionOutOfRange { .. })
    }

    /// Returns `true` for failures raised by a [`DataSink`](crate::source::DataSink).
    pub fn is_sink_error(&self) -> bool {
        matches!(self, BridgeError::Sink(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
