use core_cache::CacheError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Service is shut down")]
    ShutDown,
}

impl CoreError {
    /// Returns `true` if a precache job ended because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cache(CacheError::Cancelled(_)) | CoreError::ShutDown)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
