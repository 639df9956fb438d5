use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanqError>;

/// Crate-level error type. Per-job remote failures are classified separately
/// at the scan-service boundary (`remote::RemoteError`) and converted into
/// state transitions by the engine; these variants cover everything that
/// propagates to a caller.
#[derive(Error, Debug)]
pub enum ScanqError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("state storage error: {0}")]
    State(String),

    #[error("blob storage error: {0}")]
    Blob(String),

    #[error("job rejected: {0}")]
    Rejected(String),

    #[error("state directory locked by pid {0}")]
    Locked(u32),

    #[error("{0}")]
    Other(String),
}
