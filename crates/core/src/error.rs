use thiserror::Error;

/// Failure taxonomy shared by the store, the ingest path and the exporter.
/// Upload failures are not errors here; they surface as an upload outcome.
#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    /// The span database rejected an operation.
    #[error("storage error: {0}")]
    Store(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("io error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, BeaconError>;
