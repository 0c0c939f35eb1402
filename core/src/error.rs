use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported document version: {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob backend error: {0}")]
    Backend(String),
}
