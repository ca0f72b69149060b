//! Error types for callbridge

use thiserror::Error;

/// Result type alias for callbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for callbridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote API returned status {0}")]
    RemoteStatus(u16),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Switch error: {0}")]
    Switch(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
