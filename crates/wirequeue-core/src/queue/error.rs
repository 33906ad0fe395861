use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open capture transport: {0}")]
    TransportOpen(TransportError),
    #[error("packet queue is not active")]
    Inactive,
    #[error("packet write failed: {0}")]
    Write(TransportError),
    #[error("invalid queue config: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn capture worker: {0}")]
    Spawn(std::io::Error),
}
