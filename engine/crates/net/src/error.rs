use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("portal channel disconnected")]
    Disconnected,

    #[error("portal did not answer within {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
