use net::PortalError;
use persistence::PersistenceError;
use thiserror::Error;
use world::WorldError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("initial setup failed at step '{step}': {reason}")]
    Setup { step: String, reason: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("world error: {0}")]
    World(#[from] WorldError),

    #[error("portal error: {0}")]
    Portal(#[from] PortalError),

    #[error("configuration error: {0}")]
    Config(String),
}
