//! Daemon error types

use thiserror::Error;

use shoal_control::ControlError;
use shoal_topology::TopologyError;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Topology store error: {0}")]
    Topology(#[from] TopologyError),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
