//! Error types for the runtime system

use crossbeam_channel::SendError;

/// Error type for connection operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Node '{0}' already exists")]
    DuplicateNode(String),

    #[error("Port '{port}' not found on node '{node}'")]
    PortNotFound { node: String, port: String },

    #[error("{0}")]
    DuplicateConnection(String),

    #[error("Port '{port}' on node '{node}' is not connected")]
    Unconnected { node: String, port: String },

    #[error("Failed to spawn worker for node '{node}': {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error type for work function operations
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Failed to send to output channel: {0}")]
    SendError(String),

    #[error("Node-specific error: {0}")]
    NodeError(String),

    #[error("Shutdown signal received")]
    Shutdown,
}

impl<T> From<SendError<T>> for WorkError {
    fn from(e: SendError<T>) -> Self {
        WorkError::SendError(format!("{}", e))
    }
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;
