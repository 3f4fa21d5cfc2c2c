use std::path::PathBuf;

/// Errors that can occur in IPC transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create the readiness poller.
    #[error("failed to create poller: {0}")]
    PollCreate(std::io::Error),

    /// Failed to add or remove a descriptor from the poller.
    #[error("failed to update poller registration for fd {fd}: {source}")]
    PollRegister { fd: i32, source: std::io::Error },

    /// Waiting for readiness failed. The poller is unusable afterwards.
    #[error("readiness wait failed: {0}")]
    PollWait(std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
