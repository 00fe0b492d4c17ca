use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionState;

/// Errors raised by a [`VirtualFileProvider`](crate::VirtualFileProvider).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Virtual path does not exist.
    #[error("Virtual path not found: {0}")]
    NotFound(String),

    /// The provider refused access to the path.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Path traversal attempt detected.
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other provider-specific error.
    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Map an `io::Error` for `path`, keeping not-found and permission errors distinct.
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProviderError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                ProviderError::PermissionDenied(path.to_string())
            }
            _ => ProviderError::Io(err),
        }
    }
}

/// FIFO creation or removal failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// `create_fresh` found something already at the path.
    #[error("Pipe path already exists: {0}")]
    AlreadyExists(PathBuf),

    /// The path is occupied by something other than a FIFO.
    #[error("Path exists but is not a FIFO: {0}")]
    NotAFifo(PathBuf),

    /// Nothing exists at the path to remove.
    #[error("No pipe at {0}")]
    Missing(PathBuf),

    /// A parent directory of the path does not exist.
    #[error("Parent directory missing for pipe path: {0}")]
    MissingParent(PathBuf),

    /// The OS refused to create the FIFO.
    #[error("Permission denied creating pipe: {0}")]
    PermissionDenied(PathBuf),

    /// Any other OS failure, e.g. a read-only filesystem.
    #[error("Failed to provision pipe {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub(crate) fn from_io(path: PathBuf, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::AlreadyExists => ProvisionError::AlreadyExists(path),
            std::io::ErrorKind::NotFound => ProvisionError::MissingParent(path),
            std::io::ErrorKind::PermissionDenied => ProvisionError::PermissionDenied(path),
            _ => ProvisionError::Io { path, source: err },
        }
    }
}

/// One side of a session could not be opened.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OpenError {
    /// The virtual file could not be opened.
    #[error("Failed to open virtual path '{path}': {source}")]
    Virtual {
        path: String,
        #[source]
        source: ProviderError,
    },

    /// The OS pipe endpoint could not be opened.
    #[error("Failed to open pipe {path}: {source}")]
    Pipe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No peer opened the other end before the deadline.
    #[error("No peer opened {path} within {after:?}")]
    Timeout { path: PathBuf, after: Duration },

    /// The session was closed while waiting for a peer.
    #[error("Open of {0} cancelled")]
    Cancelled(PathBuf),
}

/// I/O failure inside the copy loop.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransferError {
    #[error("Read from source failed after {bytes} bytes: {source}")]
    Read {
        bytes: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to sink failed after {bytes} bytes: {source}")]
    Write {
        bytes: u64,
        #[source]
        source: std::io::Error,
    },

    /// Flushing or syncing the sink at end of stream failed.
    #[error("Failed to flush sink: {0}")]
    Sync(#[source] std::io::Error),
}

/// An operation was requested in a state that does not allow it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StateError {
    /// `start` on a session that already left `Idle`.
    #[error("Session {id} cannot start: already {state}")]
    AlreadyStarted { id: String, state: SessionState },

    /// Another live session holds the pipe path.
    #[error("Pipe path {0} is held by another session")]
    PathInUse(PathBuf),

    /// Every legacy pipe path is leased.
    #[error("All {0} legacy pipe paths are in use")]
    PoolExhausted(usize),

    /// The legacy pool is disabled or has no paths.
    #[error("Legacy pipe pool is not enabled")]
    PoolDisabled,

    /// The handle does not belong to this bridge.
    #[error("Unknown session: {0}")]
    UnknownSession(String),
}

/// Coarse classification carried by a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Provision,
    Open,
    Timeout,
    Cancelled,
    Transfer,
    State,
    Config,
    Launch,
}

/// Top-level error for bridge operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BridgeError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// The background routine could not be run to completion.
    #[error("Launch error: {0}")]
    Launch(String),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Provision(_) => ErrorKind::Provision,
            BridgeError::Open(OpenError::Timeout { .. }) => ErrorKind::Timeout,
            BridgeError::Open(OpenError::Cancelled(_)) => ErrorKind::Cancelled,
            BridgeError::Open(_) => ErrorKind::Open,
            BridgeError::Transfer(_) => ErrorKind::Transfer,
            BridgeError::State(_) => ErrorKind::State,
            BridgeError::Config(_) => ErrorKind::Config,
            BridgeError::Launch(_) => ErrorKind::Launch,
        }
    }
}

impl From<pipebridge_config::ConfigError> for BridgeError {
    fn from(e: pipebridge_config::ConfigError) -> Self {
        BridgeError::Config(e.to_string())
    }
}
