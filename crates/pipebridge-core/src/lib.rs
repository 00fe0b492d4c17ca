//! Relays bytes between files in a virtual filesystem and host processes
//! through OS named pipes.
//!
//! A [`Bridge`] creates [`BridgeSession`]s, each binding one virtual path to
//! one FIFO in one [`Direction`]. Starting a session returns at once; the
//! FIFO is provisioned, both ends opened and the copy loop run on a
//! background thread, with progress published through the session's state.

#[cfg(not(unix))]
compile_error!("pipebridge-core requires a Unix platform with named pipe support");

mod bridge;
mod error;
pub mod fifo;
mod fs;
mod launcher;
mod legacy;
mod memory;
mod paths;
mod provisioner;
mod session;
mod traits;
mod worker;

pub use bridge::{create_provider, Bridge};
pub use error::{
    BridgeError, ErrorKind, OpenError, ProviderError, ProvisionError, StateError, TransferError,
};
pub use fs::FsProvider;
pub use launcher::{init_runtime, AsyncLauncher};
pub use legacy::LegacyPipePool;
pub use memory::MemoryProvider;
pub use paths::{PathClaims, PipePathAllocator};
pub use provisioner::PipeProvisioner;
pub use session::{
    BridgeSession, Direction, PipeOrigin, SessionHandle, SessionInfo, SessionSettings,
    SessionState,
};
pub use traits::{ByteSink, ByteSource, VirtualFileProvider, VirtualPath};
pub use worker::{TransferReport, TransferWorker, DEFAULT_CHUNK_SIZE};
