//! Runs blocking session routines off the caller's thread.
//!
//! Opening a FIFO blocks until a peer shows up, so session setup and the
//! copy loop always run on a tokio blocking thread. Callers that already run
//! inside a tokio runtime share it; everyone else gets a lazily built
//! process-wide runtime.

use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::BridgeError;

/// Process-wide runtime for callers without one.
///
/// Stores the result of runtime creation so that initialization errors are
/// propagated without panicking.
static RUNTIME: OnceLock<Result<Runtime, String>> = OnceLock::new();

/// Initialize the fallback runtime.
pub fn init_runtime() -> Result<&'static Runtime, BridgeError> {
    let result = RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pipebridge-rt")
            .enable_all()
            .build()
            .map_err(|e| e.to_string())
    });
    match result {
        Ok(rt) => Ok(rt),
        Err(e) => Err(BridgeError::Launch(format!(
            "Failed to create pipebridge runtime: {}",
            e
        ))),
    }
}

/// Dispatches one blocking routine per session request.
#[derive(Debug, Clone)]
pub struct AsyncLauncher {
    handle: Handle,
}

impl AsyncLauncher {
    /// Use the ambient tokio runtime if there is one, else the fallback runtime.
    pub fn current() -> Result<Self, BridgeError> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => init_runtime()?.handle().clone(),
        };
        Ok(AsyncLauncher { handle })
    }

    pub fn with_handle(handle: Handle) -> Self {
        AsyncLauncher { handle }
    }

    /// Run `routine` on a blocking thread and return immediately.
    pub fn launch<F, T>(&self, routine: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.handle.spawn_blocking(routine)
    }

    /// Block the current (non-runtime) thread on `future`.
    ///
    /// For synchronous callers such as tests or a CLI without `#[tokio::main]`.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}
