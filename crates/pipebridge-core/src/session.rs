use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pipebridge_config::BridgeConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, ErrorKind, OpenError, ProvisionError, StateError};
use crate::fifo::{self, FifoGuard, OpenDeadline, PipeEnd};
use crate::launcher::AsyncLauncher;
use crate::paths::PathClaims;
use crate::provisioner::PipeProvisioner;
use crate::traits::{ByteSink, ByteSource, VirtualFileProvider, VirtualPath};
use crate::worker::{TransferReport, TransferWorker, DEFAULT_CHUNK_SIZE};

/// Which way bytes flow. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Virtual file -> pipe. The bridge writes, the peer reads.
    Export,
    /// Pipe -> virtual file. The peer writes, the bridge reads.
    Import,
}

impl Direction {
    fn pipe_end(self) -> PipeEnd {
        match self {
            Direction::Export => PipeEnd::Write,
            Direction::Import => PipeEnd::Read,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Export => f.write_str("export"),
            Direction::Import => f.write_str("import"),
        }
    }
}

/// Lifecycle of a [`BridgeSession`].
///
/// `Idle -> Provisioning -> Opening -> Streaming -> Closed`, with `Failed`
/// reachable from the three middle states. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Provisioning,
    Opening,
    Streaming,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Provisioning => "provisioning",
            SessionState::Opening => "opening",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a session's pipe path came from. Decides how it is provisioned
/// and whether it is removed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeOrigin {
    /// Generated for this session; must not exist yet.
    Allocated,
    /// Supplied by the caller; an existing FIFO is reused.
    Bound,
    /// Leased from the fixed-path pool.
    Legacy,
}

/// Tunables shared by every session of a bridge.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub chunk_size: usize,
    pub open_timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub remove_on_close: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            chunk_size: DEFAULT_CHUNK_SIZE,
            open_timeout: None,
            poll_interval: Duration::from_millis(50),
            remove_on_close: true,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        SessionSettings {
            chunk_size: usize::try_from(config.transfer.chunk_size.as_bytes())
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            open_timeout: config.pipes.open_timeout.map(|d| d.as_duration()),
            poll_interval: config.pipes.poll_interval.as_duration(),
            remove_on_close: config.pipes.remove_on_close,
        }
    }
}

/// Collaborators a session needs to run.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub provider: Arc<dyn VirtualFileProvider>,
    pub provisioner: PipeProvisioner,
    pub claims: PathClaims,
    pub launcher: AsyncLauncher,
    pub settings: SessionSettings,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub virtual_path: VirtualPath,
    pub pipe_path: PathBuf,
    pub direction: Direction,
    pub state: SessionState,
    pub bytes: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

struct SessionInner {
    id: String,
    virtual_path: VirtualPath,
    pipe_path: PathBuf,
    direction: Direction,
    origin: PipeOrigin,
    ctx: SessionContext,
    state: watch::Sender<SessionState>,
    failure: Mutex<Option<Arc<BridgeError>>>,
    report: Mutex<Option<TransferReport>>,
    progress: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    created_at: DateTime<Utc>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

/// One virtual file relayed through one pipe in one direction.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct BridgeSession {
    inner: Arc<SessionInner>,
}

/// Handle returned to callers of the bridge API.
pub type SessionHandle = BridgeSession;

impl fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeSession")
            .field("id", &self.inner.id)
            .field("virtual_path", &self.inner.virtual_path)
            .field("pipe_path", &self.inner.pipe_path)
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .finish()
    }
}

impl BridgeSession {
    pub(crate) fn new(
        id: String,
        virtual_path: VirtualPath,
        pipe_path: PathBuf,
        direction: Direction,
        origin: PipeOrigin,
        ctx: SessionContext,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        BridgeSession {
            inner: Arc::new(SessionInner {
                id,
                virtual_path,
                pipe_path,
                direction,
                origin,
                ctx,
                state,
                failure: Mutex::new(None),
                report: Mutex::new(None),
                progress: Arc::new(AtomicU64::new(0)),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
                created_at: Utc::now(),
                started_at: Mutex::new(None),
                finished_at: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn virtual_path(&self) -> &VirtualPath {
        &self.inner.virtual_path
    }

    /// The OS path a peer should open.
    pub fn pipe_path(&self) -> &Path {
        &self.inner.pipe_path
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn origin(&self) -> PipeOrigin {
        self.inner.origin
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// The error that put the session into `Failed`.
    pub fn failure(&self) -> Option<Arc<BridgeError>> {
        self.inner.failure.lock().clone()
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.inner.failure.lock().as_ref().map(|e| e.kind())
    }

    /// Summary of a completed copy loop.
    pub fn report(&self) -> Option<TransferReport> {
        *self.inner.report.lock()
    }

    /// Bytes relayed so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.inner.progress.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.inner.id.clone(),
            virtual_path: self.inner.virtual_path.clone(),
            pipe_path: self.inner.pipe_path.clone(),
            direction: self.inner.direction,
            state: self.state(),
            bytes: self.bytes_transferred(),
            created_at: self.inner.created_at,
            started_at: *self.inner.started_at.lock(),
            finished_at: *self.inner.finished_at.lock(),
            error: self.failure().map(|e| e.to_string()),
        }
    }

    /// Begin provisioning, opening and streaming on a background thread.
    ///
    /// Returns immediately. Only an `Idle` session can start; anything else is
    /// a [`StateError::AlreadyStarted`] and no second worker is spawned.
    pub fn start(&self) -> Result<(), BridgeError> {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Provisioning;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(StateError::AlreadyStarted {
                id: self.inner.id.clone(),
                state: self.state(),
            }
            .into());
        }

        *self.inner.started_at.lock() = Some(Utc::now());
        info!(
            session = %self.inner.id,
            direction = %self.inner.direction,
            virtual_path = %self.inner.virtual_path,
            pipe = %self.inner.pipe_path.display(),
            "session starting"
        );

        let session = self.clone();
        let task = self.inner.ctx.launcher.launch(move || session.run());
        *self.inner.task.lock() = Some(task);
        Ok(())
    }

    /// Ask the session to stop.
    ///
    /// An idle session closes at once. A running one is cancelled
    /// cooperatively: a pending pipe open is released, the copy loop stops
    /// before its next read. A read already blocked on a silent peer only
    /// returns when the peer writes or closes. Terminal sessions are left alone.
    pub fn close(&self) {
        let closed_idle = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Closed;
                true
            } else {
                false
            }
        });
        if closed_idle {
            *self.inner.finished_at.lock() = Some(Utc::now());
            self.inner
                .ctx
                .claims
                .release(&self.inner.pipe_path, &self.inner.id);
            info!(session = %self.inner.id, "idle session closed");
            return;
        }

        if !self.state().is_terminal() {
            info!(session = %self.inner.id, state = %self.state(), "close requested");
            self.inner.cancel.cancel();
        }
    }

    /// Wait for the session to reach `Closed` or `Failed`.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Wait for the background routine to exit, surfacing a join failure.
    pub async fn join(&self) -> Result<(), BridgeError> {
        let task = self.inner.task.lock().take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| BridgeError::Launch(format!("session task failed: {}", e))),
            None => Ok(()),
        }
    }

    fn run(&self) {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or_else(|_| Err(BridgeError::Launch("session routine panicked".to_string())));
        self.finish(outcome);
    }

    fn execute(&self) -> Result<TransferReport, BridgeError> {
        let _fifo = self.provision()?;

        self.enter(SessionState::Opening)?;
        let (source, sink) = self.open_streams()?;

        self.enter(SessionState::Streaming)?;
        let settings = &self.inner.ctx.settings;
        let report = TransferWorker::new(source, sink)
            .with_chunk_size(settings.chunk_size)
            .with_cancel(self.inner.cancel.clone())
            .with_progress(Arc::clone(&self.inner.progress))
            .run()?;
        Ok(report)
    }

    fn provision(&self) -> Result<FifoGuard, BridgeError> {
        let ctx = &self.inner.ctx;
        let path = &self.inner.pipe_path;
        match self.inner.origin {
            PipeOrigin::Allocated => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).map_err(|e| ProvisionError::Io {
                        path: dir.to_path_buf(),
                        source: e,
                    })?;
                }
                ctx.provisioner.create_fresh(path)?;
                Ok(FifoGuard::new(path.clone(), ctx.settings.remove_on_close))
            }
            PipeOrigin::Bound | PipeOrigin::Legacy => {
                ctx.provisioner.ensure(path)?;
                Ok(FifoGuard::new(path.clone(), false))
            }
        }
    }

    /// Move to a non-terminal state unless a close arrived in the meantime.
    fn enter(&self, next: SessionState) -> Result<(), BridgeError> {
        if self.inner.cancel.is_cancelled() {
            return Err(OpenError::Cancelled(self.inner.pipe_path.clone()).into());
        }
        debug!(session = %self.inner.id, state = %next, "session state");
        self.inner.state.send_replace(next);
        Ok(())
    }

    /// Open the source, then the sink. Whatever opened is dropped again if
    /// the other side fails.
    ///
    /// An import opens the pipe first so the virtual file is only truncated
    /// once a peer is connected.
    fn open_streams(&self) -> Result<(Box<dyn ByteSource>, Box<dyn ByteSink>), BridgeError> {
        let ctx = &self.inner.ctx;
        let vpath = &self.inner.virtual_path;
        let deadline = OpenDeadline {
            timeout: ctx.settings.open_timeout,
            poll_interval: ctx.settings.poll_interval,
            cancel: self.inner.cancel.clone(),
        };
        let virtual_err = |source| OpenError::Virtual {
            path: vpath.to_string(),
            source,
        };
        let pipe_end = self.inner.direction.pipe_end();

        match self.inner.direction {
            Direction::Export => {
                let source = ctx.provider.open_read(vpath).map_err(virtual_err)?;
                let sink = fifo::open_endpoint(&self.inner.pipe_path, pipe_end, &deadline)?;
                Ok((source, Box::new(sink)))
            }
            Direction::Import => {
                let source = fifo::open_endpoint(&self.inner.pipe_path, pipe_end, &deadline)?;
                let sink = ctx.provider.open_write(vpath).map_err(virtual_err)?;
                Ok((Box::new(source), sink))
            }
        }
    }

    fn finish(&self, outcome: Result<TransferReport, BridgeError>) {
        let id = &self.inner.id;
        let state = match outcome {
            Ok(report) => {
                info!(
                    session = %id,
                    bytes = report.bytes,
                    chunks = report.chunks,
                    cancelled = report.cancelled,
                    "session closed"
                );
                *self.inner.report.lock() = Some(report);
                SessionState::Closed
            }
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                info!(session = %id, "session closed before streaming");
                SessionState::Closed
            }
            Err(err) => {
                warn!(session = %id, kind = ?err.kind(), error = %err, "session failed");
                *self.inner.failure.lock() = Some(Arc::new(err));
                SessionState::Failed
            }
        };

        *self.inner.finished_at.lock() = Some(Utc::now());
        self.inner
            .ctx
            .claims
            .release(&self.inner.pipe_path, &self.inner.id);
        self.inner.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use tempfile::TempDir;

    fn context(provider: MemoryProvider, timeout_ms: Option<u64>) -> SessionContext {
        SessionContext {
            provider: Arc::new(provider),
            provisioner: PipeProvisioner::new(0o600),
            claims: PathClaims::new(),
            launcher: AsyncLauncher::current().unwrap(),
            settings: SessionSettings {
                open_timeout: timeout_ms.map(Duration::from_millis),
                poll_interval: Duration::from_millis(10),
                ..SessionSettings::default()
            },
        }
    }

    fn session(
        tmp: &TempDir,
        direction: Direction,
        origin: PipeOrigin,
        ctx: SessionContext,
    ) -> BridgeSession {
        BridgeSession::new(
            "s1".to_string(),
            VirtualPath::new("/secret.jpg"),
            tmp.path().join("bridge0"),
            direction,
            origin,
            ctx,
        )
    }

    #[test]
    fn test_state_display_and_terminal() {
        assert_eq!(SessionState::Opening.to_string(), "opening");
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
        assert_eq!(Direction::Import.to_string(), "import");
    }

    #[test]
    fn test_settings_from_config() {
        let config = BridgeConfig::from_yaml(
            "pipes:\n  open_timeout: 2s\n  poll_interval: 5ms\n  remove_on_close: false\ntransfer:\n  chunk_size: 4kb\n",
        )
        .unwrap();
        let settings = SessionSettings::from_config(&config);
        assert_eq!(settings.chunk_size, 4096);
        assert_eq!(settings.open_timeout, Some(Duration::from_secs(2)));
        assert_eq!(settings.poll_interval, Duration::from_millis(5));
        assert!(!settings.remove_on_close);
    }

    #[tokio::test]
    async fn test_close_idle_session() {
        let tmp = TempDir::new().unwrap();
        let s = session(
            &tmp,
            Direction::Export,
            PipeOrigin::Bound,
            context(MemoryProvider::new(), None),
        );
        assert_eq!(s.state(), SessionState::Idle);

        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.failure().is_none());

        // A closed session never restarts.
        let err = s.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(!tmp.path().join("bridge0").exists());
    }

    #[tokio::test]
    async fn test_missing_virtual_file_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let s = session(
            &tmp,
            Direction::Export,
            PipeOrigin::Bound,
            context(MemoryProvider::new(), None),
        );

        s.start().unwrap();
        assert_eq!(s.wait().await, SessionState::Failed);
        assert_eq!(s.failure_kind(), Some(ErrorKind::Open));
        assert!(matches!(
            s.failure().as_deref(),
            Some(BridgeError::Open(OpenError::Virtual { .. }))
        ));
        s.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_provision_failure() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bridge0"), b"regular file").unwrap();
        let provider = MemoryProvider::new();
        provider.insert("/secret.jpg", b"x".to_vec());
        let s = session(&tmp, Direction::Export, PipeOrigin::Bound, context(provider, None));

        s.start().unwrap();
        assert_eq!(s.wait().await, SessionState::Failed);
        assert_eq!(s.failure_kind(), Some(ErrorKind::Provision));
    }

    #[tokio::test]
    async fn test_import_timeout_fails() {
        let tmp = TempDir::new().unwrap();
        let s = session(
            &tmp,
            Direction::Import,
            PipeOrigin::Bound,
            context(MemoryProvider::new(), Some(100)),
        );

        s.start().unwrap();
        let mut rx = s.subscribe();
        rx.wait_for(|state| *state == SessionState::Opening || state.is_terminal())
            .await
            .unwrap();

        assert_eq!(s.wait().await, SessionState::Failed);
        assert_eq!(s.failure_kind(), Some(ErrorKind::Timeout));
        assert!(s.info().finished_at.is_some());
    }

    #[tokio::test]
    async fn test_close_while_opening() {
        let tmp = TempDir::new().unwrap();
        let s = session(
            &tmp,
            Direction::Import,
            PipeOrigin::Bound,
            context(MemoryProvider::new(), None),
        );

        s.start().unwrap();
        let mut rx = s.subscribe();
        rx.wait_for(|state| *state == SessionState::Opening)
            .await
            .unwrap();

        s.close();
        assert_eq!(s.wait().await, SessionState::Closed);
        assert!(s.failure().is_none());
        assert!(s.report().is_none());
    }

    #[tokio::test]
    async fn test_allocated_pipe_removed_after_session() {
        let tmp = TempDir::new().unwrap();
        let s = session(
            &tmp,
            Direction::Import,
            PipeOrigin::Allocated,
            context(MemoryProvider::new(), Some(50)),
        );
        let pipe = s.pipe_path().to_path_buf();

        s.start().unwrap();
        assert_eq!(s.wait().await, SessionState::Failed);
        assert!(!pipe.exists());
    }
}
