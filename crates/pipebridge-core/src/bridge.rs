use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use pipebridge_config::{BridgeConfig, ProviderConfig};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{BridgeError, ProvisionError, StateError};
use crate::fs::FsProvider;
use crate::launcher::AsyncLauncher;
use crate::legacy::LegacyPipePool;
use crate::memory::MemoryProvider;
use crate::paths::{PathClaims, PipePathAllocator};
use crate::provisioner::PipeProvisioner;
use crate::session::{
    BridgeSession, Direction, PipeOrigin, SessionContext, SessionHandle, SessionSettings,
    SessionState,
};
use crate::traits::{VirtualFileProvider, VirtualPath};

/// Build the virtual file provider named by the configuration.
pub fn create_provider(
    config: &ProviderConfig,
) -> Result<Arc<dyn VirtualFileProvider>, BridgeError> {
    match config {
        ProviderConfig::Fs(fs_config) => {
            let provider = FsProvider::new(&fs_config.root).map_err(|e| {
                BridgeError::Config(format!(
                    "Failed to open provider root '{}': {}",
                    fs_config.root, e
                ))
            })?;
            Ok(Arc::new(provider))
        }
        ProviderConfig::Memory => Ok(Arc::new(MemoryProvider::new())),
    }
}

/// Entry point for callers: creates sessions and tracks which are live.
pub struct Bridge {
    config: BridgeConfig,
    allocator: PipePathAllocator,
    claims: PathClaims,
    legacy: Option<LegacyPipePool>,
    ctx: SessionContext,
    sessions: RwLock<HashMap<String, BridgeSession>>,
}

impl Bridge {
    /// Create a bridge over an existing provider.
    pub fn new(
        config: BridgeConfig,
        provider: Arc<dyn VirtualFileProvider>,
    ) -> Result<Self, BridgeError> {
        Self::with_launcher(config, provider, AsyncLauncher::current()?)
    }

    /// Create a bridge that launches sessions through `launcher`.
    pub fn with_launcher(
        config: BridgeConfig,
        provider: Arc<dyn VirtualFileProvider>,
        launcher: AsyncLauncher,
    ) -> Result<Self, BridgeError> {
        let effective = config.effective();
        effective.validate_or_err()?;

        let dir = effective
            .pipes
            .dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("pipebridge"));
        let allocator = PipePathAllocator::new(dir, effective.pipes.prefix.clone());
        let claims = PathClaims::new();
        let legacy = effective.legacy.enabled.then(|| {
            LegacyPipePool::new(
                effective.legacy.paths.clone(),
                effective.legacy.mode.bits(),
                claims.clone(),
            )
        });

        let ctx = SessionContext {
            provider,
            provisioner: PipeProvisioner::new(effective.pipes.mode.bits()),
            claims: claims.clone(),
            launcher,
            settings: SessionSettings::from_config(&effective),
        };

        debug!(
            name = effective.name.as_deref().unwrap_or("default"),
            pipe_dir = %allocator.dir().display(),
            legacy = legacy.is_some(),
            "bridge created"
        );

        Ok(Bridge {
            config: effective,
            allocator,
            claims,
            legacy,
            ctx,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Create a bridge and the provider its configuration names.
    pub fn from_config(config: BridgeConfig) -> Result<Self, BridgeError> {
        let provider = create_provider(&config.provider)?;
        Self::new(config, provider)
    }

    /// The configuration with defaults applied.
    pub fn effective_config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn provider(&self) -> Arc<dyn VirtualFileProvider> {
        Arc::clone(&self.ctx.provider)
    }

    /// Provisioner using the configured mode for per-session FIFOs.
    pub fn provisioner(&self) -> PipeProvisioner {
        self.ctx.provisioner
    }

    pub fn legacy_pool(&self) -> Option<&LegacyPipePool> {
        self.legacy.as_ref()
    }

    pub fn claims(&self) -> &PathClaims {
        &self.claims
    }

    /// Export `virtual_path` to a pipe. `None` allocates a fresh pipe path.
    pub fn create_export_session(
        &self,
        virtual_path: impl Into<VirtualPath>,
        pipe_path: Option<PathBuf>,
    ) -> Result<SessionHandle, BridgeError> {
        self.create_session(virtual_path.into(), Direction::Export, pipe_path)
    }

    /// Import pipe contents into `virtual_path`. `None` allocates a fresh pipe path.
    pub fn create_import_session(
        &self,
        virtual_path: impl Into<VirtualPath>,
        pipe_path: Option<PathBuf>,
    ) -> Result<SessionHandle, BridgeError> {
        self.create_session(virtual_path.into(), Direction::Import, pipe_path)
    }

    #[instrument(skip(self, virtual_path, pipe_path), fields(virtual_path = %virtual_path))]
    pub fn create_session(
        &self,
        virtual_path: VirtualPath,
        direction: Direction,
        pipe_path: Option<PathBuf>,
    ) -> Result<SessionHandle, BridgeError> {
        let id = new_session_id();
        let (pipe_path, origin) = match pipe_path {
            Some(path) => (path, PipeOrigin::Bound),
            None => {
                let extension = virtual_path
                    .file_name()
                    .and_then(|name| name.rsplit_once('.'))
                    .map(|(_, ext)| ext);
                (self.allocator.allocate(extension), PipeOrigin::Allocated)
            }
        };
        self.claims.claim(&pipe_path, &id)?;
        Ok(self.register(id, virtual_path, pipe_path, direction, origin, self.ctx.clone()))
    }

    /// Lease a fixed path from the legacy pool for one session.
    #[instrument(skip(self, virtual_path), fields(virtual_path = %virtual_path))]
    pub fn create_legacy_session(
        &self,
        virtual_path: VirtualPath,
        direction: Direction,
    ) -> Result<SessionHandle, BridgeError> {
        let pool = self.legacy.as_ref().ok_or(StateError::PoolDisabled)?;
        let id = new_session_id();
        let pipe_path = pool.acquire(&id)?;
        // Fixed paths are shared with other programs and use the pool's mode.
        let ctx = SessionContext {
            provisioner: pool.provisioner(),
            ..self.ctx.clone()
        };
        Ok(self.register(id, virtual_path, pipe_path, direction, PipeOrigin::Legacy, ctx))
    }

    /// Record a new session. Sessions that already finished are dropped
    /// from the registry first; their handles stay usable.
    fn register(
        &self,
        id: String,
        virtual_path: VirtualPath,
        pipe_path: PathBuf,
        direction: Direction,
        origin: PipeOrigin,
        ctx: SessionContext,
    ) -> SessionHandle {
        info!(
            session = %id,
            %direction,
            virtual_path = %virtual_path,
            pipe = %pipe_path.display(),
            "session created"
        );
        let session = BridgeSession::new(id.clone(), virtual_path, pipe_path, direction, origin, ctx);
        let mut sessions = self.sessions.write();
        sessions.retain(|_, existing| !existing.state().is_terminal());
        sessions.insert(id, session.clone());
        session
    }

    /// Start a session in the background. Returns immediately.
    pub fn start(&self, handle: &SessionHandle) -> Result<(), BridgeError> {
        self.ensure_known(handle)?;
        handle.start()
    }

    pub fn close(&self, handle: &SessionHandle) {
        handle.close();
    }

    pub fn state(&self, handle: &SessionHandle) -> SessionState {
        handle.state()
    }

    /// Close a session and forget it, releasing its pipe path.
    ///
    /// A session that is still running is cancelled; it keeps its claim
    /// until its routine exits.
    pub fn remove(&self, handle: &SessionHandle) -> Option<SessionHandle> {
        handle.close();
        self.sessions.write().remove(handle.id())
    }

    pub fn session(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(id).cloned()
    }

    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions.read().values().cloned().collect()
    }

    /// Forget sessions that reached a terminal state. Returns how many.
    ///
    /// Creating a session does the same, so the registry only holds
    /// finished sessions created since the last call.
    pub fn prune(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| !session.state().is_terminal());
        before - sessions.len()
    }

    /// Close every live session and wait for each to finish.
    pub async fn shutdown(&self) {
        let sessions = self.sessions();
        for session in &sessions {
            session.close();
        }
        for session in &sessions {
            session.wait().await;
        }
        info!(sessions = sessions.len(), "bridge shut down");
    }

    /// Ensure every legacy path is a FIFO. Returns the paths that failed.
    pub fn provision_legacy(&self) -> Result<Vec<(PathBuf, ProvisionError)>, BridgeError> {
        let pool = self.legacy.as_ref().ok_or(StateError::PoolDisabled)?;
        Ok(pool.provision_all())
    }

    fn ensure_known(&self, handle: &SessionHandle) -> Result<(), BridgeError> {
        if self.sessions.read().contains_key(handle.id()) {
            Ok(())
        } else {
            Err(StateError::UnknownSession(handle.id().to_string()).into())
        }
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.pipes.dir = Some(tmp.path().join("pipes"));
        config
    }

    #[tokio::test]
    async fn test_from_config_memory_provider() {
        let tmp = TempDir::new().unwrap();
        let bridge = Bridge::from_config(config(&tmp)).unwrap();
        assert_eq!(bridge.provisioner().mode(), 0o600);
        assert!(bridge.legacy_pool().is_none());
        assert_eq!(
            bridge.effective_config().pipes.dir,
            Some(tmp.path().join("pipes"))
        );
    }

    #[tokio::test]
    async fn test_from_config_fs_provider() {
        let tmp = TempDir::new().unwrap();
        let yaml = format!(
            "provider:\n  type: fs\n  root: {}\n",
            tmp.path().join("vault").display()
        );
        let bridge = Bridge::from_config(BridgeConfig::from_yaml(&yaml).unwrap()).unwrap();
        assert!(tmp.path().join("vault").is_dir());
        drop(bridge);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = BridgeConfig::default();
        config.pipes.prefix = String::new();
        let err = Bridge::from_config(config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_allocated_paths_are_unique() {
        let tmp = TempDir::new().unwrap();
        let bridge = Bridge::from_config(config(&tmp)).unwrap();

        let a = bridge.create_export_session("/secret.jpg", None).unwrap();
        let b = bridge.create_export_session("/secret.jpg", None).unwrap();
        assert_ne!(a.pipe_path(), b.pipe_path());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.pipe_path().extension().unwrap(), "jpg");
        assert!(a.pipe_path().starts_with(tmp.path().join("pipes")));
        assert_eq!(bridge.sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_path_in_use() {
        let tmp = TempDir::new().unwrap();
        let bridge = Bridge::from_config(config(&tmp)).unwrap();
        let pipe = tmp.path().join("bridge0");

        let first = bridge
            .create_export_session("/a.bin", Some(pipe.clone()))
            .unwrap();
        let err = bridge
            .create_import_session("/b.bin", Some(pipe.clone()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::State(StateError::PathInUse(_))));

        // Closing releases the claim.
        bridge.close(&first);
        assert_eq!(bridge.state(&first), SessionState::Closed);
        bridge.create_import_session("/b.bin", Some(pipe)).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let tmp = TempDir::new().unwrap();
        let bridge = Bridge::from_config(config(&tmp)).unwrap();
        let other = Bridge::from_config(config(&tmp)).unwrap();

        let foreign = other.create_export_session("/a.bin", None).unwrap();
        let err = bridge.start(&foreign).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::State(StateError::UnknownSession(_))
        ));
        assert_eq!(foreign.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_prune_terminal_sessions() {
        let tmp = TempDir::new().unwrap();
        let bridge = Bridge::from_config(config(&tmp)).unwrap();

        let a = bridge.create_export_session("/a.bin", None).unwrap();
        let _b = bridge.create_export_session("/b.bin", None).unwrap();
        a.close();

        assert_eq!(bridge.prune(), 1);
        assert!(bridge.session(a.id()).is_none());
        assert_eq!(bridge.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_finished_sessions_dropped_on_register() {
        let tmp = TempDir::new().unwrap();
        let bridge = Bridge::from_config(config(&tmp)).unwrap();

        let a = bridge.create_export_session("/a.bin", None).unwrap();
        a.close();
        let b = bridge.create_export_session("/b.bin", None).unwrap();

        assert_eq!(bridge.sessions().len(), 1);
        assert!(bridge.session(a.id()).is_none());
        assert!(bridge.session(b.id()).is_some());
        // The handle outlives its registry entry.
        assert_eq!(a.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_remove_idle_session_releases_path() {
        let tmp = TempDir::new().unwrap();
        let bridge = Bridge::from_config(config(&tmp)).unwrap();
        let pipe = tmp.path().join("bridge0");

        let first = bridge
            .create_import_session("/a.bin", Some(pipe.clone()))
            .unwrap();
        assert!(bridge.remove(&first).is_some());
        assert!(bridge.session(first.id()).is_none());
        assert_eq!(first.state(), SessionState::Closed);
        assert!(bridge.claims().holder(&pipe).is_none());

        bridge.create_import_session("/b.bin", Some(pipe)).unwrap();
        assert!(bridge.remove(&first).is_none());
    }

    #[tokio::test]
    async fn test_legacy_disabled_by_default() {
        let tmp = TempDir::new().unwrap();
        let bridge = Bridge::from_config(config(&tmp)).unwrap();
        let err = bridge
            .create_legacy_session(VirtualPath::new("/photo.jpg"), Direction::Export)
            .unwrap_err();
        assert!(matches!(err, BridgeError::State(StateError::PoolDisabled)));
        assert!(bridge.provision_legacy().is_err());
    }

    #[tokio::test]
    async fn test_legacy_sessions_lease_fixed_paths() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp);
        config.legacy.enabled = true;
        config.legacy.paths = vec![tmp.path().join("pipe0"), tmp.path().join("pipe1")];
        let bridge = Bridge::from_config(config).unwrap();

        assert!(bridge.provision_legacy().unwrap().is_empty());

        let a = bridge
            .create_legacy_session(VirtualPath::new("/a.jpg"), Direction::Export)
            .unwrap();
        let b = bridge
            .create_legacy_session(VirtualPath::new("/b.jpg"), Direction::Import)
            .unwrap();
        assert_eq!(a.pipe_path(), tmp.path().join("pipe0"));
        assert_eq!(b.pipe_path(), tmp.path().join("pipe1"));

        let err = bridge
            .create_legacy_session(VirtualPath::new("/c.jpg"), Direction::Export)
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::State(StateError::PoolExhausted(2))
        ));

        a.close();
        let c = bridge
            .create_legacy_session(VirtualPath::new("/c.jpg"), Direction::Export)
            .unwrap();
        assert_eq!(c.pipe_path(), tmp.path().join("pipe0"));
    }
}
