//! Fixed-path compatibility pool.
//!
//! Some peers only know a handful of hardcoded FIFO locations. The pool
//! provisions all of them up front and leases one at a time to a session.
//! New callers should let the bridge allocate per-session paths instead.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::{ProvisionError, StateError};
use crate::paths::PathClaims;
use crate::provisioner::PipeProvisioner;

#[derive(Debug, Clone)]
pub struct LegacyPipePool {
    paths: Vec<PathBuf>,
    provisioner: PipeProvisioner,
    claims: PathClaims,
}

impl LegacyPipePool {
    pub fn new(paths: Vec<PathBuf>, mode: u32, claims: PathClaims) -> Self {
        LegacyPipePool {
            paths,
            provisioner: PipeProvisioner::new(mode),
            claims,
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn provisioner(&self) -> PipeProvisioner {
        self.provisioner
    }

    /// Ensure every fixed path is a FIFO. Returns the paths that failed.
    pub fn provision_all(&self) -> Vec<(PathBuf, ProvisionError)> {
        let failures = self.provisioner.ensure_all(&self.paths);
        for (path, err) in &failures {
            warn!(path = %path.display(), error = %err, "legacy pipe not provisioned");
        }
        info!(
            total = self.paths.len(),
            failed = failures.len(),
            "legacy pipe pool provisioned"
        );
        failures
    }

    /// Lease the first fixed path no live session holds.
    pub fn acquire(&self, session_id: &str) -> Result<PathBuf, StateError> {
        if self.paths.is_empty() {
            return Err(StateError::PoolDisabled);
        }
        for path in &self.paths {
            if self.claims.claim(path, session_id).is_ok() {
                return Ok(path.clone());
            }
        }
        Err(StateError::PoolExhausted(self.paths.len()))
    }
}
