use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::StateError;

/// Generates a unique FIFO path per session inside one directory.
#[derive(Debug, Clone)]
pub struct PipePathAllocator {
    dir: PathBuf,
    prefix: String,
}

impl PipePathAllocator {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        PipePathAllocator {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh path, keeping the virtual file's extension so peers that sniff
    /// names (e.g. `*.jpg`) still accept it.
    pub fn allocate(&self, extension: Option<&str>) -> PathBuf {
        let id = Uuid::new_v4().simple().to_string();
        let name = match extension.filter(|ext| !ext.is_empty() && !ext.contains('/')) {
            Some(ext) => format!("{}-{}.{}", self.prefix, id, ext),
            None => format!("{}-{}", self.prefix, id),
        };
        self.dir.join(name)
    }
}

/// Process-wide record of which session holds which pipe path.
#[derive(Debug, Clone, Default)]
pub struct PathClaims {
    held: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for `session_id`. Fails if another session holds it.
    pub fn claim(&self, path: &Path, session_id: &str) -> Result<(), StateError> {
        let mut held = self.held.lock();
        match held.get(path) {
            Some(owner) if owner != session_id => Err(StateError::PathInUse(path.to_path_buf())),
            _ => {
                held.insert(path.to_path_buf(), session_id.to_string());
                Ok(())
            }
        }
    }

    /// Release `path` if `session_id` holds it.
    pub fn release(&self, path: &Path, session_id: &str) {
        let mut held = self.held.lock();
        if held.get(path).is_some_and(|owner| owner == session_id) {
            held.remove(path);
        }
    }

    pub fn holder(&self, path: &Path) -> Option<String> {
        self.held.lock().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }
}
