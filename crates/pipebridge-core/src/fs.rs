use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::traits::{ByteSink, ByteSource, VirtualFileProvider, VirtualPath};

/// Provider backed by a directory on the host filesystem.
///
/// Stands in for an encrypted store in deployments that mount one at
/// `root`; sinks are plain files and therefore durable.
pub struct FsProvider {
    root: PathBuf,
}

impl FsProvider {
    /// Create a provider rooted at the given directory, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let root = root.as_ref();

        if !root.exists() {
            fs::create_dir_all(root)?;
        }
        let root = root.canonicalize().map_err(|e| {
            ProviderError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Failed to canonicalize root path: {}", e),
            ))
        })?;

        Ok(FsProvider { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a virtual path under the root, preventing directory traversal.
    fn resolve_path(&self, path: &VirtualPath) -> Result<PathBuf, ProviderError> {
        let trimmed = path.as_str().trim_start_matches('/');
        let rel = Path::new(trimmed);

        for component in rel.components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ProviderError::PathTraversal(path.to_string()));
                }
                _ => {}
            }
        }

        let full_path = self.root.join(rel);

        // The nearest existing ancestor must still resolve under root (symlinks).
        let mut ancestor = full_path.as_path();
        while !ancestor.exists() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => break,
            }
        }
        let canonical_ancestor = ancestor.canonicalize()?;
        if !canonical_ancestor.starts_with(&self.root) {
            return Err(ProviderError::PathTraversal(path.to_string()));
        }

        Ok(full_path)
    }
}

impl VirtualFileProvider for FsProvider {
    #[instrument(skip(self), fields(provider = "fs", path = %path))]
    fn open_read(&self, path: &VirtualPath) -> Result<Box<dyn ByteSource>, ProviderError> {
        let full_path = self.resolve_path(path)?;
        debug!(full_path = ?full_path, "opening for read");
        if full_path.is_dir() {
            return Err(ProviderError::Other(format!("{} is a directory", path)));
        }
        let file = fs::File::open(&full_path).map_err(|e| ProviderError::from_io(path.as_str(), e))?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self), fields(provider = "fs", path = %path))]
    fn open_write(&self, path: &VirtualPath) -> Result<Box<dyn ByteSink>, ProviderError> {
        let full_path = self.resolve_path(path)?;
        debug!(full_path = ?full_path, "opening for write");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full_path)
            .map_err(|e| ProviderError::from_io(path.as_str(), e))?;
        Ok(Box::new(file))
    }
}
