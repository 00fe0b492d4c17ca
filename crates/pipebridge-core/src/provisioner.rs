use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::error::ProvisionError;
use crate::fifo;

/// Creates, checks and removes FIFOs on the host filesystem.
#[derive(Debug, Clone, Copy)]
pub struct PipeProvisioner {
    mode: u32,
}

impl PipeProvisioner {
    /// A provisioner creating FIFOs with `mode` permission bits.
    pub fn new(mode: u32) -> Self {
        PipeProvisioner { mode }
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Make sure a FIFO exists at `path`.
    ///
    /// An existing FIFO is accepted as-is and its permissions are left alone.
    /// Anything else occupying the path is an error.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn ensure(&self, path: &Path) -> Result<(), ProvisionError> {
        match fifo::is_fifo(path) {
            Ok(true) => {
                debug!("pipe already present");
                return Ok(());
            }
            Ok(false) => return Err(ProvisionError::NotAFifo(path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProvisionError::from_io(path.to_path_buf(), e)),
        }

        match self.create_fresh(path) {
            // Lost a race with another creator; fine if they made a FIFO.
            Err(ProvisionError::AlreadyExists(_)) => match fifo::is_fifo(path) {
                Ok(true) => Ok(()),
                Ok(false) => Err(ProvisionError::NotAFifo(path.to_path_buf())),
                Err(e) => Err(ProvisionError::from_io(path.to_path_buf(), e)),
            },
            other => other,
        }
    }

    /// Create a new FIFO at `path`, failing if anything is already there.
    #[instrument(skip(self), fields(path = %path.display(), mode = %format!("{:o}", self.mode)))]
    pub fn create_fresh(&self, path: &Path) -> Result<(), ProvisionError> {
        fifo::create_fifo(path, self.mode)
            .map_err(|e| ProvisionError::from_io(path.to_path_buf(), e))?;
        info!("created pipe");
        Ok(())
    }

    /// Remove the FIFO at `path`.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn remove(&self, path: &Path) -> Result<(), ProvisionError> {
        match fifo::is_fifo(path) {
            Ok(true) => {}
            Ok(false) => return Err(ProvisionError::NotAFifo(path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ProvisionError::Missing(path.to_path_buf()))
            }
            Err(e) => return Err(ProvisionError::from_io(path.to_path_buf(), e)),
        }
        std::fs::remove_file(path).map_err(|e| ProvisionError::from_io(path.to_path_buf(), e))?;
        info!("removed pipe");
        Ok(())
    }

    /// Ensure every path, collecting the failures instead of stopping at the first.
    pub fn ensure_all<'a, I>(&self, paths: I) -> Vec<(PathBuf, ProvisionError)>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        paths
            .into_iter()
            .filter_map(|path| self.ensure(path).err().map(|e| (path.clone(), e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn mode_of(path: &Path) -> u32 {
        std::fs::symlink_metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_ensure_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bridge0");

        PipeProvisioner::new(0o600).ensure(&path).unwrap();
        assert_eq!(mode_of(&path), 0o600);

        // A second ensure with different bits must not touch the existing FIFO.
        PipeProvisioner::new(0o666).ensure(&path).unwrap();
        assert!(fifo::is_fifo(&path).unwrap());
        assert_eq!(mode_of(&path), 0o600);
    }

    #[test]
    fn test_create_fresh_fails_if_present() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bridge0");
        let provisioner = PipeProvisioner::new(0o600);

        provisioner.create_fresh(&path).unwrap();
        assert!(matches!(
            provisioner.create_fresh(&path),
            Err(ProvisionError::AlreadyExists(p)) if p == path
        ));
    }

    #[test]
    fn test_ensure_rejects_regular_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.jpg");
        std::fs::write(&path, b"not a pipe").unwrap();

        let result = PipeProvisioner::new(0o600).ensure(&path);
        assert!(matches!(result, Err(ProvisionError::NotAFifo(_))));
    }

    #[test]
    fn test_ensure_missing_parent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("no/such/dir/pipe");

        let result = PipeProvisioner::new(0o600).ensure(&path);
        assert!(matches!(result, Err(ProvisionError::MissingParent(_))));
    }

    #[test]
    fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bridge0");
        let provisioner = PipeProvisioner::new(0o600);

        provisioner.create_fresh(&path).unwrap();
        provisioner.remove(&path).unwrap();
        assert!(!path.exists());
        assert!(matches!(
            provisioner.remove(&path),
            Err(ProvisionError::Missing(_))
        ));
    }

    #[test]
    fn test_remove_refuses_regular_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, b"x").unwrap();

        let result = PipeProvisioner::new(0o600).remove(&path);
        assert!(matches!(result, Err(ProvisionError::NotAFifo(_))));
        assert!(path.exists());
    }

    #[test]
    fn test_ensure_all_reports_each_failure() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("pipe0");
        let blocked = tmp.path().join("pipe1");
        std::fs::write(&blocked, b"squatter").unwrap();
        let orphan = tmp.path().join("missing/pipe2");

        let failures =
            PipeProvisioner::new(0o600).ensure_all(&[good.clone(), blocked.clone(), orphan.clone()]);

        assert!(fifo::is_fifo(&good).unwrap());
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, blocked);
        assert!(matches!(failures[0].1, ProvisionError::NotAFifo(_)));
        assert_eq!(failures[1].0, orphan);
        assert!(matches!(failures[1].1, ProvisionError::MissingParent(_)));
    }
}
