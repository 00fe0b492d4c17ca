use std::fmt;
use std::io::{self, Read, Write};

use crate::error::ProviderError;

/// Identifier of a file inside the virtual filesystem.
///
/// Always absolute, with duplicate and trailing slashes removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

impl VirtualPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut normalized = String::with_capacity(path.as_ref().len() + 1);
        for component in path.as_ref().split('/').filter(|c| !c.is_empty()) {
            normalized.push('/');
            normalized.push_str(component);
        }
        if normalized.is_empty() {
            normalized.push('/');
        }
        VirtualPath(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|name| !name.is_empty())
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VirtualPath {
    fn from(path: &str) -> Self {
        VirtualPath::new(path)
    }
}

impl From<String> for VirtualPath {
    fn from(path: String) -> Self {
        VirtualPath::new(path)
    }
}

/// Readable byte stream handed out by a provider or a pipe endpoint.
pub trait ByteSource: Read + Send {}

impl<T: Read + Send> ByteSource for T {}

/// Writable byte stream handed out by a provider or a pipe endpoint.
pub trait ByteSink: Write + Send {
    /// Whether bytes written here end up on durable storage.
    fn is_durable(&self) -> bool {
        false
    }

    /// Force written data to storage. Only called when [`is_durable`](Self::is_durable).
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteSink for std::fs::File {
    fn is_durable(&self) -> bool {
        true
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl ByteSink for Vec<u8> {}

/// The capability the bridge needs from a virtual filesystem.
///
/// Implementations are expected to serialize their own internal access;
/// the bridge takes no locks around provider calls.
pub trait VirtualFileProvider: Send + Sync + 'static {
    /// Open an existing virtual file for reading.
    fn open_read(&self, path: &VirtualPath) -> Result<Box<dyn ByteSource>, ProviderError>;

    /// Open a virtual file for writing, creating or truncating it.
    fn open_write(&self, path: &VirtualPath) -> Result<Box<dyn ByteSink>, ProviderError>;
}
