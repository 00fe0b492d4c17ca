use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ProviderError;
use crate::traits::{ByteSink, ByteSource, VirtualFileProvider, VirtualPath};

type Files = Arc<RwLock<HashMap<VirtualPath, Arc<Vec<u8>>>>>;

/// In-memory provider for tests and embedded use.
///
/// Written bytes become visible to readers on `flush` and when the sink is
/// dropped, mirroring a store that commits on close.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    files: Files,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` at `path`, replacing anything already there.
    pub fn insert(&self, path: impl Into<VirtualPath>, content: impl Into<Vec<u8>>) {
        self.files
            .write()
            .insert(path.into(), Arc::new(content.into()));
    }

    /// Current committed content of `path`.
    pub fn get(&self, path: impl Into<VirtualPath>) -> Option<Vec<u8>> {
        self.files
            .read()
            .get(&path.into())
            .map(|content| content.as_ref().clone())
    }

    pub fn contains(&self, path: impl Into<VirtualPath>) -> bool {
        self.files.read().contains_key(&path.into())
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl VirtualFileProvider for MemoryProvider {
    fn open_read(&self, path: &VirtualPath) -> Result<Box<dyn ByteSource>, ProviderError> {
        let content = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))?;
        Ok(Box::new(Cursor::new(SharedBytes(content))))
    }

    fn open_write(&self, path: &VirtualPath) -> Result<Box<dyn ByteSink>, ProviderError> {
        // Truncate on open, like a regular file.
        self.files
            .write()
            .insert(path.clone(), Arc::new(Vec::new()));
        Ok(Box::new(MemorySink {
            files: Arc::clone(&self.files),
            path: path.clone(),
            buffer: Vec::new(),
        }))
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

struct MemorySink {
    files: Files,
    path: VirtualPath,
    buffer: Vec<u8>,
}

impl MemorySink {
    fn commit(&self) {
        self.files
            .write()
            .insert(self.path.clone(), Arc::new(self.buffer.clone()));
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit();
        Ok(())
    }
}

impl ByteSink for MemorySink {}

impl Drop for MemorySink {
    fn drop(&mut self) {
        self.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_read_inserted() {
        let provider = MemoryProvider::new();
        provider.insert("/secret.jpg", b"\xff\xd8\xff".to_vec());

        let mut source = provider.open_read(&VirtualPath::new("/secret.jpg")).unwrap();
        let mut content = Vec::new();
        source.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"\xff\xd8\xff");
    }

    #[test]
    fn test_read_missing() {
        let provider = MemoryProvider::new();
        let result = provider.open_read(&VirtualPath::new("/nope"));
        assert!(matches!(result, Err(ProviderError::NotFound(_))));
    }

    #[test]
    fn test_write_visible_after_flush() {
        let provider = MemoryProvider::new();
        let mut sink = provider.open_write(&VirtualPath::new("/out.bin")).unwrap();
        sink.write_all(b"abc").unwrap();
        assert_eq!(provider.get("/out.bin"), Some(Vec::new()));

        sink.flush().unwrap();
        assert_eq!(provider.get("/out.bin"), Some(b"abc".to_vec()));

        sink.write_all(b"def").unwrap();
        drop(sink);
        assert_eq!(provider.get("/out.bin"), Some(b"abcdef".to_vec()));
    }

    #[test]
    fn test_open_write_truncates() {
        let provider = MemoryProvider::new();
        provider.insert("/a", b"old".to_vec());
        let sink = provider.open_write(&VirtualPath::new("/a")).unwrap();
        assert!(!sink.is_durable());
        assert_eq!(provider.get("/a"), Some(Vec::new()));
    }

    #[test]
    fn test_paths_are_normalized() {
        let provider = MemoryProvider::new();
        provider.insert("dcim//a.jpg/", b"x".to_vec());
        assert!(provider.contains("/dcim/a.jpg"));
        assert_eq!(provider.len(), 1);
    }
}
