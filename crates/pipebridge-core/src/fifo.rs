//! OS named-pipe primitives.
//!
//! Opening a FIFO blocks until a peer opens the other end. The open here runs
//! on a helper thread so the calling session can honor a deadline and a
//! cancellation token; an abandoned open is released by briefly opening the
//! opposite end ourselves.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::OpenError;
use crate::traits::ByteSink;

/// Which end of the FIFO to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

impl PipeEnd {
    fn opposite(self) -> PipeEnd {
        match self {
            PipeEnd::Read => PipeEnd::Write,
            PipeEnd::Write => PipeEnd::Read,
        }
    }

    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            PipeEnd::Read => options.read(true),
            PipeEnd::Write => options.write(true),
        };
        options
    }
}

/// How long an open may wait for a peer.
#[derive(Debug, Clone)]
pub struct OpenDeadline {
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub cancel: CancellationToken,
}

/// An open FIFO endpoint. Never durable; `sync` is a no-op.
#[derive(Debug)]
pub struct PipeStream {
    file: File,
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl ByteSink for PipeStream {}

/// Create a FIFO special file with exactly `mode` permission bits.
///
/// Fails with `AlreadyExists` if anything is at `path`.
pub fn create_fifo(path: &Path, mode: u32) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // mkfifo applies the process umask; set the configured bits explicitly.
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Returns whether `path` is an existing FIFO, without following symlinks.
pub fn is_fifo(path: &Path) -> io::Result<bool> {
    Ok(std::fs::symlink_metadata(path)?.file_type().is_fifo())
}

/// Remove the FIFO at `path`. Refuses to remove anything else.
pub fn remove_fifo(path: &Path) -> io::Result<()> {
    if !is_fifo(path)? {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a FIFO", path.display()),
        ));
    }
    std::fs::remove_file(path)
}

/// Open one end of a FIFO, waiting for a peer within `deadline`.
pub fn open_endpoint(
    path: &Path,
    end: PipeEnd,
    deadline: &OpenDeadline,
) -> Result<PipeStream, OpenError> {
    if deadline.cancel.is_cancelled() {
        return Err(OpenError::Cancelled(path.to_path_buf()));
    }

    let (tx, rx) = mpsc::channel();
    let target = path.to_path_buf();
    thread::Builder::new()
        .name("pipebridge-open".to_string())
        .spawn(move || {
            let _ = tx.send(end.options().open(&target));
        })
        .map_err(|e| OpenError::Pipe {
            path: path.to_path_buf(),
            source: e,
        })?;

    let started = Instant::now();
    loop {
        match rx.recv_timeout(deadline.poll_interval) {
            Ok(Ok(file)) => {
                debug!(path = %path.display(), ?end, waited = ?started.elapsed(), "pipe endpoint open");
                return Ok(PipeStream { file });
            }
            Ok(Err(e)) => {
                return Err(OpenError::Pipe {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(OpenError::Pipe {
                    path: path.to_path_buf(),
                    source: io::Error::other("open helper thread exited"),
                });
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let abort = if deadline.cancel.is_cancelled() {
            Some(OpenError::Cancelled(path.to_path_buf()))
        } else {
            match deadline.timeout {
                Some(after) if started.elapsed() >= after => Some(OpenError::Timeout {
                    path: path.to_path_buf(),
                    after,
                }),
                _ => None,
            }
        };

        if let Some(err) = abort {
            release_pending_open(path, end, deadline.poll_interval, &rx);
            return Err(err);
        }
    }
}

/// Polls spent releasing a pending open before the helper is abandoned.
const WAKE_ATTEMPTS: u32 = 50;

/// Unblock a helper stuck in `open(end)` by opening the opposite end
/// non-blocking, then drop whatever the helper returns.
///
/// Gives up after [`WAKE_ATTEMPTS`] polls, e.g. when the FIFO was unlinked
/// under the helper; the helper thread is then left blocked.
fn release_pending_open(
    path: &Path,
    end: PipeEnd,
    poll_interval: Duration,
    rx: &mpsc::Receiver<io::Result<File>>,
) {
    let mut waker: Option<File> = None;
    for _ in 0..WAKE_ATTEMPTS {
        if waker.is_none() {
            // A non-blocking write open fails with ENXIO until the helper has
            // registered as a reader, so keep retrying.
            match end
                .opposite()
                .options()
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
            {
                Ok(file) => waker = Some(file),
                Err(e) => debug!(path = %path.display(), error = %e, "waker open not ready"),
            }
        }

        match rx.recv_timeout(poll_interval) {
            Ok(result) => {
                drop(result);
                return;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if waker.is_some() {
                    warn!(path = %path.display(), "pending pipe open still blocked after wake");
                }
            }
        }
    }
    warn!(
        path = %path.display(),
        attempts = WAKE_ATTEMPTS,
        "abandoning blocked pipe open"
    );
}

/// Allocated FIFO path owned by a session; may be removed on drop.
#[derive(Debug)]
pub(crate) struct FifoGuard {
    path: PathBuf,
    remove: bool,
}

impl FifoGuard {
    pub(crate) fn new(path: PathBuf, remove: bool) -> Self {
        FifoGuard { path, remove }
    }
}

impl Drop for FifoGuard {
    fn drop(&mut self) {
        if self.remove {
            if let Err(e) = remove_fifo(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove pipe");
                }
            }
        }
    }
}
