use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::TransferError;
use crate::traits::{ByteSink, ByteSource};

/// Default copy buffer size.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// How a copy loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Bytes written to the sink.
    pub bytes: u64,
    /// Number of non-empty reads relayed.
    pub chunks: u64,
    /// The loop stopped on cancellation rather than end of stream.
    pub cancelled: bool,
}

/// Relays bytes from one open stream to another.
///
/// Owns both handles; they are closed when [`run`](Self::run) returns,
/// sink first, whatever the outcome.
pub struct TransferWorker {
    source: Box<dyn ByteSource>,
    sink: Box<dyn ByteSink>,
    chunk_size: usize,
    cancel: CancellationToken,
    progress: Arc<AtomicU64>,
}

impl TransferWorker {
    pub fn new(source: Box<dyn ByteSource>, sink: Box<dyn ByteSink>) -> Self {
        TransferWorker {
            source,
            sink,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: CancellationToken::new(),
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share a counter that tracks bytes written so far.
    pub fn with_progress(mut self, progress: Arc<AtomicU64>) -> Self {
        self.progress = progress;
        self
    }

    /// Copy until end of stream, cancellation, or the first I/O error.
    ///
    /// Nothing is retried; on error the sink may hold a prefix of the data.
    pub fn run(self) -> Result<TransferReport, TransferError> {
        let TransferWorker {
            mut source,
            mut sink,
            chunk_size,
            cancel,
            progress,
        } = self;

        let mut buf = vec![0u8; chunk_size];
        let mut report = TransferReport {
            bytes: 0,
            chunks: 0,
            cancelled: false,
        };

        let copied = loop {
            if cancel.is_cancelled() {
                debug!(bytes = report.bytes, "transfer cancelled");
                report.cancelled = true;
                break Ok(());
            }

            let len = match source.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(len) => len,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    break Err(TransferError::Read {
                        bytes: report.bytes,
                        source: e,
                    })
                }
            };

            if let Err(e) = sink.write_all(&buf[..len]) {
                break Err(TransferError::Write {
                    bytes: report.bytes,
                    source: e,
                });
            }

            report.bytes += len as u64;
            report.chunks += 1;
            progress.store(report.bytes, Ordering::Relaxed);
            trace!(len, total = report.bytes, "relayed chunk");
        };

        match copied {
            Ok(()) => {
                let finished = finish_sink(sink.as_mut()).map_err(TransferError::Sync);
                close(sink, source);
                finished.map(|()| report)
            }
            Err(err) => {
                // Best effort: keep what made it through, report the original error.
                if let Err(e) = finish_sink(sink.as_mut()) {
                    warn!(error = %e, "cleanup flush after transfer error failed");
                }
                close(sink, source);
                Err(err)
            }
        }
    }
}

/// Flush, then sync when the sink is durable.
fn finish_sink(sink: &mut dyn ByteSink) -> io::Result<()> {
    sink.flush()?;
    if sink.is_durable() {
        sink.sync()?;
    }
    Ok(())
}

fn close(sink: Box<dyn ByteSink>, source: Box<dyn ByteSource>) {
    drop(sink);
    drop(source);
}
