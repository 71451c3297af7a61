use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{MarkableReader, RequestBody, RequestStream, ResponseStream};

/// Running totals of a [`CountingWriter`], shared with the connection.
#[derive(Debug)]
pub struct WriteTally {
    count: AtomicU64,
    body: Option<Mutex<Vec<u8>>>,
    capture_limit: usize,
}

impl WriteTally {
    fn new(capture: bool, capture_limit: usize) -> Self {
        Self {
            count: AtomicU64::new(0),
            body: capture.then(|| Mutex::new(Vec::new())),
            capture_limit,
        }
    }

    /// Bytes accepted by the underlying sink so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Copy of the written bytes, if capture was enabled.
    #[must_use]
    pub fn captured(&self) -> Option<Vec<u8>> {
        self.body.as_ref().map(|b| b.lock().clone())
    }

    fn add(&self, bytes: &[u8]) {
        self.count.fetch_add(bytes.len() as u64, Ordering::AcqRel);
        if let Some(body) = &self.body {
            let mut body = body.lock();
            let room = self.capture_limit.saturating_sub(body.len());
            body.extend_from_slice(&bytes[..bytes.len().min(room)]);
        }
    }
}

/// Request body wrapper counting every byte the sink accepts.
pub struct CountingWriter {
    inner: RequestBody,
    tally: Arc<WriteTally>,
}

impl CountingWriter {
    /// Wrap `inner`, buffering up to `capture_limit` bytes when `capture` is set.
    #[must_use]
    pub fn new(inner: RequestBody, capture: bool, capture_limit: usize) -> Self {
        Self {
            inner,
            tally: Arc::new(WriteTally::new(capture, capture_limit)),
        }
    }

    #[must_use]
    pub fn tally(&self) -> Arc<WriteTally> {
        Arc::clone(&self.tally)
    }
}

impl fmt::Debug for CountingWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingWriter")
            .field("count", &self.tally.count())
            .finish_non_exhaustive()
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.tally.add(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl RequestStream for CountingWriter {
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

/// Final state of a response stream handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCompletion {
    pub bytes_read: u64,
    /// Buffered body, present only when capture was enabled
    pub body: Option<Vec<u8>>,
    /// The stream ended with a read error rather than end-of-stream
    pub failed: bool,
}

/// Callback run when a counted response stream completes.
pub type CompletionCallback = Arc<dyn Fn(StreamCompletion) + Send + Sync>;

/// Response body wrapper counting bytes and reporting completion once.
///
/// Completion is end-of-stream, or the first failed read after data was
/// returned. Resetting to a mark rewinds the count and re-arms the callback.
pub struct CountingReader<R> {
    inner: MarkableReader<R>,
    count: u64,
    body: Option<Vec<u8>>,
    capture_limit: usize,
    mark: Option<(u64, usize)>,
    on_complete: CompletionCallback,
    completed: bool,
}

impl<R: Read> CountingReader<R> {
    #[must_use]
    pub fn new(inner: R, capture: bool, capture_limit: usize, on_complete: CompletionCallback) -> Self {
        Self {
            inner: MarkableReader::new(inner),
            count: 0,
            body: capture.then(Vec::new),
            capture_limit,
            mark: None,
            on_complete,
            completed: false,
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    fn complete(&mut self, failed: bool) {
        if self.completed {
            return;
        }
        self.completed = true;
        (self.on_complete)(StreamCompletion {
            bytes_read: self.count,
            body: self.body.clone(),
            failed,
        });
    }
}

impl<R> fmt::Debug for CountingReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingReader")
            .field("count", &self.count)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.complete(false);
                Ok(0)
            }
            Ok(n) => {
                self.count += n as u64;
                if let Some(body) = &mut self.body {
                    let room = self.capture_limit.saturating_sub(body.len());
                    body.extend_from_slice(&buf[..n.min(room)]);
                }
                Ok(n)
            }
            Err(e) => {
                if self.count > 0 && e.kind() != io::ErrorKind::Interrupted {
                    self.complete(true);
                }
                Err(e)
            }
        }
    }
}

impl<R: Read + Send> ResponseStream for CountingReader<R> {
    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, read_limit: usize) {
        self.inner.mark(read_limit);
        self.mark = Some((self.count, self.body.as_ref().map_or(0, Vec::len)));
    }

    fn reset(&mut self) -> io::Result<()> {
        self.inner.reset()?;
        let (count, body_len) = self.mark.unwrap_or((0, 0));
        self.count = count;
        if let Some(body) = &mut self.body {
            body.truncate(body_len);
        }
        self.completed = false;
        Ok(())
    }
}
