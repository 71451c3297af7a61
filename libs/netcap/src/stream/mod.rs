//! Request and response body streams and their byte-counting wrappers.

mod counting;
mod markable;

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

pub use counting::{CompletionCallback, CountingReader, CountingWriter, StreamCompletion, WriteTally};
pub use markable::MarkableReader;

/// Readable response body.
///
/// Mark/reset are optional; the defaults report them as unsupported.
pub trait ResponseStream: Read + Send {
    fn mark_supported(&self) -> bool {
        false
    }

    /// Remember the current position, valid for the next `read_limit` bytes.
    fn mark(&mut self, _read_limit: usize) {}

    /// Rewind to the last mark.
    ///
    /// # Errors
    /// Fails when mark/reset is unsupported or the mark was invalidated.
    fn reset(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "mark/reset not supported"))
    }
}

impl<T: AsRef<[u8]> + Send> ResponseStream for io::Cursor<T> {}

impl ResponseStream for Box<dyn ResponseStream> {
    fn mark_supported(&self) -> bool {
        (**self).mark_supported()
    }

    fn mark(&mut self, read_limit: usize) {
        (**self).mark(read_limit);
    }

    fn reset(&mut self) -> io::Result<()> {
        (**self).reset()
    }
}

/// Writable request body.
pub trait RequestStream: Write + Send {
    /// Release the underlying resource. Does not flush.
    ///
    /// # Errors
    /// Propagates the failure of the underlying sink.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RequestStream for Vec<u8> {}

/// Shared handle to a connection's request body stream.
///
/// Clones refer to the same stream; [`RequestBody::ptr_eq`] tells whether two
/// handles do.
#[derive(Clone)]
pub struct RequestBody {
    stream: Arc<Mutex<Box<dyn RequestStream>>>,
}

impl RequestBody {
    #[must_use]
    pub fn new(stream: impl RequestStream + 'static) -> Self {
        Self {
            stream: Arc::new(Mutex::new(Box::new(stream))),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.stream, &other.stream)
    }

    /// Close the underlying stream.
    ///
    /// # Errors
    /// Propagates the failure of the underlying stream.
    pub fn close(&self) -> io::Result<()> {
        self.stream.lock().close()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody").finish_non_exhaustive()
    }
}

impl Write for RequestBody {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.lock().flush()
    }
}

impl RequestStream for RequestBody {
    fn close(&mut self) -> io::Result<()> {
        self.stream.lock().close()
    }
}
