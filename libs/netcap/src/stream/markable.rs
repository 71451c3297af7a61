use std::io::{self, Read};

use super::ResponseStream;

/// Adds mark/reset to any reader by recording bytes read since the mark.
///
/// The mark is dropped once more than `read_limit` bytes pass it.
#[derive(Debug)]
pub struct MarkableReader<R> {
    inner: R,
    replay: Vec<u8>,
    pos: usize,
    limit: Option<usize>,
}

impl<R: Read> MarkableReader<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            replay: Vec::new(),
            pos: 0,
            limit: None,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for MarkableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.replay.len() {
            let pending = &self.replay[self.pos..];
            let n = pending.len().min(buf.len());
            buf[..n].copy_from_slice(&pending[..n]);
            self.pos += n;
            if self.limit.is_none() && self.pos == self.replay.len() {
                self.replay.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        let n = self.inner.read(buf)?;
        if let Some(limit) = self.limit {
            if self.replay.len() + n <= limit {
                self.replay.extend_from_slice(&buf[..n]);
                self.pos = self.replay.len();
            } else {
                self.limit = None;
                self.replay.clear();
                self.pos = 0;
            }
        }
        Ok(n)
    }
}

impl<R: Read + Send> ResponseStream for MarkableReader<R> {
    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, read_limit: usize) {
        self.replay.drain(..self.pos);
        self.pos = 0;
        self.limit = Some(read_limit.max(self.replay.len()));
    }

    fn reset(&mut self) -> io::Result<()> {
        if self.limit.is_none() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "resetting to invalid mark"));
        }
        self.pos = 0;
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_n(reader: &mut impl Read, n: usize) -> Vec<u8> {
        let mut buf = vec![0; n];
        reader.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_reset_replays_from_mark() {
        let mut reader = MarkableReader::new(Cursor::new(b"abcdefgh".to_vec()));
        assert_eq!(read_n(&mut reader, 2), b"ab");
        reader.mark(16);
        assert_eq!(read_n(&mut reader, 3), b"cde");
        reader.reset().unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"cdefgh");
    }

    #[test]
    fn test_mark_is_invalidated_past_limit() {
        let mut reader = MarkableReader::new(Cursor::new(b"abcdefgh".to_vec()));
        reader.mark(2);
        assert_eq!(read_n(&mut reader, 4), b"abcd");
        assert!(reader.reset().is_err());
    }

    #[test]
    fn test_reset_without_mark_fails() {
        let mut reader = MarkableReader::new(Cursor::new(Vec::new()));
        assert_eq!(reader.reset().unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_remark_during_replay_keeps_unread_bytes() {
        let mut reader = MarkableReader::new(Cursor::new(b"abcdef".to_vec()));
        reader.mark(8);
        assert_eq!(read_n(&mut reader, 4), b"abcd");
        reader.reset().unwrap();
        assert_eq!(read_n(&mut reader, 1), b"a");
        reader.mark(8);
        assert_eq!(read_n(&mut reader, 4), b"bcde");
        reader.reset().unwrap();
        assert_eq!(read_n(&mut reader, 5), b"bcdef");
    }
}
