//! Bounded pushback source.
//!
//! Wraps any [`Read`] and lets the caller return bytes it has already
//! consumed, so speculative boundary matches can be undone. The amount of
//! pending pushback never exceeds a fixed capacity.

use std::io::{self, Read};

use crate::error::MimeError;

/// Default lookahead capacity in bytes.
pub const DEFAULT_PUSHBACK_CAPACITY: usize = 2048;

/// Size of the chunks read while searching for a line ending.
const LINE_CHUNK: usize = 256;

/// A byte source with bounded "unread" support.
///
/// Pushed-back bytes are stored at the tail of a fixed buffer and served
/// before anything new is pulled from the inner reader.
pub struct PushbackReader<R> {
    inner: R,
    buf: Box<[u8]>,
    /// Index of the first pending byte; `buf.len()` when nothing is pending.
    pos: usize,
    /// Logical stream position (bytes consumed minus bytes returned).
    position: u64,
}

impl<R: Read> PushbackReader<R> {
    /// Wrap `inner` with the default capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_PUSHBACK_CAPACITY, inner)
    }

    /// Wrap `inner` with room for `capacity` pushed-back bytes.
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: capacity,
            position: 0,
        }
    }

    /// Maximum number of bytes that can be pending at once.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of pushed-back bytes not yet read again.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Logical offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Return `data` to the front of the stream.
    ///
    /// The next read yields `data` in order, followed by whatever was pending
    /// before. Fails with [`MimeError::PushbackOverflow`] if the pending bytes
    /// would exceed the capacity; nothing is pushed back in that case.
    pub fn unread(&mut self, data: &[u8]) -> Result<(), MimeError> {
        if data.len() > self.pos {
            return Err(MimeError::PushbackOverflow {
                requested: data.len(),
                available: self.pos,
                capacity: self.buf.len(),
            });
        }
        self.pos -= data.len();
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.position = self.position.saturating_sub(data.len() as u64);
        Ok(())
    }

    /// Read a single byte, `None` at end of stream.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut one = [0u8; 1];
        loop {
            match self.read(&mut one) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(one[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Read until `out` is full or the stream ends.
    ///
    /// Returns the number of bytes read; short only at end of stream.
    pub fn read_up_to(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < out.len() {
            match self.read(&mut out[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Append one line (including its `\n`) to `line`.
    ///
    /// Stops after `limit` bytes even without a line ending; the caller can
    /// tell by checking whether `line` ends with `\n`. Returns the number of
    /// bytes appended, 0 at end of stream.
    pub fn read_line(&mut self, line: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        let mut chunk = [0u8; LINE_CHUNK];
        let mut total = 0;
        while total < limit {
            let want = (limit - total).min(LINE_CHUNK).min(self.buf.len());
            let n = match self.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if let Some(lf) = chunk[..n].iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..=lf]);
                self.unread(&chunk[lf + 1..n])?;
                return Ok(total + lf + 1);
            }
            line.extend_from_slice(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }

    /// Give back the wrapped reader, dropping any pending bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for PushbackReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let pending = self.pending();
        let n = if pending > 0 {
            let n = pending.min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            n
        } else {
            self.inner.read(out)?
        };
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_unread_is_served_first() {
        let mut src = PushbackReader::with_capacity(8, Cursor::new(b"world".to_vec()));
        let mut buf = [0u8; 3];
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"wor");
        src.unread(b"or").unwrap();
        src.unread(b"w").unwrap();
        let mut all = Vec::new();
        src.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"world");
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut src = PushbackReader::with_capacity(4, Cursor::new(Vec::new()));
        src.unread(b"abc").unwrap();
        let err = src.unread(b"de").unwrap_err();
        assert!(matches!(
            err,
            MimeError::PushbackOverflow {
                requested: 2,
                available: 1,
                capacity: 4
            }
        ));
        // Nothing partial was pushed back
        assert_eq!(src.pending(), 3);
    }

    #[test]
    fn test_position_tracks_unread() {
        let mut src = PushbackReader::new(Cursor::new(b"abcdef".to_vec()));
        let mut buf = [0u8; 4];
        src.read_up_to(&mut buf).unwrap();
        assert_eq!(src.position(), 4);
        src.unread(&buf[2..]).unwrap();
        assert_eq!(src.position(), 2);
        assert_eq!(src.read_byte().unwrap(), Some(b'c'));
    }

    #[test]
    fn test_read_line_keeps_rest() {
        let mut src = PushbackReader::new(Cursor::new(b"Header: a\r\nrest".to_vec()));
        let mut line = Vec::new();
        assert_eq!(src.read_line(&mut line, 1024).unwrap(), 11);
        assert_eq!(line, b"Header: a\r\n");
        let mut rest = Vec::new();
        src.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn test_read_line_respects_limit() {
        let mut src = PushbackReader::new(Cursor::new(b"0123456789\n".to_vec()));
        let mut line = Vec::new();
        assert_eq!(src.read_line(&mut line, 4).unwrap(), 4);
        assert_eq!(line, b"0123");
        assert!(!line.ends_with(b"\n"));
    }

    #[test]
    fn test_read_line_at_eof() {
        let mut src = PushbackReader::new(Cursor::new(Vec::new()));
        let mut line = Vec::new();
        assert_eq!(src.read_line(&mut line, 16).unwrap(), 0);
    }
}
