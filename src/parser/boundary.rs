//! Boundary detection and per-part body framing.
//!
//! A body ends at the delimiter `CRLF "--" boundary`. The scanner reads a
//! window of `out.len()` plus enough lookahead to decide any candidate match,
//! hands the body bytes to the caller and pushes everything past them back
//! into the source. Bytes after a completed delimiter line are therefore
//! waiting in the source when the next header block is read.

use std::io::Read;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{MimeError, Result};
use crate::stream::pushback::PushbackReader;

/// Longest tail a candidate can need past its start: line ending, the
/// delimiter, then `--` or a line ending.
const EXTRA_LOOKAHEAD: usize = 4;

/// Bytes needed beyond a candidate position for `delimiter`.
pub fn lookahead_for(delimiter: &[u8]) -> usize {
    delimiter.len() + EXTRA_LOOKAHEAD
}

/// Check a boundary parameter and build its delimiter line form (`--` + value).
pub fn delimiter_for(boundary: &str) -> Result<Arc<[u8]>> {
    if boundary.is_empty() || boundary.contains(['\r', '\n']) {
        return Err(MimeError::InvalidBoundary(boundary.to_string()));
    }
    let mut delimiter = Vec::with_capacity(boundary.len() + 2);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary.as_bytes());
    Ok(delimiter.into())
}

/// Look for a `--token` line within the first `capacity` bytes.
///
/// Every byte read is pushed back, so the stream is left untouched.
/// Returns the token without its leading dashes.
pub fn sniff_boundary<R: Read>(src: &mut PushbackReader<R>) -> Result<Option<String>> {
    let room = src.capacity() - src.pending();
    let mut head = vec![0u8; room];
    let n = src.read_up_to(&mut head)?;
    head.truncate(n);
    src.unread(&head)?;

    let found = head
        .split(|&b| b == b'\n')
        .map(trim_line_end)
        .filter_map(|line| line.strip_prefix(b"--"))
        .find(|token| !token.is_empty() && !token.iter().any(u8::is_ascii_whitespace))
        .map(|token| String::from_utf8_lossy(token).into_owned());

    if let Some(boundary) = &found {
        debug!(boundary = %boundary, sniffed = n, "Sniffed MIME boundary");
    }
    Ok(found)
}

/// Consume the preamble up to and including the first delimiter line.
pub fn skip_preamble<R: Read>(src: &mut PushbackReader<R>, delimiter: &[u8]) -> Result<()> {
    let limit = src.capacity();
    let mut line = Vec::with_capacity(128);
    let mut at_line_start = true;
    loop {
        line.clear();
        let offset = src.position();
        if src.read_line(&mut line, limit)? == 0 {
            return Err(MimeError::malformed(
                src.position(),
                "first boundary not found",
            ));
        }
        let complete = line.ends_with(b"\n");
        if at_line_start {
            let text = trim_line_end(&line);
            if text == delimiter {
                debug!(offset, "Found first boundary");
                return Ok(());
            }
            if text.len() == delimiter.len() + 2
                && text.starts_with(delimiter)
                && text.ends_with(b"--")
            {
                return Err(MimeError::malformed(
                    offset,
                    "closing boundary before any part",
                ));
            }
        }
        at_line_start = complete;
    }
}

/// Strip trailing CR, LF, spaces and tabs.
fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
        .map_or(0, |i| i + 1);
    &line[..end]
}

/// Outcome of testing one candidate position.
#[derive(Debug, PartialEq, Eq)]
enum Match {
    /// Not a delimiter; the candidate byte is body.
    NoMatch,
    /// The window ended before the candidate could be decided.
    NeedMore,
    /// Delimiter line ending at `end` (exclusive).
    Full { end: usize, terminal: bool },
    /// The stream ended inside a delimiter.
    Truncated,
}

/// Framed reader for a single part body.
#[derive(Debug)]
pub struct BoundaryScanner {
    delimiter: Arc<[u8]>,
    window: Vec<u8>,
    at_start: bool,
    done: bool,
    terminal: bool,
    failure: Option<MimeError>,
}

impl BoundaryScanner {
    /// Scanner positioned at the first byte of a body.
    pub fn new(delimiter: Arc<[u8]>) -> Self {
        Self {
            delimiter,
            window: Vec::new(),
            at_start: true,
            done: false,
            terminal: false,
            failure: None,
        }
    }

    /// `true` once the end of this body has been reached.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// `true` if the body ended at the closing boundary or at end of stream.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// `true` once a framing error was reported; every later read repeats it.
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Read body bytes into `out`. Returns 0 at the end of the part.
    pub fn read<R: Read>(&mut self, src: &mut PushbackReader<R>, out: &mut [u8]) -> Result<usize> {
        if let Some(err) = &self.failure {
            return Err(err.replay());
        }
        if self.done || out.is_empty() {
            return Ok(0);
        }
        let lookahead = lookahead_for(&self.delimiter);
        if src.capacity() <= lookahead {
            return Err(MimeError::PushbackOverflow {
                requested: lookahead + 1,
                available: src.capacity(),
                capacity: src.capacity(),
            });
        }

        let want = (out.len() + lookahead).min(src.capacity());
        self.window.resize(want, 0);
        let n = src.read_up_to(&mut self.window[..want])?;
        let eof = n < want;
        if n == 0 {
            warn!(
                offset = src.position(),
                "Stream ended without a closing boundary"
            );
            self.done = true;
            self.terminal = true;
            return Ok(0);
        }

        let data = &self.window[..n];
        let mut body_end = n;
        let mut found = None;
        for p in 0..n {
            let candidate = matches!(data[p], b'\r' | b'\n') || (p == 0 && self.at_start);
            if !candidate {
                continue;
            }
            match self.match_at(data, p, eof) {
                Match::NoMatch => {}
                Match::NeedMore => {
                    body_end = p;
                    break;
                }
                Match::Full { end, terminal } => {
                    body_end = p;
                    found = Some((end, terminal));
                    break;
                }
                Match::Truncated => {
                    let offset = src.position() - (n - p) as u64;
                    return Err(self.fail(MimeError::malformed(
                        offset,
                        "stream ended inside a boundary",
                    )));
                }
            }
        }

        let emit = body_end.min(out.len());
        out[..emit].copy_from_slice(&data[..emit]);
        match found {
            Some((end, terminal)) if emit == body_end => {
                src.unread(&data[end..])?;
                self.done = true;
                self.terminal = terminal;
                debug!(terminal, offset = src.position(), "Reached part boundary");
            }
            _ => {
                if emit == 0 {
                    // Only reachable if a candidate needs more than the lookahead.
                    return Err(self.fail(MimeError::malformed(
                        src.position() - n as u64,
                        "boundary candidate exceeds lookahead window",
                    )));
                }
                src.unread(&data[emit..])?;
            }
        }
        if emit > 0 {
            self.at_start = false;
        }
        Ok(emit)
    }

    /// Read the whole remaining body into a vector.
    pub fn read_to_end<R: Read>(&mut self, src: &mut PushbackReader<R>) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = self.read(src, &mut chunk)?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }

    fn fail(&mut self, err: MimeError) -> MimeError {
        self.failure = Some(err.replay());
        err
    }

    fn match_at(&self, data: &[u8], p: usize, eof: bool) -> Match {
        let more = |eof: bool| if eof { Match::NoMatch } else { Match::NeedMore };
        let n = data.len();
        let mut i = p;
        match data[i] {
            b'\r' => {
                i += 1;
                if i >= n {
                    return more(eof);
                }
                if data[i] != b'\n' {
                    return Match::NoMatch;
                }
                i += 1;
            }
            b'\n' => i += 1,
            _ => {}
        }

        for (k, &b) in self.delimiter.iter().enumerate() {
            if i >= n {
                return match (eof, k) {
                    (false, _) => Match::NeedMore,
                    (true, 0) => Match::NoMatch,
                    (true, _) => Match::Truncated,
                };
            }
            if data[i] != b {
                return Match::NoMatch;
            }
            i += 1;
        }

        if i >= n {
            return if eof {
                Match::Full {
                    end: i,
                    terminal: true,
                }
            } else {
                Match::NeedMore
            };
        }
        match data[i] {
            b'-' => {
                if i + 1 >= n {
                    return if eof {
                        Match::Truncated
                    } else {
                        Match::NeedMore
                    };
                }
                if data[i + 1] != b'-' {
                    return Match::NoMatch;
                }
                i += 2;
                if data.get(i) == Some(&b'\r') {
                    i += 1;
                }
                if data.get(i) == Some(&b'\n') {
                    i += 1;
                }
                Match::Full {
                    end: i,
                    terminal: true,
                }
            }
            b'\r' => {
                if i + 1 >= n && !eof {
                    return Match::NeedMore;
                }
                i += 1;
                if data.get(i) == Some(&b'\n') {
                    i += 1;
                }
                Match::Full {
                    end: i,
                    terminal: false,
                }
            }
            b'\n' => Match::Full {
                end: i + 1,
                terminal: false,
            },
            _ => Match::NoMatch,
        }
    }
}
