//! Part reader: turns one raw byte stream into a root part and attachments.
//!
//! All parts of a message share a single forward-only cursor. Only the body
//! of the most recently produced part reads from it directly; before the
//! cursor moves on to the next header block, any earlier body that is still
//! live is drained into a [`SpoolSink`] so it stays readable.

use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MimeError, Result};
use crate::model::headers::HeaderMap;
use crate::model::part::{clean_content_id, Part, PartBody};
use crate::parser::boundary::{self, BoundaryScanner};
use crate::parser::content_type::ContentType;
use crate::parser::header::read_header_block;
use crate::stream::pushback::PushbackReader;
use crate::stream::spool::{SpoolHold, SpoolInput, SpoolSettings, SpoolSink};

/// Copy buffer used when draining a body.
const DRAIN_CHUNK: usize = 8 * 1024;

/// Boxed raw source shared by all parts of one message.
pub(crate) type Source = PushbackReader<Box<dyn Read + Send>>;

/// Where the bytes of one body come from.
pub(crate) enum BodyState {
    /// Still framed on the shared cursor.
    Live(BoundaryScanner),
    /// Everything left in the stream; used for non-multipart messages.
    Raw,
    /// Drained into a spool; released once the consumer reads it to the end.
    Cached { sink: SpoolSink, input: SpoolInput },
    /// Fully read by the consumer.
    Exhausted,
}

/// Cursor state shared between the reader and every [`PartBody`].
pub(crate) struct Shared {
    source: Source,
    closed: bool,
    /// First error raised on the cursor; the message is unusable after it.
    failure: Option<MimeError>,
    slots: Vec<BodyState>,
    spool: SpoolSettings,
}

pub(crate) fn lock_shared(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>> {
    shared
        .lock()
        .map_err(|_| MimeError::Io(std::io::Error::other("part reader state poisoned")))
}

impl Shared {
    fn push(&mut self, state: BodyState) -> usize {
        self.slots.push(state);
        self.slots.len() - 1
    }

    /// Remember `err` as the message's failure and hand it back.
    fn fail(&mut self, err: MimeError) -> MimeError {
        if self.failure.is_none() {
            warn!(error = %err, "Multipart decoding failed");
            self.failure = Some(err.replay());
        }
        err
    }

    fn check_failure(&self) -> Result<()> {
        match &self.failure {
            Some(err) => Err(err.replay()),
            None => Ok(()),
        }
    }

    pub(crate) fn read_slot(&mut self, slot: usize, buf: &mut [u8]) -> Result<usize> {
        if matches!(self.slots.get(slot), Some(BodyState::Live(_) | BodyState::Raw)) {
            self.check_failure()?;
        }
        let Some(state) = self.slots.get_mut(slot) else {
            return Ok(0);
        };
        match state {
            BodyState::Live(scanner) => match scanner.read(&mut self.source, buf) {
                Ok(n) => {
                    if scanner.is_done() {
                        if scanner.is_terminal() {
                            self.closed = true;
                        }
                        if n == 0 {
                            *state = BodyState::Exhausted;
                        }
                    }
                    Ok(n)
                }
                Err(e) => Err(self.fail(e)),
            },
            BodyState::Raw => match self.source.read(buf) {
                Ok(n) => Ok(n),
                Err(e) => Err(self.fail(e.into())),
            },
            BodyState::Cached { input, .. } => {
                let n = input.read(buf)?;
                if n == 0 && !buf.is_empty() {
                    debug!(slot, "Released spooled part body");
                    *state = BodyState::Exhausted;
                }
                Ok(n)
            }
            BodyState::Exhausted => Ok(0),
        }
    }

    /// Spool every body that still reads from the cursor.
    fn drain_live(&mut self) -> Result<()> {
        for slot in 0..self.slots.len() {
            if matches!(self.slots[slot], BodyState::Live(_)) {
                self.drain(slot)?;
            }
        }
        Ok(())
    }

    fn drain(&mut self, slot: usize) -> Result<()> {
        let BodyState::Live(scanner) = &mut self.slots[slot] else {
            return Ok(());
        };
        let mut sink = SpoolSink::with_settings(self.spool.clone());
        let mut chunk = vec![0u8; DRAIN_CHUNK];
        loop {
            let n = scanner.read(&mut self.source, &mut chunk)?;
            if n == 0 {
                break;
            }
            std::io::Write::write_all(&mut sink, &chunk[..n])?;
        }
        if scanner.is_terminal() {
            self.closed = true;
        }
        let input = sink.input()?;
        debug!(
            slot,
            bytes = sink.size(),
            in_memory = sink.is_in_memory(),
            "Drained part body"
        );
        self.slots[slot] = BodyState::Cached { sink, input };
        Ok(())
    }

    pub(crate) fn is_cached(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(BodyState::Cached { .. }))
    }

    pub(crate) fn hold(&self, slot: usize) -> Option<SpoolHold> {
        match self.slots.get(slot) {
            Some(BodyState::Cached { sink, .. }) => Some(sink.hold()),
            _ => None,
        }
    }

    pub(crate) fn spool_path(&self, slot: usize) -> Option<PathBuf> {
        match self.slots.get(slot) {
            Some(BodyState::Cached { sink, .. }) => sink.temp_path(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Init,
    Active,
    Done,
}

/// Reads the parts of one multipart message in stream order.
pub struct PartReader {
    shared: Arc<Mutex<Shared>>,
    content_type: ContentType,
    config: Config,
    delimiter: Option<Arc<[u8]>>,
    state: ReaderState,
    attachments: usize,
}

impl PartReader {
    /// Wrap `source`, whose declared content type is `content_type`.
    pub fn new<R: Read + Send + 'static>(source: R, content_type: &str, config: &Config) -> Self {
        let boxed: Box<dyn Read + Send> = Box::new(source);
        let shared = Shared {
            source: PushbackReader::with_capacity(config.decoder.pushback_capacity, boxed),
            closed: false,
            failure: None,
            slots: Vec::new(),
            spool: config.spool.settings(),
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
            content_type: ContentType::parse(content_type),
            config: config.clone(),
            delimiter: None,
            state: ReaderState::Init,
            attachments: 0,
        }
    }

    /// Establish the boundary and return the root part.
    ///
    /// A message whose media type isn't a supported multipart type becomes a
    /// single root part spanning the whole stream.
    pub fn initialize(&mut self) -> Result<Part> {
        if self.state != ReaderState::Init {
            return Err(MimeError::InvalidState("reader already initialized"));
        }
        let result = self.establish_root();
        if let Err(e) = result {
            self.state = ReaderState::Done;
            return Err(self.record(e));
        }
        result
    }

    /// Store `err` on the shared cursor so later calls report it again.
    fn record(&self, err: MimeError) -> MimeError {
        match self.shared.lock() {
            Ok(mut shared) => shared.fail(err),
            Err(_) => err,
        }
    }

    fn establish_root(&mut self) -> Result<Part> {
        let media_type = self.content_type.media_type().to_string();
        let mut shared = lock_shared(&self.shared)?;

        if !self.config.decoder.supports(&media_type) {
            debug!(media_type = %media_type, "Not a multipart message, using whole stream as root");
            let slot = shared.push(BodyState::Raw);
            drop(shared);
            self.state = ReaderState::Done;
            let mut headers = HeaderMap::new();
            headers.insert("Content-Type", self.content_type.to_string());
            return Ok(self.make_part(headers, slot));
        }

        let boundary = match self.content_type.boundary() {
            Some(b) => b.to_string(),
            None => boundary::sniff_boundary(&mut shared.source)?.ok_or(
                MimeError::MissingBoundary {
                    sniffed: shared.source.capacity(),
                },
            )?,
        };
        let delimiter = boundary::delimiter_for(&boundary)?;
        let lookahead = boundary::lookahead_for(&delimiter);
        if shared.source.capacity() <= lookahead {
            return Err(MimeError::PushbackOverflow {
                requested: lookahead + 1,
                available: shared.source.capacity(),
                capacity: shared.source.capacity(),
            });
        }
        debug!(boundary = %boundary, "Using MIME boundary");

        boundary::skip_preamble(&mut shared.source, &delimiter)?;
        let headers = read_header_block(&mut shared.source, self.config.decoder.max_header_size)?
            .ok_or_else(|| {
                MimeError::malformed(shared.source.position(), "stream ended before the root part")
            })?;
        let slot = shared.push(BodyState::Live(BoundaryScanner::new(Arc::clone(&delimiter))));
        drop(shared);

        self.delimiter = Some(delimiter);
        self.state = ReaderState::Active;
        let root = self.make_part(headers, slot);

        if let Some(start) = self.content_type.start() {
            let expected = clean_content_id(start);
            if expected.as_deref() != Some(root.id()) {
                warn!(
                    start = %start,
                    root = %root.id(),
                    "Root part Content-ID doesn't match the start parameter"
                );
            }
        }
        info!(id = %root.id(), content_type = %root.content_type(), "Decoded root part");
        Ok(root)
    }

    /// Produce the next attachment, or `None` after the last one.
    pub fn next_part(&mut self) -> Result<Option<Part>> {
        match self.state {
            ReaderState::Init => return Err(MimeError::NotInitialized),
            ReaderState::Done => {
                lock_shared(&self.shared)?.check_failure()?;
                return Ok(None);
            }
            ReaderState::Active => {}
        }
        match self.advance() {
            Ok(Some(part)) => Ok(Some(part)),
            Ok(None) => {
                self.state = ReaderState::Done;
                Ok(None)
            }
            Err(e) => {
                self.state = ReaderState::Done;
                Err(self.record(e))
            }
        }
    }

    fn advance(&mut self) -> Result<Option<Part>> {
        let Some(delimiter) = self.delimiter.clone() else {
            return Err(MimeError::NotInitialized);
        };
        let mut shared = lock_shared(&self.shared)?;
        shared.check_failure()?;
        shared.drain_live()?;
        if shared.closed {
            debug!(attachments = self.attachments, "Reached end of message");
            return Ok(None);
        }

        let Some(headers) =
            read_header_block(&mut shared.source, self.config.decoder.max_header_size)?
        else {
            return Ok(None);
        };
        let limit = self.config.decoder.max_attachments;
        if self.attachments >= limit {
            return Err(MimeError::TooManyAttachments { limit });
        }
        self.attachments += 1;
        let slot = shared.push(BodyState::Live(BoundaryScanner::new(delimiter)));
        drop(shared);

        let part = self.make_part(headers, slot);
        debug!(
            index = self.attachments,
            id = %part.id(),
            content_type = %part.content_type(),
            "Decoded attachment"
        );
        Ok(Some(part))
    }

    fn make_part(&self, headers: HeaderMap, slot: usize) -> Part {
        Part::new(
            headers,
            PartBody::new(Arc::clone(&self.shared), slot),
            &self.config.decoder.default_content_type,
        )
    }

    /// Number of attachments produced so far.
    pub fn attachment_count(&self) -> usize {
        self.attachments
    }

    /// Declared content type of the whole message.
    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    /// `true` once no further parts will be produced.
    pub fn is_done(&self) -> bool {
        self.state == ReaderState::Done
    }
}
