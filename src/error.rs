//! Centralized error types for mimespool.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by the mimespool library.
///
/// Every variant is fatal for the message being decoded or encoded; nothing
/// here is retried or downgraded to a partial result.
#[derive(Error, Debug)]
pub enum MimeError {
    /// I/O error on the raw source or the output sink.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// I/O error on spill storage, with the file or directory involved.
    #[error("I/O error on spool file '{path}': {source}")]
    Spool { path: PathBuf, source: io::Error },

    /// No boundary in the content type and none found at the start of the stream.
    #[error("Couldn't find MIME boundary in content type or first {sniffed} bytes of the stream")]
    MissingBoundary { sniffed: usize },

    /// The boundary value is empty or contains line breaks.
    #[error("Invalid MIME boundary: {0:?}")]
    InvalidBoundary(String),

    /// The stream is not valid multipart framing at the given offset.
    #[error("Malformed multipart stream at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },

    /// A part header block grew beyond the configured limit.
    #[error("Part header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// The message carries more attachments than allowed.
    #[error("The message contains more than {limit} attachments")]
    TooManyAttachments { limit: usize },

    /// More bytes were pushed back than the lookahead buffer can hold.
    #[error("Pushback buffer overflow: {requested} bytes requested, {available} of {capacity} available")]
    PushbackOverflow {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    /// A spooled body grew beyond the configured maximum size.
    #[error("Cached content exceeds the maximum size of {limit} bytes")]
    CacheSizeExceeded { limit: u64 },

    /// The spill file behind a sink was already removed.
    #[error("Cached file was deleted: {0}")]
    SpoolDeleted(PathBuf),

    /// A spool was written to after its input view was taken.
    #[error("Spool is closed for writing")]
    SpoolLocked,

    /// A contextual property has the wrong shape.
    #[error("Invalid value for property '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },

    /// The reader was used before `initialize`.
    #[error("Attachments have not been initialized")]
    NotInitialized,

    /// A reader or writer method was called out of order.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

/// Convenience alias for `Result<T, MimeError>`.
pub type Result<T> = std::result::Result<T, MimeError>;

impl MimeError {
    /// Create a `Spool` variant from a path and an `io::Error`.
    pub fn spool(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Spool {
            path: path.into(),
            source,
        }
    }

    /// Create a `Malformed` variant.
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            reason: reason.into(),
        }
    }

    /// `true` for errors caused by the shape of the input rather than I/O.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::MissingBoundary { .. }
                | Self::InvalidBoundary(_)
                | Self::Malformed { .. }
                | Self::HeaderTooLarge { .. }
                | Self::TooManyAttachments { .. }
        )
    }

    /// Rebuild an equivalent error so a failure can be reported again.
    ///
    /// I/O sources keep their kind and message but lose any inner payload.
    pub fn replay(&self) -> Self {
        let io_copy = |e: &io::Error| io::Error::new(e.kind(), e.to_string());
        match self {
            Self::Io(e) => Self::Io(io_copy(e)),
            Self::Spool { path, source } => Self::spool(path.clone(), io_copy(source)),
            Self::MissingBoundary { sniffed } => Self::MissingBoundary { sniffed: *sniffed },
            Self::InvalidBoundary(b) => Self::InvalidBoundary(b.clone()),
            Self::Malformed { offset, reason } => Self::malformed(*offset, reason.clone()),
            Self::HeaderTooLarge { limit } => Self::HeaderTooLarge { limit: *limit },
            Self::TooManyAttachments { limit } => Self::TooManyAttachments { limit: *limit },
            Self::PushbackOverflow {
                requested,
                available,
                capacity,
            } => Self::PushbackOverflow {
                requested: *requested,
                available: *available,
                capacity: *capacity,
            },
            Self::CacheSizeExceeded { limit } => Self::CacheSizeExceeded { limit: *limit },
            Self::SpoolDeleted(path) => Self::SpoolDeleted(path.clone()),
            Self::SpoolLocked => Self::SpoolLocked,
            Self::InvalidProperty { key, reason } => Self::InvalidProperty {
                key: key.clone(),
                reason: reason.clone(),
            },
            Self::NotInitialized => Self::NotInitialized,
            Self::InvalidState(what) => Self::InvalidState(what),
        }
    }
}

/// Unwrap a `MimeError` that travelled through a `Read`/`Write` call,
/// otherwise keep the plain I/O error.
impl From<io::Error> for MimeError {
    fn from(source: io::Error) -> Self {
        if source
            .get_ref()
            .is_some_and(|inner| inner.is::<MimeError>())
        {
            if let Some(inner) = source.into_inner() {
                if let Ok(err) = inner.downcast::<MimeError>() {
                    return *err;
                }
            }
            return Self::Io(io::Error::other("error payload lost in conversion"));
        }
        Self::Io(source)
    }
}

/// Carry a `MimeError` through `std::io` traits.
impl From<MimeError> for io::Error {
    fn from(err: MimeError) -> Self {
        match err {
            MimeError::Io(source) => source,
            other => {
                let kind = if other.is_format_error() {
                    io::ErrorKind::InvalidData
                } else {
                    io::ErrorKind::Other
                };
                io::Error::new(kind, other)
            }
        }
    }
}
