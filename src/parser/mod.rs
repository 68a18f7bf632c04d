//! Multipart decoding: boundary framing, header blocks and the lazy part sequence.

pub mod boundary;
pub mod content_type;
pub mod deserializer;
pub mod header;
pub mod lazy;

use std::io::Read;

use crate::config::Config;
use crate::error::Result;
use crate::model::part::Part;

use self::deserializer::PartReader;
use self::lazy::LazyParts;

/// A decoded message: the root part plus its attachments, produced on demand.
#[derive(Debug)]
pub struct Message {
    pub root: Part,
    pub attachments: LazyParts,
}

/// Start decoding `source`, whose declared content type is `content_type`.
///
/// Only the root header block is read here; attachment headers are read as
/// the attachment sequence is walked.
pub fn decode<R: Read + Send + 'static>(
    source: R,
    content_type: &str,
    config: &Config,
) -> Result<Message> {
    let mut reader = PartReader::new(source, content_type, config);
    let root = reader.initialize()?;
    Ok(Message {
        root,
        attachments: LazyParts::new(reader),
    })
}
