//! A decoded MIME part and the handle to its body.

use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use percent_encoding::percent_decode_str;

use crate::error::Result;
use crate::model::headers::HeaderMap;
use crate::parser::content_type::ContentType;
use crate::parser::deserializer::{lock_shared, Shared};
use crate::stream::spool::SpoolHold;

/// Id given to a part that carries no `Content-ID`.
pub const DEFAULT_ROOT_ID: &str = "root.message@mimespool";

/// Content type assumed for parts that don't declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Normalize a `Content-ID` value into a part id.
///
/// Strips surrounding whitespace, angle brackets and a `cid:` prefix, then
/// percent-decodes what is left. Returns `None` for an empty result.
pub fn clean_content_id(raw: &str) -> Option<String> {
    let mut id = raw.trim();
    if let Some(inner) = id.strip_prefix('<') {
        id = inner.strip_suffix('>').unwrap_or(inner);
    }
    let id = id.trim();
    let id = match id.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("cid:") => &id[4..],
        _ => id,
    };
    let decoded = percent_decode_str(id).decode_utf8_lossy();
    let decoded = decoded.trim();
    (!decoded.is_empty()).then(|| decoded.to_string())
}

/// One part of a multipart message.
///
/// Cloning is cheap; clones share the header block and the body cursor.
#[derive(Clone)]
pub struct Part {
    id: String,
    content_type: String,
    headers: Arc<HeaderMap>,
    body: PartBody,
}

impl Part {
    pub(crate) fn new(headers: HeaderMap, body: PartBody, default_content_type: &str) -> Self {
        let id = headers
            .get("content-id")
            .and_then(clean_content_id)
            .unwrap_or_else(|| DEFAULT_ROOT_ID.to_string());
        let content_type = headers
            .get("content-type")
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(default_content_type)
            .to_string();
        Self {
            id,
            content_type,
            headers: Arc::new(headers),
            body,
        }
    }

    /// Id derived from `Content-ID`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full `Content-Type` value, parameters included.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Lowercased `type/subtype` without parameters.
    pub fn media_type(&self) -> String {
        ContentType::parse(&self.content_type).media_type().to_string()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        self.headers.get("content-transfer-encoding")
    }

    /// `filename` from `Content-Disposition`, with any directory part removed.
    pub fn filename(&self) -> Option<String> {
        let disposition = ContentType::parse(self.headers.get("content-disposition")?);
        let name = disposition.param("filename")?;
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
        (!base.is_empty()).then(|| base.to_string())
    }

    /// Handle to the body; reads continue where the previous reader stopped.
    pub fn body(&self) -> PartBody {
        self.body.clone()
    }

    /// Read the rest of the body into memory.
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.body().read_to_end(&mut out)?;
        Ok(out)
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("id", &self.id)
            .field("content_type", &self.content_type)
            .field("slot", &self.body.slot)
            .finish()
    }
}

/// Byte stream of one part body over the message's shared cursor.
#[derive(Clone)]
pub struct PartBody {
    shared: Arc<Mutex<Shared>>,
    slot: usize,
}

impl PartBody {
    pub(crate) fn new(shared: Arc<Mutex<Shared>>, slot: usize) -> Self {
        Self { shared, slot }
    }

    /// `true` once the body was drained into a spool.
    pub fn is_cached(&self) -> Result<bool> {
        Ok(lock_shared(&self.shared)?.is_cached(self.slot))
    }

    /// Pin the spooled copy of this body; `None` if it was never spooled.
    pub fn hold(&self) -> Result<Option<SpoolHold>> {
        Ok(lock_shared(&self.shared)?.hold(self.slot))
    }

    /// Temp file holding this body, if it was spilled to disk.
    pub fn spool_path(&self) -> Result<Option<PathBuf>> {
        Ok(lock_shared(&self.shared)?.spool_path(self.slot))
    }
}

impl Read for PartBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = lock_shared(&self.shared)?;
        Ok(shared.read_slot(self.slot, buf)?)
    }
}
