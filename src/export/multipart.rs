//! Multipart/related encoder.
//!
//! Output layout:
//!
//! ```text
//! CRLF --boundary CRLF
//! <root headers> CRLF
//! <root body>
//! CRLF --boundary CRLF
//! <attachment headers> CRLF
//! <attachment body>
//! ...
//! CRLF --boundary-- CRLF
//! ```
//!
//! The outer `Content-Type` returned by [`MultipartWriter::content_type`] must
//! travel with the bytes; it is the only place the boundary is announced.

use std::io::{self, Read, Write};

use tracing::debug;
use uuid::Uuid;

use crate::config::EncoderConfig;
use crate::error::{MimeError, Result};
use crate::model::headers::HeaderMap;
use crate::model::part::{Part, DEFAULT_ROOT_ID};
use crate::parser::content_type::escape_quotes;

/// Media type announced for the root part in XOP mode.
pub const XOP_TYPE: &str = "application/xop+xml";

/// Headers written by the encoder itself; never copied from extra headers.
const MANAGED_HEADERS: [&str; 3] = ["content-type", "content-id", "content-transfer-encoding"];

/// Fresh random boundary.
pub fn generate_boundary() -> String {
    format!("uuid:{}", Uuid::new_v4())
}

/// Fresh random Content-ID value, without angle brackets.
pub fn generate_content_id() -> String {
    format!("{}@mimespool", Uuid::new_v4())
}

/// Headers of one attachment to be written.
#[derive(Debug, Clone, Default)]
pub struct OutgoingPart {
    /// Content-ID without brackets; generated when `None`.
    pub id: Option<String>,
    pub content_type: String,
    /// Extra headers written verbatim after the managed ones.
    pub headers: HeaderMap,
}

impl OutgoingPart {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            id: None,
            content_type: content_type.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Copy id, content type and unmanaged headers of a decoded part.
    pub fn from_part(part: &Part) -> Self {
        let headers = part
            .headers()
            .iter()
            .filter(|(name, _)| !is_managed(name))
            .collect();
        Self {
            id: Some(part.id().to_string()),
            content_type: part.content_type().to_string(),
            headers,
        }
    }
}

fn is_managed(name: &str) -> bool {
    MANAGED_HEADERS.iter().any(|m| m.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Ready,
    Body,
    Finished,
}

/// Writes one multipart message to a byte sink.
#[derive(Debug)]
pub struct MultipartWriter {
    boundary: String,
    root_id: String,
    root_media_type: String,
    /// Everything after the first `;` of the root content type, if any.
    root_params: Option<String>,
    multipart_type: String,
    xop: bool,
    state: WriterState,
    parts_written: usize,
}

impl MultipartWriter {
    /// Writer for a message whose root body has `root_content_type`.
    pub fn new(root_content_type: &str, config: &EncoderConfig) -> Self {
        let (media_type, params) = match root_content_type.split_once(';') {
            Some((head, tail)) => (head.trim(), Some(format!(";{tail}"))),
            None => (root_content_type.trim(), None),
        };
        Self {
            boundary: generate_boundary(),
            root_id: DEFAULT_ROOT_ID.to_string(),
            root_media_type: media_type.to_string(),
            root_params: params,
            multipart_type: config.multipart_type.clone(),
            xop: config.xop,
            state: WriterState::Ready,
            parts_written: 0,
        }
    }

    /// Use a fixed boundary instead of a random one.
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Use a fixed Content-ID for the root part.
    pub fn with_root_id(mut self, id: impl Into<String>) -> Self {
        self.root_id = id.into();
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Root content type with quotes in its parameters escaped.
    fn escaped_root_type(&self) -> String {
        match &self.root_params {
            Some(params) => format!("{}{}", self.root_media_type, escape_quotes(params)),
            None => self.root_media_type.clone(),
        }
    }

    /// Outer `Content-Type` announcing boundary, root type and start part.
    pub fn content_type(&self) -> String {
        let root_type = if self.xop {
            XOP_TYPE
        } else {
            self.root_media_type.as_str()
        };
        format!(
            "{}; type=\"{}\"; boundary=\"{}\"; start=\"<{}>\"; start-info=\"{}\"",
            self.multipart_type,
            root_type,
            self.boundary,
            self.root_id,
            self.escaped_root_type()
        )
    }

    /// `Content-Type` header of the root part itself.
    pub fn root_part_content_type(&self) -> String {
        if self.xop {
            format!(
                "{XOP_TYPE}; charset=UTF-8; type=\"{}\"",
                self.escaped_root_type()
            )
        } else {
            match &self.root_params {
                Some(params) => format!("{}{params}", self.root_media_type),
                None => self.root_media_type.clone(),
            }
        }
    }

    fn write_delimiter<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "\r\n--{}\r\n", self.boundary)
    }

    fn write_headers<W: Write + ?Sized>(
        out: &mut W,
        content_type: &str,
        id: &str,
        extra: &HeaderMap,
    ) -> io::Result<()> {
        write!(out, "Content-Type: {content_type}\r\n")?;
        out.write_all(b"Content-Transfer-Encoding: binary\r\n")?;
        write!(out, "Content-ID: <{id}>\r\n")?;
        for (name, value) in extra.iter().filter(|(name, _)| !is_managed(name)) {
            write!(out, "{name}: {value}\r\n")?;
        }
        out.write_all(b"\r\n")
    }

    /// Write the preamble delimiter, the root headers and the root body.
    pub fn write_root<W, R>(&mut self, out: &mut W, body: &mut R) -> Result<u64>
    where
        W: Write + ?Sized,
        R: Read + ?Sized,
    {
        if self.state != WriterState::Ready {
            return Err(MimeError::InvalidState("root part already written"));
        }
        self.write_delimiter(out)?;
        Self::write_headers(
            out,
            &self.root_part_content_type(),
            &self.root_id,
            &HeaderMap::new(),
        )?;
        let n = io::copy(body, out)?;
        self.state = WriterState::Body;
        debug!(id = %self.root_id, bytes = n, "Wrote root part");
        Ok(n)
    }

    /// Write one attachment; returns the Content-ID it was given.
    pub fn write_attachment<W, R>(
        &mut self,
        out: &mut W,
        part: &OutgoingPart,
        body: &mut R,
    ) -> Result<String>
    where
        W: Write + ?Sized,
        R: Read + ?Sized,
    {
        if self.state != WriterState::Body {
            return Err(MimeError::InvalidState(
                "attachments must follow the root part",
            ));
        }
        let id = part.id.clone().unwrap_or_else(generate_content_id);
        self.write_delimiter(out)?;
        Self::write_headers(out, &part.content_type, &id, &part.headers)?;
        let n = io::copy(body, out)?;
        self.parts_written += 1;
        debug!(id = %id, bytes = n, "Wrote attachment");
        Ok(id)
    }

    /// Write a decoded part, reading its body from where it currently stands.
    pub fn write_part<W: Write + ?Sized>(&mut self, out: &mut W, part: &Part) -> Result<String> {
        self.write_attachment(out, &OutgoingPart::from_part(part), &mut part.body())
    }

    /// Write the closing delimiter and flush.
    pub fn finish<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<()> {
        if self.state != WriterState::Body {
            return Err(MimeError::InvalidState("nothing written yet"));
        }
        write!(out, "\r\n--{}--\r\n", self.boundary)?;
        out.flush()?;
        self.state = WriterState::Finished;
        debug!(attachments = self.parts_written, "Finished multipart message");
        Ok(())
    }
}
