//! Part header blocks: reading, unfolding and byte decoding.

use std::io::Read;

use tracing::debug;

use crate::error::{MimeError, Result};
use crate::model::headers::HeaderMap;
use crate::stream::pushback::PushbackReader;

/// Default limit for one header block (300 KB).
pub const DEFAULT_MAX_HEADER_SIZE: usize = 300 * 1024;

/// Read one header block, up to and including its terminating blank line.
///
/// Returns `None` if the stream is already at its end. A stream that ends
/// inside the block yields whatever was read.
pub fn read_header_block<R: Read>(
    src: &mut PushbackReader<R>,
    max_size: usize,
) -> Result<Option<HeaderMap>> {
    let start_offset = src.position();
    let mut raw = Vec::with_capacity(256);
    loop {
        let line_start = raw.len();
        let remaining = max_size.saturating_sub(line_start);
        if remaining == 0 {
            return Err(MimeError::HeaderTooLarge { limit: max_size });
        }
        if src.read_line(&mut raw, remaining)? == 0 {
            if raw.is_empty() {
                return Ok(None);
            }
            break;
        }
        let line = &raw[line_start..];
        if line == b"\r\n" || line == b"\n" {
            raw.truncate(line_start);
            break;
        }
        if !line.ends_with(b"\n") && raw.len() >= max_size {
            return Err(MimeError::HeaderTooLarge { limit: max_size });
        }
    }

    let text = decode_header_bytes(&raw);
    let headers = unfold_headers(&text);
    debug!(
        offset = start_offset,
        fields = headers.len(),
        "Read part header block"
    );
    Ok(Some(headers))
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous field.
pub fn unfold_headers(text: &str) -> HeaderMap {
    let mut fields: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = fields.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            if !name.is_empty() {
                fields.push((name, value));
            }
        }
        // Lines without a colon that aren't continuations are dropped
    }

    fields.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source(data: &[u8]) -> PushbackReader<Cursor<Vec<u8>>> {
        PushbackReader::new(Cursor::new(data.to_vec()))
    }

    #[test]
    fn test_unfold_headers() {
        let text = "Content-Type: text/xml;\n\tcharset=utf-8\nContent-ID: <a@b>\n";
        let headers = unfold_headers(text);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("content-type"), Some("text/xml; charset=utf-8"));
        assert_eq!(headers.fields()[0].name, "Content-Type");
    }

    #[test]
    fn test_block_stops_at_blank_line() {
        let mut src = source(b"Content-ID: <x>\r\nX-A: 1\r\n\r\nbody");
        let headers = read_header_block(&mut src, 1024).unwrap().unwrap();
        assert_eq!(headers.get("content-id"), Some("<x>"));
        assert_eq!(headers.get("x-a"), Some("1"));
        let mut rest = Vec::new();
        src.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"body");
    }

    #[test]
    fn test_empty_block_and_eof() {
        let mut src = source(b"\r\nbody");
        assert!(read_header_block(&mut src, 1024).unwrap().unwrap().is_empty());

        let mut src = source(b"");
        assert!(read_header_block(&mut src, 1024).unwrap().is_none());
    }

    #[test]
    fn test_block_too_large() {
        let mut data = b"X-Big: ".to_vec();
        data.extend(std::iter::repeat(b'a').take(100));
        data.extend_from_slice(b"\r\n\r\n");
        let mut src = source(&data);
        assert!(matches!(
            read_header_block(&mut src, 64),
            Err(MimeError::HeaderTooLarge { limit: 64 })
        ));
    }

    #[test]
    fn test_latin1_fallback() {
        assert_eq!(decode_header_bytes(b"caf\xe9"), "café");
        assert_eq!(decode_header_bytes("café".as_bytes()), "café");
    }
}
