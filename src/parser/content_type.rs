//! `Content-Type` value parsing: media type plus `name=value` parameters.

use std::fmt;

/// Parsed content type.
///
/// The media type and parameter names are lowercased; parameter values keep
/// their case with quoting and backslash escapes removed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentType {
    media_type: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// Parse a raw header value. Never fails; malformed parameters are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut segments = split_outside_quotes(raw).into_iter();
        let media_type = segments
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();

        let params = segments
            .filter_map(|seg| {
                let (name, value) = seg.split_once('=')?;
                let name = name.trim().to_ascii_lowercase();
                if name.is_empty() {
                    return None;
                }
                Some((name, unquote(value.trim())))
            })
            .collect();

        Self { media_type, params }
    }

    /// `type/subtype`, lowercased.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// `true` for any `multipart/*` type.
    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }

    /// Value of the first parameter called `name` (case-insensitive).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }

    /// `start` parameter: Content-ID of the root part, brackets included.
    pub fn start(&self) -> Option<&str> {
        self.param("start")
    }

    /// `type` parameter: media type of the root part.
    pub fn root_type(&self) -> Option<&str> {
        self.param("type")
    }

    pub fn start_info(&self) -> Option<&str> {
        self.param("start-info")
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        for (name, value) in &self.params {
            write!(f, "; {name}=\"{}\"", escape_quotes(value))?;
        }
        Ok(())
    }
}

/// Split on `;` outside of double-quoted strings.
fn split_outside_quotes(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

/// Strip surrounding quotes and resolve backslash escapes.
fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"') else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '"' => break,
            _ => out.push(c),
        }
    }
    out
}

/// Backslash-escape double quotes for use inside a quoted parameter value.
pub fn escape_quotes(value: &str) -> String {
    value.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_and_params() {
        let ct = ContentType::parse(
            "Multipart/Related; type=\"application/xop+xml\"; Boundary=\"uuid:1234\"; start=\"<root@x>\"",
        );
        assert_eq!(ct.media_type(), "multipart/related");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("uuid:1234"));
        assert_eq!(ct.start(), Some("<root@x>"));
        assert_eq!(ct.root_type(), Some("application/xop+xml"));
    }

    #[test]
    fn test_unquoted_and_escaped_values() {
        let ct = ContentType::parse(
            r#"multipart/related; boundary=simple; start-info="text/xml; action=\"urn:op\"""#,
        );
        assert_eq!(ct.boundary(), Some("simple"));
        assert_eq!(ct.start_info(), Some(r#"text/xml; action="urn:op""#));
    }

    #[test]
    fn test_semicolon_inside_quotes() {
        let ct = ContentType::parse(r#"multipart/related; type="text/xml; charset=utf-8"; boundary=b"#);
        assert_eq!(ct.root_type(), Some("text/xml; charset=utf-8"));
        assert_eq!(ct.boundary(), Some("b"));
    }

    #[test]
    fn test_missing_and_empty_boundary() {
        assert!(ContentType::parse("multipart/related").boundary().is_none());
        assert!(ContentType::parse("multipart/related; boundary=\"\"")
            .boundary()
            .is_none());
        assert!(!ContentType::parse("text/xml; charset=utf-8").is_multipart());
    }

    #[test]
    fn test_display_requotes() {
        let ct = ContentType::parse(r#"text/xml; action="a\"b""#);
        assert_eq!(ct.to_string(), r#"text/xml; action="a\"b""#);
    }
}
