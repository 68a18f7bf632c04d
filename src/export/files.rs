//! Save decoded parts to disk.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::model::part::Part;
use crate::parser::Message;

/// File extension for a handful of common media types.
fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "text/xml" | "application/xml" | "application/soap+xml" | "application/xop+xml" => "xml",
        "text/plain" => "txt",
        "text/html" => "html",
        "application/json" => "json",
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// File name for a part: its `Content-Disposition` filename if present,
/// otherwise the sanitized id plus an extension guessed from the media type.
pub fn part_file_name(part: &Part) -> String {
    match part.filename() {
        Some(name) => sanitize_filename_part(&name, 150),
        None => format!(
            "{}.{}",
            sanitize_filename_part(part.id(), 120),
            extension_for(&part.media_type())
        ),
    }
}

/// Write the remaining body of `part` into `output_dir`.
pub fn save_part(part: &Part, output_dir: &Path) -> anyhow::Result<PathBuf> {
    let path = unique_path(&output_dir.join(part_file_name(part)));
    let mut out = BufWriter::new(File::create(&path)?);
    io::copy(&mut part.body(), &mut out)?;
    out.flush()?;
    Ok(path)
}

/// Save the root part and every attachment of `message`.
///
/// `progress` is called with the number of parts saved so far.
pub fn save_message(
    message: &mut Message,
    output_dir: &Path,
    progress: &dyn Fn(usize),
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let mut paths = vec![save_part(&message.root, output_dir)?];
    progress(paths.len());

    for part in message.attachments.iter() {
        let part = part?;
        paths.push(save_part(&part, output_dir)?);
        progress(paths.len());
    }
    Ok(paths)
}

/// Make `name` safe as a single path component.
///
/// Characters outside `[A-Za-z0-9._@-]` become `_`, runs of `_` collapse,
/// leading dots are dropped and the result is capped at `max_len` chars.
pub fn sanitize_filename_part(name: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(name.len().min(max_len));
    for c in name.trim_start_matches('.').chars() {
        let c = if c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '@') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let out: String = out.chars().take(max_len).collect();
    if out.trim_matches('_').is_empty() {
        "part".to_string()
    } else {
        out
    }
}

/// `path` itself if it's free, else `stem-N.ext` for the first free `N`.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "part".to_string());
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let dir = path.parent().unwrap_or(Path::new("."));

    (1..10_000)
        .map(|n| dir.join(format!("{stem}-{n}{suffix}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dir.join(format!("{stem}-{}{suffix}", uuid::Uuid::new_v4().simple())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::parser::decode;
    use std::io::Cursor;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename_part("root.message@x", 30), "root.message@x");
        assert_eq!(sanitize_filename_part("a b/c", 20), "a_b_c");
        assert_eq!(sanitize_filename_part("<a  b>", 20), "_a_b_");
        assert_eq!(sanitize_filename_part("..", 20), "part");
        assert_eq!(sanitize_filename_part("../etc", 20), "_etc");
        assert_eq!(sanitize_filename_part("abcdef", 3), "abc");
    }

    #[test]
    fn test_save_message_names_and_collisions() {
        let data = b"--b\r\nContent-Type: text/xml\r\nContent-ID: <root>\r\n\r\n<r/>\r\n--b\r\nContent-Disposition: attachment; filename=\"../x.png\"\r\n\r\nP1\r\n--b\r\nContent-Disposition: attachment; filename=\"x.png\"\r\n\r\nP2\r\n--b--\r\n";
        let mut message = decode(
            Cursor::new(data.to_vec()),
            "multipart/related; boundary=b",
            &Config::default(),
        )
        .unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let paths = save_message(&mut message, tmp.path(), &|_| {}).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["root.xml", "x.png", "x-1.png"]);
        assert_eq!(std::fs::read(&paths[2]).unwrap(), b"P2");
    }
}
