//! Integration tests for the multipart decoder.

use std::io::{Cursor, Read};
use std::path::Path;

use mimespool::config::Config;
use mimespool::{decode, MimeError};

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

const SOAP_CT: &str = "multipart/related; type=\"application/xop+xml\"; boundary=\"MIMEBoundary_soap\"; start=\"<root.message@example.org>\"; start-info=\"text/xml\"";

fn decode_bytes(data: &[u8], content_type: &str) -> mimespool::Result<mimespool::Message> {
    decode(Cursor::new(data.to_vec()), content_type, &Config::default())
}

// ─── Test 1: Fixture decodes into root plus two attachments ─────────

#[test]
fn test_fixture_parts() {
    let file = std::fs::File::open(fixture("soap_attachments.bin")).unwrap();
    let mut message = decode(file, SOAP_CT, &Config::default()).unwrap();

    assert_eq!(message.root.id(), "root.message@example.org");
    assert!(message.root.content_type().starts_with("application/xop+xml"));
    assert_eq!(message.root.transfer_encoding(), Some("binary"));
    let root = String::from_utf8(message.root.read_to_vec().unwrap()).unwrap();
    assert!(root.starts_with("<soap:Envelope"));
    assert!(root.ends_with("</soap:Envelope>"));

    assert_eq!(message.attachments.load_all().unwrap(), 2);
    let parts = message.attachments.produced();
    assert_eq!(parts[0].id(), "report@example.org");
    assert_eq!(parts[0].filename().as_deref(), Some("q3.txt"));
    assert_eq!(parts[1].id(), "blob@example.org");
    assert_eq!(parts[1].content_type(), "application/octet-stream");
}

// ─── Test 2: Boundary-like text inside a body is preserved ──────────

#[test]
fn test_fixture_bodies_after_drain() {
    let file = std::fs::File::open(fixture("soap_attachments.bin")).unwrap();
    let mut message = decode(file, SOAP_CT, &Config::default()).unwrap();

    // Reach the end first so every body is read back from its spool
    message.attachments.load_all().unwrap();
    let report = message.attachments.find("report@example.org").unwrap().unwrap();
    assert_eq!(
        report.read_to_vec().unwrap(),
        b"Quarterly report\r\n--MIMEBoundary_so\r\nnot a delimiter"
    );
    let blob = message.attachments.get(1).unwrap().unwrap();
    assert_eq!(blob.read_to_vec().unwrap(), (0u8..=255).collect::<Vec<_>>());
}

// ─── Test 3: Sniffed boundary decodes like the declared one ─────────

#[test]
fn test_sniffed_boundary_matches_explicit() {
    let data = b"--XYZ\r\nContent-ID: <r>\r\n\r\nroot\r\n--XYZ\r\nContent-ID: <a>\r\n\r\nattachment\r\n--XYZ--\r\n";

    let mut explicit = decode_bytes(data, "multipart/related; boundary=XYZ").unwrap();
    let mut sniffed = decode_bytes(data, "multipart/related").unwrap();

    assert_eq!(explicit.root.id(), sniffed.root.id());
    assert_eq!(
        explicit.root.read_to_vec().unwrap(),
        sniffed.root.read_to_vec().unwrap()
    );
    let a: Vec<_> = explicit
        .attachments
        .iter()
        .map(|p| p.unwrap().read_to_vec().unwrap())
        .collect();
    let b: Vec<_> = sniffed
        .attachments
        .iter()
        .map(|p| p.unwrap().read_to_vec().unwrap())
        .collect();
    assert_eq!(a, vec![b"attachment".to_vec()]);
    assert_eq!(a, b);
}

// ─── Test 4: Closing boundary ends the sequence ─────────────────────

#[test]
fn test_terminal_boundary_stops_parsing() {
    let data = b"--b\r\n\r\nroot\r\n--b--\r\n--b\r\nContent-ID: <ghost>\r\n\r\nnever\r\n--b--\r\n";
    let mut message = decode_bytes(data, "multipart/related; boundary=b").unwrap();
    assert_eq!(message.root.read_to_vec().unwrap(), b"root");
    assert_eq!(message.attachments.load_all().unwrap(), 0);
    assert!(message.attachments.is_exhausted());
}

// ─── Test 5: Drain on advance keeps a half-read body intact ─────────

#[test]
fn test_drain_preserves_partial_read() {
    let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let mut data = b"--b\r\nContent-ID: <r>\r\n\r\n".to_vec();
    data.extend_from_slice(&body);
    data.extend_from_slice(b"\r\n--b\r\nContent-ID: <a>\r\n\r\nsecond\r\n--b--\r\n");

    let mut message = decode_bytes(&data, "multipart/related; boundary=b").unwrap();
    let mut root = message.root.body();
    let mut head = vec![0u8; 1000];
    root.read_exact(&mut head).unwrap();

    let second = message.attachments.get(0).unwrap().unwrap().clone();
    assert!(root.is_cached().unwrap());
    assert_eq!(second.read_to_vec().unwrap(), b"second");

    let mut tail = Vec::new();
    root.read_to_end(&mut tail).unwrap();
    head.extend_from_slice(&tail);
    assert_eq!(head, body);
}

// ─── Test 6: LF-only framing ────────────────────────────────────────

#[test]
fn test_lf_only_message() {
    let data = b"--b\nContent-Type: text/plain\nContent-ID: <r>\n\nline 1\nline 2\n--b\nContent-ID: <a>\n\nA\n--b--\n";
    let mut message = decode_bytes(data, "multipart/related; boundary=b").unwrap();
    assert_eq!(message.root.content_type(), "text/plain");
    assert_eq!(message.root.read_to_vec().unwrap(), b"line 1\nline 2");
    let a = message.attachments.get(0).unwrap().unwrap();
    assert_eq!(a.id(), "a");
    assert_eq!(a.read_to_vec().unwrap(), b"A");
}

// ─── Test 7: Attachment count limit from properties ─────────────────

#[test]
fn test_max_attachment_count() {
    let mut data = b"--b\r\n\r\nroot".to_vec();
    for i in 0..4 {
        data.extend_from_slice(format!("\r\n--b\r\nContent-ID: <p{i}>\r\n\r\nbody {i}").as_bytes());
    }
    data.extend_from_slice(b"\r\n--b--\r\n");

    let mut config = Config::default();
    let props = [("attachment-max-count".to_string(), "3".to_string())]
        .into_iter()
        .collect();
    config.apply_properties(&props).unwrap();

    let mut message = decode(Cursor::new(data), "multipart/related; boundary=b", &config).unwrap();
    let results: Vec<_> = message.attachments.iter().collect();
    assert_eq!(results.len(), 4);
    assert!(results[..3].iter().all(|r| r.is_ok()));
    assert!(matches!(
        results[3],
        Err(MimeError::TooManyAttachments { limit: 3 })
    ));
}

// ─── Test 8: Oversized header block is rejected ─────────────────────

#[test]
fn test_header_size_limit() {
    let mut data = b"--b\r\nX-Filler: ".to_vec();
    data.extend(std::iter::repeat(b'x').take(4096));
    data.extend_from_slice(b"\r\n\r\nroot\r\n--b--\r\n");

    let mut config = Config::default();
    config.decoder.max_header_size = 1024;
    let err = decode(Cursor::new(data), "multipart/related; boundary=b", &config).unwrap_err();
    assert!(matches!(err, MimeError::HeaderTooLarge { limit: 1024 }));
}

// ─── Test 9: Missing and truncated boundaries ───────────────────────

#[test]
fn test_boundary_errors() {
    let err = decode_bytes(b"just some bytes", "multipart/related").unwrap_err();
    assert!(matches!(err, MimeError::MissingBoundary { .. }));
    assert!(err.is_format_error());

    let message = decode_bytes(b"--b\r\n\r\nroot\r\n--", "multipart/related; boundary=b").unwrap();
    let err = message.root.read_to_vec().unwrap_err();
    assert!(matches!(err, MimeError::Malformed { .. }));
}

// ─── Test 10: Missing closing boundary is tolerated ─────────────────

#[test]
fn test_unterminated_message() {
    let mut message =
        decode_bytes(b"--b\r\n\r\nroot\r\n--b\r\n\r\nlast part", "multipart/related; boundary=b").unwrap();
    assert_eq!(message.root.read_to_vec().unwrap(), b"root");
    let last = message.attachments.get(0).unwrap().unwrap();
    assert_eq!(last.read_to_vec().unwrap(), b"last part");
    assert_eq!(message.attachments.load_all().unwrap(), 1);
}

// ─── Test 11: Parts without Content-ID or Content-Type ──────────────

#[test]
fn test_defaults_for_bare_parts() {
    let mut config = Config::default();
    config.decoder.default_content_type = "text/xml".to_string();
    let data = b"--b\r\n\r\n<r/>\r\n--b--\r\n";
    let message = decode(Cursor::new(data.to_vec()), "multipart/related; boundary=b", &config).unwrap();
    assert_eq!(message.root.id(), "root.message@mimespool");
    assert_eq!(message.root.content_type(), "text/xml");
}

// ─── Test 12: Small pushback capacity still frames correctly ────────

#[test]
fn test_small_pushback_capacity() {
    let mut config = Config::default();
    config.decoder.pushback_capacity = 32;
    let body = "x".repeat(300);
    let data = format!("--bnd\r\n\r\n{body}\r\n--bnd\r\n\r\ny\r\n--bnd--");
    let mut message =
        decode(Cursor::new(data.into_bytes()), "multipart/related; boundary=bnd", &config).unwrap();
    assert_eq!(message.root.read_to_vec().unwrap(), body.as_bytes());
    assert_eq!(message.attachments.load_all().unwrap(), 1);
}

// ─── Test 13: A framing error stays reported ────────────────────────

#[test]
fn test_truncated_boundary_error_is_sticky() {
    let data = b"--b\r\n\r\nroot\r\n--b\r\n\r\nA\r\n--b-";
    let mut message = decode_bytes(data, "multipart/related; boundary=b").unwrap();
    assert_eq!(message.root.read_to_vec().unwrap(), b"root");

    let part = message.attachments.get(0).unwrap().unwrap().clone();
    let first = part.read_to_vec().unwrap_err();
    assert!(matches!(first, MimeError::Malformed { .. }));
    let second = part.read_to_vec().unwrap_err();
    assert_eq!(second.to_string(), first.to_string());

    let err = message.attachments.load_all().unwrap_err();
    assert!(matches!(err, MimeError::Malformed { .. }));
    assert!(!message.attachments.is_exhausted());
}

// ─── Test 14: Boundary sniffed after a preamble line ────────────────

#[test]
fn test_sniffed_boundary_after_preamble() {
    let data = "SomeHeader: foo\n\
        ------=_Part_34950_1098328613.1263781527359\n\
        Content-Type: text/xml; charset=UTF-8\n\
        Content-Transfer-Encoding: binary\n\
        Content-Id: <318731183421.1263781527359.IBM.WEBSERVICES@auhpap02>\n\
        \n\
        <envelope/>\n\
        ------=_Part_34950_1098328613.1263781527359\n\
        Content-Transfer-Encoding: binary\n\
        Content-Id: <b86a5f2d-e7af-4e5e-b71a-9f6f2307cab0>\n\
        \n\
        <message>\n\
        ------=_Part_34950_1098328613.1263781527359--\n";

    let mut message = decode_bytes(data.as_bytes(), "multipart/related").unwrap();
    assert_eq!(
        message.root.id(),
        "318731183421.1263781527359.IBM.WEBSERVICES@auhpap02"
    );
    assert_eq!(message.root.read_to_vec().unwrap(), b"<envelope/>");

    assert_eq!(message.attachments.load_all().unwrap(), 1);
    let part = &message.attachments.produced()[0];
    assert_eq!(part.id(), "b86a5f2d-e7af-4e5e-b71a-9f6f2307cab0");
    assert_eq!(part.content_type(), "application/octet-stream");
    assert_eq!(part.read_to_vec().unwrap(), b"<message>");
}
