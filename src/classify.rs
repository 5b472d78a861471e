//! Content-type sniffing for the allow-list filter.

use crate::error::{Result, SyncError};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Bytes inspected from the start of each file.
pub const SNIFF_LEN: usize = 512;

pub const OCTET_STREAM: &str = "application/octet-stream";

pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

pub const HTML: &str = "text/html; charset=utf-8";

pub const XML: &str = "text/xml; charset=utf-8";

/// Tag openers that mark a prefix as HTML, compared case-insensitively after
/// leading whitespace and followed by a space or `>`.
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Maps the first bytes of a file to a content-type string.
pub trait Classifier: Send + Sync {
    fn classify(&self, prefix: &[u8]) -> String;
}

/// Magic-number detection via `infer`, with markup and plain-text
/// fallbacks.
///
/// Labels follow the names used by web content sniffing (`application/x-gzip`,
/// `audio/wave`, `text/html; charset=utf-8`, ...) so allow-lists written for
/// other upload tools keep matching.
#[derive(Debug, Default, Clone, Copy)]
pub struct SniffClassifier;

impl Classifier for SniffClassifier {
    fn classify(&self, prefix: &[u8]) -> String {
        if let Some(markup) = sniff_markup(prefix) {
            return markup.to_owned();
        }

        if let Some(kind) = infer::get(prefix) {
            return sniff_label(&kind).to_owned();
        }

        if looks_like_text(prefix) {
            PLAIN_TEXT.to_owned()
        } else {
            OCTET_STREAM.to_owned()
        }
    }
}

/// Web sniffing names for the types where `infer` reports a different label.
fn sniff_label(kind: &infer::Type) -> &'static str {
    match kind.extension() {
        "gz" => "application/x-gzip",
        "wav" => "audio/wave",
        "ico" => "image/x-icon",
        "rar" => "application/x-rar-compressed",
        "ogg" => "application/ogg",
        "avi" => "video/avi",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "html" => HTML,
        "xml" => XML,
        "sh" => PLAIN_TEXT,
        _ => kind.mime_type(),
    }
}

fn sniff_markup(prefix: &[u8]) -> Option<&'static str> {
    let start = prefix
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | 0x0c | b'\r' | b' '))?;
    let data = &prefix[start..];

    let has_prefix = |tag: &[u8]| {
        data.len() >= tag.len() && data[..tag.len()].eq_ignore_ascii_case(tag)
    };

    for &tag in HTML_TAGS {
        if has_prefix(tag) && matches!(data.get(tag.len()), Some(b' ' | b'>')) {
            return Some(HTML);
        }
    }
    if has_prefix(&b"<?xml"[..]) {
        return Some(XML);
    }
    None
}

fn looks_like_text(prefix: &[u8]) -> bool {
    let utf8 = match std::str::from_utf8(prefix) {
        Ok(_) => true,
        // Prefix cut in the middle of a multi-byte sequence
        Err(e) => e.error_len().is_none(),
    };

    utf8 && !prefix
        .iter()
        .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
}

/// Read up to [`SNIFF_LEN`] bytes of `path` and classify them.
pub async fn sniff_file(classifier: &dyn Classifier, path: &Path) -> Result<String> {
    let classification = |source| SyncError::Classification {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).await.map_err(classification)?;
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut prefix)
        .await
        .map_err(classification)?;

    Ok(classifier.classify(&prefix))
}
