//! Text reading and binary detection.

use std::path::Path;

/// Bytes inspected by the binary sniffer.
pub const SNIFF_BYTES: usize = 8192;

/// Read a file as UTF-8 (lossy), skipping files larger than `max_size`.
/// Unreadable files yield `None`.
pub fn read_text_limited(path: &Path, max_size: u64) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > max_size {
        return None;
    }
    let bytes = std::fs::read(path).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Heuristic: a NUL byte, or more than 30% control characters
/// (tab, LF, VT, FF and CR excluded).
pub fn looks_binary(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    if data.contains(&0) {
        return true;
    }
    let ctrl = data
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, 0x09..=0x0D))
        .count();
    ctrl * 100 > data.len() * 30
}

/// File content classified as text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

/// Read a file and classify it. Binary if the first [`SNIFF_BYTES`] look
/// binary or the whole file is not valid UTF-8.
pub fn read_classified(path: &Path) -> std::io::Result<FileContent> {
    let bytes = std::fs::read(path)?;
    let head = &bytes[..bytes.len().min(SNIFF_BYTES)];
    if looks_binary(head) {
        return Ok(FileContent::Binary(bytes));
    }
    match String::from_utf8(bytes) {
        Ok(text) => Ok(FileContent::Text(text)),
        Err(e) => Ok(FileContent::Binary(e.into_bytes())),
    }
}

/// Convert CRLF and lone CR line endings to LF.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
