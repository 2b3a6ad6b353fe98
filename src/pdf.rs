//! PDF text extraction and text normalization.

use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("static regex is valid"));

/// Extract the text layer of every page of a PDF using lopdf.
///
/// Pages whose text cannot be decoded are skipped.
pub fn extract_pdf_text(data: &[u8]) -> Result<String> {
    use lopdf::Document;
    use std::io::Cursor;

    let doc = Document::load_from(Cursor::new(data)).map_err(|e| anyhow!("{}", e))?;

    let mut text = String::new();
    let pages = doc.get_pages();
    let page_count = pages.len();

    for (page_num, _) in pages {
        match doc.extract_text(&[page_num]) {
            Ok(content) => {
                text.push_str(&content);
                text.push('\n');
            }
            Err(e) => debug!("Skipping page {}: {}", page_num, e),
        }
    }

    debug!("Extracted {} chars from {} page(s)", text.len(), page_count);
    Ok(text)
}

/// Normalize line endings, collapse runs of spaces/tabs and trim.
pub fn normalize_text(text: &str) -> String {
    let unix = text.replace("\r\n", "\n");
    HORIZONTAL_WS.replace_all(&unix, " ").trim().to_string()
}

/// SHA-256 hex digest of the normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncate to at most `max_chars` characters.
pub fn truncate_for_context(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
