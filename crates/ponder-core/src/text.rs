//! UTF-8–safe string truncation and segmentation utilities.
//!
//! Rust `&str[..n]` panics when `n` falls inside a multi-byte character, and
//! cutting between two code points of the same grapheme cluster (a flag, a
//! skin-toned emoji, a letter plus combining accent) produces visibly broken
//! previews. These helpers cut on extended grapheme cluster boundaries and
//! never emit U+FFFD for a partially kept sequence.

use unicode_segmentation::UnicodeSegmentation;

/// Suffix appended to truncated previews (3 bytes in UTF-8).
pub const ELLIPSIS: &str = "…";

/// Longest prefix of `s` made of whole grapheme clusters and at most
/// `max_bytes` bytes long.
pub fn truncate_graphemes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = 0;
    for (offset, cluster) in s.grapheme_indices(true) {
        let next = offset + cluster.len();
        if next > max_bytes {
            break;
        }
        end = next;
    }
    &s[..end]
}

/// Decode the longest valid UTF-8 prefix of `bytes` that fits in `max_bytes`.
///
/// When the cut lands inside a multi-byte sequence the incomplete trailing
/// sequence is dropped entirely rather than replaced. Invalid bytes before
/// the cut also end the prefix.
pub fn truncate_utf8_bytes(bytes: &[u8], max_bytes: usize) -> &str {
    let window = &bytes[..bytes.len().min(max_bytes)];
    match std::str::from_utf8(window) {
        Ok(s) => s,
        Err(e) => std::str::from_utf8(&window[..e.valid_up_to()]).unwrap_or_default(),
    }
}

/// Truncate `text` to at most `max_bytes` UTF-8 bytes, ending with [`ELLIPSIS`].
///
/// - Text that already fits is returned unchanged.
/// - When `max_bytes` cannot hold more than the ellipsis itself, the
///   ellipsis bytes are cut to `max_bytes` and the incomplete sequence is
///   dropped, leaving either the whole ellipsis or nothing.
/// - Otherwise whole grapheme clusters are kept while they fit in
///   `max_bytes - ELLIPSIS.len()`, then the ellipsis is appended.
pub fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_owned();
    }
    if max_bytes <= ELLIPSIS.len() {
        return truncate_utf8_bytes(ELLIPSIS.as_bytes(), max_bytes).to_owned();
    }
    let body = truncate_graphemes(text, max_bytes - ELLIPSIS.len());
    let mut out = String::with_capacity(body.len() + ELLIPSIS.len());
    out.push_str(body);
    out.push_str(ELLIPSIS);
    out
}

/// Number of non-blank sentences (Unicode sentence segmentation).
pub fn sentence_count(text: &str) -> usize {
    text.unicode_sentences()
        .filter(|s| !s.trim().is_empty())
        .count()
}

/// Number of extended grapheme clusters.
pub fn grapheme_count(text: &str) -> usize {
    text.graphemes(true).count()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
