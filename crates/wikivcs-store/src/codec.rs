//! Identity codec: document names to repository paths and back.
//!
//! Every name segment is percent-encoded (RFC 3986 unreserved characters pass
//! through). A leading `.` is additionally escaped as `%2E`, so no encoded segment
//! is ever a dot-file: `.git`, `.` and `..` cannot be produced, and listings may
//! skip dot-entries wholesale. Because `%` itself is always escaped, a name that
//! already contains an escape sequence still encodes unambiguously.
//!
//! Pages live at `<segment>.txt` in the page repository. Attachments live at
//! `<page segment>/<file segment>` in the attachment repository.

use crate::error::{StoreError, StoreResult};
use crate::types::DocumentId;

/// File extension of page files.
pub const PAGE_EXTENSION: &str = ".txt";

/// Longest encoded segment accepted; common filesystem name limit.
pub const MAX_SEGMENT_BYTES: usize = 255;

/// Encodes one name into a single path segment.
pub fn encode_segment(name: &str) -> StoreResult<String> {
    if name.is_empty() {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: "name is empty",
        });
    }

    let encoded = urlencoding::encode(name);
    let segment = match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    };

    if segment.len() > MAX_SEGMENT_BYTES {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: "encoded name exceeds 255 bytes",
        });
    }
    Ok(segment)
}

/// Decodes a path segment produced by [`encode_segment`].
///
/// Returns `None` for dot-entries and segments that are not valid encodings.
pub fn decode_segment(segment: &str) -> Option<String> {
    if segment.is_empty() || segment.starts_with('.') {
        return None;
    }
    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    // Reject non-canonical spellings so decode stays the exact inverse of encode.
    match encode_segment(&decoded) {
        Ok(canonical) if canonical == segment => Some(decoded),
        _ => None,
    }
}

/// Repository-relative path of a page file.
pub fn page_path(name: &str) -> StoreResult<String> {
    Ok(format!("{}{}", encode_segment(name)?, PAGE_EXTENSION))
}

/// Repository-relative directory holding a page's attachments.
pub fn attachment_dir(page: &str) -> StoreResult<String> {
    encode_segment(page)
}

/// Repository-relative path of one attachment.
pub fn attachment_path(page: &str, file: &str) -> StoreResult<String> {
    Ok(format!("{}/{}", encode_segment(page)?, encode_segment(file)?))
}

/// Encodes a document identity to its repository-relative path.
pub fn encode(id: &DocumentId) -> StoreResult<String> {
    match id {
        DocumentId::Page { name } => page_path(name),
        DocumentId::Attachment { page, file } => attachment_path(page, file),
    }
}

/// Recovers a document identity from a repository-relative path.
///
/// A single segment ending in `.txt` is a page; two segments are an attachment.
pub fn decode(path: &str) -> Option<DocumentId> {
    let mut parts = path.split('/');
    let first = parts.next()?;
    match (parts.next(), parts.next()) {
        (None, _) => {
            let stem = first.strip_suffix(PAGE_EXTENSION)?;
            decode_segment(stem).map(DocumentId::page)
        }
        (Some(second), None) => Some(DocumentId::attachment(
            decode_segment(first)?,
            decode_segment(second)?,
        )),
        _ => None,
    }
}

/// Recovers a page name from a page file name, if it is one.
pub fn decode_page_file(file_name: &str) -> Option<String> {
    match decode(file_name)? {
        DocumentId::Page { name } => Some(name),
        DocumentId::Attachment { .. } => None,
    }
}
