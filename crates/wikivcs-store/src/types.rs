//! Core data types: document identities, version selectors, revisions and commit metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw integer sentinel meaning "most recent version".
pub const LATEST_VERSION: i32 = -1;

/// Author recorded when the editing user cannot be resolved.
pub const UNKNOWN_AUTHOR: &str = "unknown";

/// Email recorded when the editing user cannot be resolved.
pub const UNKNOWN_EMAIL: &str = "unknown@unknown";

/// Commit message written when an edit carries no change note.
pub const DEFAULT_COMMIT_MESSAGE: &str = "no commit message";

/// Logical identity of a versioned document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentId {
    /// A wiki page, identified by its name.
    Page {
        /// Page name.
        name: String,
    },
    /// A binary attachment stored under a parent page.
    Attachment {
        /// Name of the page that owns the attachment.
        page: String,
        /// Attachment file name.
        file: String,
    },
}

impl DocumentId {
    /// Identity of a page.
    pub fn page(name: impl Into<String>) -> Self {
        DocumentId::Page { name: name.into() }
    }

    /// Identity of an attachment under `page`.
    pub fn attachment(page: impl Into<String>, file: impl Into<String>) -> Self {
        DocumentId::Attachment {
            page: page.into(),
            file: file.into(),
        }
    }

    /// Returns true for attachment identities.
    pub fn is_attachment(&self) -> bool {
        matches!(self, DocumentId::Attachment { .. })
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Page { name } => write!(f, "page {}", name),
            DocumentId::Attachment { page, file } => write!(f, "attachment {}/{}", page, file),
        }
    }
}

/// Selects either the most recent revision or an explicit version number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    /// The most recent revision.
    Latest,
    /// An explicit version; 1 is the oldest revision.
    Number(u32),
}

impl Version {
    /// Returns true for the latest sentinel.
    pub fn is_latest(&self) -> bool {
        matches!(self, Version::Latest)
    }
}

impl From<i32> for Version {
    /// `LATEST_VERSION` maps to `Latest`; other negatives can never match a revision.
    fn from(raw: i32) -> Self {
        if raw == LATEST_VERSION {
            Version::Latest
        } else {
            Version::Number(u32::try_from(raw).unwrap_or(0))
        }
    }
}

impl From<u32> for Version {
    fn from(n: u32) -> Self {
        Version::Number(n)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Latest => write!(f, "latest"),
            Version::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Hex identifier of a commit in the backing repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl CommitId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One historical state of a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// The document this revision belongs to.
    pub document: DocumentId,
    /// Version number, 1 = oldest.
    pub version: u32,
    /// Author name, `unknown` when it could not be resolved.
    pub author: String,
    /// Author email, if recorded.
    pub email: Option<String>,
    /// Free-text change note.
    pub change_note: Option<String>,
    /// When the revision was committed (second precision).
    pub commit_time: DateTime<Utc>,
    /// Blob size in bytes, only present when sizes were requested.
    pub size: Option<u64>,
    /// Commit that introduced this revision.
    pub commit: CommitId,
}

/// The caller-supplied state of an edit: who made it, why, and when.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditInfo {
    /// Name of the editing user.
    pub author: Option<String>,
    /// Change note entered with the edit.
    pub change_note: Option<String>,
    /// Edit timestamp; the current time when absent.
    pub modified: Option<DateTime<Utc>>,
}

impl EditInfo {
    /// An edit by `author` with no change note.
    pub fn by(author: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            ..Self::default()
        }
    }

    /// Sets the change note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.change_note = Some(note.into());
        self
    }

    /// Sets the edit timestamp.
    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.modified = Some(when);
        self
    }
}

/// Metadata recorded alongside one content change. Consumed by a single commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitMetadata {
    /// Author and committer name.
    pub author: String,
    /// Author and committer email.
    pub email: String,
    /// Change note, used as the commit message.
    pub change_note: Option<String>,
    /// Commit timestamp.
    pub commit_time: DateTime<Utc>,
}

impl CommitMetadata {
    /// The commit message: the change note, or the default message.
    pub fn message(&self) -> &str {
        match self.change_note.as_deref() {
            Some(note) if !note.trim().is_empty() => note,
            _ => DEFAULT_COMMIT_MESSAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_raw() {
        assert_eq!(Version::from(LATEST_VERSION), Version::Latest);
        assert_eq!(Version::from(3), Version::Number(3));
        assert_eq!(Version::from(0), Version::Number(0));
        assert_eq!(Version::from(-7), Version::Number(0));
        assert!(Version::Latest.is_latest());
        assert!(!Version::Number(1).is_latest());
    }

    #[test]
    fn test_document_id_display() {
        assert_eq!(DocumentId::page("Foo").to_string(), "page Foo");
        assert_eq!(
            DocumentId::attachment("Foo", "img.png").to_string(),
            "attachment Foo/img.png"
        );
        assert!(DocumentId::attachment("Foo", "a").is_attachment());
        assert!(!DocumentId::page("Foo").is_attachment());
    }

    #[test]
    fn test_commit_message_defaults() {
        let mut meta = CommitMetadata {
            author: "alice".to_string(),
            email: "alice@example.org".to_string(),
            change_note: None,
            commit_time: Utc::now(),
        };
        assert_eq!(meta.message(), DEFAULT_COMMIT_MESSAGE);

        meta.change_note = Some("   ".to_string());
        assert_eq!(meta.message(), DEFAULT_COMMIT_MESSAGE);

        meta.change_note = Some("typo fix".to_string());
        assert_eq!(meta.message(), "typo fix");
    }

    #[test]
    fn test_edit_info_builder() {
        let when = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let edit = EditInfo::by("alice").with_note("first").at(when);
        assert_eq!(edit.author.as_deref(), Some("alice"));
        assert_eq!(edit.change_note.as_deref(), Some("first"));
        assert_eq!(edit.modified, Some(when));
    }

    #[test]
    fn test_commit_id_short() {
        let id = CommitId("0123456789abcdef".to_string());
        assert_eq!(id.short(), "01234567");
        assert_eq!(CommitId("abc".to_string()).short(), "abc");
    }

    #[test]
    fn test_commit_id_short_multibyte() {
        let id = CommitId("\u{e9}".repeat(12));
        assert_eq!(id.short(), "\u{e9}".repeat(8));
        assert_eq!(CommitId("\u{4e2d}\u{6587}".to_string()).short(), "\u{4e2d}\u{6587}");
    }
}
