//! Commit metadata resolution.
//!
//! Outbound: an [`EditInfo`] plus a user-directory lookup becomes the
//! [`CommitMetadata`] of one commit. Inbound: a [`RawCommit`] becomes a
//! [`Revision`] once its version number is known.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::types::{
    CommitMetadata, DocumentId, EditInfo, Revision, DEFAULT_COMMIT_MESSAGE, UNKNOWN_AUTHOR,
    UNKNOWN_EMAIL,
};
use crate::version_log::RawCommit;

/// A user known to the wiki's user database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    /// Login or full name the edit was made under.
    pub name: String,
    /// Email address, if the profile has one.
    pub email: Option<String>,
}

/// Lookup of user profiles by author name.
pub trait UserDirectory: Send + Sync {
    /// Finds the profile for `author`, or `None` when no such principal exists.
    fn find(&self, author: &str) -> Option<UserProfile>;
}

/// User directory backed by a fixed name -> email table.
#[derive(Clone, Debug, Default)]
pub struct StaticUserDirectory {
    users: BTreeMap<String, String>,
}

impl StaticUserDirectory {
    /// Creates a directory from a name -> email table.
    pub fn new(users: BTreeMap<String, String>) -> Self {
        Self { users }
    }

    /// Adds or replaces one user.
    pub fn insert(&mut self, name: impl Into<String>, email: impl Into<String>) {
        self.users.insert(name.into(), email.into());
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns true if no users are known.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for StaticUserDirectory {
    fn find(&self, author: &str) -> Option<UserProfile> {
        self.users.get(author).map(|email| UserProfile {
            name: author.to_string(),
            email: Some(email.clone()),
        })
    }
}

/// Builds commit metadata for edits and revisions for commits.
pub struct MetadataResolver {
    directory: Arc<dyn UserDirectory>,
}

impl MetadataResolver {
    /// Creates a resolver over a user directory.
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Resolver whose directory knows nobody; every edit commits as `unknown`.
    pub fn anonymous() -> Self {
        Self::new(Arc::new(StaticUserDirectory::default()))
    }

    /// Resolves an edit to the metadata of the commit recording it.
    ///
    /// An author missing from the directory (or no author at all) is replaced by
    /// the `unknown` / `unknown@unknown` identity; the write still proceeds.
    pub fn resolve(&self, edit: &EditInfo) -> CommitMetadata {
        let profile = edit
            .author
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .and_then(|a| self.directory.find(a));

        let (author, email) = match profile {
            Some(p) => (p.name, p.email.unwrap_or_default()),
            None => {
                debug!(author = ?edit.author, "author not in user directory, using fallback identity");
                (UNKNOWN_AUTHOR.to_string(), UNKNOWN_EMAIL.to_string())
            }
        };

        CommitMetadata {
            author,
            email,
            change_note: edit.change_note.clone(),
            commit_time: edit.modified.unwrap_or_else(Utc::now),
        }
    }

    /// Converts a raw commit into the revision it represents.
    pub fn revision(&self, document: &DocumentId, raw: &RawCommit, version: u32) -> Revision {
        let author = if raw.author.is_empty() {
            UNKNOWN_AUTHOR.to_string()
        } else {
            raw.author.clone()
        };
        let change_note = if raw.message.is_empty() || raw.message == DEFAULT_COMMIT_MESSAGE {
            None
        } else {
            Some(raw.message.clone())
        };

        Revision {
            document: document.clone(),
            version,
            author,
            email: raw.email.clone(),
            change_note,
            commit_time: raw.time,
            size: None,
            commit: raw.id.clone(),
        }
    }
}
