//! Error types for the versioned storage layer.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error variants for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document has no working file.
    #[error("Document not found: {id}")]
    DocumentNotFound {
        /// Display form of the document identity.
        id: String,
    },

    /// The requested version is outside the document's history.
    #[error("Version {version} of {id} not found (history has {available} versions)")]
    VersionNotFound {
        /// Display form of the document identity.
        id: String,
        /// The requested version number.
        version: u32,
        /// Number of versions the document actually has.
        available: usize,
    },

    /// The backing repository failed a commit, log walk or blob read.
    #[error("Version log error during {op} on {path}: {reason}")]
    VersionLog {
        /// The version log operation that failed.
        op: &'static str,
        /// Repository-relative path the operation concerned.
        path: String,
        /// Description of the failure.
        reason: String,
    },

    /// A commit was requested but the staged tree equals HEAD.
    #[error("Nothing to commit for {path}")]
    NothingToCommit {
        /// Repository-relative path (or pathspec) that was staged.
        path: String,
    },

    /// A filesystem write, move or delete failed.
    #[error("I/O error during {op} on {}: {source}", path.display())]
    Io {
        /// The filesystem operation that failed.
        op: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The operation is not supported by an append-only history.
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// Storage location missing, uncreatable, or configuration unreadable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A document name cannot be encoded as a path segment.
    #[error("Invalid name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A page blob is not valid UTF-8.
    #[error("Page content at {path} is not valid UTF-8")]
    InvalidText {
        /// Repository-relative path of the blob.
        path: String,
    },
}

impl StoreError {
    /// Returns true for the not-found family (document or version).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::DocumentNotFound { .. } | StoreError::VersionNotFound { .. }
        )
    }

    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StoreError::Io { op, path, source }
    }

    pub(crate) fn git<'a>(op: &'static str, path: &'a str) -> impl FnOnce(git2::Error) -> Self + 'a {
        move |e| StoreError::VersionLog {
            op,
            path: path.to_string(),
            reason: e.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_result_alias() {
        let ok: StoreResult<i32> = Ok(42);
        assert!(ok.is_ok());

        let err: StoreResult<i32> = Err(StoreError::Unsupported {
            operation: "delete_version",
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_not_found_family() {
        let doc = StoreError::DocumentNotFound {
            id: "page Foo".to_string(),
        };
        let ver = StoreError::VersionNotFound {
            id: "page Foo".to_string(),
            version: 3,
            available: 2,
        };
        assert!(doc.is_not_found());
        assert!(ver.is_not_found());
        assert!(!StoreError::Configuration("x".to_string()).is_not_found());
    }

    #[test]
    fn test_version_not_found_message() {
        let err = StoreError::VersionNotFound {
            id: "page Foo".to_string(),
            version: 0,
            available: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Version 0"));
        assert!(msg.contains("2 versions"));
    }

    #[test]
    fn test_io_error_carries_context() {
        let make = StoreError::io("write", "/tmp/pages/Foo.txt");
        let err = make(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let msg = format!("{}", err);
        assert!(msg.contains("write"));
        assert!(msg.contains("/tmp/pages/Foo.txt"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_version_log_error_message() {
        let err = StoreError::VersionLog {
            op: "commit",
            path: "Foo.txt".to_string(),
            reason: "index locked".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Version log error during commit on Foo.txt: index locked"
        );
    }

    #[test]
    fn test_git_error_borrows_path() {
        let path = String::from("Foo/img.png");
        let err = StoreError::git("history", &path)(git2::Error::from_str("object not found"));
        match err {
            StoreError::VersionLog { op, path, reason } => {
                assert_eq!(op, "history");
                assert_eq!(path, "Foo/img.png");
                assert_eq!(reason, "object not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsupported_message() {
        let err = StoreError::Unsupported {
            operation: "delete_version",
        };
        assert_eq!(format!("{}", err), "Unsupported operation: delete_version");
    }
}
