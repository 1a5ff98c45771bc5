//! Latest-revision metadata sidecar.
//!
//! One small JSON record per document, kept outside the tracked tree, holding
//! the metadata of the document's newest revision. A "latest info" query can
//! answer from it without walking history. The sidecar is derived data: each
//! record carries the [`FileStamp`] of the working file it describes, and a
//! missing, unreadable or mismatching record makes callers fall back to the
//! history walk.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::fsutil::{self, FileStamp};
use crate::types::{CommitId, DocumentId, Revision};

/// On-disk sidecar record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarRecord {
    /// Document the record describes.
    pub document: DocumentId,
    /// Version number of the newest revision.
    pub version: u32,
    /// Author of the newest revision.
    pub author: String,
    /// Author email.
    #[serde(default)]
    pub email: Option<String>,
    /// Change note of the newest revision.
    #[serde(default)]
    pub change_note: Option<String>,
    /// Commit time of the newest revision.
    pub commit_time: DateTime<Utc>,
    /// Commit that produced the newest revision.
    pub commit: CommitId,
    /// Blob size, when the owning store materializes sizes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Working file as it was right after the commit. Records without one are stale.
    #[serde(default)]
    pub stamp: Option<FileStamp>,
}

impl SidecarRecord {
    fn new(rev: &Revision, stamp: FileStamp) -> Self {
        Self {
            document: rev.document.clone(),
            version: rev.version,
            author: rev.author.clone(),
            email: rev.email.clone(),
            change_note: rev.change_note.clone(),
            commit_time: rev.commit_time,
            commit: rev.commit.clone(),
            size: rev.size,
            stamp: Some(stamp),
        }
    }

    fn into_revision(self) -> Revision {
        Revision {
            document: self.document,
            version: self.version,
            author: self.author,
            email: self.email,
            change_note: self.change_note,
            commit_time: self.commit_time,
            size: self.size,
            commit: self.commit,
        }
    }

    fn is_valid_for(&self, id: &DocumentId) -> bool {
        self.version >= 1 && &self.document == id
    }

    fn describes(&self, current: &FileStamp) -> bool {
        self.stamp.as_ref() == Some(current)
    }
}

/// Sidecar directory plus an in-memory layer of records already read.
pub struct LatestMetadataSidecar {
    dir: PathBuf,
    memo: RwLock<HashMap<String, SidecarRecord>>,
}

impl LatestMetadataSidecar {
    /// Opens (creating if needed) the sidecar directory.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Configuration(format!(
                "could not create sidecar directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            memo: RwLock::new(HashMap::new()),
        })
    }

    /// Opens the sidecar at `dir` when `enabled`. Otherwise deletes any
    /// records left there, since writes made without the sidecar would leave
    /// them behind the repository.
    pub fn configure(dir: PathBuf, enabled: bool) -> StoreResult<Option<Self>> {
        if enabled {
            return Self::open(dir).map(Some);
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(dir = %dir.display(), "sidecar disabled, dropped existing records");
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Configuration(format!(
                "could not remove sidecar directory {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, doc_path: &str) -> PathBuf {
        self.dir.join(format!("{}.json", doc_path))
    }

    /// Latest revision of `id` stored at repository path `doc_path`, if a
    /// valid record exists for the working file stamped `current`.
    pub fn read(&self, id: &DocumentId, doc_path: &str, current: &FileStamp) -> Option<Revision> {
        if let Some(record) = self.memo.read().get(doc_path) {
            if record.is_valid_for(id) && record.describes(current) {
                return Some(record.clone().into_revision());
            }
        }

        let path = self.record_path(doc_path);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable sidecar record");
                return None;
            }
        };

        match serde_json::from_slice::<SidecarRecord>(&bytes) {
            Ok(record) if record.is_valid_for(id) => {
                if !record.describes(current) {
                    debug!(document = %id, version = record.version, "sidecar record does not match working file");
                    return None;
                }
                self.remember(doc_path, record.clone());
                Some(record.into_revision())
            }
            Ok(_) | Err(_) => {
                debug!(document = %id, "discarding stale sidecar record");
                self.remove(doc_path);
                None
            }
        }
    }

    /// Memoizes a record read from disk unless a newer one is already held.
    /// A reader that loaded a record just before a writer replaced it must
    /// not put the old record back.
    fn remember(&self, doc_path: &str, record: SidecarRecord) {
        match self.memo.write().entry(doc_path.to_string()) {
            Entry::Occupied(mut held) => {
                if record.version >= held.get().version {
                    held.insert(record);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    /// Overwrites the record for `doc_path` with `rev`, for the working file stamped `stamp`.
    pub fn write(&self, doc_path: &str, rev: &Revision, stamp: FileStamp) -> StoreResult<()> {
        let record = SidecarRecord::new(rev, stamp);
        let json = serde_json::to_vec_pretty(&record).map_err(|e| StoreError::Io {
            op: "encode_sidecar",
            path: self.record_path(doc_path),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        fsutil::write_atomic(&self.record_path(doc_path), &mut json.as_slice())?;
        self.memo.write().insert(doc_path.to_string(), record);
        Ok(())
    }

    /// Drops the record for `doc_path`, on disk and in memory.
    pub fn remove(&self, doc_path: &str) {
        self.memo.write().remove(doc_path);
        let path = self.record_path(doc_path);
        if let Err(e) = fsutil::remove_file_if_exists(&path) {
            warn!(error = %e, "could not remove sidecar record");
        }
    }
}
