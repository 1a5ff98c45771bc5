//! Page storage: one tracked text file per page.
//!
//! Every write replaces the working file and immediately commits it, so the
//! working tree always mirrors the newest committed revision. Latest reads go
//! straight to the working file; historical reads go through the version catalog.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::catalog::VersionCatalog;
use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::fsutil;
use crate::history_cache::HistoryCache;
use crate::metadata::MetadataResolver;
use crate::sidecar::LatestMetadataSidecar;
use crate::types::{DocumentId, EditInfo, Revision, Version};
use crate::version_log::{CommitScope, VersionLog};

/// Versioned store of wiki page text.
pub struct PageStore {
    catalog: VersionCatalog,
}

impl PageStore {
    /// Creates a page store over `log`.
    ///
    /// With `sidecar_enabled`, latest-revision records are kept in the
    /// repository's private directory; without it, records found there are deleted.
    pub fn new(
        log: Arc<dyn VersionLog>,
        cache: Arc<dyn HistoryCache>,
        resolver: Arc<MetadataResolver>,
        sidecar_enabled: bool,
    ) -> StoreResult<Self> {
        let sidecar = LatestMetadataSidecar::configure(log.private_dir(), sidecar_enabled)?;
        Ok(Self {
            catalog: VersionCatalog::new(log, cache, sidecar, resolver, false),
        })
    }

    fn locate(&self, name: &str) -> StoreResult<(DocumentId, String, PathBuf)> {
        let rel = codec::page_path(name)?;
        let full = self.catalog.log().workdir().join(&rel);
        Ok((DocumentId::page(name), rel, full))
    }

    /// Stores `text` as the new latest revision of page `name`.
    ///
    /// Writing the same text as the current revision records nothing.
    pub fn write(&self, name: &str, text: &str, edit: &EditInfo) -> StoreResult<()> {
        let (id, rel, full) = self.locate(name)?;
        let meta = self.catalog.resolver().resolve(edit);

        let _guard = self.catalog.lock_writes();
        fsutil::write_atomic(&full, &mut text.as_bytes())?;
        if self.catalog.commit(CommitScope::Path(&rel), &meta)?.is_some() {
            self.catalog.after_commit(&id, &rel, true);
            info!(page = name, author = %meta.author, "page saved");
        }
        Ok(())
    }

    /// Text of the latest revision, read from the working file.
    pub fn read_latest(&self, name: &str) -> StoreResult<String> {
        let (id, rel, full) = self.locate(name)?;
        match fs::read_to_string(&full) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::DocumentNotFound { id: id.to_string() })
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                Err(StoreError::InvalidText { path: rel })
            }
            Err(e) => Err(StoreError::io("read", full)(e)),
        }
    }

    /// Text of page `name` at `version`.
    pub fn read_version(&self, name: &str, version: impl Into<Version>) -> StoreResult<String> {
        let v = match version.into() {
            Version::Latest => return self.read_latest(name),
            Version::Number(v) => v,
        };
        let (id, rel, _) = self.locate(name)?;
        let bytes = self.catalog.read_version(&id, &rel, v)?;
        String::from_utf8(bytes).map_err(|_| StoreError::InvalidText { path: rel })
    }

    /// Metadata of one revision of page `name`.
    pub fn info(&self, name: &str, version: impl Into<Version>) -> StoreResult<Revision> {
        let (id, rel, full) = self.locate(name)?;
        match version.into() {
            Version::Latest => {
                if !full.is_file() {
                    return Err(StoreError::DocumentNotFound { id: id.to_string() });
                }
                self.catalog.latest(&id, &rel)
            }
            Version::Number(v) => self.catalog.revision(&id, &rel, v),
        }
    }

    /// Whether page `name` exists now (`Latest`) or ever had `version`.
    pub fn exists(&self, name: &str, version: impl Into<Version>) -> StoreResult<bool> {
        let (id, rel, full) = self.locate(name)?;
        match version.into() {
            Version::Latest => Ok(full.is_file()),
            Version::Number(0) => Ok(false),
            Version::Number(v) => Ok(v as usize <= self.catalog.version_count(&id, &rel)?),
        }
    }

    /// All revisions of page `name`, newest first.
    pub fn history(&self, name: &str) -> StoreResult<Vec<Revision>> {
        let (id, rel, _) = self.locate(name)?;
        Ok(self.catalog.history(&id, &rel)?.to_vec())
    }

    /// Renames page `from` to `to` and commits the move as one revision of `to`.
    ///
    /// The destination must not exist. If the commit fails, the working file is
    /// moved back.
    pub fn rename(&self, from: &str, to: &str, edit: &EditInfo) -> StoreResult<()> {
        let (from_id, from_rel, from_full) = self.locate(from)?;
        let (to_id, to_rel, to_full) = self.locate(to)?;

        let mut edit = edit.clone();
        if edit.change_note.is_none() {
            edit.change_note = Some(format!("Renamed page {} to {}", from, to));
        }
        let meta = self.catalog.resolver().resolve(&edit);

        let _guard = self.catalog.lock_writes();
        if !from_full.is_file() {
            return Err(StoreError::DocumentNotFound {
                id: from_id.to_string(),
            });
        }
        if from_rel == to_rel {
            return Ok(());
        }
        if to_full.exists() {
            return Err(StoreError::Io {
                op: "rename",
                path: to_full,
                source: io::Error::new(io::ErrorKind::AlreadyExists, "target page exists"),
            });
        }

        fs::rename(&from_full, &to_full).map_err(StoreError::io("rename", &from_full))?;
        if let Err(e) = self.catalog.commit(CommitScope::Tree, &meta) {
            if let Err(undo) = fs::rename(&to_full, &from_full) {
                warn!(from, to, error = %undo, "could not undo rename after failed commit");
            }
            return Err(e);
        }

        self.catalog.after_commit(&from_id, &from_rel, false);
        self.catalog.after_commit(&to_id, &to_rel, true);
        info!(from, to, "page renamed");
        Ok(())
    }

    /// Removes page `name`. Its history stays readable by explicit version.
    pub fn delete(&self, name: &str, edit: &EditInfo) -> StoreResult<()> {
        let (id, rel, full) = self.locate(name)?;

        let mut edit = edit.clone();
        if edit.change_note.is_none() {
            edit.change_note = Some(format!("Deleted page {}", name));
        }
        let meta = self.catalog.resolver().resolve(&edit);

        let _guard = self.catalog.lock_writes();
        if !fsutil::remove_file_if_exists(&full)? {
            return Err(StoreError::DocumentNotFound { id: id.to_string() });
        }
        self.catalog.commit(CommitScope::Path(&rel), &meta)?;
        self.catalog.after_commit(&id, &rel, false);
        info!(page = name, "page deleted");
        Ok(())
    }

    /// Always fails: history is append-only.
    pub fn delete_version(&self, name: &str, version: u32) -> StoreResult<()> {
        debug!(page = name, version, "refusing to delete a single version");
        Err(StoreError::Unsupported {
            operation: "delete_version",
        })
    }

    /// Latest revision of every page, ordered by name.
    pub fn list_pages(&self) -> StoreResult<Vec<Revision>> {
        let workdir = self.catalog.log().workdir();
        let mut pages = Vec::new();
        for entry in fsutil::list_visible(workdir)? {
            if entry.is_dir {
                continue;
            }
            let Some(name) = codec::decode_page_file(&entry.name) else {
                debug!(file = %entry.name, "skipping non-page file");
                continue;
            };
            match self.info(&name, Version::Latest) {
                Ok(rev) => pages.push(rev),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(pages)
    }

    /// Latest revisions committed strictly after `since`, oldest first.
    pub fn list_changed_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Revision>> {
        let mut changed: Vec<Revision> = self
            .list_pages()?
            .into_iter()
            .filter(|r| r.commit_time > since)
            .collect();
        changed.sort_by_key(|r| r.commit_time);
        Ok(changed)
    }

    /// Number of pages currently present.
    pub fn page_count(&self) -> StoreResult<usize> {
        Ok(fsutil::list_visible(self.catalog.log().workdir())?
            .iter()
            .filter(|e| !e.is_dir && codec::decode_page_file(&e.name).is_some())
            .count())
    }

    /// Short description of the backing repository.
    pub fn provider_info(&self) -> String {
        format!("pages: {}", self.catalog.describe())
    }
}
