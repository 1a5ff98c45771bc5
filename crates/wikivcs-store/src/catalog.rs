//! Version translation shared by the page and attachment stores.
//!
//! The log enumerates commits newest-first; documents expose oldest-first
//! version numbers. For a history of length `n`, the commit at native index
//! `i` is version `n - i`, and version `v` lives at index `n - v`. Numbers are
//! recomputed on every cache fill and never written into the repository, so a
//! new commit becomes version `n + 1` without renumbering older revisions.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::fsutil::FileStamp;
use crate::history_cache::{CacheLookup, History, HistoryCache};
use crate::metadata::MetadataResolver;
use crate::sidecar::LatestMetadataSidecar;
use crate::types::{CommitId, CommitMetadata, DocumentId, Revision};
use crate::version_log::{CommitScope, VersionLog};

/// Native log index of `version` in a history of `len` commits.
pub fn index_for_version(len: usize, version: u32) -> Option<usize> {
    let v = version as usize;
    if v < 1 || v > len {
        None
    } else {
        Some(len - v)
    }
}

/// Version number of the commit at native log index `index`.
pub fn version_for_index(len: usize, index: usize) -> u32 {
    (len - index) as u32
}

/// Log, cache, sidecar and resolver bundled for one repository.
pub(crate) struct VersionCatalog {
    log: Arc<dyn VersionLog>,
    cache: Arc<dyn HistoryCache>,
    sidecar: Option<LatestMetadataSidecar>,
    resolver: Arc<MetadataResolver>,
    writes: Mutex<()>,
    with_sizes: bool,
}

impl VersionCatalog {
    pub(crate) fn new(
        log: Arc<dyn VersionLog>,
        cache: Arc<dyn HistoryCache>,
        sidecar: Option<LatestMetadataSidecar>,
        resolver: Arc<MetadataResolver>,
        with_sizes: bool,
    ) -> Self {
        Self {
            log,
            cache,
            sidecar,
            resolver,
            writes: Mutex::new(()),
            with_sizes,
        }
    }

    pub(crate) fn log(&self) -> &dyn VersionLog {
        self.log.as_ref()
    }

    pub(crate) fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    /// Repository-wide write lock. Held from the first working-tree change
    /// through the commit and the cache invalidation that follows it.
    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock()
    }

    /// History of `id` (stored at `path`), newest first, from the cache when possible.
    pub(crate) fn history(&self, id: &DocumentId, path: &str) -> StoreResult<History> {
        let ticket = match self.cache.lookup(id) {
            CacheLookup::Hit(history) => return Ok(history),
            CacheLookup::Miss(ticket) => ticket,
        };

        debug!(document = %id, path, "history cache miss");
        let history: History = self.load_history(id, path)?.into();
        self.cache.put(id, ticket, history.clone());
        Ok(history)
    }

    fn load_history(&self, id: &DocumentId, path: &str) -> StoreResult<Vec<Revision>> {
        let raw = self.log.history(path)?;
        let len = raw.len();
        raw.iter()
            .enumerate()
            .map(|(i, commit)| {
                let mut rev = self
                    .resolver
                    .revision(id, commit, version_for_index(len, i));
                if self.with_sizes {
                    rev.size = Some(self.log.blob_size(&commit.id, path)?);
                }
                Ok(rev)
            })
            .collect()
    }

    /// The revision carrying `version`.
    pub(crate) fn revision(
        &self,
        id: &DocumentId,
        path: &str,
        version: u32,
    ) -> StoreResult<Revision> {
        let history = self.history(id, path)?;
        history
            .iter()
            .find(|r| r.version == version)
            .cloned()
            .ok_or_else(|| StoreError::VersionNotFound {
                id: id.to_string(),
                version,
                available: history.len(),
            })
    }

    /// The newest revision: sidecar first, then the history walk.
    ///
    /// The sidecar answers only when its record matches the current working file.
    pub(crate) fn latest(&self, id: &DocumentId, path: &str) -> StoreResult<Revision> {
        if let Some(sidecar) = self.sidecar.as_ref() {
            match FileStamp::of(&self.log.workdir().join(path)) {
                Ok(stamp) => {
                    if let Some(rev) = sidecar.read(id, path, &stamp) {
                        return Ok(rev);
                    }
                }
                Err(e) => debug!(document = %id, error = %e, "cannot stamp working file"),
            }
        }
        let history = self.history(id, path)?;
        history
            .first()
            .cloned()
            .ok_or_else(|| StoreError::DocumentNotFound { id: id.to_string() })
    }

    /// Content of `path` as of `version`.
    pub(crate) fn read_version(
        &self,
        id: &DocumentId,
        path: &str,
        version: u32,
    ) -> StoreResult<Vec<u8>> {
        let history = self.history(id, path)?;
        let index = index_for_version(history.len(), version).ok_or_else(|| {
            StoreError::VersionNotFound {
                id: id.to_string(),
                version,
                available: history.len(),
            }
        })?;
        self.log.read_blob(&history[index].commit, path)
    }

    /// Number of revisions of `id`.
    pub(crate) fn version_count(&self, id: &DocumentId, path: &str) -> StoreResult<usize> {
        Ok(self.history(id, path)?.len())
    }

    /// Commits `scope`. An unchanged tree is reported as `None` instead of an error.
    /// Callers must hold the write lock.
    pub(crate) fn commit(
        &self,
        scope: CommitScope<'_>,
        meta: &CommitMetadata,
    ) -> StoreResult<Option<CommitId>> {
        match self.log.commit(scope, meta) {
            Ok(id) => Ok(Some(id)),
            Err(StoreError::NothingToCommit { path }) => {
                debug!(path, "content unchanged, no new revision");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Brings cache and sidecar in line with a commit that changed `id`.
    /// Callers must still hold the write lock they committed under.
    pub(crate) fn after_commit(&self, id: &DocumentId, path: &str, present: bool) {
        self.cache.invalidate(id);

        let Some(sidecar) = self.sidecar.as_ref() else {
            return;
        };
        if !present {
            sidecar.remove(path);
            return;
        }

        let refreshed = self
            .history(id, path)
            .and_then(|history| {
                history
                    .first()
                    .cloned()
                    .ok_or_else(|| StoreError::DocumentNotFound { id: id.to_string() })
            })
            .and_then(|latest| {
                let stamp = FileStamp::of(&self.log.workdir().join(path))?;
                sidecar.write(path, &latest, stamp)
            });
        if let Err(e) = refreshed {
            warn!(document = %id, error = %e, "could not refresh sidecar, dropping it");
            sidecar.remove(path);
        }
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "git repository at {} (sidecar: {}, sizes: {})",
            self.log.workdir().display(),
            if self.sidecar.is_some() { "on" } else { "off" },
            if self.with_sizes { "on" } else { "off" }
        )
    }
}
