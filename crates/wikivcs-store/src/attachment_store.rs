//! Attachment storage: one directory per parent page, one tracked file per attachment.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
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

/// Versioned store of page attachments.
pub struct AttachmentStore {
    catalog: VersionCatalog,
}

impl AttachmentStore {
    /// Creates an attachment store over `log`.
    ///
    /// `with_sizes` materializes the blob size of every revision in histories.
    pub fn new(
        log: Arc<dyn VersionLog>,
        cache: Arc<dyn HistoryCache>,
        resolver: Arc<MetadataResolver>,
        sidecar_enabled: bool,
        with_sizes: bool,
    ) -> StoreResult<Self> {
        let sidecar = LatestMetadataSidecar::configure(log.private_dir(), sidecar_enabled)?;
        Ok(Self {
            catalog: VersionCatalog::new(log, cache, sidecar, resolver, with_sizes),
        })
    }

    fn workdir(&self) -> &Path {
        self.catalog.log().workdir()
    }

    fn locate(&self, page: &str, file: &str) -> StoreResult<(DocumentId, String, PathBuf)> {
        let rel = codec::attachment_path(page, file)?;
        let full = self.workdir().join(&rel);
        Ok((DocumentId::attachment(page, file), rel, full))
    }

    /// Stores `data` as the new latest revision of attachment `file` under `page`.
    /// Returns the number of bytes stored.
    pub fn write<R: Read + ?Sized>(
        &self,
        page: &str,
        file: &str,
        data: &mut R,
        edit: &EditInfo,
    ) -> StoreResult<u64> {
        let (id, rel, full) = self.locate(page, file)?;
        let meta = self.catalog.resolver().resolve(edit);

        let _guard = self.catalog.lock_writes();
        let written = fsutil::write_atomic(&full, data)?;
        if self.catalog.commit(CommitScope::Path(&rel), &meta)?.is_some() {
            self.catalog.after_commit(&id, &rel, true);
            info!(page, file, bytes = written, author = %meta.author, "attachment saved");
        }
        Ok(written)
    }

    /// Opens the latest revision for streaming.
    pub fn open_latest(&self, page: &str, file: &str) -> StoreResult<File> {
        let (id, _, full) = self.locate(page, file)?;
        File::open(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::DocumentNotFound { id: id.to_string() },
            _ => StoreError::io("open", &full)(e),
        })
    }

    /// Bytes of the latest revision, read from the working file.
    pub fn read_latest(&self, page: &str, file: &str) -> StoreResult<Vec<u8>> {
        let (_, _, full) = self.locate(page, file)?;
        let mut buf = Vec::new();
        self.open_latest(page, file)?
            .read_to_end(&mut buf)
            .map_err(StoreError::io("read", full))?;
        Ok(buf)
    }

    /// Bytes of attachment `file` at `version`.
    pub fn read_version(
        &self,
        page: &str,
        file: &str,
        version: impl Into<Version>,
    ) -> StoreResult<Vec<u8>> {
        match version.into() {
            Version::Latest => self.read_latest(page, file),
            Version::Number(v) => {
                let (id, rel, _) = self.locate(page, file)?;
                self.catalog.read_version(&id, &rel, v)
            }
        }
    }

    /// Metadata of one revision.
    pub fn info(&self, page: &str, file: &str, version: impl Into<Version>) -> StoreResult<Revision> {
        let (id, rel, full) = self.locate(page, file)?;
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

    /// Whether the attachment exists now (`Latest`) or ever had `version`.
    pub fn exists(&self, page: &str, file: &str, version: impl Into<Version>) -> StoreResult<bool> {
        let (id, rel, full) = self.locate(page, file)?;
        match version.into() {
            Version::Latest => Ok(full.is_file()),
            Version::Number(0) => Ok(false),
            Version::Number(v) => Ok(v as usize <= self.catalog.version_count(&id, &rel)?),
        }
    }

    /// All revisions, newest first.
    pub fn history(&self, page: &str, file: &str) -> StoreResult<Vec<Revision>> {
        let (id, rel, _) = self.locate(page, file)?;
        Ok(self.catalog.history(&id, &rel)?.to_vec())
    }

    /// Removes one attachment. Its history stays readable by explicit version.
    pub fn delete(&self, page: &str, file: &str, edit: &EditInfo) -> StoreResult<()> {
        let (id, rel, full) = self.locate(page, file)?;

        let mut edit = edit.clone();
        if edit.change_note.is_none() {
            edit.change_note = Some(format!("Deleted attachment {}/{}", page, file));
        }
        let meta = self.catalog.resolver().resolve(&edit);

        let _guard = self.catalog.lock_writes();
        if !fsutil::remove_file_if_exists(&full)? {
            return Err(StoreError::DocumentNotFound { id: id.to_string() });
        }
        if let Some(dir) = full.parent() {
            fsutil::remove_dir_if_empty(dir);
        }
        self.catalog.commit(CommitScope::Path(&rel), &meta)?;
        self.catalog.after_commit(&id, &rel, false);
        info!(page, file, "attachment deleted");
        Ok(())
    }

    /// Always fails: history is append-only.
    pub fn delete_version(&self, page: &str, file: &str, version: u32) -> StoreResult<()> {
        debug!(page, file, version, "refusing to delete a single version");
        Err(StoreError::Unsupported {
            operation: "delete_version",
        })
    }

    /// Latest revision of every attachment of `page`, ordered by file name.
    pub fn list_attachments(&self, page: &str) -> StoreResult<Vec<Revision>> {
        let dir = self.workdir().join(codec::attachment_dir(page)?);
        let mut out = Vec::new();
        for entry in fsutil::list_visible(&dir)? {
            if entry.is_dir {
                continue;
            }
            let Some(file) = codec::decode_segment(&entry.name) else {
                debug!(page, file = %entry.name, "skipping undecodable attachment name");
                continue;
            };
            match self.info(page, &file, Version::Latest) {
                Ok(rev) => out.push(rev),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Latest revisions of all attachments committed strictly after `since`,
    /// ordered by commit time, oldest first.
    pub fn list_all_changed_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Revision>> {
        let mut changed = Vec::new();
        for entry in fsutil::list_visible(self.workdir())? {
            if !entry.is_dir {
                continue;
            }
            let Some(page) = codec::decode_segment(&entry.name) else {
                continue;
            };
            changed.extend(
                self.list_attachments(&page)?
                    .into_iter()
                    .filter(|r| r.commit_time > since),
            );
        }
        changed.sort_by_key(|r| r.commit_time);
        Ok(changed)
    }

    /// Moves every attachment of `old_page` under `new_page` and commits the batch once.
    ///
    /// Destination collisions are checked before anything moves. If a move or
    /// the commit fails, files already moved are moved back and the error is
    /// returned. Returns the number of files moved.
    pub fn move_all_for_page(
        &self,
        old_page: &str,
        new_page: &str,
        edit: &EditInfo,
    ) -> StoreResult<usize> {
        self.move_all_with(old_page, new_page, edit, |from, to| fs::rename(from, to))
    }

    fn move_all_with<F>(
        &self,
        old_page: &str,
        new_page: &str,
        edit: &EditInfo,
        mut mv: F,
    ) -> StoreResult<usize>
    where
        F: FnMut(&Path, &Path) -> io::Result<()>,
    {
        let old_seg = codec::attachment_dir(old_page)?;
        let new_seg = codec::attachment_dir(new_page)?;
        if old_seg == new_seg {
            return Ok(0);
        }
        let old_dir = self.workdir().join(&old_seg);
        let new_dir = self.workdir().join(&new_seg);

        let mut edit = edit.clone();
        if edit.change_note.is_none() {
            edit.change_note = Some(format!(
                "Moved attachments of {} to {}",
                old_page, new_page
            ));
        }
        let meta = self.catalog.resolver().resolve(&edit);

        let _guard = self.catalog.lock_writes();
        let files: Vec<String> = fsutil::list_visible(&old_dir)?
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.name)
            .collect();
        if files.is_empty() {
            return Ok(0);
        }

        for name in &files {
            let target = new_dir.join(name);
            if target.exists() {
                return Err(StoreError::Io {
                    op: "move",
                    path: target,
                    source: io::Error::new(io::ErrorKind::AlreadyExists, "attachment exists"),
                });
            }
        }
        fs::create_dir_all(&new_dir).map_err(StoreError::io("create_dir", &new_dir))?;

        let mut moved: Vec<&str> = Vec::with_capacity(files.len());
        for name in &files {
            let src = old_dir.join(name);
            if let Err(e) = mv(&src, &new_dir.join(name)) {
                roll_back(&old_dir, &new_dir, &moved, &mut mv);
                return Err(StoreError::io("move", src)(e));
            }
            moved.push(name.as_str());
        }
        fsutil::remove_dir_if_empty(&old_dir);

        if let Err(e) = self.catalog.commit(CommitScope::Tree, &meta) {
            roll_back(&old_dir, &new_dir, &moved, &mut mv);
            return Err(e);
        }

        for name in &files {
            let Some(file) = codec::decode_segment(name) else {
                continue;
            };
            let old_rel = format!("{}/{}", old_seg, name);
            let new_rel = format!("{}/{}", new_seg, name);
            self.catalog
                .after_commit(&DocumentId::attachment(old_page, file.as_str()), &old_rel, false);
            self.catalog
                .after_commit(&DocumentId::attachment(new_page, file), &new_rel, true);
        }
        info!(from = old_page, to = new_page, count = files.len(), "attachments moved");
        Ok(files.len())
    }

    /// Short description of the backing repository.
    pub fn provider_info(&self) -> String {
        format!("attachments: {}", self.catalog.describe())
    }
}

/// Moves `moved` from `new_dir` back to `old_dir` and drops `new_dir` if it ends up empty.
fn roll_back<F>(old_dir: &Path, new_dir: &Path, moved: &[&str], mv: &mut F)
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    if !moved.is_empty() {
        if let Err(e) = fs::create_dir_all(old_dir) {
            warn!(dir = %old_dir.display(), error = %e, "could not recreate source directory");
            return;
        }
        for name in moved {
            if let Err(e) = mv(&new_dir.join(name), &old_dir.join(name)) {
                warn!(file = name, error = %e, "could not move attachment back");
            }
        }
    }
    fsutil::remove_dir_if_empty(new_dir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history_cache::MemoryHistoryCache;
    use crate::metadata::StaticUserDirectory;
    use crate::version_log::test_support::FailingCommitLog;
    use crate::version_log::GitVersionLog;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> AttachmentStore {
        store_on(Arc::new(GitVersionLog::open(dir.path(), true).unwrap()))
    }

    fn store_on(log: Arc<dyn VersionLog>) -> AttachmentStore {
        let mut users = StaticUserDirectory::default();
        users.insert("alice", "alice@example.org");
        AttachmentStore::new(
            log,
            Arc::new(MemoryHistoryCache::default()),
            Arc::new(MetadataResolver::new(Arc::new(users))),
            true,
            true,
        )
        .unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn put(store: &AttachmentStore, page: &str, file: &str, data: &[u8], secs: i64) {
        store
            .write(page, file, &mut &data[..], &EditInfo::by("alice").at(at(secs)))
            .unwrap();
    }

    #[test]
    fn test_write_and_read_versions() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "img.png", b"\x89PNG-one", 1_000);
        put(&atts, "Foo", "img.png", b"\x89PNG-second", 2_000);

        assert!(dir.path().join("Foo/img.png").is_file());
        assert_eq!(atts.read_latest("Foo", "img.png").unwrap(), b"\x89PNG-second");
        assert_eq!(atts.read_version("Foo", "img.png", 1u32).unwrap(), b"\x89PNG-one");

        let history = atts.history("Foo", "img.png").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 2);
        assert_eq!(history[0].size, Some(11));
        assert_eq!(history[1].size, Some(8));
    }

    #[test]
    fn test_info_and_exists() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        assert!(!atts.exists("Foo", "a.bin", Version::Latest).unwrap());
        assert!(atts.info("Foo", "a.bin", Version::Latest).unwrap_err().is_not_found());

        put(&atts, "Foo", "a.bin", b"abc", 1_000);
        let latest = atts.info("Foo", "a.bin", Version::Latest).unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(latest.size, Some(3));
        assert_eq!(latest.document, DocumentId::attachment("Foo", "a.bin"));
        assert!(atts.exists("Foo", "a.bin", 1u32).unwrap());
        assert!(!atts.exists("Foo", "a.bin", 2u32).unwrap());
    }

    #[test]
    fn test_escaped_names() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Main/Sub", "my file?.txt", b"x", 1_000);
        assert!(dir.path().join("Main%2FSub/my%20file%3F.txt").is_file());

        let listed = atts.list_attachments("Main/Sub").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].document,
            DocumentId::attachment("Main/Sub", "my file?.txt")
        );
    }

    #[test]
    fn test_list_attachments() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "b.bin", b"b", 1_000);
        put(&atts, "Foo", "a.bin", b"a", 2_000);
        put(&atts, "Bar", "c.bin", b"c", 3_000);

        let files: Vec<_> = atts
            .list_attachments("Foo")
            .unwrap()
            .into_iter()
            .map(|r| r.document)
            .collect();
        assert_eq!(
            files,
            vec![
                DocumentId::attachment("Foo", "a.bin"),
                DocumentId::attachment("Foo", "b.bin"),
            ]
        );
        assert!(atts.list_attachments("Nobody").unwrap().is_empty());
    }

    #[test]
    fn test_list_all_changed_since() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "img.png", b"one", 1_000);
        put(&atts, "Bar", "doc.pdf", b"pdf", 1_500);
        put(&atts, "Foo", "img.png", b"two", 3_000);
        put(&atts, "Baz", "x.bin", b"x", 2_500);

        let changed = atts.list_all_changed_since(at(2_000)).unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[0].document, DocumentId::attachment("Baz", "x.bin"));
        assert_eq!(changed[1].document, DocumentId::attachment("Foo", "img.png"));
        assert_eq!(changed[1].version, 2);
        assert!(changed.iter().all(|r| r.commit_time > at(2_000)));
    }

    #[test]
    fn test_delete_keeps_history() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "a.bin", b"abc", 1_000);
        atts.delete("Foo", "a.bin", &EditInfo::by("alice")).unwrap();

        assert!(!atts.exists("Foo", "a.bin", Version::Latest).unwrap());
        assert!(!dir.path().join("Foo").exists());
        assert_eq!(atts.read_version("Foo", "a.bin", 1u32).unwrap(), b"abc");
        assert!(atts.read_latest("Foo", "a.bin").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_version_unsupported() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "a.bin", b"abc", 1_000);
        assert!(matches!(
            atts.delete_version("Foo", "a.bin", 1),
            Err(StoreError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_move_all_for_page() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "a.bin", b"a", 1_000);
        put(&atts, "Foo", "b.bin", b"b", 2_000);

        let moved = atts
            .move_all_for_page("Foo", "Bar", &EditInfo::by("alice").at(at(3_000)))
            .unwrap();
        assert_eq!(moved, 2);
        assert!(!dir.path().join("Foo").exists());
        assert!(atts.list_attachments("Foo").unwrap().is_empty());

        let listed = atts.list_attachments("Bar").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(atts.read_latest("Bar", "a.bin").unwrap(), b"a");
        assert_eq!(listed[0].commit_time, at(3_000));

        // Old identities keep their history.
        assert_eq!(atts.read_version("Foo", "b.bin", 1u32).unwrap(), b"b");
    }

    #[test]
    fn test_move_all_rejects_collisions_before_moving() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "a.bin", b"a", 1_000);
        put(&atts, "Foo", "b.bin", b"b", 1_000);
        put(&atts, "Bar", "b.bin", b"other", 1_000);

        let err = atts
            .move_all_for_page("Foo", "Bar", &EditInfo::by("alice"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { op: "move", .. }));
        assert!(dir.path().join("Foo/a.bin").is_file());
        assert!(dir.path().join("Foo/b.bin").is_file());
        assert_eq!(atts.read_latest("Bar", "b.bin").unwrap(), b"other");
    }

    #[test]
    fn test_move_all_without_attachments() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        assert_eq!(
            atts.move_all_for_page("Foo", "Bar", &EditInfo::by("alice"))
                .unwrap(),
            0
        );
        assert_eq!(
            atts.move_all_for_page("Foo", "Foo", &EditInfo::by("alice"))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_move_all_restores_files_when_a_move_fails() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "a.bin", b"a", 1_000);
        put(&atts, "Foo", "b.bin", b"b", 1_000);
        put(&atts, "Foo", "c.bin", b"c", 1_000);

        let mut calls = 0;
        let err = atts
            .move_all_with("Foo", "Bar", &EditInfo::by("alice"), |from, to| {
                calls += 1;
                if calls == 2 {
                    return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
                }
                fs::rename(from, to)
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { op: "move", .. }));

        for name in ["a.bin", "b.bin", "c.bin"] {
            assert!(dir.path().join("Foo").join(name).is_file(), "{name} not restored");
        }
        assert!(!dir.path().join("Bar").exists());
        assert_eq!(atts.list_attachments("Foo").unwrap().len(), 3);
        assert_eq!(atts.history("Foo", "a.bin").unwrap().len(), 1);
        assert!(atts.history("Bar", "a.bin").unwrap().is_empty());
    }

    #[test]
    fn test_move_all_restores_files_when_commit_fails() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(FailingCommitLog::open(dir.path()));
        let atts = store_on(log.clone());
        put(&atts, "Foo", "a.bin", b"a", 1_000);
        put(&atts, "Foo", "b.bin", b"b", 2_000);

        log.fail_commits(true);
        let err = atts
            .move_all_for_page("Foo", "Bar", &EditInfo::by("alice").at(at(3_000)))
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionLog { op: "commit", .. }));
        log.fail_commits(false);

        assert!(dir.path().join("Foo/a.bin").is_file());
        assert!(dir.path().join("Foo/b.bin").is_file());
        assert!(!dir.path().join("Bar").exists());
        assert_eq!(atts.read_latest("Foo", "b.bin").unwrap(), b"b");
        assert_eq!(atts.history("Foo", "a.bin").unwrap().len(), 1);
        assert!(atts.list_attachments("Bar").unwrap().is_empty());

        // Later single-file commits carry nothing from the failed batch.
        put(&atts, "Other", "c.bin", b"c", 4_000);
        let old_rel = codec::attachment_path("Foo", "a.bin").unwrap();
        let new_rel = codec::attachment_path("Bar", "a.bin").unwrap();
        assert_eq!(log.history(&old_rel).unwrap().len(), 1);
        assert!(log.history(&new_rel).unwrap().is_empty());
    }

    #[test]
    fn test_open_latest_streams() {
        let dir = TempDir::new().unwrap();
        let atts = store(&dir);
        put(&atts, "Foo", "a.bin", b"stream me", 1_000);
        let mut buf = String::new();
        atts.open_latest("Foo", "a.bin")
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "stream me");
    }
}
