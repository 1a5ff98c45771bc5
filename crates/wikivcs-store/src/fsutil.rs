//! Working-tree file helpers.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};

/// Replaces `path` with the bytes read from `data`.
///
/// The content goes to a temporary file in the same directory which is then
/// renamed over the target, so readers see either the old or the new file.
/// Parent directories are created as needed. Returns the number of bytes written.
pub fn write_atomic<R: Read + ?Sized>(path: &Path, data: &mut R) -> StoreResult<u64> {
    let parent = path.parent().ok_or_else(|| StoreError::Io {
        op: "write",
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"),
    })?;
    fs::create_dir_all(parent).map_err(StoreError::io("create_dir", parent))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(StoreError::io("write", path))?;
    let written = io::copy(data, &mut tmp).map_err(StoreError::io("write", path))?;
    tmp.flush().map_err(StoreError::io("write", path))?;
    tmp.as_file()
        .sync_all()
        .map_err(StoreError::io("sync", path))?;
    tmp.persist(path)
        .map_err(|e| StoreError::io("rename", path)(e.error))?;
    Ok(written)
}

/// Size and modification time of a working file.
///
/// Every write replaces the file through a rename, so a new revision always
/// carries a new stamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// File length in bytes.
    pub len: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

impl FileStamp {
    /// Stamps the file at `path`.
    pub fn of(path: &Path) -> StoreResult<Self> {
        let meta = fs::metadata(path).map_err(StoreError::io("stat", path))?;
        let modified = meta.modified().map_err(StoreError::io("stat", path))?;
        Ok(Self {
            len: meta.len(),
            modified: DateTime::<Utc>::from(modified),
        })
    }
}

/// One visible entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntryName {
    /// File name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Lists `dir`, skipping dot-entries (`.git`, temporary files) and non-UTF-8 names.
///
/// A missing directory lists as empty. Entries are sorted by name.
pub fn list_visible(dir: &Path) -> StoreResult<Vec<DirEntryName>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io("list", dir)(e)),
    };

    let mut out = Vec::new();
    for entry in read {
        let entry = entry.map_err(StoreError::io("list", dir))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry
            .file_type()
            .map_err(StoreError::io("list", entry.path()))?
            .is_dir();
        out.push(DirEntryName { name, is_dir });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Removes `path`; mapping NotFound to `Ok(false)`.
pub fn remove_file_if_exists(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io("remove", path)(e)),
    }
}

/// Removes `dir` if it exists and is empty. Anything else is left alone.
pub fn remove_dir_if_empty(dir: &Path) {
    let _ = fs::remove_dir(dir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/file.txt");
        let n = write_atomic(&path, &mut "hello".as_bytes()).unwrap();
        assert_eq!(n, 5);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        write_atomic(&path, &mut "old content".as_bytes()).unwrap();
        write_atomic(&path, &mut "new".as_bytes()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(list_visible(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_list_visible_skips_dot_entries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::create_dir(dir.path().join("Foo")).unwrap();
        fs::write(dir.path().join(".tmpXYZ"), "x").unwrap();
        fs::write(dir.path().join("Bar.txt"), "x").unwrap();

        let entries = list_visible(dir.path()).unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntryName {
                    name: "Bar.txt".to_string(),
                    is_dir: false
                },
                DirEntryName {
                    name: "Foo".to_string(),
                    is_dir: true
                },
            ]
        );
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(list_visible(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_file_stamp_changes_on_replace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Foo.txt");
        write_atomic(&path, &mut "one".as_bytes()).unwrap();
        let first = FileStamp::of(&path).unwrap();
        assert_eq!(first.len, 3);
        assert_eq!(FileStamp::of(&path).unwrap(), first);

        write_atomic(&path, &mut "three".as_bytes()).unwrap();
        let second = FileStamp::of(&path).unwrap();
        assert_eq!(second.len, 5);
        assert_ne!(second, first);

        assert!(FileStamp::of(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_remove_file_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "x").unwrap();
        assert!(remove_file_if_exists(&path).unwrap());
        assert!(!remove_file_if_exists(&path).unwrap());
    }
}
