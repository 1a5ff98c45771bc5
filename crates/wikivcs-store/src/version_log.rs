//! Version log: per-path commit history over a git repository.
//!
//! The log is addressed by repository-relative path. History is returned
//! newest-first, exactly as the repository enumerates it; translating that
//! order into oldest-first version numbers is the caller's job.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{
    Commit, ErrorCode, IndexAddOption, ObjectType, Oid, Repository, Signature, Sort, Time, Tree,
};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::types::{CommitId, CommitMetadata};

/// Directory under the git dir reserved for data this crate keeps out of the tracked tree.
pub const PRIVATE_DIR: &str = "wikivcs-meta";

/// One commit touching a path, as recorded by the repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCommit {
    /// Commit id.
    pub id: CommitId,
    /// Author name as recorded.
    pub author: String,
    /// Author email as recorded; `None` when empty.
    pub email: Option<String>,
    /// Full commit message.
    pub message: String,
    /// Commit time.
    pub time: DateTime<Utc>,
}

/// What a commit stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitScope<'a> {
    /// One path: added if present in the working tree, removed otherwise.
    Path(&'a str),
    /// Every change in the working tree, including removals and renames.
    Tree,
}

impl CommitScope<'_> {
    fn describe(&self) -> &str {
        match self {
            CommitScope::Path(p) => p,
            CommitScope::Tree => "<tree>",
        }
    }
}

/// Access to the backing version-control store.
///
/// Implementations must be safe to share across threads. Commits are not
/// serialized here; callers hold a repository-wide write lock around
/// working-tree changes and the commit that records them.
pub trait VersionLog: Send + Sync {
    /// Stages `scope` and records one commit with `meta` as author and committer.
    fn commit(&self, scope: CommitScope<'_>, meta: &CommitMetadata) -> StoreResult<CommitId>;

    /// Commits that introduced a new state of `path`, newest first.
    ///
    /// Fails only when the repository has no history at all; a path no commit
    /// touches yields an empty list.
    fn history(&self, path: &str) -> StoreResult<Vec<RawCommit>>;

    /// Reads `path` as of the `index`-th commit touching it, 0 = newest.
    fn read_blob_at(&self, path: &str, index: usize) -> StoreResult<Vec<u8>>;

    /// Reads `path` as of a specific commit.
    fn read_blob(&self, commit: &CommitId, path: &str) -> StoreResult<Vec<u8>>;

    /// Size of `path` in `commit`. Opens the object database; call only when needed.
    fn blob_size(&self, commit: &CommitId, path: &str) -> StoreResult<u64>;

    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    /// Untracked directory for auxiliary files belonging to this repository.
    fn private_dir(&self) -> PathBuf;
}

/// [`VersionLog`] over a non-bare git repository.
///
/// `git2::Repository` is not `Sync`, so a handle is opened per operation.
pub struct GitVersionLog {
    workdir: PathBuf,
    git_dir: PathBuf,
}

impl GitVersionLog {
    /// Opens the repository at `root`.
    ///
    /// With `create_if_missing`, a missing directory is created and a missing
    /// repository initialized; otherwise both are configuration errors. A
    /// repository with an unborn HEAD gets an empty root commit.
    pub fn open(root: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !root.exists() {
            if !create_if_missing {
                return Err(StoreError::Configuration(format!(
                    "storage directory {} does not exist",
                    root.display()
                )));
            }
            std::fs::create_dir_all(root).map_err(|e| {
                StoreError::Configuration(format!("could not create {}: {}", root.display(), e))
            })?;
        }

        let repo = match Repository::open(root) {
            Ok(repo) => repo,
            Err(e) if e.code() == ErrorCode::NotFound && create_if_missing => {
                info!(root = %root.display(), "initializing repository");
                Repository::init(root).map_err(|e| {
                    StoreError::Configuration(format!(
                        "could not initialize repository in {}: {}",
                        root.display(),
                        e.message()
                    ))
                })?
            }
            Err(e) => {
                return Err(StoreError::Configuration(format!(
                    "no usable repository in {}: {}",
                    root.display(),
                    e.message()
                )))
            }
        };

        let workdir = repo
            .workdir()
            .ok_or_else(|| {
                StoreError::Configuration(format!("{} is a bare repository", root.display()))
            })?
            .to_path_buf();
        let git_dir = repo.path().to_path_buf();

        ensure_root_commit(&repo)?;

        Ok(Self { workdir, git_dir })
    }

    fn repo(&self, op: &'static str, path: &str) -> StoreResult<Repository> {
        Repository::open(&self.workdir).map_err(StoreError::git(op, path))
    }

    /// Ids of commits that introduced a new state of `path`, newest first.
    fn touching_commits(&self, repo: &Repository, path: &str) -> StoreResult<Vec<Oid>> {
        let git = || StoreError::git("history", path);

        match repo.head() {
            Ok(_) => {}
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Err(StoreError::VersionLog {
                    op: "history",
                    path: path.to_string(),
                    reason: "repository has no history".to_string(),
                });
            }
            Err(e) => return Err(git()(e)),
        }

        let mut walk = repo.revwalk().map_err(git())?;
        walk.push_head().map_err(git())?;
        walk.set_sorting(Sort::TOPOLOGICAL).map_err(git())?;

        let rel = Path::new(path);
        let mut ids = Vec::new();
        for oid in walk {
            let oid = oid.map_err(git())?;
            let commit = repo.find_commit(oid).map_err(git())?;
            if introduces_change(&commit, rel).map_err(git())? {
                ids.push(oid);
            }
        }
        Ok(ids)
    }
}

impl VersionLog for GitVersionLog {
    fn commit(&self, scope: CommitScope<'_>, meta: &CommitMetadata) -> StoreResult<CommitId> {
        let target = scope.describe();
        let git = || StoreError::git("commit", target);
        let repo = self.repo("commit", target)?;

        let mut index = repo.index().map_err(git())?;
        match scope {
            CommitScope::Path(p) => {
                let rel = Path::new(p);
                if self.workdir.join(rel).is_file() {
                    index.add_path(rel).map_err(git())?;
                } else {
                    index.remove_path(rel).map_err(git())?;
                }
            }
            CommitScope::Tree => {
                index
                    .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                    .map_err(git())?;
                index.update_all(["*"].iter(), None).map_err(git())?;
            }
        }
        let tree_id = index.write_tree().map_err(git())?;
        let tree = repo.find_tree(tree_id).map_err(git())?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit().map_err(git())?),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(e) => return Err(git()(e)),
        };
        if let Some(ref p) = parent {
            if p.tree_id() == tree_id {
                return Err(StoreError::NothingToCommit {
                    path: target.to_string(),
                });
            }
        }

        let when = Time::new(meta.commit_time.timestamp(), 0);
        let sig = Signature::new(&meta.author, &meta.email, &when).map_err(git())?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, meta.message(), &tree, &parents)
            .map_err(git())?;
        // The staged index reaches disk only once HEAD moved, so a failed
        // commit leaves nothing staged for the next one.
        index.write().map_err(git())?;

        debug!(path = target, commit = %oid, author = %meta.author, "committed");
        Ok(CommitId(oid.to_string()))
    }

    fn history(&self, path: &str) -> StoreResult<Vec<RawCommit>> {
        let repo = self.repo("history", path)?;
        let ids = self.touching_commits(&repo, path)?;

        ids.into_iter()
            .map(|oid| {
                let commit = repo.find_commit(oid).map_err(StoreError::git("history", path))?;
                Ok(raw_commit(&commit))
            })
            .collect()
    }

    fn read_blob_at(&self, path: &str, index: usize) -> StoreResult<Vec<u8>> {
        let repo = self.repo("read_blob", path)?;
        let ids = self.touching_commits(&repo, path)?;
        let oid = ids.get(index).ok_or_else(|| StoreError::VersionLog {
            op: "read_blob",
            path: path.to_string(),
            reason: format!("commit index {} out of range ({} commits)", index, ids.len()),
        })?;
        read_blob_in(&repo, *oid, path)
    }

    fn read_blob(&self, commit: &CommitId, path: &str) -> StoreResult<Vec<u8>> {
        let repo = self.repo("read_blob", path)?;
        read_blob_in(&repo, parse_oid(commit, path)?, path)
    }

    fn blob_size(&self, commit: &CommitId, path: &str) -> StoreResult<u64> {
        let git = || StoreError::git("blob_size", path);
        let repo = self.repo("blob_size", path)?;
        let blob_id = blob_id_in(&repo, parse_oid(commit, path)?, path)?;
        let odb = repo.odb().map_err(git())?;
        let (size, _kind) = odb.read_header(blob_id).map_err(git())?;
        Ok(size as u64)
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn private_dir(&self) -> PathBuf {
        self.git_dir.join(PRIVATE_DIR)
    }
}

fn ensure_root_commit(repo: &Repository) -> StoreResult<()> {
    let unborn = match repo.head() {
        Ok(_) => false,
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => true,
        Err(e) => return Err(StoreError::Configuration(e.message().to_string())),
    };
    if !unborn {
        return Ok(());
    }

    let config = |e: git2::Error| StoreError::Configuration(e.message().to_string());
    let tree_id = repo.treebuilder(None).and_then(|b| b.write()).map_err(config)?;
    let tree = repo.find_tree(tree_id).map_err(config)?;
    let sig = Signature::now("wikivcs", "wikivcs@localhost").map_err(config)?;
    repo.commit(Some("HEAD"), &sig, &sig, "initialize repository", &tree, &[])
        .map_err(config)?;
    info!(root = ?repo.workdir(), "created root commit");
    Ok(())
}

/// Blob id of `path` in `tree`, `None` when absent or not a file.
fn entry_blob(tree: &Tree<'_>, path: &Path) -> Result<Option<Oid>, git2::Error> {
    match tree.get_path(path) {
        Ok(entry) if entry.kind() == Some(ObjectType::Blob) => Ok(Some(entry.id())),
        Ok(_) => Ok(None),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// True when `commit` contains `path` with a blob different from its first parent's.
fn introduces_change(commit: &Commit<'_>, path: &Path) -> Result<bool, git2::Error> {
    let Some(current) = entry_blob(&commit.tree()?, path)? else {
        return Ok(false);
    };
    if commit.parent_count() == 0 {
        return Ok(true);
    }
    let previous = entry_blob(&commit.parent(0)?.tree()?, path)?;
    Ok(previous != Some(current))
}

fn raw_commit(commit: &Commit<'_>) -> RawCommit {
    let author = commit.author();
    let time = DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default();
    RawCommit {
        id: CommitId(commit.id().to_string()),
        author: author.name().unwrap_or_default().to_string(),
        email: author
            .email()
            .filter(|e| !e.is_empty())
            .map(str::to_string),
        message: commit
            .message()
            .unwrap_or_default()
            .trim_end_matches('\n')
            .to_string(),
        time,
    }
}

fn parse_oid(commit: &CommitId, path: &str) -> StoreResult<Oid> {
    Oid::from_str(commit.as_str()).map_err(StoreError::git("parse_commit", path))
}

fn blob_id_in(repo: &Repository, commit: Oid, path: &str) -> StoreResult<Oid> {
    let git = || StoreError::git("read_blob", path);
    let tree = repo.find_commit(commit).and_then(|c| c.tree()).map_err(git())?;
    entry_blob(&tree, Path::new(path))
        .map_err(git())?
        .ok_or_else(|| StoreError::VersionLog {
            op: "read_blob",
            path: path.to_string(),
            reason: format!("path absent from commit {}", commit),
        })
}

fn read_blob_in(repo: &Repository, commit: Oid, path: &str) -> StoreResult<Vec<u8>> {
    let blob_id = blob_id_in(repo, commit, path)?;
    let blob = repo
        .find_blob(blob_id)
        .map_err(StoreError::git("read_blob", path))?;
    Ok(blob.content().to_vec())
}
