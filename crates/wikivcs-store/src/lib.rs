#![warn(missing_docs)]

//! wikivcs: versioned wiki pages and attachments on top of a git repository
//!
//! Every write becomes a commit carrying author, time and change note. Readers
//! address revisions by stable oldest-first version numbers (1, 2, ...) which
//! are translated to positions in the repository's newest-first commit log.
//! Histories are cached in memory and the newest revision's metadata is kept
//! in a sidecar record so "latest info" queries skip the history walk.

pub mod attachment_store;
pub mod catalog;
pub mod cli;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod history_cache;
pub mod metadata;
pub mod page_store;
pub mod sidecar;
pub mod types;
pub mod version_log;

pub use attachment_store::AttachmentStore;
pub use catalog::{index_for_version, version_for_index};
pub use config::StoreConfig;
pub use engine::WikiStorage;
pub use error::{StoreError, StoreResult};
pub use history_cache::{
    CacheLookup, FillTicket, History, HistoryCache, HistoryCacheConfig, HistoryCacheStats,
    MemoryHistoryCache, NoopHistoryCache,
};
pub use metadata::{MetadataResolver, StaticUserDirectory, UserDirectory, UserProfile};
pub use page_store::PageStore;
pub use sidecar::{LatestMetadataSidecar, SidecarRecord};
pub use types::{
    CommitId, CommitMetadata, DocumentId, EditInfo, Revision, Version, DEFAULT_COMMIT_MESSAGE,
    LATEST_VERSION, UNKNOWN_AUTHOR, UNKNOWN_EMAIL,
};
pub use version_log::{CommitScope, GitVersionLog, RawCommit, VersionLog};
