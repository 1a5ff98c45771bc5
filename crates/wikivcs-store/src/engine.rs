//! Page and attachment stores opened together from one [`StoreConfig`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::attachment_store::AttachmentStore;
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::history_cache::{HistoryCache, MemoryHistoryCache, NoopHistoryCache};
use crate::metadata::{MetadataResolver, StaticUserDirectory};
use crate::page_store::PageStore;
use crate::types::EditInfo;
use crate::version_log::GitVersionLog;

/// Both stores of one wiki.
pub struct WikiStorage {
    pages: PageStore,
    attachments: AttachmentStore,
}

impl WikiStorage {
    /// Opens (or initializes, per `config.create_if_missing`) both repositories.
    ///
    /// Each store gets its own history cache; the user directory is shared.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let users = StaticUserDirectory::new(config.users.clone());
        let resolver = Arc::new(MetadataResolver::new(Arc::new(users)));

        let page_log = Arc::new(GitVersionLog::open(&config.page_dir, config.create_if_missing)?);
        let attachment_log = Arc::new(GitVersionLog::open(
            &config.attachment_dir,
            config.create_if_missing,
        )?);

        let pages = PageStore::new(
            page_log,
            history_cache(config),
            resolver.clone(),
            config.sidecar_enabled,
        )?;
        let attachments = AttachmentStore::new(
            attachment_log,
            history_cache(config),
            resolver,
            config.sidecar_enabled,
            config.attachment_sizes,
        )?;

        info!(
            pages = %config.page_dir.display(),
            attachments = %config.attachment_dir.display(),
            "wiki storage opened"
        );
        Ok(Self { pages, attachments })
    }

    /// Page store.
    pub fn pages(&self) -> &PageStore {
        &self.pages
    }

    /// Attachment store.
    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    /// Renames page `from` to `to` and moves its attachments along.
    ///
    /// The page rename is committed first. If the attachment move then fails,
    /// the page stays renamed, the attachments stay under `from`, and the
    /// error is returned.
    pub fn rename_page(&self, from: &str, to: &str, edit: &EditInfo) -> StoreResult<()> {
        self.pages.rename(from, to, edit)?;
        if let Err(e) = self.attachments.move_all_for_page(from, to, edit) {
            warn!(from, to, error = %e, "page renamed but attachments were not moved");
            return Err(e);
        }
        Ok(())
    }

    /// Descriptions of both backing repositories.
    pub fn provider_info(&self) -> String {
        format!(
            "{}; {}",
            self.pages.provider_info(),
            self.attachments.provider_info()
        )
    }
}

fn history_cache(config: &StoreConfig) -> Arc<dyn HistoryCache> {
    if config.history_cache_entries == 0 {
        Arc::new(NoopHistoryCache)
    } else {
        Arc::new(MemoryHistoryCache::new(config.cache_config()))
    }
}
