//! Common fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use wikivcs_store::{EditInfo, StoreConfig, WikiStorage};

/// A wiki opened on a throwaway directory. The directory lives as long as the fixture.
pub struct TestWiki {
    pub dir: TempDir,
    pub wiki: WikiStorage,
}

impl TestWiki {
    /// Default configuration with `alice` and `bob` as known users.
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    /// Like [`TestWiki::new`], with `tweak` applied to the configuration first.
    pub fn with(tweak: impl FnOnce(&mut StoreConfig)) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = StoreConfig::under(dir.path());
        config
            .users
            .insert("alice".to_string(), "alice@example.org".to_string());
        config
            .users
            .insert("bob".to_string(), "bob@example.org".to_string());
        tweak(&mut config);
        let wiki = WikiStorage::open(&config).expect("open wiki");
        Self { dir, wiki }
    }

    /// Reopens the same directories with a fresh storage instance.
    pub fn reopen(&self) -> WikiStorage {
        self.reopen_with(|_| {})
    }

    /// Like [`TestWiki::reopen`], with `tweak` applied to the configuration first.
    pub fn reopen_with(&self, tweak: impl FnOnce(&mut StoreConfig)) -> WikiStorage {
        let mut config = StoreConfig::under(self.dir.path());
        config
            .users
            .insert("alice".to_string(), "alice@example.org".to_string());
        tweak(&mut config);
        WikiStorage::open(&config).expect("reopen wiki")
    }
}

/// Edit by `author` at unix time `secs`.
pub fn edit_at(author: &str, secs: i64) -> EditInfo {
    EditInfo::by(author).at(at(secs))
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}
