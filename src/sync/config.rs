//! Sync config module.
//!
//! This module contains the configuration of the synchronization:
//! paging, provider call budgets, periodic reconciliation, the
//! correlation header contract and the store location.

use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::{env, path::PathBuf, result, time::Duration};
use thiserror::Error;

use crate::{
    domain::message::normalizer::{DEFAULT_CORRELATION_HEADER, DEFAULT_TOKEN_PREFIX},
    provider::retry::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF},
    ResolverConfig, RetryPolicy,
};

pub const DEFAULT_PAGE_CAP: usize = 100;
pub const DEFAULT_FULL_PAGE_SIZE: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RECONCILE_INTERVAL_MINS: i64 = 60;
pub const DEFAULT_STORE_DIR: &str = "mailthread";
pub const DEFAULT_STORE_FILE: &str = "store.sqlite";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot expand store path {1}")]
    ExpandStorePathError(#[source] shellexpand::LookupError<env::VarError>, String),
    #[error("cannot get XDG_DATA_HOME directory")]
    GetXdgDataDirError,
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the configuration of the synchronization.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize)]
pub struct SyncConfig {
    /// Represents the maximum number of messages fetched by an
    /// incremental sync.
    #[serde(default)]
    pub page_cap: Option<usize>,
    /// Represents the page size used by full syncs.
    #[serde(default)]
    pub full_page_size: Option<usize>,
    /// Represents the timeout of every provider call, in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_attempts: Option<usize>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    #[serde(default)]
    pub retry_max_backoff_ms: Option<u64>,
    /// Represents the age, in minutes, a watermark needs to reach
    /// before the mailbox is reconciled again.
    #[serde(default)]
    pub reconcile_interval_mins: Option<i64>,
    /// Represents the header carrying the application correlation
    /// token of outgoing messages.
    #[serde(default)]
    pub correlation_header: Option<String>,
    /// Represents the prefix of correlation tokens embedded in the
    /// References header of replies.
    #[serde(default)]
    pub reference_prefix: Option<String>,
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Represents the SQLite store path. Shell variables are
    /// expanded.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl SyncConfig {
    pub fn page_cap(&self) -> usize {
        self.page_cap.unwrap_or(DEFAULT_PAGE_CAP).max(1)
    }

    pub fn full_page_size(&self) -> usize {
        self.full_page_size.unwrap_or(DEFAULT_FULL_PAGE_SIZE).max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            initial_backoff: self
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_INITIAL_BACKOFF),
            max_backoff: self
                .retry_max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MAX_BACKOFF),
        }
    }

    pub fn reconcile_interval(&self) -> ChronoDuration {
        ChronoDuration::minutes(
            self.reconcile_interval_mins
                .unwrap_or(DEFAULT_RECONCILE_INTERVAL_MINS),
        )
    }

    pub fn correlation_header(&self) -> &str {
        self.correlation_header
            .as_deref()
            .map(str::trim)
            .filter(|header| !header.is_empty())
            .unwrap_or(DEFAULT_CORRELATION_HEADER)
    }

    pub fn reference_prefix(&self) -> Option<String> {
        self.reference_prefix
            .as_deref()
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
            .map(ToOwned::to_owned)
    }

    /// Gets the prefix of the correlation tokens generated for
    /// outgoing messages. Defaults to the reference prefix, so that
    /// replies quoting the token in their references are matched.
    pub fn token_prefix(&self) -> String {
        self.reference_prefix()
            .unwrap_or_else(|| DEFAULT_TOKEN_PREFIX.to_owned())
    }

    /// Gets the store path, defaulting to a file in the user data
    /// directory.
    pub fn store_path(&self) -> Result<PathBuf> {
        match self.store_path.as_ref().and_then(|path| path.to_str()) {
            Some(path) => shellexpand::full(path)
                .map(|path| PathBuf::from(path.to_string()))
                .map_err(|err| Error::ExpandStorePathError(err, path.to_owned())),
            None => dirs::data_dir()
                .map(|dir| dir.join(DEFAULT_STORE_DIR).join(DEFAULT_STORE_FILE))
                .ok_or(Error::GetXdgDataDirError),
        }
    }
}
