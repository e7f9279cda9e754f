//! Sync module.
//!
//! This module contains everything needed to turn the messages of
//! remote mailboxes into persisted conversation threads: the
//! per-item upsert, the paginated orchestration, the mailbox locks
//! and the queue of requested resynchronizations.

mod apply;
pub use apply::{apply, Applied};

pub mod config;
pub use config::SyncConfig;

mod lock;
pub use lock::with_mailbox_lock;

mod orchestrator;
pub use orchestrator::{Orchestrator, LOCAL_REMOTE_ID_PREFIX};

pub mod queue;
pub use queue::{QueueStats, ResyncQueue, ResyncRequest};

mod report;
pub use report::*;

use std::{io, result};
use thiserror::Error;

use crate::{domain::message::normalizer, domain::thread::resolver, provider, recovery, store};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot synchronize mailbox {0}: a synchronization is already running")]
    MailboxBusyError(String),
    #[error("cannot lock mailbox {1}")]
    LockMailboxError(#[source] io::Error, String),
    #[error("cannot check mailbox {1}")]
    CheckMailboxError(#[source] provider::Error, String),
    #[error("cannot list messages of mailbox {1}")]
    ListMessagesError(#[source] provider::Error, String),
    #[error("cannot queue resync of mailbox {0}: queue is full")]
    QueueFullError(String),

    #[error(transparent)]
    ConfigError(#[from] config::Error),
    #[error(transparent)]
    NormalizeError(#[from] normalizer::Error),
    #[error(transparent)]
    ResolveError(#[from] resolver::Error),
    #[error(transparent)]
    RecoveryError(#[from] recovery::Error),
    #[error(transparent)]
    StoreError(#[from] store::Error),
}

impl Error {
    /// Returns true for errors invalidating the whole batch: rejected
    /// credentials or unknown mailbox.
    pub fn is_precondition(&self) -> bool {
        match self {
            Self::CheckMailboxError(err, _) | Self::ListMessagesError(err, _) => {
                err.is_precondition()
            }
            _ => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::MailboxBusyError(_))
    }

    fn is_conflict(&self) -> bool {
        matches!(self, Self::StoreError(err) if err.is_conflict())
    }
}

pub type Result<T> = result::Result<T, Error>;
