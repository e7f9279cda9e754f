//! Identity recovery module.
//!
//! Remote identifiers of messages and attachments change when
//! messages move between folders. This module re-locates a message
//! through its immutable identifier, persists the corrected remote
//! identifier and re-matches attachments, then retries the original
//! fetch once.

mod fetcher;
pub use fetcher::*;

use log::{debug, info};
use std::{fmt, result, sync::Arc, time::Duration};
use thiserror::Error;

use crate::{
    clean_message_id, provider, store, Message, Provider, RemoteMatch, RetryPolicy, Store,
    SyncConfig,
};

/// Represents the reason a message could not be recovered.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Reason {
    MissingImmutableId,
    NoMatch,
    Ambiguous(usize),
    AttachmentNotFound,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingImmutableId => write!(f, "no immutable id"),
            Self::NoMatch => write!(f, "no remote match"),
            Self::Ambiguous(count) => write!(f, "{} remote matches", count),
            Self::AttachmentNotFound => write!(f, "attachment not found"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot recover {0}: {1}")]
    NotRecoverableError(String, Reason),
    #[error("cannot reach provider for {1}")]
    ProviderError(#[source] provider::Error, String),

    #[error(transparent)]
    StoreError(#[from] store::Error),
}

impl Error {
    /// Returns true for the expected outcome of a failed recovery, as
    /// opposed to provider or store failures.
    pub fn is_not_recoverable(&self) -> bool {
        matches!(self, Self::NotRecoverableError(..))
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Re-locates messages whose remote id went stale.
#[derive(Clone)]
pub struct IdentityRecovery {
    store: Store,
    provider: Arc<dyn Provider>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl IdentityRecovery {
    pub fn new(store: Store, provider: Arc<dyn Provider>, config: &SyncConfig) -> Self {
        Self {
            store,
            provider,
            timeout: config.request_timeout(),
            retry: config.retry_policy(),
        }
    }

    pub(crate) fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Searches every folder of the mailbox for the message with
    /// exactly the given immutable id. Exactly one match is required.
    pub fn locate(&self, mailbox: &str, immutable_id: &str) -> Result<RemoteMatch> {
        let wanted = clean_message_id(immutable_id);

        let mut matches: Vec<RemoteMatch> = self
            .retry
            .run("search by immutable id", || {
                self.provider
                    .find_by_immutable_id(mailbox, immutable_id, self.timeout)
            })
            .map_err(|err| Error::ProviderError(err, immutable_id.to_owned()))?
            .into_iter()
            .filter(|found| clean_message_id(&found.immutable_id) == wanted)
            .collect();

        debug!(
            "{} match(es) for immutable id {} in mailbox {}",
            matches.len(),
            immutable_id,
            mailbox
        );

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(Error::NotRecoverableError(
                immutable_id.to_owned(),
                Reason::NoMatch,
            )),
            count => Err(Error::NotRecoverableError(
                immutable_id.to_owned(),
                Reason::Ambiguous(count),
            )),
        }
    }

    /// Re-locates a message and persists its new remote id when the
    /// message is stored. Returns the current remote id.
    pub fn recover(&self, message: &Message) -> Result<String> {
        let immutable_id = message.immutable_id.as_deref().ok_or_else(|| {
            Error::NotRecoverableError(message.remote_id.clone(), Reason::MissingImmutableId)
        })?;

        let found = self.locate(&message.mailbox, immutable_id)?;

        if found.remote_id != message.remote_id && !message.id.is_empty() {
            self.store.correct_remote_id(&message.id, &found.remote_id)?;
            info!(
                "message {} recovered: remote id {} -> {} (folder {})",
                message.id, message.remote_id, found.remote_id, found.container
            );
        }

        Ok(found.remote_id)
    }
}
