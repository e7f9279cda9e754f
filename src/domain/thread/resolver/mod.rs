//! Thread resolver module.
//!
//! This module decides which thread a normalized message belongs to.
//! Matching layers are evaluated in a fixed order over a read-only
//! [`Lookup`], the first hit wins. When no layer matches, a new
//! thread identifier is allocated.

pub mod config;
pub use config::ResolverConfig;

mod layers;
pub use layers::CASCADE;

use chrono::{DateTime, Utc};
use log::debug;
use std::{collections::BTreeSet, fmt, result};
use thiserror::Error;
use uuid::Uuid;

use crate::{store, Message};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot look up threads for message {1}")]
    LookupError(#[source] store::Error, String),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the layer which resolved a message.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum Layer {
    ConversationId,
    CorrelationId,
    ImmutableId,
    InReplyTo,
    References,
    SubjectParticipants,
    Fallback,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConversationId => write!(f, "conversation id"),
            Self::CorrelationId => write!(f, "correlation id"),
            Self::ImmutableId => write!(f, "immutable id"),
            Self::InReplyTo => write!(f, "in-reply-to"),
            Self::References => write!(f, "references"),
            Self::SubjectParticipants => write!(f, "subject and participants"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Represents the outcome of a resolution.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Resolution {
    pub thread_id: String,
    pub layer: Layer,
    /// True when no existing thread matched and the thread still
    /// needs to be created.
    pub is_new: bool,
}

/// Read access to the persisted threads and messages needed by the
/// resolution layers. Every method returns thread identifiers.
pub trait Lookup {
    /// Finds the thread carrying the given provider conversation
    /// id, or owning a message carrying it.
    fn thread_by_conversation_id(&self, conversation_id: &str) -> store::Result<Option<String>>;

    /// Finds the thread carrying the given correlation token, or
    /// owning the outgoing message carrying it.
    fn thread_by_correlation_id(&self, correlation_id: &str) -> store::Result<Option<String>>;

    /// Finds the thread owning the message with exactly the given
    /// immutable id.
    fn thread_by_immutable_id(&self, immutable_id: &str) -> store::Result<Option<String>>;

    /// Finds the thread owning a message whose immutable id or
    /// remote id has the given loose key.
    fn thread_by_message_key(&self, key: &str) -> store::Result<Option<String>>;

    /// Lists the threads with the given normalized subject and a last
    /// activity in the given range, most recent first.
    fn threads_by_subject(
        &self,
        normalized_subject: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> store::Result<Vec<String>>;

    /// Lists the participants of the most recent messages of a
    /// thread, one set per message.
    fn recent_participants(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> store::Result<Vec<BTreeSet<String>>>;
}

/// Shared read-only state handed to every layer.
pub struct Context<'a> {
    pub lookup: &'a dyn Lookup,
    pub config: &'a ResolverConfig,
    /// Used as candidate timestamp when the message has none.
    pub now: DateTime<Utc>,
}

pub struct ThreadResolver<'a> {
    lookup: &'a dyn Lookup,
    config: &'a ResolverConfig,
}

impl<'a> ThreadResolver<'a> {
    pub fn new(lookup: &'a dyn Lookup, config: &'a ResolverConfig) -> Self {
        Self { lookup, config }
    }

    pub fn resolve(&self, candidate: &Message) -> Result<Resolution> {
        self.resolve_at(candidate, Utc::now())
    }

    pub fn resolve_at(&self, candidate: &Message, now: DateTime<Utc>) -> Result<Resolution> {
        let ctx = Context {
            lookup: self.lookup,
            config: self.config,
            now,
        };

        for (layer, layer_fn) in CASCADE {
            let thread_id = layer_fn(&ctx, candidate)
                .map_err(|err| Error::LookupError(err, candidate.remote_id.clone()))?;

            if let Some(thread_id) = thread_id {
                debug!(
                    "message {} resolved to thread {} by {}",
                    candidate.remote_id, thread_id, layer
                );
                return Ok(Resolution {
                    thread_id,
                    layer,
                    is_new: false,
                });
            }
        }

        let thread_id = Uuid::new_v4().to_string();
        debug!(
            "message {} did not match any thread, allocating {}",
            candidate.remote_id, thread_id
        );

        Ok(Resolution {
            thread_id,
            layer: Layer::Fallback,
            is_new: true,
        })
    }
}
