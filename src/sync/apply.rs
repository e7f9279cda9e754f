use chrono::{DateTime, Utc};
use log::{debug, trace};
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

use crate::{
    normalize_subject,
    store::{self, attachments, messages, threads, DbLookup},
    Classifier, Message, ResolverConfig, Thread, ThreadResolver,
};

use super::Result;

/// Represents the outcome of the upsert of one message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Applied {
    Created(Message),
    Updated(Message),
}

impl Applied {
    pub fn message(&self) -> &Message {
        match self {
            Self::Created(message) | Self::Updated(message) => message,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Created(message) | Self::Updated(message) => message,
        }
    }
}

/// Upserts a normalized message and updates its thread, all in one
/// transaction. A message already stored under the same remote id,
/// immutable id or owned correlation id is refreshed, otherwise it is
/// resolved to a thread and inserted.
///
/// A unique key conflict means that a concurrent batch inserted the
/// same message in the meantime: the upsert is retried once and then
/// turns into an update.
pub fn apply(
    conn: &mut Connection,
    message: &Message,
    resolver_config: &ResolverConfig,
    classifier: &dyn Classifier,
    now: DateTime<Utc>,
) -> Result<Applied> {
    match apply_once(conn, message, resolver_config, classifier, now) {
        Err(err) if err.is_conflict() => {
            debug!("conflict while applying message {}, retrying", message.remote_id);
            apply_once(conn, message, resolver_config, classifier, now)
        }
        res => res,
    }
}

fn apply_once(
    conn: &mut Connection,
    message: &Message,
    resolver_config: &ResolverConfig,
    classifier: &dyn Classifier,
    now: DateTime<Utc>,
) -> Result<Applied> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(store::Error::from)?;

    let applied = match messages::find_existing(&tx, message)? {
        Some(existing) => {
            if existing.remote_id != message.remote_id && existing.mailbox == message.mailbox {
                debug!(
                    "message {} changed remote id: {} -> {}",
                    existing.id, existing.remote_id, message.remote_id
                );
                messages::set_remote_id(&tx, &existing.id, &message.remote_id)?;
            }

            messages::update(&tx, &existing.id, message)?;

            attachments::upsert_all(&tx, &existing.id, &message.attachments)?;

            threads::refresh(&tx, &existing.thread_id)?;

            if let Some(conversation_id) = &message.conversation_id {
                threads::adopt_conversation_id(&tx, &existing.thread_id, conversation_id)?;
                threads::merge_conversation(&tx, &existing.thread_id, conversation_id)?;
            }

            let updated = messages::get(&tx, &existing.id)?
                .ok_or_else(|| store::Error::FindMessageError(existing.id.clone()))?;
            Applied::Updated(updated)
        }
        None => {
            let resolution =
                ThreadResolver::new(&DbLookup::new(&tx), resolver_config).resolve_at(message, now)?;

            if resolution.is_new {
                let body = message
                    .body_text
                    .as_deref()
                    .unwrap_or(message.preview.as_str());

                threads::insert(
                    &tx,
                    &Thread {
                        id: resolution.thread_id.clone(),
                        subject: message.subject.clone(),
                        normalized_subject: normalize_subject(&message.subject),
                        conversation_id: message.conversation_id.clone(),
                        category: classifier.classify(&message.subject, body),
                        created_at: Some(now),
                        ..Thread::default()
                    },
                )?;
            }

            let mut created = message.clone();
            created.id = Uuid::new_v4().to_string();
            created.thread_id = resolution.thread_id.clone();

            messages::insert(&tx, &created)?;

            let ids = attachments::upsert_all(&tx, &created.id, &created.attachments)?;
            for (attachment, id) in created.attachments.iter_mut().zip(ids) {
                attachment.id = id;
                attachment.message_id = created.id.clone();
            }

            threads::attach(&tx, &created.thread_id, &created)?;

            if let Some(conversation_id) = &created.conversation_id {
                threads::merge_conversation(&tx, &created.thread_id, conversation_id)?;
            }

            trace!(
                "message {} created in thread {} ({})",
                created.id,
                created.thread_id,
                resolution.layer
            );
            Applied::Created(created)
        }
    };

    tx.commit().map_err(store::Error::from)?;
    Ok(applied)
}
