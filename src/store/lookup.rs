use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::BTreeSet;

use crate::Lookup;

use super::{messages, threads, Result};

/// Resolver lookup backed by a store connection. Used inside the
/// per-message transaction so that the resolution sees the rows
/// written by the previous messages of the batch.
pub struct DbLookup<'a> {
    conn: &'a Connection,
}

impl<'a> DbLookup<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl Lookup for DbLookup<'_> {
    fn thread_by_conversation_id(&self, conversation_id: &str) -> Result<Option<String>> {
        threads::find_by_conversation_id(self.conn, conversation_id)
    }

    fn thread_by_correlation_id(&self, correlation_id: &str) -> Result<Option<String>> {
        threads::find_by_correlation_id(self.conn, correlation_id)
    }

    fn thread_by_immutable_id(&self, immutable_id: &str) -> Result<Option<String>> {
        messages::thread_by_immutable_id(self.conn, immutable_id)
    }

    fn thread_by_message_key(&self, key: &str) -> Result<Option<String>> {
        messages::thread_by_message_key(self.conn, key)
    }

    fn threads_by_subject(
        &self,
        normalized_subject: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        threads::find_by_subject(self.conn, normalized_subject, from, to)
    }

    fn recent_participants(&self, thread_id: &str, limit: usize) -> Result<Vec<BTreeSet<String>>> {
        messages::recent_participants(self.conn, thread_id, limit)
    }
}
