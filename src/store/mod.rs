//! Store module.
//!
//! This module contains the SQLite persistence of threads, messages,
//! attachments and sync watermarks. Functions of the submodules take
//! a [`Connection`] (or a transaction dereferencing to one) so that
//! callers decide about transaction boundaries; [`Store`] wraps the
//! most common ones with their own connection.

pub mod attachments;
pub mod lookup;
pub mod messages;
mod schema;
pub mod threads;
pub mod watermarks;

pub use lookup::DbLookup;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use std::{
    fs, io,
    path::{Path, PathBuf},
    result,
    time::Duration,
};
use thiserror::Error;

use crate::{Message, SyncWatermark, Thread, ThreadStatus};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create store directory {1}")]
    CreateStoreDirError(#[source] io::Error, PathBuf),
    #[error("cannot open store at {1}")]
    OpenStoreError(#[source] rusqlite::Error, PathBuf),
    #[error("cannot find message {0}")]
    FindMessageError(String),
    #[error("cannot find thread {0}")]
    FindThreadError(String),
    #[error("conflicting message {0}")]
    ConflictError(String),

    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
}

impl Error {
    /// Returns true if the error comes from a unique key violation.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::ConflictError(_) => true,
            Self::SqliteError(err) => is_constraint_violation(err),
            _ => false,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

/// Formats a date the way the store persists it. The fixed precision
/// keeps the text representation lexicographically ordered.
pub(crate) fn to_sql_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_sql_date(date: Option<String>) -> Option<DateTime<Utc>> {
    let date = date?;
    match DateTime::parse_from_rfc3339(&date) {
        Ok(date) => Some(date.with_timezone(&Utc)),
        Err(err) => {
            warn!("invalid date {}, skipping it: {}", date, err);
            None
        }
    }
}

/// Represents the SQLite store.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Opens the store at the given path, creating the database and
    /// its schema if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| Error::CreateStoreDirError(err, dir.to_owned()))?;
        }

        let store = Self { path };
        let conn = store.connect()?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        debug!("store ready at {:?}", store.path);

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a new connection to the store.
    pub fn connect(&self) -> Result<Connection> {
        let conn =
            Connection::open(&self.path).map_err(|err| Error::OpenStoreError(err, self.path.clone()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    pub fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        threads::get(&self.connect()?, id)
    }

    /// Lists threads by descending last activity.
    pub fn list_threads(&self, limit: usize, offset: usize) -> Result<Vec<Thread>> {
        threads::list(&self.connect()?, limit, offset)
    }

    /// Lists the messages of a thread, oldest first, attachments
    /// included.
    pub fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        messages::list_by_thread(&self.connect()?, thread_id)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        messages::get(&self.connect()?, id)
    }

    pub fn find_message_by_remote_id(&self, remote_id: &str) -> Result<Option<Message>> {
        messages::find_by_remote_id(&self.connect()?, remote_id)
    }

    pub fn count_messages(&self) -> Result<usize> {
        messages::count(&self.connect()?)
    }

    pub fn count_threads(&self) -> Result<usize> {
        threads::count(&self.connect()?)
    }

    /// Changes the status of a thread. This is the only way to reach
    /// or leave the resolved and archived statuses.
    pub fn set_thread_status(&self, id: &str, status: ThreadStatus) -> Result<()> {
        if threads::set_status(&self.connect()?, id, status)? {
            Ok(())
        } else {
            Err(Error::FindThreadError(id.to_owned()))
        }
    }

    /// Marks a message as read or unread, flagged or not. Markers set
    /// to `None` are left untouched.
    pub fn set_message_flags(
        &self,
        id: &str,
        is_read: Option<bool>,
        is_flagged: Option<bool>,
    ) -> Result<()> {
        messages::set_flags(&self.connect()?, id, is_read, is_flagged)
    }

    /// Deletes a message, then recounts its thread. A thread left
    /// without messages is deleted as well. Returns false if the
    /// message does not exist.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let thread_id = match messages::delete(&tx, id)? {
            Some(thread_id) => thread_id,
            None => return Ok(false),
        };

        if !threads::refresh(&tx, &thread_id)? {
            debug!("thread {} deleted with its last message", thread_id);
        }

        tx.commit()?;
        Ok(true)
    }

    /// Persists a new remote id for a message, superseding any stale
    /// row still holding it.
    pub fn correct_remote_id(&self, message_id: &str, remote_id: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        messages::set_remote_id(&tx, message_id, remote_id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn correct_attachment_remote_id(&self, attachment_id: &str, remote_id: &str) -> Result<()> {
        attachments::set_remote_id(&self.connect()?, attachment_id, remote_id)
    }

    pub fn watermark(&self, mailbox: &str) -> Result<Option<SyncWatermark>> {
        watermarks::get(&self.connect()?, mailbox)
    }

    pub fn watermarks(&self) -> Result<Vec<SyncWatermark>> {
        watermarks::list(&self.connect()?)
    }

    pub fn advance_watermark(&self, mailbox: &str, synced_at: DateTime<Utc>) -> Result<()> {
        watermarks::advance(&self.connect()?, mailbox, synced_at)
    }
}
