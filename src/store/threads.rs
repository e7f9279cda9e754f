use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{Category, Message, Thread, ThreadStatus};

use super::{from_sql_date, to_sql_date, Result};

const INSERT_THREAD: &str = "
    INSERT INTO threads (
        id, subject, normalized_subject, conversation_id, correlation_id, category,
        message_count, first_message_id, last_message_id, last_activity_at, status, created_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_THREAD_COLUMNS: &str = "
    SELECT id, subject, normalized_subject, conversation_id, correlation_id, category,
           message_count, first_message_id, last_message_id, last_activity_at, status, created_at
    FROM threads
";

const SELECT_THREAD_BY_CONVERSATION_ID: &str = "
    SELECT id FROM threads
    WHERE conversation_id = ?
    ORDER BY created_at ASC, id ASC
    LIMIT 1
";

const SELECT_MESSAGE_THREAD_BY_CONVERSATION_ID: &str = "
    SELECT thread_id FROM messages
    WHERE conversation_id = ?
    ORDER BY activity_at ASC, id ASC
    LIMIT 1
";

const SELECT_THREAD_BY_CORRELATION_ID: &str = "
    SELECT id FROM threads
    WHERE correlation_id = ?
";

const SELECT_MESSAGE_THREAD_BY_CORRELATION_ID: &str = "
    SELECT thread_id FROM messages
    WHERE correlation_id = ?
";

const SELECT_THREADS_BY_SUBJECT: &str = "
    SELECT id FROM threads
    WHERE normalized_subject = ?
    AND last_activity_at >= ?
    AND last_activity_at <= ?
    ORDER BY last_activity_at DESC
";

const SELECT_MERGEABLE_THREADS: &str = "
    SELECT id FROM threads
    WHERE id != ?1
    AND (
        conversation_id = ?2
        OR id IN (SELECT thread_id FROM messages WHERE conversation_id = ?2)
    )
";

const UPDATE_THREAD_STATUS: &str = "
    UPDATE threads
    SET status = ?
    WHERE id = ?
";

const UPDATE_THREAD_CONVERSATION_ID: &str = "
    UPDATE threads
    SET conversation_id = ?
    WHERE id = ?
    AND conversation_id IS NULL
";

const UPDATE_THREAD_CORRELATION_ID: &str = "
    UPDATE threads
    SET correlation_id = ?1
    WHERE id = ?2
    AND correlation_id IS NULL
    AND NOT EXISTS (SELECT 1 FROM threads WHERE correlation_id = ?1)
";

const UPDATE_THREAD_AGGREGATES: &str = "
    UPDATE threads
    SET message_count = (
            SELECT COUNT(*) FROM messages WHERE thread_id = ?1
        ),
        first_message_id = (
            SELECT id FROM messages WHERE thread_id = ?1
            ORDER BY activity_at ASC, id ASC LIMIT 1
        ),
        last_message_id = (
            SELECT id FROM messages WHERE thread_id = ?1
            ORDER BY activity_at DESC, id DESC LIMIT 1
        ),
        last_activity_at = (
            SELECT MAX(activity_at) FROM messages WHERE thread_id = ?1
        )
    WHERE id = ?1
";

const COUNT_THREAD_MESSAGES: &str = "
    SELECT COUNT(*) FROM messages
    WHERE thread_id = ?
";

const MOVE_THREAD_MESSAGES: &str = "
    UPDATE messages
    SET thread_id = ?
    WHERE thread_id = ?
";

const DELETE_THREAD: &str = "
    DELETE FROM threads
    WHERE id = ?
";

const COUNT_THREADS: &str = "SELECT COUNT(*) FROM threads";

fn from_row(row: &Row) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        subject: row.get(1)?,
        normalized_subject: row.get(2)?,
        conversation_id: row.get(3)?,
        correlation_id: row.get(4)?,
        category: Category::from(row.get::<usize, String>(5)?.as_str()),
        message_count: row.get::<usize, i64>(6)?.max(0) as usize,
        first_message_id: row.get(7)?,
        last_message_id: row.get(8)?,
        last_activity_at: from_sql_date(row.get(9)?),
        status: {
            let status: String = row.get(10)?;
            status.parse().unwrap_or_else(|err| {
                warn!("{}, using default status", err);
                ThreadStatus::default()
            })
        },
        created_at: from_sql_date(row.get(11)?),
    })
}

/// Inserts a new, still empty thread.
pub fn insert(conn: &Connection, thread: &Thread) -> Result<()> {
    let created_at = thread.created_at.unwrap_or_else(Utc::now);

    conn.execute(
        INSERT_THREAD,
        params![
            thread.id,
            thread.subject,
            thread.normalized_subject,
            thread.conversation_id,
            thread.correlation_id,
            thread.category.as_str(),
            thread.message_count as i64,
            thread.first_message_id,
            thread.last_message_id,
            thread.last_activity_at.as_ref().map(to_sql_date),
            thread.status.as_str(),
            to_sql_date(&created_at),
        ],
    )?;

    debug!("thread {} created", thread.id);
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Thread>> {
    let sql = format!("{} WHERE id = ?", SELECT_THREAD_COLUMNS);
    Ok(conn.query_row(&sql, [id], from_row).optional()?)
}

pub fn list(conn: &Connection, limit: usize, offset: usize) -> Result<Vec<Thread>> {
    let sql = format!(
        "{} ORDER BY last_activity_at DESC, id ASC LIMIT ? OFFSET ?",
        SELECT_THREAD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let threads = stmt
        .query_map(params![limit as i64, offset as i64], from_row)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(threads)
}

pub fn count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row(COUNT_THREADS, [], |row| row.get(0))?;
    Ok(count.max(0) as usize)
}

fn query_id(conn: &Connection, sql: &str, value: &str) -> Result<Option<String>> {
    Ok(conn.query_row(sql, [value], |row| row.get(0)).optional()?)
}

pub fn find_by_conversation_id(conn: &Connection, conversation_id: &str) -> Result<Option<String>> {
    match query_id(conn, SELECT_THREAD_BY_CONVERSATION_ID, conversation_id)? {
        Some(id) => Ok(Some(id)),
        None => query_id(conn, SELECT_MESSAGE_THREAD_BY_CONVERSATION_ID, conversation_id),
    }
}

pub fn find_by_correlation_id(conn: &Connection, correlation_id: &str) -> Result<Option<String>> {
    match query_id(conn, SELECT_THREAD_BY_CORRELATION_ID, correlation_id)? {
        Some(id) => Ok(Some(id)),
        None => query_id(conn, SELECT_MESSAGE_THREAD_BY_CORRELATION_ID, correlation_id),
    }
}

pub fn find_by_subject(
    conn: &Connection,
    normalized_subject: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(SELECT_THREADS_BY_SUBJECT)?;
    let ids = stmt
        .query_map(
            params![normalized_subject, to_sql_date(&from), to_sql_date(&to)],
            |row| row.get(0),
        )?
        .collect::<rusqlite::Result<_>>()?;
    Ok(ids)
}

/// Changes the status of a thread. Returns false if the thread does
/// not exist.
pub fn set_status(conn: &Connection, id: &str, status: ThreadStatus) -> Result<bool> {
    let count = conn.execute(UPDATE_THREAD_STATUS, params![status.as_str(), id])?;
    Ok(count > 0)
}

/// Updates a thread after one of its messages has been persisted:
/// status transition, conversation and correlation ids, aggregates.
///
/// The status only moves for messages not older than the current
/// last activity, so that late deliveries of old messages do not
/// rewind it.
pub fn attach(conn: &Connection, thread_id: &str, message: &Message) -> Result<()> {
    let thread = match get(conn, thread_id)? {
        Some(thread) => thread,
        None => return Err(super::Error::FindThreadError(thread_id.to_owned())),
    };

    let is_latest = match (thread.last_activity_at, message.timestamp()) {
        (Some(last), Some(at)) => at >= last,
        _ => true,
    };

    if is_latest {
        let status = thread.status.on_append(message.direction);
        if status != thread.status {
            trace!("thread {} status: {} -> {}", thread_id, thread.status, status);
            set_status(conn, thread_id, status)?;
        }
    }

    if let Some(conversation_id) = &message.conversation_id {
        adopt_conversation_id(conn, thread_id, conversation_id)?;
    }

    if let Some(correlation_id) = &message.correlation_id {
        conn.execute(
            UPDATE_THREAD_CORRELATION_ID,
            params![correlation_id, thread_id],
        )?;
    }

    refresh(conn, thread_id)?;
    Ok(())
}

/// Sets the conversation id of a thread which has none yet.
pub fn adopt_conversation_id(conn: &Connection, id: &str, conversation_id: &str) -> Result<()> {
    conn.execute(UPDATE_THREAD_CONVERSATION_ID, params![conversation_id, id])?;
    Ok(())
}

/// Recomputes the aggregates of a thread from its messages. A thread
/// left without messages is deleted. Returns false in this case.
pub fn refresh(conn: &Connection, thread_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(COUNT_THREAD_MESSAGES, [thread_id], |row| row.get(0))?;

    if count == 0 {
        conn.execute(DELETE_THREAD, [thread_id])?;
        debug!("empty thread {} deleted", thread_id);
        return Ok(false);
    }

    conn.execute(UPDATE_THREAD_AGGREGATES, [thread_id])?;
    Ok(true)
}

/// Moves every message of the other threads sharing the given
/// conversation id into the target thread, then deletes the emptied
/// threads. Returns the merged thread ids.
pub fn merge_conversation(
    conn: &Connection,
    target_id: &str,
    conversation_id: &str,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(SELECT_MERGEABLE_THREADS)?;
    let others: Vec<String> = stmt
        .query_map(params![target_id, conversation_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    for other_id in &others {
        let correlation_id = get(conn, other_id)?.and_then(|thread| thread.correlation_id);

        conn.execute(MOVE_THREAD_MESSAGES, params![target_id, other_id])?;
        refresh(conn, other_id)?;

        if let Some(correlation_id) = correlation_id {
            conn.execute(
                UPDATE_THREAD_CORRELATION_ID,
                params![correlation_id, target_id],
            )?;
        }

        debug!(
            "thread {} merged into {} (conversation {})",
            other_id, target_id, conversation_id
        );
    }

    if !others.is_empty() {
        refresh(conn, target_id)?;
    }

    Ok(others)
}
