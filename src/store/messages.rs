use chrono::Utc;
use log::{debug, trace};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

use crate::{message_key, participants, Direction, Message};

use super::{attachments, from_sql_date, is_constraint_violation, to_sql_date, Error, Result};

const INSERT_MESSAGE: &str = "
    INSERT INTO messages (
        id, mailbox, remote_id, remote_key, immutable_id, immutable_key, correlation_id,
        correlation_ref, thread_id, direction, subject, sender, sender_name, recipients_to,
        recipients_cc, recipients_bcc, in_reply_to, refs, conversation_id, sent_at,
        received_at, activity_at, has_attachments, is_read, body_text, body_html, preview,
        is_flagged
    )
    VALUES (
        ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
    )
";

const UPDATE_MESSAGE: &str = "
    UPDATE messages
    SET subject = ?2,
        sender = ?3,
        sender_name = COALESCE(?4, sender_name),
        recipients_to = ?5,
        recipients_cc = ?6,
        recipients_bcc = ?7,
        in_reply_to = COALESCE(?8, in_reply_to),
        refs = ?9,
        conversation_id = COALESCE(?10, conversation_id),
        correlation_ref = COALESCE(?11, correlation_ref),
        sent_at = COALESCE(?12, sent_at),
        received_at = COALESCE(?13, received_at),
        has_attachments = ?14,
        is_read = ?15,
        body_text = COALESCE(?16, body_text),
        body_html = COALESCE(?17, body_html),
        preview = CASE WHEN ?18 = '' THEN preview ELSE ?18 END,
        immutable_id = COALESCE(immutable_id, ?19),
        immutable_key = COALESCE(immutable_key, ?20)
    WHERE id = ?1
";

const SELECT_MESSAGE_COLUMNS: &str = "
    SELECT id, mailbox, remote_id, immutable_id, correlation_id, correlation_ref, thread_id,
           direction, subject, sender, sender_name, recipients_to, recipients_cc,
           recipients_bcc, in_reply_to, refs, conversation_id, sent_at, received_at,
           has_attachments, is_read, body_text, body_html, preview, is_flagged
    FROM messages
";

const SELECT_THREAD_BY_IMMUTABLE_ID: &str = "
    SELECT thread_id FROM messages
    WHERE immutable_id = ?
";

const SELECT_THREAD_BY_MESSAGE_KEY: &str = "
    SELECT thread_id FROM messages
    WHERE immutable_key = ?1
    OR remote_key = ?1
    ORDER BY activity_at ASC, id ASC
    LIMIT 1
";

const SELECT_RECENT_PARTICIPANTS: &str = "
    SELECT sender, recipients_to, recipients_cc, recipients_bcc FROM messages
    WHERE thread_id = ?
    ORDER BY activity_at DESC, id DESC
    LIMIT ?
";

const SUPERSEDE_REMOTE_ID: &str = "
    UPDATE messages
    SET superseded = 1
    WHERE remote_id = ?
    AND id != ?
    AND superseded = 0
";

const UPDATE_REMOTE_ID: &str = "
    UPDATE messages
    SET remote_id = ?, remote_key = ?, superseded = 0
    WHERE id = ?
";

const UPDATE_MESSAGE_FLAGS: &str = "
    UPDATE messages
    SET is_read = COALESCE(?2, is_read),
        is_flagged = COALESCE(?3, is_flagged)
    WHERE id = ?1
";

const SELECT_MESSAGE_THREAD: &str = "SELECT thread_id FROM messages WHERE id = ?";

const DELETE_MESSAGE: &str = "DELETE FROM messages WHERE id = ?";

const COUNT_MESSAGES: &str = "SELECT COUNT(*) FROM messages";

fn join(addrs: &[String]) -> String {
    addrs.join(" ")
}

fn split(addrs: String) -> Vec<String> {
    addrs.split_whitespace().map(ToOwned::to_owned).collect()
}

fn from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        mailbox: row.get(1)?,
        remote_id: row.get(2)?,
        immutable_id: row.get(3)?,
        correlation_id: row.get(4)?,
        correlation_ref: row.get(5)?,
        thread_id: row.get(6)?,
        direction: Direction::from(row.get::<usize, String>(7)?.as_str()),
        subject: row.get(8)?,
        from: row.get(9)?,
        from_name: row.get(10)?,
        to: split(row.get(11)?),
        cc: split(row.get(12)?),
        bcc: split(row.get(13)?),
        in_reply_to: row.get(14)?,
        references: split(row.get(15)?),
        conversation_id: row.get(16)?,
        sent_at: from_sql_date(row.get(17)?),
        received_at: from_sql_date(row.get(18)?),
        has_attachments: row.get(19)?,
        is_read: row.get(20)?,
        body_text: row.get(21)?,
        body_html: row.get(22)?,
        preview: row.get(23)?,
        is_flagged: row.get(24)?,
        attachments: Vec::new(),
    })
}

fn query_message(conn: &Connection, filter: &str, value: &str) -> Result<Option<Message>> {
    let sql = format!("{} WHERE {} LIMIT 1", SELECT_MESSAGE_COLUMNS, filter);
    let message = conn.query_row(&sql, [value], from_row).optional()?;

    match message {
        Some(mut message) => {
            message.attachments = attachments::list_by_message(conn, &message.id)?;
            Ok(Some(message))
        }
        None => Ok(None),
    }
}

/// Inserts a new message. Unique key violations are reported as
/// [`Error::ConflictError`].
pub fn insert(conn: &Connection, message: &Message) -> Result<()> {
    let activity_at = message.timestamp().unwrap_or_else(Utc::now);

    conn.execute(
        INSERT_MESSAGE,
        params![
            message.id,
            message.mailbox,
            message.remote_id,
            message_key(&message.remote_id).unwrap_or_default(),
            message.immutable_id,
            message.immutable_id.as_deref().and_then(message_key),
            message.correlation_id,
            message.correlation_ref,
            message.thread_id,
            message.direction.as_str(),
            message.subject,
            message.from,
            message.from_name,
            join(&message.to),
            join(&message.cc),
            join(&message.bcc),
            message.in_reply_to,
            join(&message.references),
            message.conversation_id,
            message.sent_at.as_ref().map(to_sql_date),
            message.received_at.as_ref().map(to_sql_date),
            to_sql_date(&activity_at),
            message.has_attachments,
            message.is_read,
            message.body_text,
            message.body_html,
            message.preview,
            message.is_flagged,
        ],
    )
    .map_err(|err| {
        if is_constraint_violation(&err) {
            Error::ConflictError(message.remote_id.clone())
        } else {
            Error::SqliteError(err)
        }
    })?;

    trace!("message {} inserted into thread {}", message.id, message.thread_id);
    Ok(())
}

/// Refreshes the mutable fields of a stored message from a newer
/// normalized copy. Identifiers and thread are left untouched, except
/// for an immutable id the stored message did not know yet.
pub fn update(conn: &Connection, id: &str, message: &Message) -> Result<()> {
    let count = conn.execute(
        UPDATE_MESSAGE,
        params![
            id,
            message.subject,
            message.from,
            message.from_name,
            join(&message.to),
            join(&message.cc),
            join(&message.bcc),
            message.in_reply_to,
            join(&message.references),
            message.conversation_id,
            message.correlation_ref,
            message.sent_at.as_ref().map(to_sql_date),
            message.received_at.as_ref().map(to_sql_date),
            message.has_attachments,
            message.is_read,
            message.body_text,
            message.body_html,
            message.preview,
            message.immutable_id,
            message.immutable_id.as_deref().and_then(message_key),
        ],
    )
    .map_err(|err| {
        if is_constraint_violation(&err) {
            Error::ConflictError(message.remote_id.clone())
        } else {
            Error::SqliteError(err)
        }
    })?;

    if count == 0 {
        return Err(Error::FindMessageError(id.to_owned()));
    }

    trace!("message {} updated", id);
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Message>> {
    query_message(conn, "id = ?", id)
}

pub fn find_by_remote_id(conn: &Connection, remote_id: &str) -> Result<Option<Message>> {
    query_message(conn, "remote_id = ? AND superseded = 0", remote_id)
}

pub fn find_by_immutable_id(conn: &Connection, immutable_id: &str) -> Result<Option<Message>> {
    query_message(conn, "immutable_id = ?", immutable_id)
}

pub fn find_by_correlation_id(conn: &Connection, correlation_id: &str) -> Result<Option<Message>> {
    query_message(conn, "correlation_id = ?", correlation_id)
}

/// Finds the stored copy of a normalized message, by remote id, then
/// immutable id, then owned correlation id.
pub fn find_existing(conn: &Connection, message: &Message) -> Result<Option<Message>> {
    if let Some(existing) = find_by_remote_id(conn, &message.remote_id)? {
        return Ok(Some(existing));
    }

    if let Some(id) = message.immutable_id.as_deref() {
        if let Some(existing) = find_by_immutable_id(conn, id)? {
            return Ok(Some(existing));
        }
    }

    if let Some(id) = message.correlation_id.as_deref() {
        if let Some(existing) = find_by_correlation_id(conn, id)? {
            return Ok(Some(existing));
        }
    }

    Ok(None)
}

pub fn thread_by_immutable_id(conn: &Connection, immutable_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(SELECT_THREAD_BY_IMMUTABLE_ID, [immutable_id], |row| row.get(0))
        .optional()?)
}

pub fn thread_by_message_key(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(SELECT_THREAD_BY_MESSAGE_KEY, [key], |row| row.get(0))
        .optional()?)
}

pub fn recent_participants(
    conn: &Connection,
    thread_id: &str,
    limit: usize,
) -> Result<Vec<BTreeSet<String>>> {
    let mut stmt = conn.prepare(SELECT_RECENT_PARTICIPANTS)?;
    let sets = stmt
        .query_map(params![thread_id, limit as i64], |row| {
            let from: String = row.get(0)?;
            let to = split(row.get(1)?);
            let cc = split(row.get(2)?);
            let bcc = split(row.get(3)?);
            Ok(participants(&from, &to, &cc, &bcc))
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(sets)
}

/// Assigns a new remote id to a message. Any other row still holding
/// it is marked as superseded, so that the remote id stays unique
/// among live rows.
pub fn set_remote_id(conn: &Connection, id: &str, remote_id: &str) -> Result<()> {
    let superseded = conn.execute(SUPERSEDE_REMOTE_ID, params![remote_id, id])?;
    if superseded > 0 {
        debug!("{} stale holder(s) of remote id {} superseded", superseded, remote_id);
    }

    let count = conn.execute(
        UPDATE_REMOTE_ID,
        params![remote_id, message_key(remote_id).unwrap_or_default(), id],
    )?;

    if count == 0 {
        return Err(Error::FindMessageError(id.to_owned()));
    }

    debug!("message {} now has remote id {}", id, remote_id);
    Ok(())
}

/// Lists the messages of a thread, oldest first.
pub fn list_by_thread(conn: &Connection, thread_id: &str) -> Result<Vec<Message>> {
    let sql = format!(
        "{} WHERE thread_id = ? ORDER BY activity_at ASC, id ASC",
        SELECT_MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut messages: Vec<Message> = stmt
        .query_map([thread_id], from_row)?
        .collect::<rusqlite::Result<_>>()?;

    for message in messages.iter_mut() {
        message.attachments = attachments::list_by_message(conn, &message.id)?;
    }

    Ok(messages)
}

/// Updates the read and flagged markers of a message. Markers set to
/// `None` are left untouched.
pub fn set_flags(
    conn: &Connection,
    id: &str,
    is_read: Option<bool>,
    is_flagged: Option<bool>,
) -> Result<()> {
    let count = conn.execute(UPDATE_MESSAGE_FLAGS, params![id, is_read, is_flagged])?;

    if count == 0 {
        return Err(Error::FindMessageError(id.to_owned()));
    }

    trace!("flags of message {} updated", id);
    Ok(())
}

/// Deletes a message and its attachments. Returns the id of the
/// thread it belonged to, or `None` if the message does not exist.
/// The caller is responsible for refreshing that thread.
pub fn delete(conn: &Connection, id: &str) -> Result<Option<String>> {
    let thread_id: Option<String> = conn
        .query_row(SELECT_MESSAGE_THREAD, [id], |row| row.get(0))
        .optional()?;

    if thread_id.is_some() {
        conn.execute(DELETE_MESSAGE, [id])?;
        debug!("message {} deleted", id);
    }

    Ok(thread_id)
}

pub fn count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row(COUNT_MESSAGES, [], |row| row.get(0))?;
    Ok(count.max(0) as usize)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::{store::threads, Store, Thread};

    use super::*;

    fn setup() -> (tempfile::TempDir, Connection) {
        let dir = tempdir().unwrap();
        let conn = Store::open(dir.path().join("store.sqlite"))
            .unwrap()
            .connect()
            .unwrap();
        threads::insert(
            &conn,
            &Thread {
                id: "t1".into(),
                ..Thread::default()
            },
        )
        .unwrap();
        (dir, conn)
    }

    fn message(id: &str, remote_id: &str) -> Message {
        Message {
            id: id.into(),
            mailbox: "desk".into(),
            remote_id: remote_id.into(),
            thread_id: "t1".into(),
            from: "a@x".into(),
            to: vec!["b@x".into(), "c@x".into()],
            ..Message::default()
        }
    }

    #[test]
    fn duplicate_keys_conflict() {
        let (_dir, conn) = setup();

        insert(
            &conn,
            &Message {
                immutable_id: Some("imm".into()),
                ..message("m1", "r1")
            },
        )
        .unwrap();

        let err = insert(&conn, &message("m2", "r1")).unwrap_err();
        assert!(err.is_conflict());

        let err = insert(
            &conn,
            &Message {
                immutable_id: Some("imm".into()),
                ..message("m3", "r3")
            },
        )
        .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn find_existing_by_each_key() {
        let (_dir, conn) = setup();

        insert(
            &conn,
            &Message {
                immutable_id: Some("<Imm@X>".into()),
                correlation_id: Some("TAX_1".into()),
                ..message("m1", "r1")
            },
        )
        .unwrap();

        let by_remote = message("", "r1");
        assert_eq!(find_existing(&conn, &by_remote).unwrap().unwrap().id, "m1");

        let by_immutable = Message {
            immutable_id: Some("<Imm@X>".into()),
            ..message("", "r2")
        };
        assert_eq!(find_existing(&conn, &by_immutable).unwrap().unwrap().id, "m1");

        let by_correlation = Message {
            correlation_id: Some("TAX_1".into()),
            ..message("", "r3")
        };
        assert_eq!(find_existing(&conn, &by_correlation).unwrap().unwrap().id, "m1");

        assert_eq!(find_existing(&conn, &message("", "r4")).unwrap(), None);
        assert_eq!(
            thread_by_message_key(&conn, "imm@x").unwrap().as_deref(),
            Some("t1")
        );
    }

    #[test]
    fn remote_id_correction_supersedes_stale_rows() {
        let (_dir, conn) = setup();

        insert(&conn, &message("m1", "r1")).unwrap();
        insert(&conn, &message("m2", "r2")).unwrap();

        set_remote_id(&conn, "m1", "r2").unwrap();

        assert_eq!(find_by_remote_id(&conn, "r2").unwrap().unwrap().id, "m1");
        assert_eq!(find_by_remote_id(&conn, "r1").unwrap(), None);
        assert!(matches!(
            set_remote_id(&conn, "missing", "r9"),
            Err(Error::FindMessageError(_))
        ));
    }

    #[test]
    fn update_keeps_known_content() {
        let (_dir, conn) = setup();

        insert(
            &conn,
            &Message {
                body_text: Some("full body".into()),
                preview: "full body".into(),
                ..message("m1", "r1")
            },
        )
        .unwrap();

        update(
            &conn,
            "m1",
            &Message {
                subject: "Updated".into(),
                is_read: true,
                ..message("", "r1")
            },
        )
        .unwrap();

        let stored = get(&conn, "m1").unwrap().unwrap();
        assert_eq!(stored.subject, "Updated");
        assert!(stored.is_read);
        assert_eq!(stored.body_text.as_deref(), Some("full body"));
        assert_eq!(stored.preview, "full body");
        assert_eq!(stored.to, vec!["b@x", "c@x"]);
    }

    #[test]
    fn participants_of_recent_messages() {
        let (_dir, conn) = setup();
        insert(&conn, &message("m1", "r1")).unwrap();

        let sets = recent_participants(&conn, "t1", 5).unwrap();
        assert_eq!(sets.len(), 1);
        assert!(sets[0].contains("a@x") && sets[0].contains("c@x"));
    }

    #[test]
    fn flags_are_updated_independently() {
        let (_dir, conn) = setup();
        insert(&conn, &message("m1", "r1")).unwrap();

        set_flags(&conn, "m1", Some(true), None).unwrap();
        set_flags(&conn, "m1", None, Some(true)).unwrap();

        let stored = get(&conn, "m1").unwrap().unwrap();
        assert!(stored.is_read);
        assert!(stored.is_flagged);

        // sync refreshes keep the local flag
        update(&conn, "m1", &message("m1", "r1")).unwrap();
        assert!(get(&conn, "m1").unwrap().unwrap().is_flagged);

        assert!(matches!(
            set_flags(&conn, "m2", Some(true), None),
            Err(Error::FindMessageError(_))
        ));
    }

    #[test]
    fn delete_returns_thread() {
        let (_dir, conn) = setup();
        insert(&conn, &message("m1", "r1")).unwrap();

        assert_eq!(delete(&conn, "m1").unwrap().as_deref(), Some("t1"));
        assert_eq!(delete(&conn, "m1").unwrap(), None);
        assert_eq!(count(&conn).unwrap(), 0);
    }
}
