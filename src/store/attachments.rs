use log::trace;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::Attachment;

use super::{Error, Result};

const INSERT_ATTACHMENT: &str = "
    INSERT INTO attachments (id, message_id, remote_id, file_name, content_type, size, is_inline)
    VALUES (?, ?, ?, ?, ?, ?, ?)
";

const UPDATE_ATTACHMENT: &str = "
    UPDATE attachments
    SET remote_id = ?2, file_name = ?3, content_type = ?4, size = ?5, is_inline = ?6
    WHERE id = ?1
";

const SELECT_ATTACHMENT_COLUMNS: &str = "
    SELECT id, message_id, remote_id, file_name, content_type, size, is_inline
    FROM attachments
";

const SELECT_ATTACHMENT_ID_BY_REMOTE_ID: &str = "
    SELECT id FROM attachments
    WHERE message_id = ?
    AND remote_id = ?
";

const SELECT_ATTACHMENTS_BY_FILE_NAME: &str = "
    SELECT id, remote_id FROM attachments
    WHERE message_id = ?
    AND file_name = ?
";

const UPDATE_ATTACHMENT_REMOTE_ID: &str = "
    UPDATE attachments
    SET remote_id = ?
    WHERE id = ?
";

fn from_row(row: &Row) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        message_id: row.get(1)?,
        remote_id: row.get(2)?,
        file_name: row.get(3)?,
        content_type: row.get(4)?,
        size: row.get::<usize, i64>(5)?.max(0) as u64,
        is_inline: row.get(6)?,
    })
}

/// Records the metadata of the attachments of the given message and
/// returns their internal ids, in order.
///
/// A stored attachment is matched by remote id. When the remote id
/// changed, it is matched by file name, but only when a single stored
/// attachment carries that name and its remote id is no longer listed.
/// Anything else is inserted.
pub fn upsert_all(
    conn: &Connection,
    message_id: &str,
    attachments: &[Attachment],
) -> Result<Vec<String>> {
    let incoming: Vec<&str> = attachments
        .iter()
        .map(|attachment| attachment.remote_id.as_str())
        .collect();

    attachments
        .iter()
        .map(|attachment| upsert(conn, message_id, attachment, &incoming))
        .collect()
}

fn upsert(
    conn: &Connection,
    message_id: &str,
    attachment: &Attachment,
    incoming: &[&str],
) -> Result<String> {
    let existing_id: Option<String> = conn
        .query_row(
            SELECT_ATTACHMENT_ID_BY_REMOTE_ID,
            params![message_id, attachment.remote_id],
            |row| row.get(0),
        )
        .optional()?;

    let existing_id = match existing_id {
        Some(id) => Some(id),
        None => find_rekeyed(conn, message_id, &attachment.file_name, incoming)?,
    };

    let id = match existing_id {
        Some(id) => {
            conn.execute(
                UPDATE_ATTACHMENT,
                params![
                    id,
                    attachment.remote_id,
                    attachment.file_name,
                    attachment.content_type,
                    attachment.size as i64,
                    attachment.is_inline,
                ],
            )?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                INSERT_ATTACHMENT,
                params![
                    id,
                    message_id,
                    attachment.remote_id,
                    attachment.file_name,
                    attachment.content_type,
                    attachment.size as i64,
                    attachment.is_inline,
                ],
            )?;
            id
        }
    };

    trace!("attachment {} of message {} recorded", id, message_id);
    Ok(id)
}

fn find_rekeyed(
    conn: &Connection,
    message_id: &str,
    file_name: &str,
    incoming: &[&str],
) -> Result<Option<String>> {
    let mut stmt = conn.prepare(SELECT_ATTACHMENTS_BY_FILE_NAME)?;
    let named: Vec<(String, String)> = stmt
        .query_map(params![message_id, file_name], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    match named.as_slice() {
        [(id, remote_id)] if !incoming.contains(&remote_id.as_str()) => Ok(Some(id.clone())),
        _ => Ok(None),
    }
}

pub fn list_by_message(conn: &Connection, message_id: &str) -> Result<Vec<Attachment>> {
    let sql = format!(
        "{} WHERE message_id = ? ORDER BY file_name ASC, id ASC",
        SELECT_ATTACHMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let attachments = stmt
        .query_map([message_id], from_row)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(attachments)
}

pub fn set_remote_id(conn: &Connection, id: &str, remote_id: &str) -> Result<()> {
    let count = conn.execute(UPDATE_ATTACHMENT_REMOTE_ID, params![remote_id, id])?;

    if count == 0 {
        return Err(Error::FindMessageError(format!("attachment {}", id)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::{tempdir, TempDir};

    use crate::{
        store::{messages, threads},
        Message, Store, Thread,
    };

    use super::*;

    fn setup() -> (TempDir, Connection) {
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
        messages::insert(
            &conn,
            &Message {
                id: "m1".into(),
                remote_id: "r1".into(),
                thread_id: "t1".into(),
                ..Message::default()
            },
        )
        .unwrap();

        (dir, conn)
    }

    fn attachment(remote_id: &str, file_name: &str, size: u64) -> Attachment {
        Attachment {
            remote_id: remote_id.into(),
            file_name: file_name.into(),
            size,
            ..Attachment::default()
        }
    }

    fn stored(conn: &Connection) -> Vec<(String, u64)> {
        let mut stored: Vec<_> = list_by_message(conn, "m1")
            .unwrap()
            .into_iter()
            .map(|attachment| (attachment.remote_id, attachment.size))
            .collect();
        stored.sort();
        stored
    }

    #[test]
    fn upsert_matches_by_remote_id_then_file_name() {
        let (_dir, conn) = setup();

        let ids = upsert_all(&conn, "m1", &[attachment("a1", "return.pdf", 10)]).unwrap();
        assert_eq!(
            upsert_all(&conn, "m1", &[attachment("a1", "return.pdf", 10)]).unwrap(),
            ids
        );
        assert_eq!(
            upsert_all(&conn, "m1", &[attachment("a2", "return.pdf", 10)]).unwrap(),
            ids
        );

        assert_eq!(stored(&conn), vec![("a2".to_owned(), 10)]);
    }

    #[test]
    fn same_file_names_are_kept_apart() {
        let (_dir, conn) = setup();
        let scans = [attachment("a1", "scan.jpg", 10), attachment("a2", "scan.jpg", 20)];

        let ids = upsert_all(&conn, "m1", &scans).unwrap();
        assert_ne!(ids[0], ids[1]);
        assert_eq!(upsert_all(&conn, "m1", &scans).unwrap(), ids);

        assert_eq!(
            stored(&conn),
            vec![("a1".to_owned(), 10), ("a2".to_owned(), 20)]
        );
    }

    #[test]
    fn ambiguous_file_name_is_not_rekeyed() {
        let (_dir, conn) = setup();
        let scans = [attachment("a1", "scan.jpg", 10), attachment("a2", "scan.jpg", 20)];
        upsert_all(&conn, "m1", &scans).unwrap();

        upsert_all(&conn, "m1", &[attachment("b1", "scan.jpg", 10)]).unwrap();

        assert_eq!(stored(&conn).len(), 3);
    }
}
