use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::SyncWatermark;

use super::{from_sql_date, to_sql_date, Result};

const SELECT_WATERMARK: &str = "
    SELECT mailbox, synced_at FROM watermarks
    WHERE mailbox = ?
";

const SELECT_WATERMARKS: &str = "
    SELECT mailbox, synced_at FROM watermarks
    ORDER BY mailbox ASC
";

const UPSERT_WATERMARK: &str = "
    INSERT INTO watermarks (mailbox, synced_at)
    VALUES (?1, ?2)
    ON CONFLICT(mailbox) DO UPDATE
    SET synced_at = MAX(synced_at, excluded.synced_at)
";

fn from_columns(mailbox: String, synced_at: String) -> Option<SyncWatermark> {
    from_sql_date(Some(synced_at)).map(|synced_at| SyncWatermark { mailbox, synced_at })
}

pub fn get(conn: &Connection, mailbox: &str) -> Result<Option<SyncWatermark>> {
    let columns: Option<(String, String)> = conn
        .query_row(SELECT_WATERMARK, [mailbox], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;

    Ok(columns.and_then(|(mailbox, synced_at)| from_columns(mailbox, synced_at)))
}

pub fn list(conn: &Connection) -> Result<Vec<SyncWatermark>> {
    let mut stmt = conn.prepare(SELECT_WATERMARKS)?;
    let columns: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    Ok(columns
        .into_iter()
        .filter_map(|(mailbox, synced_at)| from_columns(mailbox, synced_at))
        .collect())
}

/// Moves the watermark of a mailbox forward. A watermark never moves
/// backward.
pub fn advance(conn: &Connection, mailbox: &str, synced_at: DateTime<Utc>) -> Result<()> {
    conn.execute(UPSERT_WATERMARK, params![mailbox, to_sql_date(&synced_at)])?;
    debug!("watermark of mailbox {} advanced to {}", mailbox, synced_at);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    use crate::Store;

    use super::*;

    #[test]
    fn watermark_never_moves_backward() {
        let dir = tempdir().unwrap();
        let conn = Store::open(dir.path().join("store.sqlite"))
            .unwrap()
            .connect()
            .unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        assert_eq!(get(&conn, "desk").unwrap(), None);

        advance(&conn, "desk", at).unwrap();
        advance(&conn, "desk", at - Duration::hours(1)).unwrap();
        assert_eq!(get(&conn, "desk").unwrap().unwrap().synced_at, at);

        advance(&conn, "desk", at + Duration::hours(1)).unwrap();
        assert_eq!(
            get(&conn, "desk").unwrap().unwrap().synced_at,
            at + Duration::hours(1)
        );
        assert_eq!(list(&conn).unwrap().len(), 1);
    }
}
