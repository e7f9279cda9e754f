pub(crate) const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS threads (
        id                 TEXT    PRIMARY KEY,
        subject            TEXT    NOT NULL,
        normalized_subject TEXT    NOT NULL,
        conversation_id    TEXT,
        correlation_id     TEXT    UNIQUE,
        category           TEXT    NOT NULL,
        message_count      INTEGER NOT NULL DEFAULT 0,
        first_message_id   TEXT,
        last_message_id    TEXT,
        last_activity_at   TEXT,
        status             TEXT    NOT NULL,
        created_at         TEXT    NOT NULL
    );

    CREATE INDEX IF NOT EXISTS threads_conversation_id
    ON threads(conversation_id);

    CREATE INDEX IF NOT EXISTS threads_subject
    ON threads(normalized_subject, last_activity_at);

    CREATE TABLE IF NOT EXISTS messages (
        id              TEXT    PRIMARY KEY,
        mailbox         TEXT    NOT NULL,
        remote_id       TEXT    NOT NULL,
        remote_key      TEXT    NOT NULL,
        superseded      INTEGER NOT NULL DEFAULT 0,
        immutable_id    TEXT    UNIQUE,
        immutable_key   TEXT,
        correlation_id  TEXT    UNIQUE,
        correlation_ref TEXT,
        thread_id       TEXT    NOT NULL REFERENCES threads(id),
        direction       TEXT    NOT NULL,
        subject         TEXT    NOT NULL,
        sender          TEXT    NOT NULL,
        sender_name     TEXT,
        recipients_to   TEXT    NOT NULL,
        recipients_cc   TEXT    NOT NULL,
        recipients_bcc  TEXT    NOT NULL,
        in_reply_to     TEXT,
        refs            TEXT    NOT NULL,
        conversation_id TEXT,
        sent_at         TEXT,
        received_at     TEXT,
        activity_at     TEXT    NOT NULL,
        has_attachments INTEGER NOT NULL,
        is_read         INTEGER NOT NULL,
        is_flagged      INTEGER NOT NULL DEFAULT 0,
        body_text       TEXT,
        body_html       TEXT,
        preview         TEXT    NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS messages_remote_id
    ON messages(remote_id) WHERE superseded = 0;

    CREATE INDEX IF NOT EXISTS messages_remote_key
    ON messages(remote_key);

    CREATE INDEX IF NOT EXISTS messages_immutable_key
    ON messages(immutable_key);

    CREATE INDEX IF NOT EXISTS messages_conversation_id
    ON messages(conversation_id);

    CREATE INDEX IF NOT EXISTS messages_thread
    ON messages(thread_id, activity_at);

    CREATE TABLE IF NOT EXISTS attachments (
        id           TEXT    PRIMARY KEY,
        message_id   TEXT    NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        remote_id    TEXT    NOT NULL,
        file_name    TEXT    NOT NULL,
        content_type TEXT    NOT NULL,
        size         INTEGER NOT NULL,
        is_inline    INTEGER NOT NULL,
        UNIQUE(message_id, remote_id)
    );

    CREATE TABLE IF NOT EXISTS watermarks (
        mailbox   TEXT PRIMARY KEY,
        synced_at TEXT NOT NULL
    );
";
