use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (accounts, sessions, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                       INTEGER PRIMARY KEY AUTOINCREMENT,
                username                 TEXT NOT NULL UNIQUE,
                email                    TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash            TEXT NOT NULL,
                role                     TEXT NOT NULL DEFAULT 'user'
                                         CHECK (role IN ('user', 'admin')),
                is_active                INTEGER NOT NULL DEFAULT 1,
                email_verified           INTEGER NOT NULL DEFAULT 0,
                verification_code        TEXT,
                verification_expires_at  TEXT,
                avatar_url               TEXT,
                created_at               TEXT NOT NULL
            );

            CREATE TABLE sessions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                token_hash  TEXT NOT NULL UNIQUE,
                issued_at   TEXT NOT NULL,
                expires_at  TEXT NOT NULL
            );

            CREATE INDEX idx_sessions_user ON sessions(user_id);

            -- Owned by the listing subsystem; only read here for enrichment.
            CREATE TABLE IF NOT EXISTS listings (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                title       TEXT NOT NULL,
                price       INTEGER,
                thumbnail   TEXT
            );

            -- listing_id is a weak reference: no foreign key.
            CREATE TABLE messages (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                from_user_id  INTEGER NOT NULL REFERENCES users(id),
                to_user_id    INTEGER NOT NULL REFERENCES users(id),
                body          TEXT NOT NULL DEFAULT '',
                image_url     TEXT,
                listing_id    INTEGER,
                created_at    TEXT NOT NULL,
                is_read       INTEGER NOT NULL DEFAULT 0,
                CHECK (from_user_id <> to_user_id)
            );

            CREATE INDEX idx_messages_pair
                ON messages(from_user_id, to_user_id, created_at);
            CREATE INDEX idx_messages_inbox
                ON messages(to_user_id, from_user_id, is_read);

            -- Only the read flag may change after insert.
            CREATE TRIGGER messages_immutable
                BEFORE UPDATE OF from_user_id, to_user_id, body, image_url, listing_id, created_at
                ON messages
            BEGIN
                SELECT RAISE(ABORT, 'messages are immutable');
            END;

            CREATE TABLE notifications (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id  INTEGER NOT NULL REFERENCES users(id),
                category      TEXT NOT NULL,
                body          TEXT NOT NULL,
                is_read       INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_recipient
                ON notifications(recipient_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
