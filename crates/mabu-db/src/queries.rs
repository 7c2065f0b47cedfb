use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, types::Type};

use crate::models::{
    ConversationRow, MessageRow, NewMessage, NewUser, NotificationRow, UserRow,
};
use crate::{Database, parse_db_time, to_db_time};

const USER_COLUMNS: &str = "id, username, email, password_hash, role, is_active, email_verified,
     verification_code, verification_expires_at, avatar_url, created_at";

const MESSAGE_SELECT: &str = "SELECT m.id, m.from_user_id, m.to_user_id, m.body, m.image_url, m.listing_id,
            l.title, l.price, l.thumbnail, l.id IS NOT NULL, m.created_at, m.is_read
     FROM messages m
     LEFT JOIN listings l ON l.id = m.listing_id";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>, now: DateTime<Utc>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users
                    (username, email, password_hash, verification_code, verification_expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.username,
                    user.email,
                    user.password_hash,
                    user.verification_code,
                    user.verification_expires_at.map(to_db_time),
                    to_db_time(now),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", rusqlite::params![id]))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", rusqlite::params![email]))
    }

    /// Look up by login name or email. An exact username match wins over an
    /// email match.
    pub fn get_user_by_login(&self, identifier: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(
                conn,
                "username = ?1 OR email = ?1 ORDER BY username = ?1 DESC LIMIT 1",
                rusqlite::params![identifier],
            )
        })
    }

    pub fn username_or_email_taken(&self, username: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let taken = conn
                .query_row(
                    "SELECT 1 FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
                    rusqlite::params![username, email],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(taken)
        })
    }

    pub fn set_verification_code(
        &self,
        user_id: i64,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET verification_code = ?1, verification_expires_at = ?2 WHERE id = ?3",
                rusqlite::params![code, to_db_time(expires_at), user_id],
            )?;
            Ok(())
        })
    }

    pub fn mark_email_verified(&self, user_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users
                 SET email_verified = 1, verification_code = NULL, verification_expires_at = NULL
                 WHERE id = ?1",
                [user_id],
            )?;
            Ok(())
        })
    }

    /// Returns false when no such user exists.
    pub fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_active = ?1 WHERE id = ?2",
                rusqlite::params![active, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Sessions --

    pub fn insert_session(
        &self,
        user_id: i64,
        token_hash: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO sessions (user_id, token_hash, issued_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, token_hash, to_db_time(issued_at), to_db_time(expires_at)],
            )?;
            Ok(())
        })
    }

    /// Owner of an unexpired session. Expired rows are treated as absent.
    pub fn find_session_user(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(
                conn,
                "id = (SELECT user_id FROM sessions WHERE token_hash = ?1 AND expires_at > ?2)",
                rusqlite::params![token_hash, to_db_time(now)],
            )
        })
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>, now: DateTime<Utc>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (from_user_id, to_user_id, body, image_url, listing_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    msg.from_user_id,
                    msg.to_user_id,
                    msg.body,
                    msg.image_url,
                    msg.listing_id,
                    to_db_time(now),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
            Ok(conn.query_row(&sql, [id], map_message).optional()?)
        })
    }

    /// Every message between the two users, oldest first. Symmetric in its
    /// arguments.
    pub fn get_thread(&self, user_id: i64, other_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE (m.from_user_id = ?1 AND m.to_user_id = ?2)
                    OR (m.from_user_id = ?2 AND m.to_user_id = ?1)
                 ORDER BY m.created_at ASC, m.id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, other_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Latest message per conversation partner, most recent conversation first.
    pub fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH touching AS (
                     SELECT id, from_user_id, to_user_id, body, image_url, listing_id, created_at,
                            CASE WHEN from_user_id = ?1 THEN to_user_id ELSE from_user_id END
                                AS partner_id
                     FROM messages
                     WHERE from_user_id = ?1 OR to_user_id = ?1
                 ),
                 ranked AS (
                     SELECT *, ROW_NUMBER() OVER (
                         PARTITION BY partner_id
                         ORDER BY created_at DESC, id DESC
                     ) AS rn
                     FROM touching
                 )
                 SELECT r.partner_id, u.username, u.avatar_url,
                        r.id, r.body, r.image_url, r.listing_id, r.from_user_id, r.created_at
                 FROM ranked r
                 LEFT JOIN users u ON u.id = r.partner_id
                 WHERE r.rn = 1
                 ORDER BY r.created_at DESC, r.id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationRow {
                        partner_id: row.get(0)?,
                        partner_name: row.get(1)?,
                        partner_avatar: row.get(2)?,
                        message_id: row.get(3)?,
                        body: row.get(4)?,
                        image_url: row.get(5)?,
                        listing_id: row.get(6)?,
                        from_user_id: row.get(7)?,
                        created_at: time_col(row, 8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flip unread -> read for everything `from_user_id` sent to `user_id`.
    /// Returns how many rows changed.
    pub fn mark_read(&self, user_id: i64, from_user_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE to_user_id = ?1 AND from_user_id = ?2 AND is_read = 0",
                rusqlite::params![user_id, from_user_id],
            )?)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        recipient_id: i64,
        category: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notifications (recipient_id, category, body, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![recipient_id, category, body, to_db_time(now)],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, recipient_id, category, body, is_read, created_at
                     FROM notifications WHERE id = ?1",
                    [id],
                    map_notification,
                )
                .optional()?)
        })
    }

    pub fn list_notifications(&self, recipient_id: i64) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, category, body, is_read, created_at
                 FROM notifications
                 WHERE recipient_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([recipient_id], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Scoped to the recipient; someone else's notification is never touched.
    pub fn mark_notification_read(&self, id: i64, recipient_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
                rusqlite::params![id, recipient_id],
            )?)
        })
    }
}

fn query_user(
    conn: &Connection,
    predicate: &str,
    params: impl rusqlite::Params,
) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row(params, map_user).optional()?)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        is_active: row.get(5)?,
        email_verified: row.get(6)?,
        verification_code: row.get(7)?,
        verification_expires_at: opt_time_col(row, 8)?,
        avatar_url: row.get(9)?,
        created_at: time_col(row, 10)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        from_user_id: row.get(1)?,
        to_user_id: row.get(2)?,
        body: row.get(3)?,
        image_url: row.get(4)?,
        listing_id: row.get(5)?,
        listing_title: row.get(6)?,
        listing_price: row.get(7)?,
        listing_thumbnail: row.get(8)?,
        listing_exists: row.get(9)?,
        created_at: time_col(row, 10)?,
        is_read: row.get(11)?,
    })
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        category: row.get(2)?,
        body: row.get(3)?,
        is_read: row.get(4)?,
        created_at: time_col(row, 5)?,
    })
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        parse_db_time(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
    })
    .transpose()
}
