//! Database layer for the Courier server using SQLite
//!
//! Stores users, conversations, messages, and notifications, and owns the
//! pair-resolution, ordering, and read-state queries the messaging core
//! builds on.

use crate::models::{Conversation, Message, Notification, User};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use uuid::Uuid;

/// Database connection pool and operations
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database at the given path, creating the file if missing.
    /// `":memory:"` opens an in-memory database.
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        // Each connection to ":memory:" gets its own database, so the
        // in-memory pool is capped at a single connection.
        let pool = if db_path.as_ref().to_str() == Some(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .context("Failed to open in-memory SQLite database")?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(db_path.as_ref())
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
                .context("Failed to connect to SQLite database")?
        };

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations to create or update schema
    async fn run_migrations(&self) -> Result<()> {
        // Create users table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY NOT NULL,
                display_name TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create users table")?;

        // Create conversations table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY NOT NULL,
                title TEXT,
                user_a TEXT NOT NULL,
                user_b TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (user_a) REFERENCES users (id),
                FOREIGN KEY (user_b) REFERENCES users (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create conversations table")?;

        // Create messages table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY NOT NULL,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                read_at INTEGER,
                FOREIGN KEY (conversation_id) REFERENCES conversations (id) ON DELETE CASCADE,
                FOREIGN KEY (sender_id) REFERENCES users (id),
                FOREIGN KEY (receiver_id) REFERENCES users (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create messages table")?;

        // Create notifications table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                kind TEXT NOT NULL,
                related_id TEXT,
                created_at INTEGER NOT NULL,
                read_at INTEGER,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create notifications table")?;

        // One conversation per normalized pair; concurrent first-contact
        // inserts collide here and the loser re-queries the winner's row.
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair ON conversations (user_a, user_b)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_user_a ON conversations (user_a)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_user_b ON conversations (user_b)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations (updated_at DESC)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages (conversation_id, created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages (conversation_id, receiver_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications (user_id, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ── User operations ──

    pub async fn create_user(&self, display_name: Option<&str>) -> Result<User> {
        let user_id = Uuid::new_v4();
        let created_at = now();

        sqlx::query("INSERT INTO users (id, display_name, created_at) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind(display_name)
            .bind(created_at as i64)
            .execute(&self.pool)
            .await
            .context("Failed to insert user")?;

        Ok(User {
            id: user_id,
            display_name: display_name.map(|s| s.to_string()),
            created_at,
        })
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, display_name, created_at FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query user")?;

        row.map(|r| parse_user(&r)).transpose()
    }

    // ── Conversation operations ──

    /// Find the conversation for an unordered pair of users, creating it if
    /// none exists yet. Both participant orders resolve to the same row; a
    /// concurrent duplicate insert is recovered by re-querying the pair.
    pub async fn find_or_create_conversation(
        &self,
        initiator: Uuid,
        counterpart: Uuid,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let (user_a, user_b) = normalize_pair(initiator, counterpart);

        if let Some(existing) = self.get_conversation_by_pair(user_a, user_b).await? {
            return Ok(existing);
        }

        let conversation_id = Uuid::new_v4();
        let created_at = now();

        let inserted = sqlx::query(
            "INSERT INTO conversations (id, title, user_a, user_b, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation_id.to_string())
        .bind(title)
        .bind(user_a.to_string())
        .bind(user_b.to_string())
        .bind(created_at as i64)
        .bind(created_at as i64)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(Conversation {
                id: conversation_id,
                title: title.map(|s| s.to_string()),
                user_a,
                user_b,
                created_at,
                updated_at: created_at,
            }),
            // Another writer created the pair first, hand back its row
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => self
                .get_conversation_by_pair(user_a, user_b)
                .await?
                .context("Conversation missing after duplicate pair insert"),
            Err(err) => Err(err).context("Failed to insert conversation"),
        }
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, title, user_a, user_b, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query conversation")?;

        row.map(|r| parse_conversation(&r)).transpose()
    }

    pub async fn get_conversation_by_pair(&self, first: Uuid, second: Uuid) -> Result<Option<Conversation>> {
        let (user_a, user_b) = normalize_pair(first, second);
        let row = sqlx::query(
            "SELECT id, title, user_a, user_b, created_at, updated_at FROM conversations WHERE user_a = ? AND user_b = ?",
        )
        .bind(user_a.to_string())
        .bind(user_b.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query conversation by pair")?;

        row.map(|r| parse_conversation(&r)).transpose()
    }

    /// List a user's conversations, most recently active first. An optional
    /// keyword filters on the title; conversations without a title never
    /// match a keyword.
    pub async fn list_conversations(
        &self,
        user_id: Uuid,
        keyword: Option<&str>,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Conversation>> {
        let offset = (page.saturating_sub(1) as i64) * (limit as i64);
        let uid = user_id.to_string();

        let rows = if let Some(keyword) = keyword {
            sqlx::query(
                r#"
                SELECT id, title, user_a, user_b, created_at, updated_at
                FROM conversations
                WHERE (user_a = ? OR user_b = ?) AND title LIKE ? ESCAPE '\'
                ORDER BY updated_at DESC, rowid DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(&uid)
            .bind(&uid)
            .bind(format!("%{}%", escape_like(keyword)))
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT id, title, user_a, user_b, created_at, updated_at
                FROM conversations
                WHERE user_a = ? OR user_b = ?
                ORDER BY updated_at DESC, rowid DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(&uid)
            .bind(&uid)
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
        .context("Failed to query conversations")?;

        rows.iter().map(|r| parse_conversation(r)).collect()
    }

    pub async fn count_conversations(&self, user_id: Uuid, keyword: Option<&str>) -> Result<u64> {
        let uid = user_id.to_string();
        let row = if let Some(keyword) = keyword {
            sqlx::query(
                "SELECT COUNT(*) as count FROM conversations WHERE (user_a = ? OR user_b = ?) AND title LIKE ? ESCAPE '\\'",
            )
            .bind(&uid)
            .bind(&uid)
            .bind(format!("%{}%", escape_like(keyword)))
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT COUNT(*) as count FROM conversations WHERE user_a = ? OR user_b = ?")
                .bind(&uid)
                .bind(&uid)
                .fetch_one(&self.pool)
                .await?
        };
        Ok(row.get::<i64, _>("count") as u64)
    }

    // ── Message operations ──

    /// Append a message and bump the conversation's `updated_at` to the
    /// message's creation time. Both writes commit together or not at all.
    pub async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        text: &str,
    ) -> Result<Message> {
        let message_id = Uuid::new_v4();
        let created_at = now();

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, text, created_at, read_at) VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(message_id.to_string())
        .bind(conversation_id.to_string())
        .bind(sender_id.to_string())
        .bind(receiver_id.to_string())
        .bind(text)
        .bind(created_at as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to insert message")?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(created_at as i64)
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to bump conversation activity")?;

        tx.commit().await.context("Failed to commit message")?;

        Ok(Message {
            id: message_id,
            conversation_id,
            sender_id,
            receiver_id,
            text: text.to_string(),
            created_at,
            read_at: None,
        })
    }

    /// Full history of a conversation, oldest first. Ties on `created_at`
    /// fall back to insertion order.
    pub async fn get_conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, receiver_id, text, created_at, read_at FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query conversation messages")?;

        rows.iter().map(|r| parse_message(r)).collect()
    }

    pub async fn get_last_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT id, conversation_id, sender_id, receiver_id, text, created_at, read_at FROM messages WHERE conversation_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query last message")?;

        row.map(|r| parse_message(&r)).transpose()
    }

    /// Mark every unread message addressed to `receiver_id` in the
    /// conversation as read. Messages already read keep their original
    /// `read_at`. Returns how many messages transitioned.
    pub async fn mark_messages_read(&self, conversation_id: Uuid, receiver_id: Uuid) -> Result<u64> {
        let read_at = now();
        let result = sqlx::query(
            "UPDATE messages SET read_at = ? WHERE conversation_id = ? AND receiver_id = ? AND read_at IS NULL",
        )
        .bind(read_at as i64)
        .bind(conversation_id.to_string())
        .bind(receiver_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to mark messages read")?;

        Ok(result.rows_affected())
    }

    pub async fn count_unread_messages(&self, conversation_id: Uuid, receiver_id: Uuid) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM messages WHERE conversation_id = ? AND receiver_id = ? AND read_at IS NULL",
        )
        .bind(conversation_id.to_string())
        .bind(receiver_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    // ── Notification operations ──

    pub async fn create_notification(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        kind: &str,
        related_id: Option<Uuid>,
    ) -> Result<Notification> {
        let notification_id = Uuid::new_v4();
        let created_at = now();

        sqlx::query(
            "INSERT INTO notifications (id, user_id, title, body, kind, related_id, created_at, read_at) VALUES (?, ?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(notification_id.to_string())
        .bind(user_id.to_string())
        .bind(title)
        .bind(body)
        .bind(kind)
        .bind(related_id.map(|id| id.to_string()))
        .bind(created_at as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert notification")?;

        Ok(Notification {
            id: notification_id,
            user_id,
            title: title.to_string(),
            body: body.to_string(),
            kind: kind.to_string(),
            related_id,
            created_at,
            read_at: None,
        })
    }

    pub async fn get_notification(&self, notification_id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, body, kind, related_id, created_at, read_at FROM notifications WHERE id = ?",
        )
        .bind(notification_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query notification")?;

        row.map(|r| parse_notification(&r)).transpose()
    }

    pub async fn list_notifications(&self, user_id: Uuid, page: u32, limit: u32) -> Result<Vec<Notification>> {
        let offset = (page.saturating_sub(1) as i64) * (limit as i64);
        let rows = sqlx::query(
            "SELECT id, user_id, title, body, kind, related_id, created_at, read_at FROM notifications WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query notifications")?;

        rows.iter().map(|r| parse_notification(r)).collect()
    }

    pub async fn count_notifications(&self, user_id: Uuid) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM notifications WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    pub async fn count_unread_notifications(&self, user_id: Uuid) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM notifications WHERE user_id = ? AND read_at IS NULL",
        )
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    /// Mark one notification as read. Returns false if it was already read.
    pub async fn mark_notification_read(&self, notification_id: Uuid) -> Result<bool> {
        let read_at = now();
        let result = sqlx::query("UPDATE notifications SET read_at = ? WHERE id = ? AND read_at IS NULL")
            .bind(read_at as i64)
            .bind(notification_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to mark notification read")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u64> {
        let read_at = now();
        let result = sqlx::query(
            "UPDATE notifications SET read_at = ? WHERE user_id = ? AND read_at IS NULL",
        )
        .bind(read_at as i64)
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to mark notifications read")?;
        Ok(result.rows_affected())
    }

    /// Delete one notification. Returns false if no row matched.
    pub async fn delete_notification(&self, notification_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(notification_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete notification")?;
        Ok(result.rows_affected() > 0)
    }
}

// ── Helpers ──

/// Order a pair of user ids so both orders map to the same stored pair.
pub fn normalize_pair(first: Uuid, second: Uuid) -> (Uuid, Uuid) {
    if first <= second {
        (first, second)
    } else {
        (second, first)
    }
}

/// Escape `\`, `%`, and `_` so a keyword matches as a literal substring
/// under `LIKE ... ESCAPE '\'`. The backslash must be escaped first.
fn escape_like(keyword: &str) -> String {
    keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn parse_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        display_name: row.get("display_name"),
        created_at: row.get::<i64, _>("created_at") as u64,
    })
}

fn parse_conversation(row: &SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        title: row.get("title"),
        user_a: Uuid::parse_str(&row.get::<String, _>("user_a"))?,
        user_b: Uuid::parse_str(&row.get::<String, _>("user_b"))?,
        created_at: row.get::<i64, _>("created_at") as u64,
        updated_at: row.get::<i64, _>("updated_at") as u64,
    })
}

fn parse_message(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        conversation_id: Uuid::parse_str(&row.get::<String, _>("conversation_id"))?,
        sender_id: Uuid::parse_str(&row.get::<String, _>("sender_id"))?,
        receiver_id: Uuid::parse_str(&row.get::<String, _>("receiver_id"))?,
        text: row.get("text"),
        created_at: row.get::<i64, _>("created_at") as u64,
        read_at: row.get::<Option<i64>, _>("read_at").map(|t| t as u64),
    })
}

fn parse_notification(row: &SqliteRow) -> Result<Notification> {
    Ok(Notification {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        title: row.get("title"),
        body: row.get("body"),
        kind: row.get("kind"),
        related_id: row
            .get::<Option<String>, _>("related_id")
            .map(|s| Uuid::parse_str(&s))
            .transpose()?,
        created_at: row.get::<i64, _>("created_at") as u64,
        read_at: row.get::<Option<i64>, _>("read_at").map(|t| t as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn test_db() -> Database {
        Database::new(":memory:").await.expect("Failed to create in-memory database")
    }

    #[tokio::test]
    async fn test_database_initialization() {
        let _db = test_db().await;
    }

    #[tokio::test]
    async fn test_user_operations() {
        let db = test_db().await;

        let user = db.create_user(Some("Maya")).await.unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Maya"));

        let anonymous = db.create_user(None).await.unwrap();
        assert_eq!(anonymous.display_name, None);

        let found = db.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.display_name.as_deref(), Some("Maya"));

        assert!(db.get_user(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_resolution_is_symmetric() {
        let db = test_db().await;
        let alice = db.create_user(Some("Alice")).await.unwrap();
        let bob = db.create_user(Some("Bob")).await.unwrap();

        let first = db
            .find_or_create_conversation(alice.id, bob.id, Some("Kitchen repair"))
            .await
            .unwrap();
        let second = db
            .find_or_create_conversation(bob.id, alice.id, Some("something else"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        // The title set at creation wins; later resolutions do not retitle
        assert_eq!(second.title.as_deref(), Some("Kitchen repair"));

        let by_pair = db.get_conversation_by_pair(bob.id, alice.id).await.unwrap().unwrap();
        assert_eq!(by_pair.id, first.id);

        let by_id = db.get_conversation(first.id).await.unwrap().unwrap();
        assert!(by_id.is_participant(alice.id));
        assert!(by_id.is_participant(bob.id));
        assert_eq!(by_id.counterpart_of(alice.id), bob.id);
    }

    #[tokio::test]
    async fn test_append_bumps_conversation_activity() {
        let db = test_db().await;
        let alice = db.create_user(Some("Alice")).await.unwrap();
        let bob = db.create_user(Some("Bob")).await.unwrap();
        let conversation = db
            .find_or_create_conversation(alice.id, bob.id, None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let message = db
            .append_message(conversation.id, alice.id, bob.id, "hello")
            .await
            .unwrap();

        let refreshed = db.get_conversation(conversation.id).await.unwrap().unwrap();
        assert_eq!(refreshed.updated_at, message.created_at);
        assert!(refreshed.updated_at > conversation.updated_at);
    }

    #[tokio::test]
    async fn test_message_history_preserves_send_order() {
        let db = test_db().await;
        let alice = db.create_user(None).await.unwrap();
        let bob = db.create_user(None).await.unwrap();
        let conversation = db
            .find_or_create_conversation(alice.id, bob.id, None)
            .await
            .unwrap();

        for n in 0..5 {
            db.append_message(conversation.id, alice.id, bob.id, &format!("msg {}", n))
                .await
                .unwrap();
        }

        let history = db.get_conversation_messages(conversation.id).await.unwrap();
        assert_eq!(history.len(), 5);
        for (n, message) in history.iter().enumerate() {
            assert_eq!(message.text, format!("msg {}", n));
        }

        let last = db.get_last_message(conversation.id).await.unwrap().unwrap();
        assert_eq!(last.text, "msg 4");
    }

    #[tokio::test]
    async fn test_read_state_is_scoped_to_receiver() {
        let db = test_db().await;
        let alice = db.create_user(None).await.unwrap();
        let bob = db.create_user(None).await.unwrap();
        let conversation = db
            .find_or_create_conversation(alice.id, bob.id, None)
            .await
            .unwrap();

        db.append_message(conversation.id, alice.id, bob.id, "one").await.unwrap();
        db.append_message(conversation.id, alice.id, bob.id, "two").await.unwrap();
        db.append_message(conversation.id, bob.id, alice.id, "reply").await.unwrap();

        assert_eq!(db.count_unread_messages(conversation.id, bob.id).await.unwrap(), 2);
        assert_eq!(db.count_unread_messages(conversation.id, alice.id).await.unwrap(), 1);

        let transitioned = db.mark_messages_read(conversation.id, bob.id).await.unwrap();
        assert_eq!(transitioned, 2);
        assert_eq!(db.count_unread_messages(conversation.id, bob.id).await.unwrap(), 0);
        // Alice's incoming message is untouched
        assert_eq!(db.count_unread_messages(conversation.id, alice.id).await.unwrap(), 1);

        // Second pass transitions nothing
        assert_eq!(db.mark_messages_read(conversation.id, bob.id).await.unwrap(), 0);

        let history = db.get_conversation_messages(conversation.id).await.unwrap();
        assert!(history[0].read_at.is_some());
        assert!(history[1].read_at.is_some());
        assert!(history[2].read_at.is_none());
    }

    #[tokio::test]
    async fn test_conversation_listing_filters_and_pages() {
        let db = test_db().await;
        let user = db.create_user(Some("Hub")).await.unwrap();
        let mut conversations = Vec::new();
        for title in [Some("Plumbing quote"), Some("Garden cleanup"), None] {
            let other = db.create_user(None).await.unwrap();
            let conversation = db
                .find_or_create_conversation(user.id, other.id, title)
                .await
                .unwrap();
            db.append_message(conversation.id, other.id, user.id, "hi").await.unwrap();
            conversations.push(conversation);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Most recently active first
        let listed = db.list_conversations(user.id, None, 1, 20).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, conversations[2].id);
        assert_eq!(listed[2].id, conversations[0].id);
        assert_eq!(db.count_conversations(user.id, None).await.unwrap(), 3);

        // Keyword matches case-insensitively; untitled conversations never match
        let filtered = db.list_conversations(user.id, Some("plumb"), 1, 20).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, conversations[0].id);
        assert_eq!(db.count_conversations(user.id, Some("plumb")).await.unwrap(), 1);
        assert_eq!(db.count_conversations(user.id, Some("quote")).await.unwrap(), 1);
        assert!(db.list_conversations(user.id, Some("zzz"), 1, 20).await.unwrap().is_empty());

        // Pagination
        let page_one = db.list_conversations(user.id, None, 1, 2).await.unwrap();
        let page_two = db.list_conversations(user.id, None, 2, 2).await.unwrap();
        assert_eq!(page_one.len(), 2);
        assert_eq!(page_two.len(), 1);
        assert_eq!(page_two[0].id, conversations[0].id);

        // A stranger sees nothing
        let stranger = db.create_user(None).await.unwrap();
        assert!(db.list_conversations(stranger.id, None, 1, 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notification_operations() {
        let db = test_db().await;
        let user = db.create_user(None).await.unwrap();
        let conversation_id = Uuid::new_v4();

        let first = db
            .create_notification(user.id, "New message", "hello there", "message", Some(conversation_id))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = db
            .create_notification(user.id, "New message", "and another", "message", Some(conversation_id))
            .await
            .unwrap();

        let listed = db.list_notifications(user.id, 1, 20).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[0].related_id, Some(conversation_id));

        assert_eq!(db.count_notifications(user.id).await.unwrap(), 2);
        assert_eq!(db.count_unread_notifications(user.id).await.unwrap(), 2);

        assert!(db.mark_notification_read(first.id).await.unwrap());
        assert!(!db.mark_notification_read(first.id).await.unwrap());
        assert_eq!(db.count_unread_notifications(user.id).await.unwrap(), 1);

        assert_eq!(db.mark_all_notifications_read(user.id).await.unwrap(), 1);
        assert_eq!(db.count_unread_notifications(user.id).await.unwrap(), 0);

        let fetched = db.get_notification(first.id).await.unwrap().unwrap();
        assert!(fetched.read_at.is_some());
        assert!(db.get_notification(Uuid::new_v4()).await.unwrap().is_none());

        assert!(db.delete_notification(first.id).await.unwrap());
        assert!(db.get_notification(first.id).await.unwrap().is_none());
        assert_eq!(db.count_notifications(user.id).await.unwrap(), 1);
        // Deleting the same row again matches nothing
        assert!(!db.delete_notification(first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_keyword_wildcards_match_literally() {
        let db = test_db().await;
        let user = db.create_user(None).await.unwrap();
        for title in ["abc", "a_c", "50% off"] {
            let other = db.create_user(None).await.unwrap();
            db.find_or_create_conversation(user.id, other.id, Some(title)).await.unwrap();
        }

        // `_` in a keyword is a literal, not a single-character wildcard
        let underscored = db.list_conversations(user.id, Some("a_c"), 1, 20).await.unwrap();
        assert_eq!(underscored.len(), 1);
        assert_eq!(underscored[0].title.as_deref(), Some("a_c"));
        assert_eq!(db.count_conversations(user.id, Some("a_c")).await.unwrap(), 1);

        // Same for `%`
        let percent = db.list_conversations(user.id, Some("0% o"), 1, 20).await.unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].title.as_deref(), Some("50% off"));

        // Plain substrings still match
        assert_eq!(db.count_conversations(user.id, Some("ab")).await.unwrap(), 1);
        assert_eq!(db.count_conversations(user.id, Some("c")).await.unwrap(), 2);
    }
}
