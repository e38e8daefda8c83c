//! SQLite-backed message store. One row per ingested message, immutable
//! except for the processed flag the report service flips after delivery.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;

use svodka_schema::ports::MessageStore;
use svodka_schema::{ChatId, DayWindow, MsgId, StoredMessage};

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Idempotent ingestion upsert: a duplicate (chat_id, id) row is
    /// swallowed silently.
    pub async fn insert_message(&self, message: StoredMessage) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO messages (id, chat_id, timestamp, from_user, reply_to, text)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(chat_id, id) DO NOTHING
                "#,
                params![
                    message.id.0,
                    message.chat_id.0,
                    message.timestamp,
                    message.from_user,
                    message.reply_to.map(|id| id.0),
                    message.text,
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    pub async fn upsert_chat_title(&self, chat_id: ChatId, title: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let title = title.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO chats (chat_id, title) VALUES (?1, ?2)
                ON CONFLICT(chat_id) DO UPDATE SET title = excluded.title
                "#,
                params![chat_id.0, title],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn messages_for_day(
        &self,
        chat_id: ChatId,
        window: &DayWindow,
    ) -> Result<Vec<StoredMessage>> {
        let db = Arc::clone(&self.db);
        let (start, end) = (window.start_ts, window.end_ts);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, chat_id, timestamp, from_user, reply_to, text
                FROM messages
                WHERE chat_id = ?1 AND timestamp >= ?2 AND timestamp < ?3 AND processed = 0
                ORDER BY timestamp ASC, id ASC
                "#,
            )?;
            let rows = stmt.query_map(params![chat_id.0, start, end], row_to_message)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok::<Vec<StoredMessage>, anyhow::Error>(messages)
        })
        .await?
    }

    async fn active_chats(&self, window: &DayWindow) -> Result<Vec<ChatId>> {
        let db = Arc::clone(&self.db);
        let (start, end) = (window.start_ts, window.end_ts);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT DISTINCT chat_id FROM messages
                WHERE timestamp >= ?1 AND timestamp < ?2 AND processed = 0
                ORDER BY chat_id
                "#,
            )?;
            let rows = stmt.query_map(params![start, end], |row| row.get::<_, i64>(0))?;
            let mut chats = Vec::new();
            for row in rows {
                chats.push(ChatId(row?));
            }
            Ok::<Vec<ChatId>, anyhow::Error>(chats)
        })
        .await?
    }

    async fn mark_processed(&self, chat_id: ChatId, window: &DayWindow) -> Result<()> {
        let db = Arc::clone(&self.db);
        let (start, end) = (window.start_ts, window.end_ts);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let changed = conn.execute(
                r#"
                UPDATE messages SET processed = 1
                WHERE chat_id = ?1 AND timestamp >= ?2 AND timestamp < ?3 AND processed = 0
                "#,
                params![chat_id.0, start, end],
            )?;
            tracing::debug!(chat_id = chat_id.0, changed, "marked messages processed");
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    async fn chat_title(&self, chat_id: ChatId) -> Result<Option<String>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let title = conn
                .query_row(
                    "SELECT title FROM chats WHERE chat_id = ?1",
                    params![chat_id.0],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            Ok::<Option<String>, anyhow::Error>(title.flatten())
        })
        .await?
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER NOT NULL,
            chat_id INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            from_user TEXT NOT NULL,
            reply_to INTEGER,
            text TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (chat_id, id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
            ON messages (chat_id, timestamp);
        CREATE TABLE IF NOT EXISTS chats (
            chat_id INTEGER PRIMARY KEY,
            title TEXT
        );
        "#,
    )?;
    Ok(())
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: MsgId(row.get(0)?),
        chat_id: ChatId(row.get(1)?),
        timestamp: row.get(2)?,
        from_user: row.get(3)?,
        reply_to: row.get::<_, Option<i64>>(4)?.map(MsgId),
        text: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> DayWindow {
        DayWindow::for_date(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            chrono_tz::UTC,
        )
    }

    fn message(id: i64, chat: i64, offset_secs: i64, user: &str) -> StoredMessage {
        StoredMessage {
            id: MsgId(id),
            chat_id: ChatId(chat),
            timestamp: window().start_ts + offset_secs,
            from_user: user.to_string(),
            reply_to: None,
            text: format!("message {id}"),
        }
    }

    #[tokio::test]
    async fn insert_and_query_ordered() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(message(2, 10, 120, "bob")).await.unwrap();
        store.insert_message(message(1, 10, 60, "alice")).await.unwrap();

        let messages = store.messages_for_day(ChatId(10), &window()).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, MsgId(1));
        assert_eq!(messages[1].id, MsgId(2));
    }

    #[tokio::test]
    async fn duplicate_insert_is_swallowed() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(message(1, 10, 60, "alice")).await.unwrap();
        let mut dup = message(1, 10, 60, "alice");
        dup.text = "changed".to_string();
        store.insert_message(dup).await.unwrap();

        let messages = store.messages_for_day(ChatId(10), &window()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "message 1");
    }

    #[tokio::test]
    async fn same_id_in_different_chats_is_not_a_duplicate() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(message(1, 10, 60, "alice")).await.unwrap();
        store.insert_message(message(1, 20, 60, "bob")).await.unwrap();

        assert_eq!(store.active_chats(&window()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn day_window_excludes_outside_messages() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(message(1, 10, -10, "alice")).await.unwrap();
        store.insert_message(message(2, 10, 60, "alice")).await.unwrap();
        store.insert_message(message(3, 10, 86_400, "alice")).await.unwrap();

        let messages = store.messages_for_day(ChatId(10), &window()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, MsgId(2));
    }

    #[tokio::test]
    async fn mark_processed_is_idempotent_and_scoped() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(message(1, 10, 60, "alice")).await.unwrap();
        store.insert_message(message(2, 20, 60, "bob")).await.unwrap();

        store.mark_processed(ChatId(10), &window()).await.unwrap();
        store.mark_processed(ChatId(10), &window()).await.unwrap();

        assert!(store
            .messages_for_day(ChatId(10), &window())
            .await
            .unwrap()
            .is_empty());
        // Other chats untouched.
        assert_eq!(store.active_chats(&window()).await.unwrap(), vec![ChatId(20)]);
    }

    #[tokio::test]
    async fn chat_title_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.chat_title(ChatId(10)).await.unwrap(), None);

        store.upsert_chat_title(ChatId(10), "Проект Альфа").await.unwrap();
        store.upsert_chat_title(ChatId(10), "Проект Бета").await.unwrap();
        assert_eq!(
            store.chat_title(ChatId(10)).await.unwrap(),
            Some("Проект Бета".to_string())
        );
    }

    #[tokio::test]
    async fn open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svodka.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_message(message(1, 10, 60, "alice")).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let messages = store.messages_for_day(ChatId(10), &window()).await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}
