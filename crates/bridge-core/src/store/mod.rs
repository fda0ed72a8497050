//! Application-owned message store (§4.1) — chats and messages, backed by
//! SQLite via `sqlx`, mirroring the connection-setup and hand-written
//! `query_as` conventions of the teacher's `omega-memory::Store`.

mod chats;
mod messages;
mod types;

pub use types::{Chat, MediaDescriptor, MediaKind, Message, RecentMessage};

use crate::error::BridgeError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Persistent store for chats and messages.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Open (creating if missing) the message database at `<store_dir>/messages.db`
    /// and run schema bootstrap.
    pub async fn open(store_dir: &str) -> Result<Self, BridgeError> {
        std::fs::create_dir_all(store_dir)?;
        let db_path = format!("{store_dir}/messages.db");

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| BridgeError::Persistence(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| BridgeError::Persistence(format!("failed to connect to sqlite: {e}")))?;

        Self::bootstrap_schema(&pool).await?;
        info!("message store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Schema bootstrap: create tables if missing, then apply the single
    /// additive `transcription` migration. "duplicate column" is swallowed
    /// as success per §4.1/§9; any other failure aborts startup.
    async fn bootstrap_schema(pool: &SqlitePool) -> Result<(), BridgeError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                jid TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                last_message_time TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .map_err(|e| BridgeError::Persistence(format!("create chats table: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT NOT NULL,
                chat_jid TEXT NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL,
                is_from_me INTEGER NOT NULL DEFAULT 0,
                media_kind TEXT,
                media_filename TEXT,
                media_url TEXT,
                media_key BLOB,
                file_sha256 BLOB,
                file_enc_sha256 BLOB,
                file_length INTEGER,
                PRIMARY KEY (id, chat_jid),
                FOREIGN KEY (chat_jid) REFERENCES chats(jid)
            )",
        )
        .execute(pool)
        .await
        .map_err(|e| BridgeError::Persistence(format!("create messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)")
            .execute(pool)
            .await
            .map_err(|e| BridgeError::Persistence(format!("create index: {e}")))?;

        match sqlx::query("ALTER TABLE messages ADD COLUMN transcription TEXT")
            .execute(pool)
            .await
        {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.message().contains("duplicate column") => {}
            Err(e) => {
                return Err(BridgeError::Persistence(format!(
                    "transcription column migration: {e}"
                )))
            }
        }

        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_tmp() -> (MessageStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(dir.path().to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let (store, dir) = open_tmp().await;
        drop(store);
        // Reopening re-runs bootstrap; duplicate-column ALTER must not fail startup.
        let store2 = MessageStore::open(dir.path().to_str().unwrap()).await.unwrap();
        let _ = store2;
    }
}
