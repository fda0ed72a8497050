//! SQLx-based storage backend for `whatsapp-rust` — the "protocol-library-owned
//! device store" of §2.1. Implements the library's `Backend` trait
//! (`SignalStore` + `AppSyncStore` + `ProtocolStore` + `DeviceStore`) against
//! SQLite, independently of the application message store in
//! [`crate::store`].

mod app_sync_store;
mod device_store;
mod protocol_store;
mod signal_store;

use sqlx::{Pool, Sqlite, SqlitePool};

/// SQLx-backed WhatsApp session store — device identity, Signal protocol
/// state, and app-state sync keys.
pub struct SqlxDeviceStore {
    pool: Pool<Sqlite>,
}

impl SqlxDeviceStore {
    /// Open (creating if missing) the device database at `db_path` and
    /// initialize its schema.
    pub async fn new(db_path: &str) -> std::result::Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(&format!("sqlite:{db_path}?mode=rwc")).await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_identities (
                address TEXT PRIMARY KEY,
                key_data BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_sessions (
                address TEXT PRIMARY KEY,
                session_data BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_prekeys (
                id INTEGER PRIMARY KEY,
                record BLOB NOT NULL,
                uploaded INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_signed_prekeys (
                id INTEGER PRIMARY KEY,
                record BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_sender_keys (
                address TEXT PRIMARY KEY,
                record BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_app_sync_keys (
                key_id BLOB PRIMARY KEY,
                key_data BLOB NOT NULL,
                timestamp INTEGER NOT NULL DEFAULT 0,
                fingerprint BLOB
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_app_versions (
                collection TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_mutation_macs (
                collection TEXT NOT NULL,
                index_mac BLOB NOT NULL,
                version INTEGER NOT NULL,
                value_mac BLOB NOT NULL,
                PRIMARY KEY (collection, index_mac)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_skdm_recipients (
                group_jid TEXT NOT NULL,
                device_jid TEXT NOT NULL,
                PRIMARY KEY (group_jid, device_jid)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_lid_mappings (
                lid TEXT PRIMARY KEY,
                phone_number TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0,
                learning_source TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_base_keys (
                address TEXT NOT NULL,
                message_id TEXT NOT NULL,
                base_key BLOB NOT NULL,
                PRIMARY KEY (address, message_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_device_lists (
                user TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_forget_sender_keys (
                group_jid TEXT NOT NULL,
                participant TEXT NOT NULL,
                PRIMARY KEY (group_jid, participant)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wa_device_info (
                id INTEGER PRIMARY KEY,
                data BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Whether a device identity has already been persisted — drives the
    /// `initializing → {connecting | waiting_for_*}` branch of §4.4.
    pub async fn has_device(&self) -> std::result::Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM wa_device_info WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Wipe every table — used by `POST /api/auth/start` to discard a stored
    /// identity and force a fresh QR pairing.
    pub async fn wipe(&self) -> std::result::Result<(), sqlx::Error> {
        for table in [
            "wa_identities",
            "wa_sessions",
            "wa_prekeys",
            "wa_signed_prekeys",
            "wa_sender_keys",
            "wa_app_sync_keys",
            "wa_app_versions",
            "wa_mutation_macs",
            "wa_skdm_recipients",
            "wa_lid_mappings",
            "wa_base_keys",
            "wa_device_lists",
            "wa_forget_sender_keys",
            "wa_device_info",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
