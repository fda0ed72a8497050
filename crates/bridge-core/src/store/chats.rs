//! Chat upsert and the bare-phone-number alias rewrite (§4.3).

use super::types::RecentMessage;
use super::MessageStore;
use crate::error::BridgeError;
use chrono::{DateTime, Utc};
use std::future::Future;

/// A chat name that is nothing but digits, 8-15 characters long, is almost
/// certainly a phone number WhatsApp hadn't yet resolved to a display name.
fn looks_like_bare_phone_number(name: &str) -> bool {
    let len = name.chars().count();
    (8..=15).contains(&len) && name.chars().all(|c| c.is_ascii_digit())
}

impl MessageStore {
    /// Replace any existing chat row with the same `jid`. Idempotent.
    pub async fn upsert_chat(
        &self,
        jid: &str,
        name: &str,
        last_message_time: DateTime<Utc>,
    ) -> Result<(), BridgeError> {
        sqlx::query(
            "INSERT INTO chats (jid, name, last_message_time) VALUES (?, ?, ?)
             ON CONFLICT(jid) DO UPDATE SET
                name = excluded.name,
                last_message_time = excluded.last_message_time",
        )
        .bind(jid)
        .bind(name)
        .bind(last_message_time.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Set a chat's display name only if a better one wasn't already known —
    /// keeps a human-assigned or server-supplied name from being clobbered by
    /// a later message that only carries the bare sender JID.
    pub async fn upsert_chat_if_better_name(
        &self,
        jid: &str,
        name: &str,
        last_message_time: DateTime<Utc>,
    ) -> Result<(), BridgeError> {
        let existing: Option<(String,)> = sqlx::query_as("SELECT name FROM chats WHERE jid = ?")
            .bind(jid)
            .fetch_optional(self.pool())
            .await?;

        let effective_name = match existing {
            Some((ref existing_name,)) if !existing_name.is_empty() => existing_name.clone(),
            _ => name.to_string(),
        };

        self.upsert_chat(jid, &effective_name, last_message_time)
            .await
    }

    /// Persist a resolved chat name in place (used by the bare-phone-number
    /// alias rewrite below).
    async fn rename_chat(&self, jid: &str, name: &str) -> Result<(), BridgeError> {
        sqlx::query("UPDATE chats SET name = ? WHERE jid = ?")
            .bind(name)
            .bind(jid)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// For every row whose `chat_name` looks like a bare phone number, ask
    /// `resolve` for a better name; if one comes back, rewrite the row in
    /// place *and* persist it on the chat so future reads see it too. Several
    /// rows sharing a chat only trigger one resolution each (a write-through
    /// alias cache for the lifetime of this call), since `resolve` is
    /// expected to be cheap to call repeatedly but callers may memoize.
    pub async fn rewrite_bare_phone_chat_names<F, Fut>(
        &self,
        rows: &mut [RecentMessage],
        resolve: F,
    ) -> Result<(), BridgeError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        use std::collections::HashMap;
        let mut resolved: HashMap<String, Option<String>> = HashMap::new();

        for row in rows.iter_mut() {
            if !looks_like_bare_phone_number(&row.chat_name) {
                continue;
            }
            let better = match resolved.get(&row.chat_jid) {
                Some(cached) => cached.clone(),
                None => {
                    let name = resolve(row.chat_jid.clone()).await;
                    resolved.insert(row.chat_jid.clone(), name.clone());
                    name
                }
            };
            if let Some(better_name) = better {
                if better_name != row.chat_name {
                    self.rename_chat(&row.chat_jid, &better_name).await?;
                    row.chat_name = better_name;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_phone_number_detection() {
        assert!(looks_like_bare_phone_number("27821234567"));
        assert!(looks_like_bare_phone_number("12345678"));
        assert!(!looks_like_bare_phone_number("1234567")); // too short
        assert!(!looks_like_bare_phone_number("Alice"));
        assert!(!looks_like_bare_phone_number("1234567890123456")); // too long
    }

    async fn open_tmp() -> (MessageStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(dir.path().to_str().unwrap())
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn upsert_chat_replaces_row() {
        let (store, _dir) = open_tmp().await;
        let t1 = Utc::now();
        store.upsert_chat("a@s.whatsapp.net", "Alice", t1).await.unwrap();
        let t2 = t1 + chrono::Duration::seconds(5);
        store.upsert_chat("a@s.whatsapp.net", "Alice B", t2).await.unwrap();

        let row: (String, String) =
            sqlx::query_as("SELECT name, last_message_time FROM chats WHERE jid = ?")
                .bind("a@s.whatsapp.net")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(row.0, "Alice B");
        assert_eq!(row.1, t2.to_rfc3339());
    }

    #[tokio::test]
    async fn rewrite_bare_phone_names_persists() {
        let (store, _dir) = open_tmp().await;
        store
            .upsert_chat("27821234567@s.whatsapp.net", "27821234567", Utc::now())
            .await
            .unwrap();

        let mut rows = vec![RecentMessage {
            id: "1".into(),
            chat_jid: "27821234567@s.whatsapp.net".into(),
            chat_name: "27821234567".into(),
            sender: "27821234567".into(),
            content: "hi".into(),
            timestamp: Utc::now().to_rfc3339(),
            is_from_me: false,
            media_kind: None,
            transcription: None,
        }];

        store
            .rewrite_bare_phone_chat_names(&mut rows, |_jid| async { Some("Alice".to_string()) })
            .await
            .unwrap();

        assert_eq!(rows[0].chat_name, "Alice");
        let (name,): (String,) = sqlx::query_as("SELECT name FROM chats WHERE jid = ?")
            .bind("27821234567@s.whatsapp.net")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(name, "Alice");
    }
}
