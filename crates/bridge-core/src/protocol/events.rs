//! Event dispatch from the running bot: connection lifecycle, pairing, and
//! inbound message ingest (§4.3, §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wacore::types::events::Event;
use wacore_binary::jid::Jid;
use whatsapp_rust::client::Client;

use crate::auth::AuthCoordinator;
use crate::store::{MediaDescriptor, MediaKind, MessageStore};

use super::names::{resolve_chat_name, ContactNames, ConversationDisplayName, ConversationNameFields};

/// Top-level event dispatch, wired into `Bot::builder().on_event(...)` in
/// [`super::ProtocolAdapter::build_and_run_bot`].
pub(super) async fn dispatch(
    event: Event,
    client: Arc<Client>,
    auth: &Arc<AuthCoordinator>,
    store: &MessageStore,
    client_store: &Arc<Mutex<Option<Arc<Client>>>>,
    known_names: &Arc<Mutex<HashMap<String, String>>>,
) {
    match event {
        Event::PairingQrCode { code, .. } => {
            info!("qr code ready for pairing");
            auth.set_qr(code).await;
        }
        Event::PairSuccess(_) => {
            info!("pairing succeeded, awaiting connection");
        }
        Event::Connected(_) => {
            info!("connected");
            *client_store.lock().await = Some(client);
            auth.set_connected().await;
        }
        Event::Disconnected(_) => {
            warn!("disconnected");
            *client_store.lock().await = None;
        }
        Event::LoggedOut(_) => {
            warn!("logged out — session invalidated");
            *client_store.lock().await = None;
            auth.set_logged_out().await;
        }
        Event::Message(msg, info) => {
            handle_message(*msg, info, &client, store, known_names).await;
        }
        Event::HistorySync(data) => {
            handle_history_sync(data, store).await;
        }
        _ => {}
    }
}

/// Ingest a single live message (§4.3): resolve the chat name, extract text
/// and media, and upsert both chat and message rows. Audio transcription is
/// kicked off separately by the caller once the message row exists.
async fn handle_message(
    msg: waproto::whatsapp::Message,
    info: wacore::types::message::MessageInfo,
    client: &Arc<Client>,
    store: &MessageStore,
    known_names: &Arc<Mutex<HashMap<String, String>>>,
) {
    let chat_jid = info.source.chat.to_string();
    let sender = info.source.sender.user.clone();
    let is_from_me = info.source.is_from_me;

    debug!(
        "message: is_group={} sender={} chat={}",
        info.source.is_group, sender, chat_jid
    );

    let (text, media) = extract_text_and_media(&msg);

    if text.is_empty() && media.is_none() {
        return;
    }

    let push_name = info.push_name.clone();
    let jid_user = info.source.sender.user.clone();
    if !push_name.is_empty() {
        known_names
            .lock()
            .await
            .insert(jid_user.clone(), push_name.clone());
    }
    let contact = ContactNames {
        full_name: None,
        push_name: if push_name.is_empty() {
            None
        } else {
            Some(push_name.clone())
        },
        business_name: None,
    };
    let chat_name = resolve_chat_name(
        None,
        info.source.is_group,
        &jid_user,
        None,
        None,
        Some(&contact),
        &sender,
    );

    let now = chrono::Utc::now();
    if let Err(e) = store
        .upsert_chat_if_better_name(&chat_jid, &chat_name, now)
        .await
    {
        warn!("failed to upsert chat {chat_jid}: {e}");
        return;
    }

    let msg_id = info.id.clone();
    if let Err(e) = store
        .upsert_message(
            &msg_id,
            &chat_jid,
            &sender,
            &text,
            now,
            is_from_me,
            media.as_ref(),
        )
        .await
    {
        warn!("failed to upsert message {msg_id}: {e}");
        return;
    }

    if let Some(ref descriptor) = media {
        if descriptor.kind == MediaKind::Audio {
            spawn_transcription(client.clone(), store.clone(), msg_id, chat_jid, descriptor.clone());
        }
    }
}

/// Unwrap the layers a real inbound payload may be nested under (device-sent
/// relay, ephemeral/disappearing wrapper, view-once wrapper) and pull out the
/// text body (§4.3: conversation field, else extended-text field, else empty)
/// plus any media descriptor. Shared between live messages and history-sync
/// messages so both ingest paths extract identically.
fn extract_text_and_media(msg: &waproto::whatsapp::Message) -> (String, Option<MediaDescriptor>) {
    let inner = msg
        .device_sent_message
        .as_ref()
        .and_then(|d| d.message.as_deref())
        .or_else(|| {
            msg.ephemeral_message
                .as_ref()
                .and_then(|e| e.message.as_deref())
        })
        .or_else(|| {
            msg.view_once_message
                .as_ref()
                .and_then(|v| v.message.as_deref())
        })
        .unwrap_or(msg);

    let text = inner
        .conversation
        .as_deref()
        .or_else(|| {
            inner
                .extended_text_message
                .as_ref()
                .and_then(|e| e.text.as_deref())
        })
        .unwrap_or("")
        .to_string();

    let media = extract_media_descriptor(inner);
    (text, media)
}

fn extract_media_descriptor(inner: &waproto::whatsapp::Message) -> Option<MediaDescriptor> {
    if let Some(ref img) = inner.image_message {
        let ext = img
            .mimetype
            .as_deref()
            .and_then(|m| m.split('/').nth(1))
            .unwrap_or("jpg");
        return Some(MediaDescriptor {
            kind: MediaKind::Image,
            filename: format!("{}.{ext}", Uuid::new_v4()),
            url: img.url.clone(),
            media_key: img.media_key.clone(),
            file_sha256: img.file_sha256.clone(),
            file_enc_sha256: img.file_enc_sha256.clone(),
            file_length: img.file_length.map(|n| n as i64),
        });
    }
    if let Some(ref vid) = inner.video_message {
        let ext = vid
            .mimetype
            .as_deref()
            .and_then(|m| m.split('/').nth(1))
            .unwrap_or("mp4");
        return Some(MediaDescriptor {
            kind: MediaKind::Video,
            filename: format!("{}.{ext}", Uuid::new_v4()),
            url: vid.url.clone(),
            media_key: vid.media_key.clone(),
            file_sha256: vid.file_sha256.clone(),
            file_enc_sha256: vid.file_enc_sha256.clone(),
            file_length: vid.file_length.map(|n| n as i64),
        });
    }
    if let Some(ref audio) = inner.audio_message {
        return Some(MediaDescriptor {
            kind: MediaKind::Audio,
            filename: format!("{}.ogg", Uuid::new_v4()),
            url: audio.url.clone(),
            media_key: audio.media_key.clone(),
            file_sha256: audio.file_sha256.clone(),
            file_enc_sha256: audio.file_enc_sha256.clone(),
            file_length: audio.file_length.map(|n| n as i64),
        });
    }
    if let Some(ref doc) = inner.document_message {
        let filename = doc
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}.bin", Uuid::new_v4()));
        return Some(MediaDescriptor {
            kind: MediaKind::Document,
            filename,
            url: doc.url.clone(),
            media_key: doc.media_key.clone(),
            file_sha256: doc.file_sha256.clone(),
            file_enc_sha256: doc.file_enc_sha256.clone(),
            file_length: doc.file_length.map(|n| n as i64),
        });
    }
    None
}

/// Fire-and-forget background transcription for an inbound voice note.
/// Failures are logged, never surfaced — the message row already exists
/// without a transcript and stays that way (§4.3/§9).
fn spawn_transcription(
    client: Arc<Client>,
    store: MessageStore,
    msg_id: String,
    chat_jid: String,
    descriptor: MediaDescriptor,
) {
    tokio::spawn(async move {
        let cfg = match crate::config::Config::from_env() {
            Ok(c) => c,
            Err(e) => {
                warn!("transcription skipped, config unavailable: {e}");
                return;
            }
        };
        let (Some(whisper_bin), Some(whisper_model)) =
            (cfg.whisper_bin_path.as_deref(), cfg.whisper_model_path.as_deref())
        else {
            debug!("transcription skipped, WHISPER_BIN_PATH/WHISPER_MODEL_PATH not set");
            return;
        };

        let bytes = match super::download::download_descriptor(&client, &descriptor).await {
            Ok(b) => b,
            Err(e) => {
                warn!("voice note download failed for transcription: {e}");
                return;
            }
        };

        let result =
            crate::media::transcribe(&bytes, &cfg.ffmpeg_bin_path, whisper_bin, whisper_model)
                .await;

        match result {
            Ok(text) => {
                if let Err(e) = store.attach_transcription(&msg_id, &chat_jid, &text).await {
                    warn!("failed to attach transcription to {msg_id}: {e}");
                }
            }
            Err(e) => warn!("transcription failed for {msg_id}: {e}"),
        }
    });
}

/// Bulk-ingest server-replayed conversations (§4.3 `HistorySync`). For each
/// conversation with a parseable id: resolve its display name, seed
/// `last_message_time` from the newest contained message, then upsert every
/// contained message through the same extraction path as live messages.
/// Idempotent — re-delivering the same sync simply replaces rows by primary
/// key (§4.1 upsert semantics), so no dedup bookkeeping is needed here.
async fn handle_history_sync(data: wacore::types::events::HistorySync, store: &MessageStore) {
    for conversation in data.conversations {
        let jid: Jid = match conversation.id.parse() {
            Ok(j) => j,
            Err(_) => continue,
        };
        let chat_jid = jid.to_string();
        let is_group = chat_jid.ends_with("@g.us");

        let fields = ConversationNameFields {
            display_name: conversation.display_name.clone(),
            name: conversation.name.clone(),
        };
        let conversation_name = fields.conversation_display_name();
        let chat_name = resolve_chat_name(
            None,
            is_group,
            jid.user.as_str(),
            conversation_name.as_deref(),
            None,
            None,
            "",
        );

        let newest_ts = conversation
            .messages
            .iter()
            .filter_map(|m| m.message.as_ref())
            .filter_map(|m| m.message_timestamp)
            .max()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or_else(chrono::Utc::now);

        if let Err(e) = store
            .upsert_chat_if_better_name(&chat_jid, &chat_name, newest_ts)
            .await
        {
            warn!("failed to upsert chat {chat_jid} from history sync: {e}");
            continue;
        }

        for history_msg in &conversation.messages {
            let Some(web_msg) = history_msg.message.as_ref() else {
                continue;
            };
            let Some(key) = web_msg.key.as_ref() else {
                continue;
            };
            let Some(msg_id) = key.id.clone() else {
                continue;
            };
            let Some(ref payload) = web_msg.message else {
                continue;
            };

            let (text, media) = extract_text_and_media(payload);
            if text.is_empty() && media.is_none() {
                continue;
            }

            let is_from_me = key.from_me.unwrap_or(false);
            let sender = key
                .participant
                .clone()
                .or_else(|| key.remote_jid.clone())
                .unwrap_or_else(|| chat_jid.clone());
            let ts = web_msg
                .message_timestamp
                .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
                .unwrap_or(newest_ts);

            if let Err(e) = store
                .upsert_message(&msg_id, &chat_jid, &sender, &text, ts, is_from_me, media.as_ref())
                .await
            {
                warn!("failed to upsert history-sync message {msg_id} in {chat_jid}: {e}");
            }
        }
    }
}
