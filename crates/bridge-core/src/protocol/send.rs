//! Outbound message construction and the exponential-backoff retry wrapper
//! around `Client::send_message` (§4.3).

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};
use wacore_binary::jid::Jid;
use whatsapp_rust::client::Client;
use whatsapp_rust::download::MediaType;

use crate::error::BridgeError;
use crate::store::MediaKind;

/// Retry delays for exponential backoff: 500ms, 1s, 2s.
const RETRY_DELAYS_MS: [u64; 3] = [500, 1000, 2000];

/// Send with retry and exponential backoff. Attempts up to 3 times.
pub(super) async fn retry_send(
    client: &Client,
    jid: &Jid,
    msg: waproto::whatsapp::Message,
) -> Result<String, BridgeError> {
    let mut last_err = None;

    for (attempt, delay_ms) in RETRY_DELAYS_MS.iter().enumerate() {
        match client.send_message(jid.clone(), msg.clone()).await {
            Ok(msg_id) => return Ok(msg_id),
            Err(e) => {
                let attempt_num = attempt + 1;
                if attempt_num < RETRY_DELAYS_MS.len() {
                    warn!(
                        "send attempt {attempt_num}/{} failed: {e}, retrying in {delay_ms}ms",
                        RETRY_DELAYS_MS.len()
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                } else {
                    error!(
                        "send attempt {attempt_num}/{} failed: {e}, giving up",
                        RETRY_DELAYS_MS.len()
                    );
                }
                last_err = Some(e);
            }
        }
    }

    Err(BridgeError::Protocol(format!(
        "send failed after {} attempts: {}",
        RETRY_DELAYS_MS.len(),
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

async fn require_client(
    client: &Arc<Mutex<Option<Arc<Client>>>>,
) -> Result<Arc<Client>, BridgeError> {
    client
        .lock()
        .await
        .clone()
        .ok_or_else(|| BridgeError::Protocol("whatsapp client not connected".into()))
}

/// Parse a recipient as given by a caller: a full jid if it contains `@`,
/// otherwise a bare phone number synthesized into a user jid.
fn parse_jid(recipient: &str) -> Result<Jid, BridgeError> {
    let jid_str = if recipient.contains('@') {
        recipient.to_string()
    } else {
        format!("{recipient}@s.whatsapp.net")
    };
    jid_str
        .parse()
        .map_err(|e| BridgeError::Validation(format!("invalid jid '{jid_str}': {e}")))
}

pub(super) async fn send_text(
    client: &Arc<Mutex<Option<Arc<Client>>>>,
    jid_str: &str,
    text: &str,
) -> Result<String, BridgeError> {
    let client = require_client(client).await?;
    let jid = parse_jid(jid_str)?;
    let msg = waproto::whatsapp::Message {
        conversation: Some(text.to_string()),
        ..Default::default()
    };
    retry_send(&client, &jid, msg).await
}

/// Upload `bytes` and send it as the media kind's corresponding message
/// variant. For audio, the Ogg/Opus container is analyzed for duration and a
/// synthetic waveform (§4.2).
pub(super) async fn send_media(
    client: &Arc<Mutex<Option<Arc<Client>>>>,
    jid_str: &str,
    kind: MediaKind,
    bytes: Vec<u8>,
    filename: Option<String>,
    caption: Option<String>,
) -> Result<String, BridgeError> {
    let client = require_client(client).await?;
    let jid = parse_jid(jid_str)?;

    let media_type = match kind {
        MediaKind::Image => MediaType::Image,
        MediaKind::Video => MediaType::Video,
        MediaKind::Audio => MediaType::Audio,
        MediaKind::Document => MediaType::Document,
    };

    let (_, inferred_mime) = crate::media::infer(filename.as_deref().unwrap_or(""));
    let mimetype = inferred_mime.to_string();

    let upload = client
        .upload(bytes.clone(), media_type)
        .await
        .map_err(|e| BridgeError::Protocol(format!("media upload failed: {e}")))?;

    let msg = match kind {
        MediaKind::Image => waproto::whatsapp::Message {
            image_message: Some(Box::new(waproto::whatsapp::message::ImageMessage {
                mimetype: Some(mimetype),
                caption,
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                ..Default::default()
            })),
            ..Default::default()
        },
        MediaKind::Video => waproto::whatsapp::Message {
            video_message: Some(Box::new(waproto::whatsapp::message::VideoMessage {
                mimetype: Some(mimetype),
                caption,
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                ..Default::default()
            })),
            ..Default::default()
        },
        MediaKind::Audio => {
            let (seconds, waveform) = crate::media::analyze_ogg_opus(&bytes)?;
            waproto::whatsapp::Message {
                audio_message: Some(Box::new(waproto::whatsapp::message::AudioMessage {
                    mimetype: Some("audio/ogg; codecs=opus".to_string()),
                    ptt: Some(true),
                    seconds: Some(seconds),
                    waveform: Some(waveform.to_vec()),
                    url: Some(upload.url),
                    direct_path: Some(upload.direct_path),
                    media_key: Some(upload.media_key),
                    file_enc_sha256: Some(upload.file_enc_sha256),
                    file_sha256: Some(upload.file_sha256),
                    file_length: Some(upload.file_length),
                    ..Default::default()
                })),
                ..Default::default()
            }
        }
        MediaKind::Document => {
            let file_name = filename
                .as_deref()
                .map(|f| {
                    std::path::Path::new(f)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or(f)
                        .to_string()
                })
                .unwrap_or_else(|| "file".to_string());
            waproto::whatsapp::Message {
                document_message: Some(Box::new(waproto::whatsapp::message::DocumentMessage {
                    mimetype: Some(mimetype),
                    file_name: Some(file_name),
                    caption,
                    url: Some(upload.url),
                    direct_path: Some(upload.direct_path),
                    media_key: Some(upload.media_key),
                    file_enc_sha256: Some(upload.file_enc_sha256),
                    file_sha256: Some(upload.file_sha256),
                    file_length: Some(upload.file_length),
                    ..Default::default()
                })),
                ..Default::default()
            }
        }
    };

    retry_send(&client, &jid, msg).await
}
