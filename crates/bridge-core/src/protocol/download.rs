//! On-demand encrypted media retrieval (§4.3): reconstruct the proto
//! submessage a stored [`MediaDescriptor`] describes and hand it to the
//! client's decrypt-download path, with a local on-disk cache.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use whatsapp_rust::client::Client;

use crate::error::BridgeError;
use crate::store::{MediaDescriptor, MediaKind};

/// The descriptor only persists the CDN `url`; `direct_path` is derived from
/// it at download time rather than stored separately (§4.3): the substring
/// after `.net/` up to the first `?`, prefixed with `/`.
fn derive_direct_path(url: &str) -> String {
    url.split_once(".net/")
        .map(|(_, rest)| rest.split('?').next().unwrap_or(rest))
        .map(|path| format!("/{path}"))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_direct_path_strips_host_and_query() {
        assert_eq!(
            derive_direct_path("https://mmg.whatsapp.net/v/t62.7161-24/abc123?ccb=9-4"),
            "/v/t62.7161-24/abc123"
        );
    }

    #[test]
    fn derive_direct_path_no_query() {
        assert_eq!(
            derive_direct_path("https://mmg.whatsapp.net/v/t62.7161-24/abc123"),
            "/v/t62.7161-24/abc123"
        );
    }
}

/// Reconstruct the WhatsApp proto submessage the client's `download` API
/// expects from a persisted descriptor, then fetch and decrypt it.
pub(super) async fn download_descriptor(
    client: &Arc<Client>,
    descriptor: &MediaDescriptor,
) -> Result<Vec<u8>, BridgeError> {
    if !descriptor.is_complete() {
        return Err(BridgeError::Media(
            "media descriptor incomplete, cannot download".into(),
        ));
    }

    let url = descriptor.url.clone().unwrap_or_default();
    let direct_path = derive_direct_path(&url);
    let media_key = descriptor.media_key.clone().unwrap_or_default();
    let file_sha256 = descriptor.file_sha256.clone().unwrap_or_default();
    let file_enc_sha256 = descriptor.file_enc_sha256.clone().unwrap_or_default();
    let file_length = descriptor.file_length.unwrap_or_default() as u64;

    let result = match descriptor.kind {
        MediaKind::Image => {
            let msg = waproto::whatsapp::message::ImageMessage {
                url: Some(url),
                direct_path: Some(direct_path),
                media_key: Some(media_key),
                file_sha256: Some(file_sha256),
                file_enc_sha256: Some(file_enc_sha256),
                file_length: Some(file_length),
                ..Default::default()
            };
            client.download(&msg).await
        }
        MediaKind::Video => {
            let msg = waproto::whatsapp::message::VideoMessage {
                url: Some(url),
                direct_path: Some(direct_path),
                media_key: Some(media_key),
                file_sha256: Some(file_sha256),
                file_enc_sha256: Some(file_enc_sha256),
                file_length: Some(file_length),
                ..Default::default()
            };
            client.download(&msg).await
        }
        MediaKind::Audio => {
            let msg = waproto::whatsapp::message::AudioMessage {
                url: Some(url),
                direct_path: Some(direct_path),
                media_key: Some(media_key),
                file_sha256: Some(file_sha256),
                file_enc_sha256: Some(file_enc_sha256),
                file_length: Some(file_length),
                ..Default::default()
            };
            client.download(&msg).await
        }
        MediaKind::Document => {
            let msg = waproto::whatsapp::message::DocumentMessage {
                url: Some(url),
                direct_path: Some(direct_path),
                media_key: Some(media_key),
                file_sha256: Some(file_sha256),
                file_enc_sha256: Some(file_enc_sha256),
                file_length: Some(file_length),
                ..Default::default()
            };
            client.download(&msg).await
        }
    };

    result.map_err(|e| BridgeError::Media(format!("download failed: {e}")))
}

/// `POST /api/download` (§4.3): a cache hit on
/// `<store_dir>/<sanitized chat jid>/<filename>` skips the network fetch
/// entirely; otherwise fetch, decrypt, cache to disk, and return the bytes.
pub(super) async fn download(
    client: &Arc<Mutex<Option<Arc<Client>>>>,
    store_dir: &str,
    chat_jid: &str,
    descriptor: &MediaDescriptor,
) -> Result<Vec<u8>, BridgeError> {
    let sanitized_chat = chat_jid.replace(':', "_");
    let dir = format!("{store_dir}/{sanitized_chat}");
    let path = format!("{dir}/{}", descriptor.filename);

    if let Ok(bytes) = tokio::fs::read(&path).await {
        return Ok(bytes);
    }

    let client = client
        .lock()
        .await
        .clone()
        .ok_or_else(|| BridgeError::Protocol("whatsapp client not connected".into()))?;

    let bytes = download_descriptor(&client, descriptor).await?;

    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!("failed to create media directory {dir}: {e}");
    } else if let Err(e) = tokio::fs::write(&path, &bytes).await {
        warn!("failed to cache downloaded media at {path}: {e}");
    }

    Ok(bytes)
}
