//! The protocol adapter (§4.3, §4.4): owns the `whatsapp-rust` client handle,
//! drives the Auth Coordinator state machine, and is the seam the HTTP layer
//! calls through for send/download.

mod download;
mod events;
mod names;
mod send;
pub mod store;

pub use names::{resolve_chat_name, ContactNames, ConversationDisplayName, ConversationNameFields};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use waproto::whatsapp::device_props::PlatformType;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

use crate::auth::AuthCoordinator;
use crate::config::Config;
use crate::error::BridgeError;
use crate::store::{MediaDescriptor, MediaKind, MessageStore};

use self::store::SqlxDeviceStore;

const DEVICE_DISPLAY_NAME: &str = "Bridge";
const PAIR_PHONE_POLL_ATTEMPTS: u32 = 60;
const PAIR_PHONE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Ties the `whatsapp-rust` client, the application message store, and the
/// shared Auth Coordinator together. One instance lives for the life of the
/// process (§4.6).
pub struct ProtocolAdapter {
    config: Config,
    message_store: MessageStore,
    auth: Arc<AuthCoordinator>,
    client: Arc<Mutex<Option<Arc<Client>>>>,
    /// Best-known display name per jid user part, learned opportunistically
    /// from each inbound message's `push_name` (§4.3's user-jid precedence
    /// chain). Backs the §4.3 "write-through alias cache": a bare-phone-number
    /// chat name seen by `GET /api/messages/recent` can be upgraded once a
    /// later message reveals the sender's push name, without a dedicated
    /// contact-store round trip.
    known_names: Arc<Mutex<HashMap<String, String>>>,
}

impl ProtocolAdapter {
    pub fn new(config: Config, message_store: MessageStore, auth: Arc<AuthCoordinator>) -> Self {
        Self {
            config,
            message_store,
            auth,
            client: Arc::new(Mutex::new(None)),
            known_names: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Best currently-known display name for a jid user part, or `None` if
    /// nothing better than the bare number has been observed yet.
    pub async fn resolve_known_name(&self, jid_user: &str) -> Option<String> {
        self.known_names.lock().await.get(jid_user).cloned()
    }

    fn device_db_path(&self) -> String {
        format!("{}/device.db", self.config.store_dir_expanded())
    }

    /// Whether the client handle is currently populated — used both by
    /// `AuthCoordinator::view_with_override` and internally to poll for a
    /// phone-pairing connection.
    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn has_identity(&self) -> Result<bool, BridgeError> {
        let backend = SqlxDeviceStore::new(&self.device_db_path())
            .await
            .map_err(|e| BridgeError::Protocol(format!("device store open failed: {e}")))?;
        backend
            .has_device()
            .await
            .map_err(|e| BridgeError::Protocol(format!("device store query failed: {e}")))
    }

    /// Drive the §4.4 state machine: if a device identity is already stored,
    /// reconnect directly; otherwise begin pairing, via phone code if
    /// `PAIR_PHONE` is configured, else QR.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let db_path = self.device_db_path();
        let backend = Arc::new(SqlxDeviceStore::new(&db_path).await.map_err(|e| {
            BridgeError::Protocol(format!("device store init failed: {e}"))
        })?);

        let has_device = backend
            .has_device()
            .await
            .map_err(|e| BridgeError::Protocol(format!("device store query failed: {e}")))?;

        if has_device {
            self.auth.set_connecting().await;
        }

        self.build_and_run_bot(backend).await?;

        if !has_device {
            if let Some(phone) = self.config.pair_phone.clone() {
                self.pair_with_phone(&phone).await?;
            }
        }

        Ok(())
    }

    /// Build a bot with the event handler wired in and run it in the
    /// background. Shared by every entry point that needs a live client.
    async fn build_and_run_bot(&self, backend: Arc<SqlxDeviceStore>) -> Result<(), BridgeError> {
        let client_handle = self.client.clone();
        let client_for_event = client_handle.clone();
        let auth_for_event = self.auth.clone();
        let store_for_event = self.message_store.clone();
        let known_names_for_event = self.known_names.clone();

        let mut bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_device_props(
                Some(DEVICE_DISPLAY_NAME.to_string()),
                None,
                Some(PlatformType::Desktop),
            )
            .on_event(move |event, client| {
                let auth = auth_for_event.clone();
                let store = store_for_event.clone();
                let client_store = client_for_event.clone();
                let known_names = known_names_for_event.clone();
                async move {
                    events::dispatch(event, client, &auth, &store, &client_store, &known_names).await;
                }
            })
            .build()
            .await
            .map_err(|e| BridgeError::Protocol(format!("bot build failed: {e}")))?;

        // Populate the client handle immediately, in case the library is
        // already connected (reusing a still-valid session).
        *client_handle.lock().await = Some(bot.client());

        bot.run()
            .await
            .map_err(|e| BridgeError::Protocol(format!("bot run failed: {e}")))?;

        info!("protocol adapter running");
        Ok(())
    }

    /// Request a numeric pairing code for `phone` and poll for a connection
    /// up to 60×5s. On timeout, surface a terminal `error` status (§9) —
    /// re-pairing requires a fresh `POST /api/auth/start`.
    async fn pair_with_phone(&self, phone: &str) -> Result<(), BridgeError> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or_else(|| BridgeError::Protocol("client not ready for phone pairing".into()))?;

        let code = client
            .pair_phone(
                phone,
                true,
                whatsapp_rust::client::PairClientType::Chrome,
                DEVICE_DISPLAY_NAME,
            )
            .await
            .map_err(|e| BridgeError::Protocol(format!("phone pairing request failed: {e}")))?;

        self.auth.set_waiting_for_pair(code).await;

        for _ in 0..PAIR_PHONE_POLL_ATTEMPTS {
            tokio::time::sleep(PAIR_PHONE_POLL_INTERVAL).await;
            if self.is_connected().await {
                return Ok(());
            }
        }

        warn!("phone pairing timed out after {PAIR_PHONE_POLL_ATTEMPTS} attempts");
        self.auth.set_error().await;
        Ok(())
    }

    /// `POST /api/auth/start`: discard any stored identity and restart
    /// pairing from a clean slate.
    pub async fn start_auth(&self) -> Result<(), BridgeError> {
        *self.client.lock().await = None;

        let backend = SqlxDeviceStore::new(&self.device_db_path())
            .await
            .map_err(|e| BridgeError::Protocol(format!("device store open failed: {e}")))?;
        backend
            .wipe()
            .await
            .map_err(|e| BridgeError::Protocol(format!("device store wipe failed: {e}")))?;

        self.auth.set_connecting().await;
        self.start().await
    }

    /// `POST /api/auth/logout`: best-effort protocol-level logout, then mark
    /// the session as logged out regardless of whether the request reached
    /// the server.
    pub async fn logout(&self) -> Result<(), BridgeError> {
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            if let Err(e) = client.logout().await {
                warn!("logout request failed: {e}");
            }
        }
        self.auth.set_logged_out().await;
        Ok(())
    }

    /// Process-shutdown disconnect (§4.6 step 10) — unlike [`Self::logout`]
    /// this does not revoke the pairing, it only drops the live client
    /// handle so the process can exit cleanly, mirroring the teacher's
    /// `Channel::stop` (the bot's own connection winds down with the tokio
    /// runtime on process exit).
    pub async fn shutdown(&self) {
        *self.client.lock().await = None;
        info!("protocol adapter shut down");
    }

    pub async fn send_text(&self, jid: &str, text: &str) -> Result<String, BridgeError> {
        send::send_text(&self.client, jid, text).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send_media(
        &self,
        jid: &str,
        kind: MediaKind,
        bytes: Vec<u8>,
        filename: Option<String>,
        caption: Option<String>,
    ) -> Result<String, BridgeError> {
        send::send_media(&self.client, jid, kind, bytes, filename, caption).await
    }

    pub async fn download(
        &self,
        chat_jid: &str,
        descriptor: &MediaDescriptor,
    ) -> Result<Vec<u8>, BridgeError> {
        download::download(
            &self.client,
            &self.config.store_dir_expanded(),
            chat_jid,
            descriptor,
        )
        .await
    }

    /// `POST /api/transcribe` (§6.3): returns a cached transcription if one
    /// already exists, otherwise downloads the voice note and runs STT,
    /// caching the result. Fails validation if the message has no audio.
    pub async fn transcribe(
        &self,
        message_id: &str,
        chat_jid: &str,
    ) -> Result<String, BridgeError> {
        let (kind, cached) = self
            .message_store
            .get_transcription_state(message_id, chat_jid)
            .await?
            .ok_or_else(|| BridgeError::Validation("message not found".into()))?;

        if kind != Some(MediaKind::Audio) {
            return Err(BridgeError::Validation("message is not audio".into()));
        }

        if let Some(text) = cached {
            return Ok(text);
        }

        let descriptor = self
            .message_store
            .get_media_descriptor(message_id, chat_jid)
            .await?
            .ok_or_else(|| BridgeError::Validation("message is not audio".into()))?;

        let bytes = self.download(chat_jid, &descriptor).await?;

        let whisper_bin = self.config.whisper_bin_path.as_deref().ok_or_else(|| {
            BridgeError::Transcription("WHISPER_BIN_PATH not configured".into())
        })?;
        let whisper_model = self.config.whisper_model_path.as_deref().ok_or_else(|| {
            BridgeError::Transcription("WHISPER_MODEL_PATH not configured".into())
        })?;

        let text = crate::media::transcribe(
            &bytes,
            &self.config.ffmpeg_bin_path,
            whisper_bin,
            whisper_model,
        )
        .await?;

        self.message_store
            .attach_transcription(message_id, chat_jid, &text)
            .await?;

        Ok(text)
    }

    /// Exposes `has_identity` for the HTTP layer's `view_with_override` call
    /// (§4.4) without leaking the device store type.
    pub async fn has_identity_for_auth_view(&self) -> bool {
        self.has_identity().await.unwrap_or(false)
    }
}
