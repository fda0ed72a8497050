//! Auth Coordinator (§4.4): the process-wide `AuthView` singleton and the
//! state machine that drives a single linked device through pairing,
//! connection, and logout.

use serde::Serialize;
use tokio::sync::RwLock;

/// Status values for the linked-device session (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Initializing,
    WaitingForQr,
    WaitingForPair,
    Connecting,
    Connected,
    LoggedOut,
    Error,
}

/// Process-wide auth state (§3). `qr_code` is non-empty exactly when
/// `status == WaitingForQr`; `pair_code` exactly when `status ==
/// WaitingForPair` (I4).
#[derive(Debug, Clone, Serialize)]
pub struct AuthView {
    pub status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_code: Option<String>,
}

impl Default for AuthView {
    fn default() -> Self {
        Self {
            status: AuthStatus::Initializing,
            qr_code: None,
            pair_code: None,
        }
    }
}

/// Owns the single `AuthView` behind a reader/writer lock (§3, §9 — "global
/// AuthView" realized as a singleton rather than an actor, since this binary
/// has exactly one caller of each write path).
pub struct AuthCoordinator {
    view: RwLock<AuthView>,
}

impl Default for AuthCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthCoordinator {
    pub fn new() -> Self {
        Self {
            view: RwLock::new(AuthView::default()),
        }
    }

    /// A reader's plain snapshot of the view — no connected-override logic.
    /// `HTTP::auth_status` applies the override on top of this using its own
    /// knowledge of the protocol client's live connection state (§4.4: "every
    /// status-read from the HTTP layer additionally overrides...").
    pub async fn view(&self) -> AuthView {
        self.view.read().await.clone()
    }

    /// Apply the connected-override: if the protocol client currently
    /// reports connected and a device identity exists, the read always shows
    /// `connected`, regardless of what the stored status says. Guards
    /// against a stale view after a silent reconnect.
    pub async fn view_with_override(&self, client_connected: bool, has_identity: bool) -> AuthView {
        if client_connected && has_identity {
            return AuthView {
                status: AuthStatus::Connected,
                qr_code: None,
                pair_code: None,
            };
        }
        self.view().await
    }

    pub async fn set_connecting(&self) {
        let mut v = self.view.write().await;
        v.status = AuthStatus::Connecting;
        v.qr_code = None;
        v.pair_code = None;
    }

    /// A fresh QR code arrived — replaces any previous one (the server
    /// rotates QR codes periodically while `waiting_for_qr`).
    pub async fn set_qr(&self, code: String) {
        let mut v = self.view.write().await;
        v.status = AuthStatus::WaitingForQr;
        v.qr_code = Some(code);
        v.pair_code = None;
    }

    pub async fn set_waiting_for_pair(&self, code: String) {
        let mut v = self.view.write().await;
        v.status = AuthStatus::WaitingForPair;
        v.pair_code = Some(code);
        v.qr_code = None;
    }

    pub async fn set_connected(&self) {
        let mut v = self.view.write().await;
        v.status = AuthStatus::Connected;
        v.qr_code = None;
        v.pair_code = None;
    }

    pub async fn set_logged_out(&self) {
        let mut v = self.view.write().await;
        v.status = AuthStatus::LoggedOut;
        v.qr_code = None;
        v.pair_code = None;
    }

    /// Terminal error state — used when the pair-code poll exhausts its
    /// 60×5s budget without a connection (§9 open question).
    pub async fn set_error(&self) {
        let mut v = self.view.write().await;
        v.status = AuthStatus::Error;
        v.qr_code = None;
        v.pair_code = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn qr_code_present_only_in_waiting_for_qr() {
        let coord = AuthCoordinator::new();
        coord.set_qr("abc123".into()).await;
        let v = coord.view().await;
        assert_eq!(v.status, AuthStatus::WaitingForQr);
        assert_eq!(v.qr_code.as_deref(), Some("abc123"));
        assert!(v.pair_code.is_none());
    }

    #[tokio::test]
    async fn pair_code_present_only_in_waiting_for_pair() {
        let coord = AuthCoordinator::new();
        coord.set_waiting_for_pair("WORD-CODE".into()).await;
        let v = coord.view().await;
        assert_eq!(v.status, AuthStatus::WaitingForPair);
        assert_eq!(v.pair_code.as_deref(), Some("WORD-CODE"));
        assert!(v.qr_code.is_none());
    }

    #[tokio::test]
    async fn connected_clears_qr_and_pair_code() {
        let coord = AuthCoordinator::new();
        coord.set_qr("abc".into()).await;
        coord.set_connected().await;
        let v = coord.view().await;
        assert_eq!(v.status, AuthStatus::Connected);
        assert!(v.qr_code.is_none() && v.pair_code.is_none());
    }

    #[tokio::test]
    async fn view_with_override_wins_over_stored_status() {
        let coord = AuthCoordinator::new();
        coord.set_logged_out().await;
        let v = coord.view_with_override(true, true).await;
        assert_eq!(v.status, AuthStatus::Connected);
    }

    #[tokio::test]
    async fn view_with_override_is_noop_without_identity() {
        let coord = AuthCoordinator::new();
        coord.set_logged_out().await;
        let v = coord.view_with_override(true, false).await;
        assert_eq!(v.status, AuthStatus::LoggedOut);
    }

    #[tokio::test]
    async fn error_status_clears_pair_code() {
        let coord = AuthCoordinator::new();
        coord.set_waiting_for_pair("X".into()).await;
        coord.set_error().await;
        let v = coord.view().await;
        assert_eq!(v.status, AuthStatus::Error);
        assert!(v.pair_code.is_none());
    }
}
