//! Scheduler / Main (§4.6): process entry point. Loads configuration, opens
//! the stores, wires the protocol adapter and HTTP surface together, starts
//! the HTTP listener *before* authentication so the QR page is reachable,
//! then blocks on OS signals and shuts down in order.

mod http;

use std::sync::Arc;

use bridge_core::auth::AuthCoordinator;
use bridge_core::config::Config;
use bridge_core::protocol::ProtocolAdapter;
use bridge_core::store::MessageStore;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// The static auth page asset (§1 — out of scope as *content*, but the
/// binary still needs a concrete path to hand to `ServeFile`).
const AUTH_PAGE_PATH: &str = "static/auth.html";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;

    // (1) create store directory.
    let store_dir = config.store_dir_expanded();
    std::fs::create_dir_all(&store_dir)
        .map_err(|e| anyhow::anyhow!("failed to create store dir {store_dir}: {e}"))?;

    // (5) open the application message store (steps 2-4, opening the
    // protocol-owned device store and instantiating the client, happen
    // inside `ProtocolAdapter::start` below since they share one code path
    // with re-pairing via `POST /api/auth/start`).
    let message_store = MessageStore::open(&store_dir).await?;

    let auth = Arc::new(AuthCoordinator::new());
    let protocol = Arc::new(ProtocolAdapter::new(
        config.clone(),
        message_store.clone(),
        auth.clone(),
    ));

    let state = http::AppState {
        store: message_store.clone(),
        auth: auth.clone(),
        protocol: protocol.clone(),
        api_key: config.api_key.clone(),
        store_dir: store_dir.clone(),
    };
    let router = http::build_router(state, AUTH_PAGE_PATH);

    // (7) start the HTTP listener in the background *before* driving
    // authentication, so an operator can reach the QR page immediately.
    // A bind failure here is logged but not fatal (§4.6/§7) — the process
    // keeps running so the problem is visible in logs.
    let addr = format!("0.0.0.0:{}", config.port);
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("http listener bound on {addr}");
                if let Err(e) = axum::serve(listener, router).await {
                    error!("http listener exited: {e}");
                }
            }
            Err(e) => error!("failed to bind http listener on {addr}: {e}"),
        }
    });

    // (8) drive the Auth Coordinator state machine (§4.4): reconnect with a
    // stored identity, or begin pairing (phone-code or QR). Runs in the
    // background — the bot's event loop keeps the process alive from here.
    let protocol_for_start = protocol.clone();
    tokio::spawn(async move {
        if let Err(e) = protocol_for_start.start().await {
            error!("protocol adapter failed to start: {e}");
        }
    });

    // (9) wait for SIGINT / SIGTERM.
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, disconnecting");

    // (10) disconnect the protocol client.
    protocol.shutdown().await;

    // (11) close the message store. `MessageStore` has no explicit close —
    // its `SqlitePool` is dropped here along with the last `Arc`/`Clone`,
    // which is sqlx's own close path.
    drop(message_store);

    info!("bridge shut down cleanly");
    Ok(())
}

/// Block until SIGINT (Ctrl-C) or SIGTERM arrives. SIGTERM is unix-only —
/// this binary has no Windows deployment target per spec §6.4's container/
/// systemd assumption.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// `RUST_LOG`-driven logging, default `info` (§6.1 [ADDED]).
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
