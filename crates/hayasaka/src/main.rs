use std::{net::SocketAddr, sync::Arc};

use hayasaka_bridge::BridgeTransport;
use hayasaka_core::{
    config::Config,
    connection::{ConnectionManager, SupervisorSettings},
    credentials::CredentialStore,
    gateway::PrayerGateway,
    router::CommandRouter,
    store::SessionStore,
};
use hayasaka_gemini::GeminiClient;

#[tokio::main]
async fn main() -> Result<(), hayasaka_core::Error> {
    hayasaka_core::logging::init("hayasaka")?;

    let cfg = Config::load()?;

    let backend = Arc::new(GeminiClient::new(&cfg.gemini_api_key, &cfg.gemini_model));
    let gateway = Arc::new(PrayerGateway::new(
        &cfg.salat_api_base,
        cfg.gateway_retries,
        cfg.gateway_timeout,
    ));
    let store = Arc::new(SessionStore::new(
        cfg.max_history_turns,
        cfg.max_tracked_chats,
    ));

    let router = CommandRouter::new(store, gateway, backend);
    let transport = Arc::new(BridgeTransport::new(cfg.bridge_command.clone()));
    let credentials = CredentialStore::new(&cfg.auth_dir);

    tokio::spawn(serve_status(cfg.status_port));

    let manager = ConnectionManager::new(
        transport,
        router,
        credentials,
        SupervisorSettings {
            login_attempt_threshold: cfg.login_attempt_threshold,
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_initial_delay: cfg.reconnect_initial_delay,
            reconnect_max_delay: cfg.reconnect_max_delay,
        },
    );

    manager.run().await
}

/// Minimal liveness endpoint, mainly for container health checks.
async fn serve_status(port: u16) {
    let app = axum::Router::new().route(
        "/",
        axum::routing::get(|| async { "Hayasaka AI sedang berjalan!" }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            tracing::info!(%addr, "status server listening");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "status server failed");
            }
        }
        Err(e) => tracing::error!(error = %e, %addr, "status server bind failed"),
    }
}
