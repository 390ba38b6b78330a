mod config;
mod contracts;
mod crypto;
mod error;
mod finalizer;
mod aggregator;
mod host_pool;
mod orchestrator;
mod payin;
mod rpc;
mod session;
mod shard_worker;
mod signer_registry;
mod status;
mod version;

use std::sync::Arc;

use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::crypto::Ed25519Signer;
use crate::orchestrator::Orchestrator;
use crate::rpc::escrow::HttpEscrowClient;
use crate::rpc::guard::HttpGuardClient;
use crate::rpc::peer::HttpPeerRpcClient;
use crate::session::store::SessionStore;
use crate::signer_registry::SignerHub;
use crate::status::StatusState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shard_upload_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    tracing::info!("starting shard upload coordinator on {}", config.addr());

    let guard_pub_key = config
        .guard_pub_keys
        .first()
        .cloned()
        .unwrap_or_else(|| panic!("GUARD_PUB_KEYS must list at least one guard public key"));

    let local_signer: Option<Arc<dyn crypto::Signer>> = match &config.identity_private_key {
        Some(seed) => Some(Arc::new(
            Ed25519Signer::from_hex_seed(seed).expect("IDENTITY_PRIVATE_KEY is not a valid ed25519 seed"),
        )),
        None => None,
    };
    let renter_pub_key = local_signer
        .as_ref()
        .map(|s| s.public_key_hex())
        .unwrap_or_default();

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .expect("failed to build reqwest client");

    let signer_hub = Arc::new(SignerHub::new());
    let session_store = Arc::new(SessionStore::new());

    let orchestrator = Arc::new(Orchestrator {
        config: config.clone(),
        signer_hub: signer_hub.clone(),
        session_store: session_store.clone(),
        peer_client: Arc::new(HttpPeerRpcClient::new(http_client.clone())),
        escrow_client: Arc::new(HttpEscrowClient::new(
            http_client.clone(),
            config.escrow_domain.clone(),
            guard_pub_key.clone(),
        )),
        guard_client: Arc::new(HttpGuardClient::new(
            http_client.clone(),
            config.guard_domain.clone(),
            guard_pub_key,
        )),
        local_signer,
        renter_pub_key,
    });

    let metrics_handle = setup_metrics();

    let state = StatusState {
        session_store,
        signer_hub,
        orchestrator,
    };

    let app = status::router(state)
        .route("/metrics", axum::routing::get(move || async move { metrics_handle.render() }))
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .expect("failed to bind");

    tracing::info!("listening on {}", config.addr());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

fn setup_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder.install_recorder().expect("failed to install Prometheus recorder")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
