//! Facilitator server binary.
//!
//! Wires the verification, escrow, and settlement engines to a Solana
//! ledger and serves the HTTP API. Configuration comes from `config.toml`
//! with environment overrides; see [`tollgate_facilitator::config`].

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use tokio::net::TcpListener;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tollgate::ledger::Ledger;
use tollgate_facilitator::config::ServerConfig;
use tollgate_facilitator::escrow::EscrowManager;
use tollgate_facilitator::settlement::{self, SettlementEngine, WebhookTarget};
use tollgate_facilitator::util::Shutdown;
use tollgate_facilitator::verifier::PaymentVerifier;
use tollgate_facilitator::{AppState, facilitator_router};
use tollgate_store::{
    KeyValueStore, MemorySignatureStore, MemoryStore, RedisSignatureStore, RedisStore,
    SignatureStore,
};
use tollgate_svm::SolanaLedger;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("facilitator failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider was already installed");
    }

    let config = ServerConfig::load()?;
    tracing::info!(
        network = %config.network,
        rpc_url = %config.rpc_url,
        "loaded configuration"
    );

    let key = config.pool_private_key.trim();
    if key.is_empty() || key.starts_with('$') {
        return Err("pool_private_key is not configured (missing env var?)".into());
    }
    let ledger = Arc::new(
        SolanaLedger::from_base58_key(config.rpc_url.clone(), key, config.network.clone())?
            .with_query_timeout(Duration::from_secs(config.request_timeout_secs)),
    );
    tracing::info!(pool = %ledger.pool_address(), "pool wallet loaded");

    let (store, signatures): (Arc<dyn KeyValueStore>, Arc<dyn SignatureStore>) =
        match config.redis_url.as_deref() {
            Some(url) if !url.is_empty() && !url.starts_with('$') => {
                let redis = RedisStore::connect(url).await?;
                let signatures = RedisSignatureStore::new(redis.manager(), "tollgate");
                tracing::info!("connected to redis");
                (Arc::new(redis), Arc::new(signatures))
            }
            _ => {
                tracing::warn!(
                    "no redis_url configured; using in-memory stores (single process only)"
                );
                (
                    Arc::new(MemoryStore::new()),
                    Arc::new(MemorySignatureStore::new()),
                )
            }
        };

    let webhook = config
        .webhook
        .as_ref()
        .map(|section| WebhookTarget::new(section.url.clone(), section.secret.clone()));

    let verifier = Arc::new(PaymentVerifier::new(
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        Arc::clone(&signatures),
    ));
    let escrow = Arc::new(EscrowManager::new(
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        Arc::clone(&store),
        Arc::clone(&signatures),
    ));
    let engine = Arc::new(SettlementEngine::new(
        ledger as Arc<dyn Ledger>,
        Arc::clone(&store),
        config.settlement.clone(),
        webhook,
    ));

    let state = AppState {
        verifier,
        escrow,
        settlement: Arc::clone(&engine),
    };

    let shutdown = Shutdown::try_new()?;
    let token = shutdown.cancellation_token();
    let sweep = settlement::spawn_sweep(engine, token.clone());

    let app = facilitator_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("facilitator listening on {addr}");

    let serve_token = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_token.cancelled().await })
        .await?;

    // The server can also stop on its own; make sure the sweep task follows.
    token.cancel();
    if let Err(err) = sweep.await {
        tracing::warn!(%err, "settlement sweep task failed");
    }
    tracing::info!("facilitator shut down gracefully");
    Ok(())
}
