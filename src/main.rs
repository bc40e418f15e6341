//! ZK RPS Game Server
//!
//! Authoritative server for commit-reveal rock-paper-scissors.
//! Commitments and reveals are checked by Noir circuits through `nargo`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zk_rps::{
    GameServer, GameSession, MockProver, NargoProver, ProverBridge, ProverConfig, ServerConfig,
    SessionConfig, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (silently ignore if not found)
    let _ = dotenvy::dotenv();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ZK RPS Server v{}", VERSION);

    let prover = select_prover().await?;
    info!("Prover backend: {}", prover.name());

    let session = Arc::new(GameSession::new(prover, SessionConfig::from_env()));
    let server = Arc::new(GameServer::new(ServerConfig::from_env(), session));

    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            shutdown.shutdown();
        }
    });

    server.run().await.context("game server failed")?;
    info!("Server stopped");
    Ok(())
}

/// Pick the prover from `ZK_RPS_PROVER` and verify the toolchain when real.
async fn select_prover() -> Result<Arc<dyn ProverBridge>> {
    let backend = std::env::var("ZK_RPS_PROVER").unwrap_or_else(|_| "nargo".to_string());
    match backend.as_str() {
        "mock" => {
            warn!("Using the in-process mock prover; commitments are not circuit-backed");
            Ok(Arc::new(MockProver::new()))
        }
        "nargo" => {
            let config = ProverConfig::from_env();
            info!("Commitment circuit: {}", config.commitment_circuit.display());
            info!("Reveal circuit: {}", config.reveal_circuit.display());

            let prover = NargoProver::new(config);
            let version = prover
                .preflight()
                .await
                .context("prover toolchain verification failed")?;
            info!("Toolchain: {}", version);
            Ok(Arc::new(prover))
        }
        other => anyhow::bail!("unknown ZK_RPS_PROVER backend {:?} (expected nargo or mock)", other),
    }
}
