use std::sync::Arc;

use anyhow::{Context, Result};
use miend::config::Config;
use miend::http::{create_app, AppState};
use miend::store::SqliteStore;
use mien_core::MatchEngine;
use mien_vision::{spawn_vision, LivenessScorer, OrtFaceEncoder};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        models = %config.model_dir.display(),
        candidate = config.candidate_threshold,
        accept = config.accept_threshold,
        "miend starting"
    );

    let store = SqliteStore::open(&config.db_path)
        .await
        .context("failed to open similarity store")?;
    let engine = MatchEngine::new(Arc::new(store), config.thresholds());

    // Load models synchronously before accepting traffic (fail-fast).
    let encoder =
        OrtFaceEncoder::load(&config.detector_model_path(), &config.embedder_model_path())
            .context("failed to load face models")?;
    let scorer = match &config.liveness_model_dir {
        Some(dir) => {
            let scorer = LivenessScorer::load(&config.detector_model_path(), dir)
                .context("failed to load liveness models")?;
            tracing::info!(dir = %dir.display(), "liveness checking enabled");
            Some(scorer)
        }
        None => None,
    };
    let vision = spawn_vision(encoder, scorer);

    let state = AppState::new(engine, vision);
    let app = create_app(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "miend listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("miend shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
