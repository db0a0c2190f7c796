//! Headless speech translation bridge.
//!
//! Reads one JSON request from stdin, runs the pipeline in streaming mode and
//! writes synthesized audio to stdout as it arrives. All tracing output goes
//! to stderr so stdout stays a clean audio channel. Ctrl-C cancels the run.

use anyhow::Context;
use polyvox::config::PolyvoxConfig;
use polyvox::host::{self, BridgeError};
use polyvox::pipeline::{Collaborators, PipelineOrchestrator};
use polyvox::providers::{ElevenLabsClient, GeminiTranslator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn load_config() -> anyhow::Result<PolyvoxConfig> {
    let path = std::env::var_os("POLYVOX_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(PolyvoxConfig::default_config_path);
    let config = if path.is_file() {
        PolyvoxConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        PolyvoxConfig::default()
    };
    config.validate()?;
    Ok(config)
}

async fn run() -> anyhow::Result<()> {
    let config = load_config()?;
    let elevenlabs = Arc::new(ElevenLabsClient::from_config(&config)?);
    let gemini = Arc::new(GeminiTranslator::from_config(&config)?);
    let orchestrator = PipelineOrchestrator::new(
        config,
        Collaborators {
            transcriber: elevenlabs.clone(),
            translator: gemini,
            cloner: elevenlabs.clone(),
            synthesizer: elevenlabs,
        },
    );

    let request = host::read_request(tokio::io::stdin()).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    match host::run_bridge(&orchestrator, request, tokio::io::stdout(), cancel).await {
        Ok(_) => Ok(()),
        Err(BridgeError::Pipeline(failure)) if failure.is_cancelled() => {
            anyhow::bail!("cancelled at {}", failure.stage)
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("polyvox=info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "polyvox-host failed");
        eprintln!("[ERROR] {e:#}");
        std::process::exit(1);
    }
}
