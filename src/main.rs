//! Persona Relay - file-triggered LLM personas
//!
//! Each persona watches its own input file; writing to it produces a reply
//! in the persona's output file, with a short per-persona conversation memory.

mod channel;
mod config;
mod conversation;
mod llm;
mod orchestrator;
mod persona;
mod watcher;

use config::RelayConfig;
use orchestrator::Orchestrator;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watcher::ChangeDetector;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "persona_relay=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false),
        )
        .init();

    // Configuration errors are fatal before anything starts
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let llm = llm::create_service(&config.llm)?;

    // Watch paths must compare equal to channel paths
    std::fs::create_dir_all(&config.root)?;
    let root = std::fs::canonicalize(&config.root)?;
    tracing::info!(root = %root.display(), "Roster root ready");

    let relay = Arc::new(Orchestrator::from_root(&root, llm, config.settings).await?);

    let (tx, rx) = mpsc::channel(256);
    let _detector = ChangeDetector::spawn(&relay.channels(), tx)?;

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(relay.clone().run_sweeper(cancel.clone()));
    let notifications = tokio::spawn(relay.clone().run(rx, cancel.clone()));

    tracing::info!(
        personas = relay.channels().len(),
        debounce_ms = %relay.settings().debounce.as_millis(),
        "Persona relay running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    cancel.cancel();
    let _ = tokio::join!(sweeper, notifications);

    for channels in relay.channels() {
        let persona = channels.persona;
        tracing::info!(
            persona = %persona,
            attempts = relay.attempts_fired(persona),
            turns = relay.history(persona).len(),
            busy = relay.is_busy(persona),
            "Final persona state"
        );
    }

    Ok(())
}
