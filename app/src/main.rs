//! muxgated — config-driven muxgate daemon.
//!
//! Loads the YAML configuration, starts the dispatcher, and keeps watching
//! the config file: every change is diffed and reconciled into the running
//! server.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mg_core::Server;
use muxgate_app::reconcile::Reconciler;
use muxgate_app::{cli, tracing_init};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    tracing_init::init_tracing_once();
    mg_tls::ensure_crypto_provider();

    let config = mg_config::load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let server = Arc::new(Server::new());
    let cancel = CancellationToken::new();

    let serve = {
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { server.serve(cancel).await })
    };

    let mut reconciler = Reconciler::new(server.clone());
    reconciler.apply(config).await;

    // Bridge notify's callback thread into the async loop.
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let mut watcher = RecommendedWatcher::new(
        move |event| {
            let _ = event_tx.blocking_send(event);
        },
        notify::Config::default(),
    )
    .context("creating config watcher")?;
    let watch_dir = match args.config.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    watcher
        .watch(watch_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {}", watch_dir.display()))?;

    tracing::info!(config = %args.config.display(), "muxgated running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                cancel.cancel();
                break;
            }
            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else { break };
                match event {
                    Ok(event) if touches_config(&event, &args.config) => {
                        reload(&args.config, &mut reconciler).await;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "config watcher error"),
                }
            }
        }
    }

    serve.await.context("server task panicked")??;
    Ok(())
}

fn touches_config(event: &notify::Event, config: &Path) -> bool {
    use notify::EventKind;
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }
    let name = config.file_name();
    event.paths.iter().any(|p| p.file_name() == name)
}

async fn reload(path: &Path, reconciler: &mut Reconciler) {
    match mg_config::load_config(path) {
        Ok(config) => {
            tracing::info!(config = %path.display(), "configuration changed, reconciling");
            reconciler.apply(config).await;
        }
        Err(e) => tracing::warn!(error = %e, "ignoring unreadable configuration"),
    }
}
