use anyhow::Context;
use clap::Parser;
use dashsync::infrastructure::config::load_oauth_config_from_env;
use dashsync::{
    bootstrap_workspace, build_engine, init_tracing, EntityKind, SyncEvent, TriggerLoop,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Offline-first task and event synchronization.
#[derive(Parser)]
#[command(name = "dashsync", version, about)]
struct Cli {
    /// Workspace directory holding config/ and state/. Defaults to the
    /// current directory.
    workspace: Option<PathBuf>,

    /// Keep running and sync on the configured interval and on
    /// connectivity changes until interrupted.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let bootstrap = bootstrap_workspace(&workspace)
        .with_context(|| format!("bootstrap workspace {}", workspace.display()))?;
    let oauth = load_oauth_config_from_env().context("load OAuth client configuration")?;
    let engine = build_engine(&bootstrap, oauth).context("build sync engine")?;

    if !cli.watch {
        for kind in EntityKind::ALL {
            let outcome = engine
                .orchestrator
                .sync(kind)
                .await
                .with_context(|| format!("sync {kind}"))?;
            println!(
                "{kind}: {} entities, {} applied, {} failed, {} pending",
                outcome.entities.len(),
                outcome.flush.applied.len(),
                outcome.flush.failed.len(),
                engine.orchestrator.pending_count(kind),
            );
        }
        return Ok(());
    }

    let mut events = engine.orchestrator.subscribe();
    let (trigger_loop, handle) = TriggerLoop::new(
        engine.orchestrator.clone(),
        engine.store.as_ref(),
        Duration::from_secs(engine.config.sync_interval_secs),
        CancellationToken::new(),
    );
    let loop_task = tokio::spawn(trigger_loop.run());
    handle.force_sync();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("listen for ctrl-c")?;
                info!("shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(SyncEvent::CollectionUpdated { kind, entities }) => {
                    info!(kind = %kind, count = entities.len(), "collection updated");
                }
                Ok(SyncEvent::SessionDegraded { message }) => {
                    warn!(%message, "session degraded; will retry on next trigger");
                }
                Ok(SyncEvent::ReauthenticationRequired { message }) => {
                    warn!(%message, "sign in again to resume syncing");
                }
                Ok(SyncEvent::SessionRestored) => info!("session restored"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event feed lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown();
    loop_task.await.context("join trigger loop")?;
    Ok(())
}
