use crate::application::gateway::RemoteGateway;
use crate::application::orchestrator::SyncOrchestrator;
use crate::domain::models::EntityKind;
use crate::infrastructure::storage::{DurableStore, CONNECTIVITY_KEY, CONNECTIVITY_ONLINE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Timer,
    ConnectivityRestored,
    Forced,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::ConnectivityRestored => "connectivity_restored",
            Self::Forced => "forced",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriggerHandle {
    force_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
}

impl TriggerHandle {
    pub fn force_sync(&self) -> bool {
        self.force_tx.send(()).is_ok()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub struct TriggerLoop<S, G>
where
    S: DurableStore + ?Sized + 'static,
    G: RemoteGateway + ?Sized + 'static,
{
    orchestrator: Arc<SyncOrchestrator<S, G>>,
    sync_interval: Duration,
    connectivity: Option<broadcast::Receiver<Vec<u8>>>,
    force_rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
}

impl<S, G> TriggerLoop<S, G>
where
    S: DurableStore + ?Sized + 'static,
    G: RemoteGateway + ?Sized + 'static,
{
    pub fn new(
        orchestrator: Arc<SyncOrchestrator<S, G>>,
        store: &S,
        sync_interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, TriggerHandle) {
        let (force_tx, force_rx) = mpsc::unbounded_channel();
        let handle = TriggerHandle {
            force_tx,
            cancel: cancel.clone(),
        };
        let trigger_loop = Self {
            orchestrator,
            sync_interval,
            connectivity: Some(store.on_external_change(CONNECTIVITY_KEY)),
            force_rx,
            cancel,
        };
        (trigger_loop, handle)
    }

    pub async fn run(mut self) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.sync_interval.as_secs(), "sync trigger loop started");

        loop {
            let reason = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("sync trigger loop cancelled");
                    break;
                }
                _ = ticker.tick() => TriggerReason::Timer,
                change = next_change(&mut self.connectivity) => match change {
                    Ok(value) if value == CONNECTIVITY_ONLINE => TriggerReason::ConnectivityRestored,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "connectivity feed lagged");
                        TriggerReason::ConnectivityRestored
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("connectivity feed closed; relying on timer and force sync");
                        self.connectivity = None;
                        continue;
                    }
                },
                Some(()) = self.force_rx.recv() => TriggerReason::Forced,
            };
            self.trigger_all(reason);
        }
    }

    fn trigger_all(&self, reason: TriggerReason) {
        for kind in EntityKind::ALL {
            let orchestrator = Arc::clone(&self.orchestrator);
            debug!(kind = %kind, reason = reason.as_str(), "sync triggered");
            tokio::spawn(async move {
                if let Err(error) = orchestrator.sync(kind).await {
                    warn!(kind = %kind, reason = reason.as_str(), error = %error, "triggered sync failed");
                }
            });
        }
    }
}

async fn next_change(
    receiver: &mut Option<broadcast::Receiver<Vec<u8>>>,
) -> Result<Vec<u8>, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
