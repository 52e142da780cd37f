//! log-shipper reconcile loop: coalesces watch triggers and runs one
//! reconcile per burst, never two at once.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use logship_core::{ConfigPublisher, ResourceKind, SnapshotSource, Trigger, Values};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod coalesce;
mod reconciler;
pub mod telemetry;

pub use coalesce::Coalescer;
pub use reconciler::{Outcome, ReconcileError, Reconciler};

/// Published after every finished reconcile.
#[derive(Debug, Clone, Default)]
pub struct ReconcileState {
    /// Number of finished reconciles.
    pub epoch: u64,
    pub last_outcome: Option<Outcome>,
    pub last_error: Option<String>,
    pub values: Values,
}

/// Read side of the loop: the latest state and an epoch subscription.
#[derive(Clone)]
pub struct StateHandle {
    state: Arc<ArcSwap<ReconcileState>>,
    epoch_rx: watch::Receiver<u64>,
}

impl StateHandle {
    pub fn current(&self) -> Arc<ReconcileState> { self.state.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Coalescing window: triggers arriving within one tick share a reconcile.
    pub debounce: Duration,
    /// How long an in-flight reconcile may keep running after shutdown.
    pub grace: Duration,
    pub queue_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(200), grace: Duration::from_secs(10), queue_capacity: 1024 }
    }
}

async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can ask us to stop any more.
            std::future::pending::<()>().await;
        }
    }
}

/// Run one reconcile; on shutdown it gets `grace` to finish before it is
/// dropped, which cancels it at its next await point.
async fn run_once<S, P>(
    reconciler: &mut Reconciler<S, P>,
    shutdown: &mut watch::Receiver<bool>,
    grace: Duration,
) -> Option<Result<Outcome, ReconcileError>>
where
    S: SnapshotSource,
    P: ConfigPublisher,
{
    let fut = reconciler.reconcile();
    tokio::pin!(fut);
    tokio::select! {
        res = &mut fut => Some(res),
        _ = wait_shutdown(shutdown) => match tokio::time::timeout(grace, &mut fut).await {
            Ok(res) => Some(res),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "reconcile cancelled after grace window");
                None
            }
        },
    }
}

/// Spawn the reconcile loop. A synthetic relist of every kind is queued so
/// the first reconcile happens without waiting for a watch event.
pub fn spawn_reconcile_loop<S, P>(
    mut reconciler: Reconciler<S, P>,
    mut rx: mpsc::Receiver<Trigger>,
    mut shutdown: watch::Receiver<bool>,
    cfg: LoopConfig,
) -> (StateHandle, JoinHandle<()>)
where
    S: SnapshotSource + 'static,
    P: ConfigPublisher + 'static,
{
    let state = Arc::new(ArcSwap::from_pointee(ReconcileState::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let state_clone = Arc::clone(&state);

    let task = tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cfg.queue_capacity);
        for kind in ResourceKind::ALL {
            coalescer.push(Trigger::relist(kind));
        }
        let mut ticker = tokio::time::interval(cfg.debounce);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut epoch = 0u64;
        let mut open = true;
        loop {
            tokio::select! {
                biased;
                _ = wait_shutdown(&mut shutdown) => {
                    debug!("shutdown requested; leaving reconcile loop");
                    break;
                }
                maybe = rx.recv(), if open => match maybe {
                    Some(t) => coalescer.push(t),
                    None => {
                        debug!("trigger channel closed; draining");
                        open = false;
                    }
                },
                _ = ticker.tick() => {
                    let batch = coalescer.drain_ready();
                    if batch.is_empty() {
                        if !open {
                            break;
                        }
                        continue;
                    }
                    debug!(triggers = batch.len(), "reconciling");
                    let Some(res) = run_once(&mut reconciler, &mut shutdown, cfg.grace).await else { break };
                    epoch += 1;
                    let (last_outcome, last_error) = match res {
                        Ok(o) => (Some(o), None),
                        Err(e) => {
                            warn!(error = %e, "reconcile failed; retrying on next trigger");
                            (None, Some(e.to_string()))
                        }
                    };
                    state_clone.store(Arc::new(ReconcileState {
                        epoch,
                        last_outcome,
                        last_error,
                        values: reconciler.values().clone(),
                    }));
                    let _ = epoch_tx.send(epoch);
                }
            }
        }
        info!(reconciles = epoch, dropped_triggers = coalescer.dropped(), "reconcile loop stopped");
    });

    (StateHandle { state, epoch_rx }, task)
}
