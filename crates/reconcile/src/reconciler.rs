use std::time::Instant;

use logship_compose::{compile, CompileError};
use logship_core::{ConfigPublisher, SnapshotSource, Values, ACTIVATED_VALUE_PATH};
use tracing::{debug, info, warn};

use crate::telemetry::Telemetry;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("fetching snapshot: {0:#}")]
    Fetch(#[source] anyhow::Error),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("publishing config: {0:#}")]
    Transport(#[source] anyhow::Error),
}

/// What one reconcile did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub activated: bool,
    pub written: bool,
    pub deleted: bool,
    pub skipped: usize,
}

/// Turns the current cluster snapshot into the config secret and the
/// activated flag. One instance is driven by exactly one task.
pub struct Reconciler<S, P> {
    source: S,
    publisher: P,
    /// Bytes known to be persisted; `None` until seeded from the live secret.
    last: Option<Option<Vec<u8>>>,
    values: Values,
    telemetry: Telemetry,
}

impl<S: SnapshotSource, P: ConfigPublisher> Reconciler<S, P> {
    pub fn new(source: S, publisher: P) -> Self {
        Self { source, publisher, last: None, values: Values::new(), telemetry: Telemetry::default() }
    }

    pub fn values(&self) -> &Values { &self.values }

    fn set_activated(&mut self, on: bool) {
        self.values.set(ACTIVATED_VALUE_PATH, on);
        self.telemetry.activated(on);
    }

    pub async fn reconcile(&mut self) -> Result<Outcome, ReconcileError> {
        let t0 = Instant::now();
        let res = self.reconcile_inner().await;
        let result = match &res {
            Ok(_) => "ok",
            Err(ReconcileError::Fetch(_)) => "fetch_error",
            Err(ReconcileError::Compile(_)) => "compile_error",
            Err(ReconcileError::Transport(_)) => "transport_error",
        };
        self.telemetry.reconciled(result, t0.elapsed());
        res
    }

    async fn reconcile_inner(&mut self) -> Result<Outcome, ReconcileError> {
        let snap = self.source.fetch().await.map_err(ReconcileError::Fetch)?;
        self.telemetry.observe_resources(&snap);
        if !snap.namespace_present {
            debug!("agent namespace absent; nothing to do");
            // The secret lives in that namespace; re-read it once it is back.
            self.last = None;
            self.set_activated(false);
            return Ok(Outcome::default());
        }

        let compiled = compile(&snap)?;
        self.telemetry.loki_authorization(&compiled.loki_auth_required);
        let skipped = compiled.skipped.len();

        if !compiled.activated {
            self.publisher.delete().await.map_err(ReconcileError::Transport)?;
            self.last = Some(None);
            self.set_activated(false);
            info!(skipped, "no pipelines; shipper deactivated");
            return Ok(Outcome { activated: false, written: false, deleted: true, skipped });
        }

        let last = match self.last.take() {
            Some(last) => last,
            None => self.publisher.current().await.map_err(ReconcileError::Transport)?,
        };
        if last.as_deref() == Some(compiled.bytes.as_slice()) {
            debug!("config unchanged");
            self.last = Some(last);
            self.set_activated(true);
            return Ok(Outcome { activated: true, written: false, deleted: false, skipped });
        }
        self.last = Some(last);

        self.publisher.apply(&compiled.bytes).await.map_err(ReconcileError::Transport)?;
        if let Err(e) = self.publisher.record_event().await {
            warn!(error = %format!("{e:#}"), "config written but event not recorded");
            return Err(ReconcileError::Transport(e));
        }
        self.last = Some(Some(compiled.bytes));
        self.telemetry.config_written();
        self.set_activated(true);
        info!(skipped, "config updated");
        Ok(Outcome { activated: true, written: true, deleted: false, skipped })
    }
}
