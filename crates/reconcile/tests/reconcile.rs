use std::sync::{Arc, Mutex};
use std::time::Duration;

use logship_core::{ConfigPublisher, ResourceKind, Snapshot, SnapshotSource, Trigger, ACTIVATED_VALUE_PATH};
use logship_reconcile::{spawn_reconcile_loop, LoopConfig, ReconcileError, Reconciler};
use tokio::sync::{mpsc, watch};

const PIPELINE: &str = r#"
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLoggingConfig
metadata:
  name: all
spec:
  type: KubernetesPods
  destinationRefs: [loki]
---
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: loki
spec:
  type: Loki
  loki:
    endpoint: http://loki.example.com:3100
"#;

fn snapshot(yaml: &str) -> Snapshot {
    let mut s = Snapshot::offline();
    s.extend_from_yaml(yaml).unwrap();
    s
}

#[derive(Clone, Default)]
struct FakeSource {
    snap: Arc<Mutex<Snapshot>>,
    fetches: Arc<Mutex<usize>>,
    delay: Option<Duration>,
}

impl FakeSource {
    fn new(snap: Snapshot) -> Self {
        Self { snap: Arc::new(Mutex::new(snap)), ..Default::default() }
    }
    fn set(&self, snap: Snapshot) { *self.snap.lock().unwrap() = snap; }
    fn fetches(&self) -> usize { *self.fetches.lock().unwrap() }
}

#[async_trait::async_trait]
impl SnapshotSource for FakeSource {
    async fn fetch(&self) -> anyhow::Result<Snapshot> {
        *self.fetches.lock().unwrap() += 1;
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        Ok(self.snap.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Current,
    Apply(Vec<u8>),
    Delete,
    Event,
}

#[derive(Clone, Default)]
struct FakePublisher {
    stored: Arc<Mutex<Option<Vec<u8>>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_apply: Arc<Mutex<bool>>,
    fail_event: Arc<Mutex<bool>>,
}

impl FakePublisher {
    fn calls(&self) -> Vec<Call> { std::mem::take(&mut *self.calls.lock().unwrap()) }
    fn stored(&self) -> Option<Vec<u8>> { self.stored.lock().unwrap().clone() }
}

#[async_trait::async_trait]
impl ConfigPublisher for FakePublisher {
    async fn current(&self) -> anyhow::Result<Option<Vec<u8>>> {
        self.calls.lock().unwrap().push(Call::Current);
        Ok(self.stored())
    }
    async fn apply(&self, config: &[u8]) -> anyhow::Result<()> {
        if *self.fail_apply.lock().unwrap() {
            anyhow::bail!("connection refused");
        }
        self.calls.lock().unwrap().push(Call::Apply(config.to_vec()));
        *self.stored.lock().unwrap() = Some(config.to_vec());
        Ok(())
    }
    async fn delete(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Delete);
        *self.stored.lock().unwrap() = None;
        Ok(())
    }
    async fn record_event(&self) -> anyhow::Result<()> {
        if *self.fail_event.lock().unwrap() {
            anyhow::bail!("events are forbidden");
        }
        self.calls.lock().unwrap().push(Call::Event);
        Ok(())
    }
}

#[tokio::test]
async fn writes_once_then_stays_quiet() {
    let source = FakeSource::new(snapshot(PIPELINE));
    let publisher = FakePublisher::default();
    let mut r = Reconciler::new(source.clone(), publisher.clone());

    let out = r.reconcile().await.unwrap();
    assert!(out.activated && out.written);
    let calls = publisher.calls();
    assert_eq!(calls[0], Call::Current);
    assert!(matches!(&calls[1], Call::Apply(b) if !b.is_empty()));
    assert_eq!(calls[2], Call::Event);
    assert_eq!(r.values().get_bool(ACTIVATED_VALUE_PATH), Some(true));

    let out = r.reconcile().await.unwrap();
    assert!(out.activated && !out.written);
    assert!(publisher.calls().is_empty());
}

#[tokio::test]
async fn live_secret_seeds_comparison() {
    let snap = snapshot(PIPELINE);
    let bytes = logship_compose::compile(&snap).unwrap().bytes;
    let publisher = FakePublisher::default();
    *publisher.stored.lock().unwrap() = Some(bytes);
    let mut r = Reconciler::new(FakeSource::new(snap), publisher.clone());
    let out = r.reconcile().await.unwrap();
    assert!(out.activated && !out.written);
    assert_eq!(publisher.calls(), vec![Call::Current]);
}

#[tokio::test]
async fn empty_inputs_delete_and_deactivate() {
    let source = FakeSource::new(snapshot(PIPELINE));
    let publisher = FakePublisher::default();
    let mut r = Reconciler::new(source.clone(), publisher.clone());
    r.reconcile().await.unwrap();
    publisher.calls();

    source.set(Snapshot::offline());
    let out = r.reconcile().await.unwrap();
    assert!(!out.activated && out.deleted);
    assert_eq!(publisher.calls(), vec![Call::Delete]);
    assert!(publisher.stored().is_none());
    assert_eq!(r.values().get_bool(ACTIVATED_VALUE_PATH), Some(false));

    // Coming back writes again.
    source.set(snapshot(PIPELINE));
    assert!(r.reconcile().await.unwrap().written);
}

#[tokio::test]
async fn missing_namespace_touches_nothing() {
    let mut snap = snapshot(PIPELINE);
    snap.namespace_present = false;
    let publisher = FakePublisher::default();
    let mut r = Reconciler::new(FakeSource::new(snap), publisher.clone());
    let out = r.reconcile().await.unwrap();
    assert!(!out.activated && !out.written && !out.deleted);
    assert!(publisher.calls().is_empty());
    assert_eq!(r.values().get_bool(ACTIVATED_VALUE_PATH), Some(false));
}

#[tokio::test]
async fn transport_errors_are_retried() {
    let publisher = FakePublisher::default();
    *publisher.fail_apply.lock().unwrap() = true;
    let mut r = Reconciler::new(FakeSource::new(snapshot(PIPELINE)), publisher.clone());
    assert!(matches!(r.reconcile().await, Err(ReconcileError::Transport(_))));

    *publisher.fail_apply.lock().unwrap() = false;
    publisher.calls();
    let out = r.reconcile().await.unwrap();
    assert!(out.written);
    assert!(publisher.calls().contains(&Call::Event));
}

#[tokio::test]
async fn failed_event_reapplies_on_next_reconcile() {
    let publisher = FakePublisher::default();
    *publisher.fail_event.lock().unwrap() = true;
    let mut r = Reconciler::new(FakeSource::new(snapshot(PIPELINE)), publisher.clone());
    assert!(matches!(r.reconcile().await, Err(ReconcileError::Transport(_))));
    let calls = publisher.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(&calls[1], Call::Apply(_)));
    assert!(publisher.stored().is_some());

    *publisher.fail_event.lock().unwrap() = false;
    let out = r.reconcile().await.unwrap();
    assert!(out.written);
    let calls = publisher.calls();
    assert!(matches!(&calls[0], Call::Apply(_)));
    assert_eq!(calls[1], Call::Event);
    assert_eq!(r.values().get_bool(ACTIVATED_VALUE_PATH), Some(true));
}

#[tokio::test]
async fn namespace_recreation_rewrites_secret() {
    let source = FakeSource::new(snapshot(PIPELINE));
    let publisher = FakePublisher::default();
    let mut r = Reconciler::new(source.clone(), publisher.clone());
    assert!(r.reconcile().await.unwrap().written);

    // Namespace deleted; the secret goes with it.
    let mut gone = snapshot(PIPELINE);
    gone.namespace_present = false;
    source.set(gone);
    *publisher.stored.lock().unwrap() = None;
    r.reconcile().await.unwrap();
    publisher.calls();

    source.set(snapshot(PIPELINE));
    let out = r.reconcile().await.unwrap();
    assert!(out.activated && out.written);
    assert_eq!(publisher.calls()[0], Call::Current);
    assert!(publisher.stored().is_some());
    assert_eq!(r.values().get_bool(ACTIVATED_VALUE_PATH), Some(true));
}

#[tokio::test]
async fn render_failures_abort_without_writing() {
    let bad = PIPELINE.replace(
        "  destinationRefs: [loki]",
        "  labelFilter:\n    - field: namespace\n      operator: In\n      values: [[a]]\n  destinationRefs: [loki]",
    );
    let publisher = FakePublisher::default();
    let mut r = Reconciler::new(FakeSource::new(snapshot(&bad)), publisher.clone());
    assert!(matches!(r.reconcile().await, Err(ReconcileError::Compile(_))));
    assert!(publisher.calls().is_empty());
}

fn fast() -> LoopConfig {
    LoopConfig { debounce: Duration::from_millis(20), grace: Duration::from_millis(50), queue_capacity: 16 }
}

#[tokio::test]
async fn loop_coalesces_bursts() {
    let source = FakeSource::new(snapshot(PIPELINE));
    let publisher = FakePublisher::default();
    let (tx, rx) = mpsc::channel(64);
    for i in 0..10 {
        let name = format!("d{}", i % 3);
        tx.send(Trigger { kind: ResourceKind::ClusterLogDestination, namespace: None, name }).await.unwrap();
    }
    drop(tx);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let (handle, task) =
        spawn_reconcile_loop(Reconciler::new(source.clone(), publisher.clone()), rx, stop_rx, fast());
    task.await.unwrap();

    assert_eq!(source.fetches(), 1);
    let state = handle.current();
    assert_eq!(state.epoch, 1);
    assert!(state.last_error.is_none());
    assert_eq!(state.values.get_bool(ACTIVATED_VALUE_PATH), Some(true));
    assert_eq!(publisher.calls().iter().filter(|c| **c == Call::Event).count(), 1);
}

#[tokio::test]
async fn loop_reports_each_reconcile() {
    let source = FakeSource::new(snapshot(PIPELINE));
    let (tx, rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (handle, task) = spawn_reconcile_loop(Reconciler::new(source.clone(), FakePublisher::default()), rx, stop_rx, fast());

    let mut epochs = handle.subscribe_epoch();
    epochs.changed().await.unwrap();
    assert_eq!(*epochs.borrow(), 1);

    source.set(Snapshot::offline());
    tx.send(Trigger::relist(ResourceKind::ClusterLoggingConfig)).await.unwrap();
    epochs.changed().await.unwrap();
    let state = handle.current();
    assert_eq!(state.epoch, 2);
    assert_eq!(state.last_outcome.map(|o| o.deleted), Some(true));
    assert_eq!(state.values.get_bool(ACTIVATED_VALUE_PATH), Some(false));

    stop_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn namespace_trigger_activates() {
    let mut absent = snapshot(PIPELINE);
    absent.namespace_present = false;
    let source = FakeSource::new(absent);
    let publisher = FakePublisher::default();
    let (tx, rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (handle, task) = spawn_reconcile_loop(Reconciler::new(source.clone(), publisher.clone()), rx, stop_rx, fast());

    let mut epochs = handle.subscribe_epoch();
    epochs.changed().await.unwrap();
    assert_eq!(handle.current().values.get_bool(ACTIVATED_VALUE_PATH), Some(false));

    source.set(snapshot(PIPELINE));
    tx.send(Trigger { kind: ResourceKind::Namespace, namespace: None, name: "d8-log-shipper".into() }).await.unwrap();
    epochs.changed().await.unwrap();
    let state = handle.current();
    assert_eq!(state.epoch, 2);
    assert_eq!(state.values.get_bool(ACTIVATED_VALUE_PATH), Some(true));
    assert!(publisher.stored().is_some());

    stop_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn shutdown_cancels_slow_reconcile() {
    let source = FakeSource { delay: Some(Duration::from_secs(30)), ..FakeSource::new(snapshot(PIPELINE)) };
    let publisher = FakePublisher::default();
    let (_tx, rx) = mpsc::channel(4);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (handle, task) = spawn_reconcile_loop(Reconciler::new(source.clone(), publisher.clone()), rx, stop_rx, fast());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(source.fetches(), 1);
    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(handle.current().epoch, 0);
    assert!(publisher.calls().is_empty());
}
