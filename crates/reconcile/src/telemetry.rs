//! Prometheus-facing gauges and counters.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::ResourceExt;
use logship_core::{ResourceKind, Snapshot};
use metrics::{counter, gauge, histogram};
use rustc_hash::FxHashSet;

type ResourceKey = (ResourceKind, String, String);

fn key<K: ResourceExt>(kind: ResourceKind, o: &K) -> ResourceKey {
    (kind, o.namespace().unwrap_or_default(), o.name_any())
}

fn resource_keys(snap: &Snapshot) -> FxHashSet<ResourceKey> {
    let c = snap.cluster_sources.iter().map(|o| key(ResourceKind::ClusterLoggingConfig, o));
    let p = snap.pod_sources.iter().map(|o| key(ResourceKind::PodLoggingConfig, o));
    let d = snap.destinations.iter().map(|o| key(ResourceKind::ClusterLogDestination, o));
    c.chain(p).chain(d).collect()
}

/// Tracks which resources and Loki destinations were reported so vanished
/// ones drop to 0.
#[derive(Default)]
pub struct Telemetry {
    present: FxHashSet<ResourceKey>,
    loki: FxHashSet<String>,
}

impl Telemetry {
    pub fn observe_resources(&mut self, snap: &Snapshot) {
        let now = resource_keys(snap);
        for (kind, ns, name) in self.present.difference(&now) {
            gauge!("log_shipper_custom_resource", 0.0, "kind" => kind.as_str(), "namespace" => ns.clone(), "name" => name.clone());
        }
        for (kind, ns, name) in &now {
            gauge!("log_shipper_custom_resource", 1.0, "kind" => kind.as_str(), "namespace" => ns.clone(), "name" => name.clone());
        }
        self.present = now;
    }

    pub fn loki_authorization(&mut self, required: &BTreeMap<String, bool>) {
        let now: FxHashSet<String> = required.keys().cloned().collect();
        for name in self.loki.difference(&now) {
            gauge!("log_shipper_cluster_log_destination_d8_loki", 0.0, "resource_name" => name.clone());
        }
        for (name, needs) in required {
            let v = if *needs { 1.0 } else { 0.0 };
            gauge!("log_shipper_cluster_log_destination_d8_loki", v, "resource_name" => name.clone());
        }
        self.loki = now;
    }

    pub fn activated(&self, on: bool) {
        gauge!("log_shipper_activated", if on { 1.0 } else { 0.0 });
    }

    pub fn reconciled(&self, result: &'static str, took: Duration) {
        counter!("log_shipper_reconcile_total", 1u64, "result" => result);
        histogram!("log_shipper_reconcile_ms", took.as_secs_f64() * 1000.0);
    }

    pub fn config_written(&self) {
        counter!("log_shipper_config_writes_total", 1u64);
    }

    pub fn present(&self) -> usize { self.present.len() }
}
