//! log-shipper core types: input resources, cluster snapshot and the I/O seams
//! the reconciler is written against.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod apis;
pub mod manifest;
pub mod quantity;

pub use apis::{ClusterLogDestination, ClusterLoggingConfig, PodLoggingConfig};

// ---- Well-known names ----

/// Namespace the agent runs in; its absence disables the module.
pub const SHIPPER_NAMESPACE: &str = "d8-log-shipper";
/// Secret carrying the rendered agent configuration.
pub const CONFIG_SECRET_NAME: &str = "d8-log-shipper-config";
pub const CONFIG_SECRET_KEY: &str = "vector.json";
pub const HERITAGE_LABEL: (&str, &str) = ("heritage", "deckhouse");
pub const MODULE_LABEL: (&str, &str) = ("module", "log-shipper");
/// Secrets carrying this label (value `true`) may be referenced by `tls.secretRef`.
pub const WATCH_SECRET_LABEL: &str = "log-shipper.deckhouse.io/watch-secret";
/// Pods labelled `<this>=true` are never collected.
pub const EXCLUDE_LABEL: &str = "log-shipper.deckhouse.io/exclude";
pub const TOKEN_SECRET_NAME: &str = "log-shipper-token";
pub const LOKI_NAMESPACE: &str = "d8-monitoring";
pub const LOKI_SERVICE: &str = "loki";
pub const LOKI_PORT_NAME: &str = "loki";

pub const EVENT_REASON: &str = "LogShipperConfigCreateUpdate";
pub const EVENT_ACTION: &str = "Create/Update";
pub const EVENT_NOTE: &str = "Config file has been created or updated.";
pub const EVENT_GENERATE_NAME: &str = "d8-log-shipper-config-";
pub const FIELD_MANAGER: &str = "log-shipper";

/// Values path toggled on every reconcile.
pub const ACTIVATED_VALUE_PATH: &str = "logShipper.internal.activated";

pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid quantity: {0:?}")]
    Quantity(String),
    #[error("invalid duration: {0:?}")]
    Duration(String),
    #[error("invalid manifest: {0}")]
    Manifest(String),
}

/// Raw key -> bytes map of a labelled TLS secret.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Addresses backing the in-cluster Loki service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LokiEndpoint {
    pub addresses: Vec<String>,
    pub port: Option<u16>,
}

/// Everything a single compile pass reads from the cluster.
///
/// Lists are kept sorted by `(namespace, name)` so two fetches of the same
/// cluster state compile to identical bytes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub namespace_present: bool,
    pub cluster_sources: Vec<ClusterLoggingConfig>,
    pub pod_sources: Vec<PodLoggingConfig>,
    pub destinations: Vec<ClusterLogDestination>,
    /// Secrets in the agent namespace labelled [`WATCH_SECRET_LABEL`], by name.
    pub tls_secrets: BTreeMap<String, SecretData>,
    /// Bearer token for in-cluster Loki, when the token secret exists.
    pub loki_token: Option<String>,
    pub loki_endpoint: LokiEndpoint,
    pub cluster_domain: String,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            namespace_present: false,
            cluster_sources: Vec::new(),
            pod_sources: Vec::new(),
            destinations: Vec::new(),
            tls_secrets: BTreeMap::new(),
            loki_token: None,
            loki_endpoint: LokiEndpoint::default(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
        }
    }
}

impl Snapshot {
    /// Sort every resource list by `(namespace, name)`.
    pub fn normalize(&mut self) {
        use kube::ResourceExt;
        fn key<K: ResourceExt>(o: &K) -> (String, String) {
            (o.namespace().unwrap_or_default(), o.name_any())
        }
        self.cluster_sources.sort_by_key(key);
        self.pod_sources.sort_by_key(key);
        self.destinations.sort_by_key(key);
    }
}

/// Resource kinds whose changes trigger a reconcile: the three inputs plus
/// the objects the snapshot reads alongside them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ClusterLoggingConfig,
    PodLoggingConfig,
    ClusterLogDestination,
    Namespace,
    Secret,
    Endpoints,
}

impl ResourceKind {
    /// The input kinds.
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::ClusterLoggingConfig,
        ResourceKind::PodLoggingConfig,
        ResourceKind::ClusterLogDestination,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::ClusterLoggingConfig => "ClusterLoggingConfig",
            ResourceKind::PodLoggingConfig => "PodLoggingConfig",
            ResourceKind::ClusterLogDestination => "ClusterLogDestination",
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Secret => "Secret",
            ResourceKind::Endpoints => "Endpoints",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A watched object changed (or a full relist happened when `name` is empty).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Trigger {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl Trigger {
    pub fn relist(kind: ResourceKind) -> Self {
        Self { kind, namespace: None, name: String::new() }
    }
}

/// Nested key/value tree shared with the hosting framework
/// (e.g. `logShipper.internal.activated`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(serde_json::Value);

impl Values {
    pub fn new() -> Self {
        Self(serde_json::Value::Object(Default::default()))
    }

    /// Set a dotted path, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: impl Into<serde_json::Value>) {
        let mut cur = &mut self.0;
        for seg in path.split('.') {
            if !cur.is_object() {
                *cur = serde_json::Value::Object(Default::default());
            }
            cur = match cur {
                serde_json::Value::Object(map) => {
                    map.entry(seg.to_string()).or_insert(serde_json::Value::Null)
                }
                _ => return,
            };
        }
        *cur = value.into();
    }

    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        path.split('.').try_fold(&self.0, |cur, seg| cur.get(seg))
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Reads the inputs of one compile pass.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Snapshot>;
}

/// Writes compile results back to the cluster.
#[async_trait::async_trait]
pub trait ConfigPublisher: Send + Sync {
    /// Bytes currently stored under [`CONFIG_SECRET_KEY`], if the secret exists.
    async fn current(&self) -> anyhow::Result<Option<Vec<u8>>>;
    /// Create or replace the config secret.
    async fn apply(&self, config: &[u8]) -> anyhow::Result<()>;
    /// Delete the config secret; a missing secret is not an error.
    async fn delete(&self) -> anyhow::Result<()>;
    /// Record a `LogShipperConfigCreateUpdate` event against the secret.
    async fn record_event(&self) -> anyhow::Result<()>;
}

pub mod prelude {
    pub use super::{
        ConfigPublisher, LokiEndpoint, ResourceKind, SecretData, Snapshot, SnapshotSource, Trigger,
        Values,
    };
    pub use crate::apis::*;
}
