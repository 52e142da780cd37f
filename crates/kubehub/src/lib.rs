//! log-shipper kubehub: watcher wiring and the Kubernetes side of the
//! snapshot/publish seams.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use anyhow::{Context, Result};
use futures::StreamExt;
use kube::{
    api::Api,
    runtime::watcher::{self, Event},
    runtime::WatchStreamExt,
    Client, Resource, ResourceExt,
};
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Secret};
use logship_core::{
    ClusterLogDestination, ClusterLoggingConfig, PodLoggingConfig, ResourceKind, Trigger, LOKI_NAMESPACE,
    LOKI_SERVICE, SHIPPER_NAMESPACE, TOKEN_SECRET_NAME, WATCH_SECRET_LABEL,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod publish;
mod snapshot;

pub use publish::{config_event, config_secret, KubePublisher};
pub use snapshot::{loki_endpoint_from, KubeSnapshotSource};

/// Client from the ambient kubeconfig or in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client")
}

/// Trigger for a single watched object.
pub fn trigger_for<K: Resource>(kind: ResourceKind, obj: &K) -> Trigger {
    Trigger { kind, namespace: obj.namespace(), name: obj.name_any() }
}

/// List+watch `api` narrowed by `cfg` and forward every change as a trigger.
/// Returns when the receiver is gone.
pub async fn watch_kind<K>(api: Api<K>, kind: ResourceKind, cfg: watcher::Config, tx: mpsc::Sender<Trigger>)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let stream = watcher::watcher(api, cfg).default_backoff();
    futures::pin_mut!(stream);
    info!(kind = %kind, "watcher started");
    while let Some(ev) = stream.next().await {
        let trigger = match ev {
            Ok(Event::Applied(o)) | Ok(Event::Deleted(o)) => trigger_for(kind, &o),
            Ok(Event::Restarted(list)) => {
                debug!(kind = %kind, count = list.len(), "watch restart");
                Trigger::relist(kind)
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "watch error; backing off");
                continue;
            }
        };
        counter!("log_shipper_watch_events_total", 1u64, "kind" => kind.as_str());
        if tx.send(trigger).await.is_err() {
            debug!(kind = %kind, "trigger channel closed");
            break;
        }
    }
    warn!(kind = %kind, "watcher stream ended");
}

fn by_name(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

/// Selectors for the objects the snapshot reads besides the input kinds:
/// the agent namespace, labelled TLS secrets, the token secret and the
/// in-cluster Loki endpoints.
pub fn dependency_watches() -> [(ResourceKind, watcher::Config); 4] {
    [
        (ResourceKind::Namespace, by_name(SHIPPER_NAMESPACE)),
        (ResourceKind::Secret, watcher::Config::default().labels(&format!("{WATCH_SECRET_LABEL}=true"))),
        (ResourceKind::Secret, by_name(TOKEN_SECRET_NAME)),
        (ResourceKind::Endpoints, by_name(LOKI_SERVICE)),
    ]
}

/// Spawn one watcher per input kind and per dependency selector.
pub fn start_watchers(client: Client, tx: mpsc::Sender<Trigger>) -> Vec<JoinHandle<()>> {
    let mut tasks = vec![
        tokio::spawn(watch_kind(
            Api::<ClusterLoggingConfig>::all(client.clone()),
            ResourceKind::ClusterLoggingConfig,
            watcher::Config::default(),
            tx.clone(),
        )),
        tokio::spawn(watch_kind(
            Api::<PodLoggingConfig>::all(client.clone()),
            ResourceKind::PodLoggingConfig,
            watcher::Config::default(),
            tx.clone(),
        )),
        tokio::spawn(watch_kind(
            Api::<ClusterLogDestination>::all(client.clone()),
            ResourceKind::ClusterLogDestination,
            watcher::Config::default(),
            tx.clone(),
        )),
    ];
    for (kind, cfg) in dependency_watches() {
        let task = match kind {
            ResourceKind::Namespace => {
                tokio::spawn(watch_kind(Api::<Namespace>::all(client.clone()), kind, cfg, tx.clone()))
            }
            ResourceKind::Secret => tokio::spawn(watch_kind(
                Api::<Secret>::namespaced(client.clone(), SHIPPER_NAMESPACE),
                kind,
                cfg,
                tx.clone(),
            )),
            ResourceKind::Endpoints => tokio::spawn(watch_kind(
                Api::<Endpoints>::namespaced(client.clone(), LOKI_NAMESPACE),
                kind,
                cfg,
                tx.clone(),
            )),
            _ => continue,
        };
        tasks.push(task);
    }
    tasks
}
