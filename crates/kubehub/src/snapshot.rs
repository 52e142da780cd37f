use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Secret};
use kube::api::{Api, ListParams};
use kube::Client;
use logship_core::{
    ClusterLogDestination, ClusterLoggingConfig, LokiEndpoint, PodLoggingConfig, Snapshot, SnapshotSource,
    LOKI_NAMESPACE, LOKI_PORT_NAME, LOKI_SERVICE, SHIPPER_NAMESPACE, TOKEN_SECRET_NAME, WATCH_SECRET_LABEL,
};
use tracing::debug;

/// Reads one [`Snapshot`] straight from the API server.
#[derive(Clone)]
pub struct KubeSnapshotSource {
    client: Client,
    cluster_domain: String,
}

impl KubeSnapshotSource {
    pub fn new(client: Client, cluster_domain: impl Into<String>) -> Self {
        Self { client, cluster_domain: cluster_domain.into() }
    }
}

/// Addresses and the `loki` port of the in-cluster Loki Endpoints object.
pub fn loki_endpoint_from(ep: &Endpoints) -> LokiEndpoint {
    let mut out = LokiEndpoint::default();
    for subset in ep.subsets.iter().flatten() {
        for addr in subset.addresses.iter().flatten() {
            if !out.addresses.contains(&addr.ip) {
                out.addresses.push(addr.ip.clone());
            }
        }
        if out.port.is_none() {
            out.port = subset
                .ports
                .iter()
                .flatten()
                .find(|p| p.name.as_deref() == Some(LOKI_PORT_NAME))
                .and_then(|p| u16::try_from(p.port).ok());
        }
    }
    out
}

#[async_trait::async_trait]
impl SnapshotSource for KubeSnapshotSource {
    async fn fetch(&self) -> Result<Snapshot> {
        let mut snap = Snapshot { cluster_domain: self.cluster_domain.clone(), ..Snapshot::default() };
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        snap.namespace_present = namespaces
            .get_opt(SHIPPER_NAMESPACE)
            .await
            .with_context(|| format!("reading namespace {SHIPPER_NAMESPACE}"))?
            .is_some();
        if !snap.namespace_present {
            return Ok(snap);
        }

        let lp = ListParams::default();
        snap.cluster_sources = Api::<ClusterLoggingConfig>::all(self.client.clone())
            .list(&lp)
            .await
            .context("listing ClusterLoggingConfig")?
            .items;
        snap.pod_sources = Api::<PodLoggingConfig>::all(self.client.clone())
            .list(&lp)
            .await
            .context("listing PodLoggingConfig")?
            .items;
        snap.destinations = Api::<ClusterLogDestination>::all(self.client.clone())
            .list(&lp)
            .await
            .context("listing ClusterLogDestination")?
            .items;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), SHIPPER_NAMESPACE);
        let watched = secrets
            .list(&ListParams::default().labels(&format!("{WATCH_SECRET_LABEL}=true")))
            .await
            .context("listing watched secrets")?;
        for s in watched.items {
            snap.absorb_secret(s);
        }
        if let Some(token) = secrets.get_opt(TOKEN_SECRET_NAME).await.context("reading loki token secret")? {
            snap.absorb_secret(token);
        }

        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), LOKI_NAMESPACE);
        if let Some(ep) = endpoints.get_opt(LOKI_SERVICE).await.context("reading loki endpoints")? {
            snap.loki_endpoint = loki_endpoint_from(&ep);
        }

        snap.normalize();
        debug!(
            cluster_sources = snap.cluster_sources.len(),
            pod_sources = snap.pod_sources.len(),
            destinations = snap.destinations.len(),
            tls_secrets = snap.tls_secrets.len(),
            "snapshot fetched"
        );
        Ok(snap)
    }
}
