use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::api::events::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use k8s_openapi::chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use logship_core::{
    ConfigPublisher, CONFIG_SECRET_KEY, CONFIG_SECRET_NAME, EVENT_ACTION, EVENT_GENERATE_NAME, EVENT_NOTE,
    EVENT_REASON, FIELD_MANAGER, HERITAGE_LABEL, MODULE_LABEL, SHIPPER_NAMESPACE,
};
use tracing::{debug, info};

const REPORTING_CONTROLLER: &str = "deckhouse.io/log-shipper";

/// The config secret as it should exist for `config`.
pub fn config_secret(config: &[u8]) -> Secret {
    let labels: BTreeMap<String, String> = [HERITAGE_LABEL, MODULE_LABEL]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Secret {
        metadata: ObjectMeta {
            name: Some(CONFIG_SECRET_NAME.into()),
            namespace: Some(SHIPPER_NAMESPACE.into()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some("Opaque".into()),
        data: Some([(CONFIG_SECRET_KEY.to_string(), ByteString(config.to_vec()))].into()),
        ..Default::default()
    }
}

/// `LogShipperConfigCreateUpdate` event regarding the config secret.
pub fn config_event(now: DateTime<Utc>, instance: &str) -> Event {
    Event {
        metadata: ObjectMeta {
            generate_name: Some(EVENT_GENERATE_NAME.into()),
            namespace: Some(SHIPPER_NAMESPACE.into()),
            ..Default::default()
        },
        event_time: Some(MicroTime(now)),
        action: Some(EVENT_ACTION.into()),
        reason: Some(EVENT_REASON.into()),
        note: Some(EVENT_NOTE.into()),
        type_: Some("Normal".into()),
        reporting_controller: Some(REPORTING_CONTROLLER.into()),
        reporting_instance: Some(instance.into()),
        regarding: Some(ObjectReference {
            api_version: Some("v1".into()),
            kind: Some("Secret".into()),
            name: Some(CONFIG_SECRET_NAME.into()),
            namespace: Some(SHIPPER_NAMESPACE.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Writes the config secret with server-side apply and records events.
#[derive(Clone)]
pub struct KubePublisher {
    secrets: Api<Secret>,
    events: Api<Event>,
    instance: String,
}

impl KubePublisher {
    pub fn new(client: Client) -> Self {
        let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "log-shipper".to_string());
        Self {
            secrets: Api::namespaced(client.clone(), SHIPPER_NAMESPACE),
            events: Api::namespaced(client, SHIPPER_NAMESPACE),
            instance,
        }
    }
}

#[async_trait::async_trait]
impl ConfigPublisher for KubePublisher {
    async fn current(&self) -> Result<Option<Vec<u8>>> {
        let secret = self.secrets.get_opt(CONFIG_SECRET_NAME).await.context("reading config secret")?;
        Ok(secret.and_then(|s| s.data).and_then(|mut d| d.remove(CONFIG_SECRET_KEY)).map(|b| b.0))
    }

    async fn apply(&self, config: &[u8]) -> Result<()> {
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        self.secrets
            .patch(CONFIG_SECRET_NAME, &pp, &Patch::Apply(&config_secret(config)))
            .await
            .context("server-side apply of config secret")?;
        info!(bytes = config.len(), "config secret applied");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match self.secrets.delete(CONFIG_SECRET_NAME, &DeleteParams::default()).await {
            Ok(_) => {
                info!("config secret deleted");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("config secret already absent");
                Ok(())
            }
            Err(e) => Err(e).context("deleting config secret"),
        }
    }

    async fn record_event(&self) -> Result<()> {
        let ev = config_event(Utc::now(), &self.instance);
        self.events.create(&PostParams::default(), &ev).await.context("creating config event")?;
        Ok(())
    }
}
