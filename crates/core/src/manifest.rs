//! Offline snapshot assembly from multi-document YAML manifests.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use serde::Deserialize;
use tracing::debug;

use crate::{ParseError, SecretData, Snapshot, SHIPPER_NAMESPACE, TOKEN_SECRET_NAME, WATCH_SECRET_LABEL};

impl Snapshot {
    /// Snapshot for offline rendering: the agent namespace is assumed to exist.
    pub fn offline() -> Self {
        Self { namespace_present: true, ..Self::default() }
    }

    /// Add every supported object found in `text` (a `---` separated stream).
    ///
    /// Accepted kinds: `ClusterLoggingConfig`, `PodLoggingConfig`,
    /// `ClusterLogDestination` and `Secret` (TLS material labelled for watching,
    /// or the Loki token secret). Other kinds are skipped; a document without
    /// `kind` is an error.
    pub fn extend_from_yaml(&mut self, text: &str) -> Result<()> {
        for (idx, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let value = serde_yaml::Value::deserialize(doc)
                .with_context(|| format!("parsing YAML document #{idx}"))?;
            if value.is_null() {
                continue;
            }
            let kind = value
                .get("kind")
                .and_then(|k| k.as_str())
                .ok_or_else(|| ParseError::Manifest(format!("document #{idx} has no kind")))?
                .to_string();
            debug!(idx, kind = %kind, "manifest document");
            match kind.as_str() {
                "ClusterLoggingConfig" => self
                    .cluster_sources
                    .push(serde_yaml::from_value(value).with_context(|| format!("document #{idx}: {kind}"))?),
                "PodLoggingConfig" => self
                    .pod_sources
                    .push(serde_yaml::from_value(value).with_context(|| format!("document #{idx}: {kind}"))?),
                "ClusterLogDestination" => self
                    .destinations
                    .push(serde_yaml::from_value(value).with_context(|| format!("document #{idx}: {kind}"))?),
                "Secret" => {
                    let secret: Secret = serde_yaml::from_value(value)
                        .with_context(|| format!("document #{idx}: Secret"))?;
                    self.absorb_secret(secret);
                }
                other => debug!(idx, kind = other, "skipping unsupported manifest kind"),
            }
        }
        self.normalize();
        Ok(())
    }

    /// Route a secret from the agent namespace into the snapshot, if relevant.
    pub fn absorb_secret(&mut self, secret: Secret) {
        let ns = secret.metadata.namespace.as_deref().unwrap_or(SHIPPER_NAMESPACE);
        if ns != SHIPPER_NAMESPACE {
            return;
        }
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut data: SecretData = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        for (k, v) in secret.string_data.unwrap_or_default() {
            data.insert(k, v.into_bytes());
        }
        if name == TOKEN_SECRET_NAME {
            if let Some(token) = data.get("token") {
                self.loki_token = Some(String::from_utf8_lossy(token).into_owned());
            }
            return;
        }
        let watched = secret
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(WATCH_SECRET_LABEL))
            .is_some_and(|v| v == "true");
        if watched {
            self.tls_secrets.insert(name, data);
        }
    }
}
