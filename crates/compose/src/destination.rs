//! Destination pre-processing: TLS material from referenced secrets and
//! bearer auth for the in-cluster Loki.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use logship_core::apis::{ClusterLogDestinationSpec, DestinationType};
use logship_core::{Snapshot, LOKI_NAMESPACE, LOKI_SERVICE};
use url::Url;

use crate::error::Fault;

/// Fill TLS fields from `tls.secretRef`; non-empty secret keys win.
pub fn resolve_tls_secret(spec: &mut ClusterLogDestinationSpec, snap: &Snapshot) -> Result<(), Fault> {
    let Some(tls) = spec.tls_mut() else { return Ok(()) };
    let Some(secret_ref) = tls.secret_ref.clone() else { return Ok(()) };
    let data = snap
        .tls_secrets
        .get(&secret_ref.name)
        .ok_or_else(|| Fault::invalid(format!("tls.secretRef: secret {:?} not found", secret_ref.name)))?;
    let pick = |key: &str| data.get(key).filter(|v| !v.is_empty()).map(|v| STANDARD.encode(v));
    if let Some(ca) = pick("ca.pem") {
        tls.ca_file = ca;
    }
    let cert = tls.client_crt.get_or_insert_with(Default::default);
    if let Some(crt) = pick("crt.pem") {
        cert.crt_file = crt;
    }
    if let Some(key) = pick("key.pem") {
        cert.key_file = key;
    }
    if let Some(pass) = pick("keyPass") {
        cert.key_pass = pass;
    }
    Ok(())
}

/// Whether `endpoint` addresses the in-cluster Loki service.
pub fn is_cluster_loki(endpoint: &str, snap: &Snapshot) -> bool {
    let Some(port) = snap.loki_endpoint.port else { return false };
    let Ok(url) = Url::parse(endpoint) else { return false };
    let (Some(host), Some(p)) = (url.host_str(), url.port_or_known_default()) else { return false };
    if p != port {
        return false;
    }
    let svc = format!("{LOKI_SERVICE}.{LOKI_NAMESPACE}");
    let fqdn = format!("{svc}.svc.{}", snap.cluster_domain);
    let host = host.strip_suffix('.').unwrap_or(host);
    host == svc || host == fqdn || snap.loki_endpoint.addresses.iter().any(|a| a == host)
}

/// Rewrite an in-cluster Loki destination to authenticate with the shipper
/// token. Returns `true` when the destination still needs authorization
/// (in-cluster, but no token available).
pub fn migrate_cluster_loki(spec: &mut ClusterLogDestinationSpec, snap: &Snapshot) -> bool {
    if spec.destination_type != DestinationType::Loki || !is_cluster_loki(&spec.loki.endpoint, snap) {
        return false;
    }
    let Some(token) = snap.loki_token.as_deref().filter(|t| !t.is_empty()) else { return true };
    let loki = &mut spec.loki;
    if let Some(rest) = loki.endpoint.strip_prefix("http://") {
        loki.endpoint = format!("https://{rest}");
    }
    loki.auth.strategy = "Bearer".to_string();
    loki.auth.token = token.to_string();
    loki.tls.verify_hostname = Some(false);
    loki.tls.verify_certificate = Some(false);
    false
}
