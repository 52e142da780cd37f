//! Sink factories, one per destination kind.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use logship_core::apis::{
    BufferSpec, BufferType, ClusterLogDestinationSpec, CommonTlsSpec, DestinationType, KafkaCodec, SocketCodec,
    SocketMode, WhenFull,
};
use logship_core::quantity::parse_quantity;
use logship_vrl::template_path;
use serde::Serialize;

use crate::error::Fault;
use crate::model::{Stage, StageKind};
use crate::naming;

/// Smallest disk buffer the agent accepts.
pub const MIN_DISK_BUFFER_BYTES: u64 = 268_435_488;
pub const DEFAULT_MEMORY_BUFFER_EVENTS: u64 = 500;
pub const ES_BATCH_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const KEEPALIVE_SECS: u64 = 7200;

fn decode(what: &str, raw: &str) -> Result<Option<String>, Fault> {
    if raw.is_empty() {
        return Ok(None);
    }
    let bytes = STANDARD
        .decode(raw.trim())
        .map_err(|e| Fault::invalid(format!("{what}: invalid base64: {e}")))?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| Fault::invalid(format!("{what}: not valid UTF-8")))
}

#[derive(Serialize, Debug, Default, PartialEq, Eq)]
pub struct Tls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crt_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pass: Option<String>,
    pub verify_hostname: bool,
    pub verify_certificate: bool,
}

/// Decode TLS material. With `toggle`, `enabled` is set iff any of CA, cert
/// or key is present (socket-style sinks need it spelled out).
pub fn tls(spec: &CommonTlsSpec, toggle: bool) -> Result<Tls, Fault> {
    let cert = spec.client_crt.clone().unwrap_or_default();
    let mut out = Tls {
        enabled: None,
        ca_file: decode("tls.caFile", &spec.ca_file)?,
        crt_file: decode("tls.clientCrt.crtFile", &cert.crt_file)?,
        key_file: decode("tls.clientCrt.keyFile", &cert.key_file)?,
        key_pass: decode("tls.clientCrt.keyPass", &cert.key_pass)?,
        verify_hostname: spec.verify_hostname.unwrap_or(true),
        verify_certificate: spec.verify_certificate.unwrap_or(true),
    };
    if toggle {
        out.enabled = Some(out.ca_file.is_some() || out.crt_file.is_some() || out.key_file.is_some());
    }
    Ok(out)
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Buffer {
    Disk {
        max_size: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        when_full: Option<&'static str>,
    },
    Memory {
        max_events: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        when_full: Option<&'static str>,
    },
}

pub fn buffer(spec: &BufferSpec) -> Result<Buffer, Fault> {
    let when_full = spec.when_full.map(|w| match w {
        WhenFull::Block => "block",
        WhenFull::DropNewest => "drop_newest",
    });
    Ok(match spec.buffer_type {
        BufferType::Disk => {
            let requested = match spec.disk.as_ref().map(|d| d.max_size.0.as_str()).filter(|s| !s.is_empty()) {
                Some(q) => parse_quantity(q).map_err(|e| Fault::invalid(format!("buffer.disk.maxSize: {e}")))?,
                None => MIN_DISK_BUFFER_BYTES,
            };
            Buffer::Disk { max_size: requested.max(MIN_DISK_BUFFER_BYTES), when_full }
        }
        BufferType::Memory => Buffer::Memory {
            max_events: spec.memory.as_ref().map(|m| m.max_events).filter(|n| *n > 0).unwrap_or(DEFAULT_MEMORY_BUFFER_EVENTS),
            when_full,
        },
    })
}

#[derive(Serialize)]
struct Healthcheck {
    enabled: bool,
}

#[derive(Serialize)]
struct Common {
    healthcheck: Healthcheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    buffer: Option<Buffer>,
}

impl Common {
    fn new(spec: &ClusterLogDestinationSpec) -> Result<Self, Fault> {
        Ok(Self { healthcheck: Healthcheck { enabled: false }, buffer: spec.buffer.as_ref().map(buffer).transpose()? })
    }
}

#[derive(Serialize, Default)]
struct Cef {
    version: &'static str,
    device_vendor: &'static str,
    device_product: &'static str,
    device_version: &'static str,
    device_event_class_id: &'static str,
    name: &'static str,
    severity: &'static str,
    extensions: BTreeMap<&'static str, &'static str>,
}

fn cef() -> Cef {
    Cef {
        version: "V1",
        device_vendor: "Deckhouse",
        device_product: "log-shipper-agent",
        device_version: "1",
        device_event_class_id: "Log event",
        name: "message",
        severity: "severity",
        extensions: [
            ("container", "container"),
            ("host", "host"),
            ("image", "image"),
            ("message", "message"),
            ("namespace", "namespace"),
            ("node", "node"),
            ("pod", "pod"),
            ("podip", "pod_ip"),
            ("podowner", "pod_owner"),
            ("timestamp", "timestamp"),
        ]
        .into_iter()
        .collect(),
    }
}

#[derive(Serialize, Default)]
struct Encoding {
    #[serde(skip_serializing_if = "Option::is_none")]
    codec: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    only_fields: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp_format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cef: Option<Cef>,
}

impl Encoding {
    fn codec(codec: &'static str) -> Self { Self { codec: Some(codec), ..Default::default() } }
    fn rfc3339(mut self) -> Self { self.timestamp_format = Some("rfc3339"); self }
    fn message_only(mut self) -> Self { self.only_fields = vec!["message"]; self }
}

#[derive(Serialize)]
struct Keepalive {
    time_secs: u64,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "lowercase")]
enum Auth {
    Basic { user: String, password: String },
    Bearer { token: String },
    Aws {
        #[serde(skip_serializing_if = "String::is_empty")]
        access_key_id: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        secret_access_key: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        assume_role: String,
    },
}

#[derive(Serialize)]
struct LokiSink<'a> {
    endpoint: &'a str,
    encoding: Encoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<Auth>,
    #[serde(skip_serializing_if = "str::is_empty")]
    tenant_id: &'a str,
    labels: BTreeMap<String, String>,
    remove_label_fields: bool,
    out_of_order_action: &'static str,
    tls: Tls,
    #[serde(flatten)]
    common: Common,
}

const LOKI_LABELS: [(&str, &str); 9] = [
    ("container", "{{ container }}"),
    ("image", "{{ image }}"),
    ("namespace", "{{ namespace }}"),
    ("node", "{{ node }}"),
    ("pod", "{{ pod }}"),
    ("pod_ip", "{{ pod_ip }}"),
    ("pod_labels_*", "{{ pod_labels }}"),
    ("pod_owner", "{{ pod_owner }}"),
    ("stream", "{{ stream }}"),
];

/// Default label set merged with extra labels; templates read `parsed_data`.
pub fn loki_labels(extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> =
        LOKI_LABELS.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    for (k, v) in extra {
        let value = match template_path(v) {
            Some(p) if p == "parsed_data" || p.starts_with("parsed_data.") => v.clone(),
            Some(p) => format!("{{{{ parsed_data.{p} }}}}"),
            None => v.clone(),
        };
        labels.insert(k.clone(), value);
    }
    labels
}

fn loki(spec: &ClusterLogDestinationSpec) -> Result<serde_json::Value, Fault> {
    let l = &spec.loki;
    let auth = match l.auth.strategy.to_ascii_lowercase().as_str() {
        "" if l.auth.user.is_empty() => None,
        "" | "basic" => Some(Auth::Basic {
            user: l.auth.user.clone(),
            password: decode("loki.auth.password", &l.auth.password)?.unwrap_or_default(),
        }),
        "bearer" => Some(Auth::Bearer { token: l.auth.token.clone() }),
        other => return Err(Fault::invalid(format!("loki.auth.strategy {other:?} is not supported"))),
    };
    Ok(serde_json::to_value(LokiSink {
        endpoint: &l.endpoint,
        encoding: Encoding::codec("text").message_only().rfc3339(),
        auth,
        tenant_id: &l.tenant_id,
        labels: loki_labels(&spec.extra_labels),
        remove_label_fields: true,
        out_of_order_action: "rewrite_timestamp",
        tls: tls(&l.tls, false)?,
        common: Common::new(spec)?,
    })?)
}

#[derive(Serialize)]
struct Batch {
    max_bytes: u64,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct Bulk<'a> {
    action: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    index: &'a str,
}

#[derive(Serialize)]
struct Aws<'a> {
    region: &'a str,
}

#[derive(Serialize)]
struct ElasticsearchSink<'a> {
    endpoint: &'a str,
    encoding: Encoding,
    batch: Batch,
    compression: &'static str,
    bulk: Bulk<'a>,
    mode: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    doc_type: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pipeline: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<Auth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aws: Option<Aws<'a>>,
    tls: Tls,
    #[serde(flatten)]
    common: Common,
}

fn elasticsearch(spec: &ClusterLogDestinationSpec) -> Result<serde_json::Value, Fault> {
    let es = &spec.elasticsearch;
    let a = &es.auth;
    let (auth, aws) = match a.strategy.to_ascii_lowercase().as_str() {
        "" if a.user.is_empty() => (None, None),
        "" | "basic" => (
            Some(Auth::Basic {
                user: a.user.clone(),
                password: decode("elasticsearch.auth.password", &a.password)?.unwrap_or_default(),
            }),
            None,
        ),
        "aws" => (
            Some(Auth::Aws {
                access_key_id: a.aws_access_key.clone(),
                secret_access_key: a.aws_secret_key.clone(),
                assume_role: a.aws_assume_role.clone(),
            }),
            (!a.aws_region.is_empty()).then_some(Aws { region: &a.aws_region }),
        ),
        other => return Err(Fault::invalid(format!("elasticsearch.auth.strategy {other:?} is not supported"))),
    };
    let (action, mode) = if es.data_stream_enabled { ("create", "data_stream") } else { ("index", "bulk") };
    Ok(serde_json::to_value(ElasticsearchSink {
        endpoint: &es.endpoint,
        encoding: Encoding::default().rfc3339(),
        batch: Batch { max_bytes: ES_BATCH_MAX_BYTES, timeout_secs: 1 },
        compression: "gzip",
        bulk: Bulk { action, index: &es.index },
        mode,
        doc_type: &es.doc_type,
        pipeline: &es.pipeline,
        auth,
        aws,
        tls: tls(&es.tls, false)?,
        common: Common::new(spec)?,
    })?)
}

#[derive(Serialize)]
struct SocketSink<'a> {
    address: &'a str,
    mode: &'static str,
    encoding: Encoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    keepalive: Option<Keepalive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<Tls>,
    #[serde(flatten)]
    common: Common,
}

fn logstash(spec: &ClusterLogDestinationSpec) -> Result<serde_json::Value, Fault> {
    Ok(serde_json::to_value(SocketSink {
        address: &spec.logstash.endpoint,
        mode: "tcp",
        encoding: Encoding::codec("json").rfc3339(),
        keepalive: Some(Keepalive { time_secs: KEEPALIVE_SECS }),
        tls: Some(tls(&spec.logstash.tls, true)?),
        common: Common::new(spec)?,
    })?)
}

fn socket(spec: &ClusterLogDestinationSpec) -> Result<serde_json::Value, Fault> {
    let s = &spec.socket;
    let encoding = match s.encoding.codec {
        SocketCodec::Text | SocketCodec::Syslog => Encoding::codec("text"),
        SocketCodec::Json => Encoding::codec("json").rfc3339(),
        SocketCodec::Cef => Encoding { cef: Some(cef()), ..Encoding::codec("cef") },
    };
    let (mode, tls) = match s.mode {
        SocketMode::Tcp => ("tcp", Some(tls(&s.tcp.tls, true)?)),
        SocketMode::Udp => ("udp", None),
    };
    Ok(serde_json::to_value(SocketSink {
        address: &s.address,
        mode,
        encoding,
        keepalive: None,
        tls,
        common: Common::new(spec)?,
    })?)
}

#[derive(Serialize)]
struct VectorSink<'a> {
    version: &'static str,
    address: &'a str,
    keepalive: Keepalive,
    tls: Tls,
    #[serde(flatten)]
    common: Common,
}

fn vector(spec: &ClusterLogDestinationSpec) -> Result<serde_json::Value, Fault> {
    Ok(serde_json::to_value(VectorSink {
        version: "2",
        address: &spec.vector.endpoint,
        keepalive: Keepalive { time_secs: KEEPALIVE_SECS },
        tls: tls(&spec.vector.tls, true)?,
        common: Common::new(spec)?,
    })?)
}

#[derive(Serialize)]
struct Sasl<'a> {
    enabled: bool,
    #[serde(skip_serializing_if = "str::is_empty")]
    mechanism: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    username: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    password: &'a str,
}

#[derive(Serialize)]
struct KafkaSink<'a> {
    bootstrap_servers: String,
    topic: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    key_field: &'a str,
    encoding: Encoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    sasl: Option<Sasl<'a>>,
    tls: Tls,
    #[serde(flatten)]
    common: Common,
}

fn kafka(spec: &ClusterLogDestinationSpec) -> Result<serde_json::Value, Fault> {
    let k = &spec.kafka;
    let sasl_set = [&k.sasl.mechanism, &k.sasl.username, &k.sasl.password];
    let sasl = if sasl_set.iter().all(|s| !s.is_empty()) {
        Some(Sasl { enabled: true, mechanism: &k.sasl.mechanism, username: &k.sasl.username, password: &k.sasl.password })
    } else {
        None
    };
    let encoding = match k.encoding.codec {
        KafkaCodec::Json => Encoding::codec("json").rfc3339(),
        KafkaCodec::Cef => Encoding { cef: Some(cef()), ..Encoding::codec("cef") },
    };
    Ok(serde_json::to_value(KafkaSink {
        bootstrap_servers: k.bootstrap_servers.join(","),
        topic: &k.topic,
        key_field: &k.key_field,
        encoding,
        sasl,
        tls: tls(&k.tls, true)?,
        common: Common::new(spec)?,
    })?)
}

#[derive(Serialize)]
struct SplunkSink<'a> {
    endpoint: &'a str,
    default_token: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    index: &'a str,
    compression: &'static str,
    encoding: Encoding,
    tls: Tls,
    #[serde(flatten)]
    common: Common,
}

fn splunk(spec: &ClusterLogDestinationSpec) -> Result<serde_json::Value, Fault> {
    let s = &spec.splunk;
    Ok(serde_json::to_value(SplunkSink {
        endpoint: &s.endpoint,
        default_token: &s.token,
        index: &s.index,
        compression: "gzip",
        encoding: Encoding::codec("text").message_only(),
        tls: tls(&s.tls, false)?,
        common: Common::new(spec)?,
    })?)
}

/// Build the sink for a destination. Unknown kinds yield `None`.
pub fn build_sink(name: &str, spec: &ClusterLogDestinationSpec) -> Result<Option<Stage>, Fault> {
    let (type_tag, params) = match spec.destination_type {
        DestinationType::Loki => ("loki", loki(spec)?),
        DestinationType::Elasticsearch => ("elasticsearch", elasticsearch(spec)?),
        DestinationType::Logstash => ("socket", logstash(spec)?),
        DestinationType::Vector => ("vector", vector(spec)?),
        DestinationType::Kafka => ("kafka", kafka(spec)?),
        DestinationType::Splunk => ("splunk_hec_logs", splunk(spec)?),
        DestinationType::Socket => ("socket", socket(spec)?),
        DestinationType::Unknown => return Ok(None),
    };
    Ok(Some(Stage::from_params(StageKind::Sink, naming::sink(name), type_tag, &params)?))
}
