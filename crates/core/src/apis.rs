//! `deckhouse.io/v1alpha1` resources consumed by the compiler.
//!
//! Field names follow the CRDs one-to-one; unknown fields are ignored so newer
//! schema revisions keep deserializing.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Treat an explicit YAML `null` (e.g. `tls:` with no children) like an absent field.
fn nullable<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

// ---------------- Sources ----------------

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum SourceType {
    #[default]
    KubernetesPods,
    File,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Mirror of `metav1.LabelSelector`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub exclude_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesPodsSpec {
    #[serde(default, deserialize_with = "nullable")]
    pub namespace_selector: NamespaceSelector,
    #[serde(default, deserialize_with = "nullable")]
    pub label_selector: LabelSelector,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    #[serde(default, deserialize_with = "nullable")]
    pub include: Vec<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_delimiter: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum FilterOperator {
    Exists,
    DoesNotExist,
    In,
    NotIn,
    Regex,
    NotRegex,
}

/// One `logFilter` / `labelFilter` entry. Values stay untyped: YAML authors
/// write `- 111` as often as `- "111"`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default)]
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum MultilineParserType {
    #[default]
    None,
    General,
    Backslash,
    LogWithTime,
    #[serde(rename = "MultilineJSON")]
    MultilineJson,
    Custom,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParserRegex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_regex: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultilineCustom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_when: Option<ParserRegex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_when: Option<ParserRegex>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultilineParser {
    #[serde(rename = "type", default)]
    pub parser_type: MultilineParserType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<MultilineCustom>,
}

/// Cluster-wide log source.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "deckhouse.io", version = "v1alpha1", kind = "ClusterLoggingConfig")]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoggingConfigSpec {
    #[serde(rename = "type", default)]
    pub source_type: SourceType,
    #[serde(default, deserialize_with = "nullable")]
    pub kubernetes_pods: KubernetesPodsSpec,
    #[serde(default, deserialize_with = "nullable")]
    pub file: FileSpec,
    #[serde(rename = "logFilter", alias = "logFilters", default, deserialize_with = "nullable")]
    pub log_filters: Vec<Filter>,
    #[serde(rename = "labelFilter", alias = "labelFilters", default, deserialize_with = "nullable")]
    pub label_filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiline_parser: Option<MultilineParser>,
    #[serde(default, deserialize_with = "nullable")]
    pub destination_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_deleted_files_opened_for: Option<String>,
}

/// Namespace-scoped log source; always pinned to its own namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "deckhouse.io", version = "v1alpha1", kind = "PodLoggingConfig", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct PodLoggingConfigSpec {
    #[serde(default, deserialize_with = "nullable")]
    pub label_selector: LabelSelector,
    #[serde(rename = "logFilter", alias = "logFilters", default, deserialize_with = "nullable")]
    pub log_filters: Vec<Filter>,
    #[serde(rename = "labelFilter", alias = "labelFilters", default, deserialize_with = "nullable")]
    pub label_filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiline_parser: Option<MultilineParser>,
    #[serde(default, deserialize_with = "nullable")]
    pub cluster_destination_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_deleted_files_opened_for: Option<String>,
}

// ---------------- Destinations ----------------

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum DestinationType {
    Loki,
    Elasticsearch,
    Logstash,
    Vector,
    Kafka,
    Splunk,
    Socket,
    /// Anything this build does not know how to ship to.
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientCert {
    #[serde(default)]
    pub crt_file: String,
    #[serde(default)]
    pub key_file: String,
    #[serde(default)]
    pub key_pass: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct SecretRef {
    pub name: String,
}

/// TLS payloads are base64 encoded PEM (or plaintext for `keyPass`).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonTlsSpec {
    #[serde(default)]
    pub ca_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_crt: Option<ClientCert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_hostname: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_certificate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LokiAuth {
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LokiSpec {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, rename = "tenantID", alias = "tenantId")]
    pub tenant_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub auth: LokiAuth,
    #[serde(default, deserialize_with = "nullable")]
    pub tls: CommonTlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchAuth {
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub aws_access_key: String,
    #[serde(default)]
    pub aws_secret_key: String,
    #[serde(default)]
    pub aws_assume_role: String,
    #[serde(default)]
    pub aws_region: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub pipeline: String,
    #[serde(default)]
    pub doc_type: String,
    #[serde(default)]
    pub data_stream_enabled: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub auth: ElasticsearchAuth,
    #[serde(default, deserialize_with = "nullable")]
    pub tls: CommonTlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogstashSpec {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tls: CommonTlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VectorSpec {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tls: CommonTlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSasl {
    #[serde(default)]
    pub mechanism: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum KafkaCodec {
    #[default]
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "CEF")]
    Cef,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaEncoding {
    #[serde(default)]
    pub codec: KafkaCodec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSpec {
    #[serde(default, deserialize_with = "nullable")]
    pub bootstrap_servers: Vec<String>,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub key_field: String,
    #[serde(default, deserialize_with = "nullable")]
    pub sasl: KafkaSasl,
    #[serde(default, deserialize_with = "nullable")]
    pub encoding: KafkaEncoding,
    #[serde(default, deserialize_with = "nullable")]
    pub tls: CommonTlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SplunkSpec {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub index: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tls: CommonTlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum SocketMode {
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum SocketCodec {
    #[default]
    Text,
    #[serde(rename = "JSON")]
    Json,
    Syslog,
    #[serde(rename = "CEF")]
    Cef,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SocketEncoding {
    #[serde(default)]
    pub codec: SocketCodec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SocketTcp {
    #[serde(default, deserialize_with = "nullable")]
    pub tls: CommonTlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SocketSpec {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub mode: SocketMode,
    #[serde(default, deserialize_with = "nullable")]
    pub tcp: SocketTcp,
    #[serde(default, deserialize_with = "nullable")]
    pub encoding: SocketEncoding,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_per_minute: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum BufferType {
    #[default]
    Memory,
    Disk,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum WhenFull {
    Block,
    DropNewest,
}

/// Kubernetes resource quantity (`1Gi`, `512Mi`, `268435488`).
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(transparent)]
pub struct Quantity(pub String);

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Float(f64),
            Str(String),
        }
        Ok(match Raw::deserialize(de)? {
            Raw::Int(n) => Quantity(n.to_string()),
            Raw::Float(f) => Quantity(f.to_string()),
            Raw::Str(s) => Quantity(s),
        })
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskBuffer {
    #[serde(default)]
    pub max_size: Quantity,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBuffer {
    #[serde(default)]
    pub max_events: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BufferSpec {
    #[serde(rename = "type", default)]
    pub buffer_type: BufferType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskBuffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryBuffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_full: Option<WhenFull>,
}

/// Cluster-wide log destination.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "deckhouse.io", version = "v1alpha1", kind = "ClusterLogDestination")]
#[serde(rename_all = "camelCase")]
pub struct ClusterLogDestinationSpec {
    #[serde(rename = "type", default)]
    pub destination_type: DestinationType,
    #[serde(default, deserialize_with = "nullable")]
    pub loki: LokiSpec,
    #[serde(default, deserialize_with = "nullable")]
    pub elasticsearch: ElasticsearchSpec,
    #[serde(default, deserialize_with = "nullable")]
    pub logstash: LogstashSpec,
    #[serde(default, deserialize_with = "nullable")]
    pub vector: VectorSpec,
    #[serde(default, deserialize_with = "nullable")]
    pub kafka: KafkaSpec,
    #[serde(default, deserialize_with = "nullable")]
    pub splunk: SplunkSpec,
    #[serde(default, deserialize_with = "nullable")]
    pub socket: SocketSpec,
    #[serde(default, deserialize_with = "nullable")]
    pub extra_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<BufferSpec>,
}

impl ClusterLogDestinationSpec {
    /// TLS block of the active destination kind, if that kind has one.
    pub fn tls_mut(&mut self) -> Option<&mut CommonTlsSpec> {
        match self.destination_type {
            DestinationType::Loki => Some(&mut self.loki.tls),
            DestinationType::Elasticsearch => Some(&mut self.elasticsearch.tls),
            DestinationType::Logstash => Some(&mut self.logstash.tls),
            DestinationType::Vector => Some(&mut self.vector.tls),
            DestinationType::Kafka => Some(&mut self.kafka.tls),
            DestinationType::Splunk => Some(&mut self.splunk.tls),
            DestinationType::Socket => Some(&mut self.socket.tcp.tls),
            DestinationType::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_blocks_deserialize_as_defaults() {
        let y = r#"
type: Logstash
logstash:
  endpoint: 192.168.199.252:9009
  tls:
    clientCrt:
    verifyHostname: false
    verifyCertificate: true
extraLabels:
  foo: bar
"#;
        let spec: ClusterLogDestinationSpec = serde_yaml::from_str(y).unwrap();
        assert_eq!(spec.destination_type, DestinationType::Logstash);
        assert!(spec.logstash.tls.client_crt.is_none());
        assert_eq!(spec.logstash.tls.verify_hostname, Some(false));
        assert_eq!(spec.extra_labels.get("foo").map(String::as_str), Some("bar"));
    }

    #[test]
    fn unknown_destination_type_is_tolerated() {
        let spec: ClusterLogDestinationSpec = serde_yaml::from_str("type: Papertrail\n").unwrap();
        assert_eq!(spec.destination_type, DestinationType::Unknown);
    }

    #[test]
    fn filters_accept_both_singular_and_plural_keys() {
        let a: ClusterLoggingConfigSpec = serde_yaml::from_str(
            "logFilter:\n- field: foo\n  operator: In\n  values: [111, true, x]\n",
        )
        .unwrap();
        let b: ClusterLoggingConfigSpec =
            serde_yaml::from_str("logFilters:\n- field: foo\n  operator: Exists\n").unwrap();
        assert_eq!(a.log_filters[0].values.len(), 3);
        assert_eq!(b.log_filters[0].operator, FilterOperator::Exists);
    }

    #[test]
    fn quantity_accepts_numbers_and_strings() {
        let d: DiskBuffer = serde_yaml::from_str("maxSize: 1Gi\n").unwrap();
        assert_eq!(d.max_size.0, "1Gi");
        let d: DiskBuffer = serde_yaml::from_str("maxSize: 300000000\n").unwrap();
        assert_eq!(d.max_size.0, "300000000");
    }

    #[test]
    fn multiline_json_type_name() {
        let p: MultilineParser = serde_yaml::from_str("type: MultilineJSON\n").unwrap();
        assert_eq!(p.parser_type, MultilineParserType::MultilineJson);
    }
}
