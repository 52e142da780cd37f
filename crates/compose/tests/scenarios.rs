use logship_compose::{compile, CompileError, Compiled};
use logship_core::{ResourceKind, Snapshot};
use serde_json::{json, Value};

fn compile_yaml(text: &str) -> Compiled {
    let mut snap = Snapshot::offline();
    snap.extend_from_yaml(text).unwrap();
    compile(&snap).unwrap()
}

fn json_of(c: &Compiled) -> Value {
    serde_json::from_slice(&c.bytes).unwrap()
}

fn transform_ids(v: &Value, scope: &str) -> Vec<String> {
    let prefix = format!("d8_tf_{scope}_");
    let mut ids: Vec<String> = v["transforms"]
        .as_object()
        .unwrap()
        .keys()
        .filter(|k| k.starts_with(&prefix))
        .cloned()
        .collect();
    ids.sort();
    ids
}

fn mnemonics(ids: &[String], scope: &str) -> Vec<String> {
    let prefix = format!("d8_tf_{scope}_");
    ids.iter().map(|id| id[prefix.len() + 3..].to_string()).collect()
}

const TEST_SOURCE: &str = r#"
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLoggingConfig
metadata:
  name: test-source
spec:
  type: KubernetesPods
  kubernetesPods:
    namespaceSelector:
      matchNames:
        - tests-whispers
    labelSelector:
      matchLabels:
        app: test
  multilineParser:
    type: General
  logFilter:
    - field: info
      operator: Exists
  destinationRefs:
    - test-es-dest
"#;

const ES_DEST: &str = r#"
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: test-es-dest
spec:
  type: Elasticsearch
  elasticsearch:
    endpoint: "http://192.168.1.1:9200"
    index: "logs-%F"
    auth:
      strategy: Basic
      user: elastic
      password: c2VjcmV0
  extraLabels:
    foo: bar
"#;

#[test]
fn single_pair_elasticsearch() {
    let c = compile_yaml(&format!("{TEST_SOURCE}---{ES_DEST}"));
    assert!(c.activated);
    c.document.validate().unwrap();
    let v = json_of(&c);

    let source_id = "cluster_logging_config/test-source:tests-whispers";
    let source = &v["sources"][source_id];
    assert_eq!(source["type"], "kubernetes_logs");
    assert_eq!(source["extra_label_selector"], "app=test,log-shipper.deckhouse.io/exclude notin (true)");
    assert_eq!(source["extra_field_selector"], "metadata.namespace=tests-whispers,metadata.name!=$VECTOR_SELF_POD_NAME");
    assert_eq!(v["sources"].as_object().unwrap().len(), 1);

    let scope = "cluster_logging_config/test-source:test-es-dest";
    let ids = transform_ids(&v, scope);
    assert_eq!(
        mnemonics(&ids, scope),
        [
            "multiline", "local_timezone", "owner_ref", "clean_up", "json_parse", "log_filter",
            "elastic_dedot", "extra_fields", "del_parsed_data"
        ]
    );
    assert_eq!(v["transforms"][&ids[0]]["inputs"], json!([source_id]));
    for pair in ids.windows(2) {
        assert_eq!(v["transforms"][&pair[1]]["inputs"], json!([pair[0]]));
    }
    assert_eq!(v["transforms"][&ids[7]]["source"], ".foo = \"bar\"");

    let sink = &v["sinks"]["destination/cluster/test-es-dest"];
    assert_eq!(sink["type"], "elasticsearch");
    assert_eq!(sink["inputs"], json!([ids[8]]));
    assert_eq!(sink["bulk"]["action"], "index");
    assert_eq!(sink["mode"], "bulk");
    assert_eq!(sink["auth"], json!({"strategy": "basic", "user": "elastic", "password": "secret"}));
}

#[test]
fn one_source_three_destinations() {
    let source = TEST_SOURCE.replace("    - test-es-dest", "    - test-loki-dest\n    - test-logstash-dest\n    - test-es-dest");
    let text = format!(
        r#"{source}---{ES_DEST}---
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: test-loki-dest
spec:
  type: Loki
  loki:
    endpoint: "http://192.168.1.1:9000"
  extraLabels:
    app: "{{{{ ap-p[0].a }}}}"
---
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: test-logstash-dest
spec:
  type: Logstash
  logstash:
    endpoint: "192.168.199.252:9009"
"#
    );
    let c = compile_yaml(&text);
    c.document.validate().unwrap();
    let v = json_of(&c);
    assert_eq!(v["sources"].as_object().unwrap().len(), 1);
    assert_eq!(v["sinks"].as_object().unwrap().len(), 3);

    let loki_scope = "cluster_logging_config/test-source:test-loki-dest";
    let loki = mnemonics(&transform_ids(&v, loki_scope), loki_scope);
    assert!(!loki.contains(&"elastic_dedot".to_string()));
    assert_eq!(loki.last().map(String::as_str), Some("json_parse"));
    let sink = &v["sinks"]["destination/cluster/test-loki-dest"];
    assert_eq!(sink["labels"]["app"], "{{ parsed_data.ap-p[0].a }}");

    let ls_scope = "cluster_logging_config/test-source:test-logstash-dest";
    let ls = mnemonics(&transform_ids(&v, ls_scope), ls_scope);
    assert!(ls.contains(&"elastic_dedot".to_string()));
    assert_eq!(ls.last().map(String::as_str), Some("del_parsed_data"));
    assert_eq!(v["sinks"]["destination/cluster/test-logstash-dest"]["type"], "socket");
}

#[test]
fn namespaces_are_denormalized() {
    let text = r#"
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLoggingConfig
metadata:
  name: multi
spec:
  type: KubernetesPods
  kubernetesPods:
    namespaceSelector:
      matchNames: [ns1, ns2]
  destinationRefs: [vec]
---
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: vec
spec:
  type: Vector
  vector:
    endpoint: 10.0.0.1:6000
"#;
    let c = compile_yaml(text);
    let v = json_of(&c);
    let a = "cluster_logging_config/multi:ns1";
    let b = "cluster_logging_config/multi:ns2";
    assert_eq!(v["sources"][a]["extra_field_selector"], "metadata.namespace=ns1,metadata.name!=$VECTOR_SELF_POD_NAME");
    assert_eq!(v["sources"][b]["extra_field_selector"], "metadata.namespace=ns2,metadata.name!=$VECTOR_SELF_POD_NAME");
    let scope = "cluster_logging_config/multi:vec";
    let ids = transform_ids(&v, scope);
    assert_eq!(v["transforms"][&ids[0]]["inputs"], json!([a, b]));
}

#[test]
fn namespaced_source_two_destinations() {
    let text = r#"
apiVersion: deckhouse.io/v1alpha1
kind: PodLoggingConfig
metadata:
  name: whispers
  namespace: tests-whispers
spec:
  labelSelector:
    matchExpressions:
      - key: tier
        operator: NotIn
        values: [debug]
  clusterDestinationRefs: [loki-a, loki-b]
---
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: loki-a
spec:
  type: Loki
  loki:
    endpoint: http://a:3100
---
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: loki-b
spec:
  type: Loki
  loki:
    endpoint: http://b:3100
"#;
    let c = compile_yaml(text);
    let v = json_of(&c);
    let source_id = "pod_logging_config/whispers/tests-whispers";
    assert_eq!(v["sources"].as_object().unwrap().keys().collect::<Vec<_>>(), [source_id]);
    assert_eq!(
        v["sources"][source_id]["extra_label_selector"],
        "tier notin (debug),log-shipper.deckhouse.io/exclude notin (true)"
    );
    for dest in ["loki-a", "loki-b"] {
        let scope = format!("{source_id}:{dest}");
        let ids = transform_ids(&v, &scope);
        assert_eq!(mnemonics(&ids, &scope), ["local_timezone", "owner_ref", "clean_up"]);
        assert_eq!(v["sinks"][format!("destination/cluster/{dest}")]["inputs"], json!([ids[2]]));
    }
}

#[test]
fn multiline_json_with_datastream() {
    let text = r#"
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLoggingConfig
metadata:
  name: json-logs
spec:
  type: KubernetesPods
  multilineParser:
    type: MultilineJSON
  destinationRefs: [ds]
---
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: ds
spec:
  type: Elasticsearch
  elasticsearch:
    endpoint: http://es:9200
    index: logs
    dataStreamEnabled: true
"#;
    let c = compile_yaml(text);
    let v = json_of(&c);
    let scope = "cluster_logging_config/json-logs:ds";
    let ids = transform_ids(&v, scope);
    let first = &v["transforms"][&ids[0]];
    assert_eq!(first["type"], "reduce");
    assert!(first["starts_when"]["source"].as_str().unwrap().contains(r"r'^\{'"));
    let names = mnemonics(&ids, scope);
    let ds = names.iter().position(|m| m == "ds_timestamp").unwrap();
    assert_eq!(v["transforms"][&ids[ds]]["source"], r#"."@timestamp" = del(.timestamp)"#);
    let sink = &v["sinks"]["destination/cluster/ds"];
    assert_eq!(sink["bulk"]["action"], "create");
    assert_eq!(sink["mode"], "data_stream");
    assert_eq!(
        v["sources"]["cluster_logging_config/json-logs"]["extra_field_selector"],
        "metadata.name!=$VECTOR_SELF_POD_NAME"
    );
}

#[test]
fn empty_inputs_produce_nothing() {
    let c = compile(&Snapshot::offline()).unwrap();
    assert!(c.bytes.is_empty());
    assert!(!c.activated);
    assert!(c.document.is_empty());
}

#[test]
fn destinations_without_sources_produce_nothing() {
    let c = compile_yaml(ES_DEST);
    assert!(c.bytes.is_empty());
    assert!(!c.activated);
}

#[test]
fn invalid_resources_are_skipped() {
    let bad_source = r#"
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLoggingConfig
metadata:
  name: broken
spec:
  type: KubernetesPods
  labelFilter:
    - field: message
      operator: Regex
      values: ["(unclosed"]
  destinationRefs: [test-es-dest]
"#;
    let c = compile_yaml(&format!("{bad_source}---{TEST_SOURCE}---{ES_DEST}"));
    assert!(c.activated);
    assert_eq!(c.skipped, vec![(ResourceKind::ClusterLoggingConfig, "broken".to_string())]);
    let v = json_of(&c);
    assert!(v["sources"].get("cluster_logging_config/broken").is_none());
}

#[test]
fn missing_tls_secret_drops_destination() {
    let dest = ES_DEST.replace("  extraLabels:", "    tls:\n      secretRef:\n        name: nope\n  extraLabels:");
    let c = compile_yaml(&format!("{TEST_SOURCE}---{dest}"));
    assert!(!c.activated);
    assert_eq!(c.skipped, vec![(ResourceKind::ClusterLogDestination, "test-es-dest".to_string())]);
}

#[test]
fn non_scalar_filter_values_abort() {
    let source = TEST_SOURCE.replace(
        "    - field: info\n      operator: Exists",
        "    - field: info\n      operator: In\n      values:\n        - {nested: true}",
    );
    let mut snap = Snapshot::offline();
    snap.extend_from_yaml(&format!("{source}---{ES_DEST}")).unwrap();
    let err = compile(&snap).unwrap_err();
    assert!(matches!(err, CompileError::TemplateRender { .. }), "{err}");
}

#[test]
fn unknown_destination_kind_is_silently_dropped() {
    let dest = ES_DEST.replace("type: Elasticsearch", "type: Papertrail");
    let c = compile_yaml(&format!("{TEST_SOURCE}---{dest}"));
    assert!(!c.activated);
    assert!(c.skipped.is_empty());
}

#[test]
fn in_cluster_loki_needs_token() {
    let text = r#"
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLoggingConfig
metadata:
  name: all
spec:
  type: KubernetesPods
  destinationRefs: [d8-loki]
---
apiVersion: deckhouse.io/v1alpha1
kind: ClusterLogDestination
metadata:
  name: d8-loki
spec:
  type: Loki
  loki:
    endpoint: http://loki.d8-monitoring:3100
"#;
    let mut snap = Snapshot::offline();
    snap.loki_endpoint.port = Some(3100);
    snap.extend_from_yaml(text).unwrap();
    let c = compile(&snap).unwrap();
    assert_eq!(c.loki_auth_required.get("d8-loki"), Some(&true));

    snap.loki_token = Some("secret-token".into());
    let c = compile(&snap).unwrap();
    assert_eq!(c.loki_auth_required.get("d8-loki"), Some(&false));
    let v = json_of(&c);
    let sink = &v["sinks"]["destination/cluster/d8-loki"];
    assert_eq!(sink["endpoint"], "https://loki.d8-monitoring:3100");
    assert_eq!(sink["auth"], json!({"strategy": "bearer", "token": "secret-token"}));
    assert_eq!(sink["tls"]["verify_certificate"], false);
}

#[test]
fn output_is_pretty_and_deterministic() {
    let text = format!("{TEST_SOURCE}---{ES_DEST}");
    let a = compile_yaml(&text);
    let b = compile_yaml(&text);
    assert_eq!(a.bytes, b.bytes);
    let s = String::from_utf8(a.bytes).unwrap();
    assert!(s.starts_with("{\n  \"sinks\": {"));
}
