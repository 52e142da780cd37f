//! Concrete source stages.
//!
//! The agent's field selector has no disjunction, so a cluster source that
//! names N namespaces becomes N `kubernetes_logs` sources, each pinned to one.

use kube::ResourceExt;
use logship_core::apis::{
    ClusterLoggingConfig, KubernetesPodsSpec, LabelSelector, PodLoggingConfig, SelectorOperator, SourceType,
};
use logship_core::quantity::parse_duration;
use logship_core::EXCLUDE_LABEL;
use serde::Serialize;

use crate::error::Fault;
use crate::model::{Stage, StageKind};
use crate::naming;

pub const SELF_POD_FIELD: &str = "metadata.name!=$VECTOR_SELF_POD_NAME";

/// Concrete sources of one logical source, plus the base used to scope its chains.
#[derive(Debug, Clone)]
pub struct SourceSet {
    pub base: String,
    pub kind: SourceType,
    pub stages: Vec<Stage>,
}

#[derive(Serialize)]
struct AnnotationFields {
    container_image: &'static str,
    container_name: &'static str,
    pod_ip: &'static str,
    pod_labels: &'static str,
    pod_name: &'static str,
    pod_namespace: &'static str,
    pod_node_name: &'static str,
    pod_owner: &'static str,
}

const ANNOTATION_FIELDS: AnnotationFields = AnnotationFields {
    container_image: "image",
    container_name: "container",
    pod_ip: "pod_ip",
    pod_labels: "pod_labels",
    pod_name: "pod",
    pod_namespace: "namespace",
    pod_node_name: "node",
    pod_owner: "pod_owner",
};

#[derive(Serialize)]
struct NodeAnnotationFields {
    node_labels: &'static str,
}

#[derive(Serialize)]
struct KubernetesLogs {
    extra_label_selector: String,
    extra_namespace_label_selector: String,
    extra_field_selector: String,
    annotation_fields: AnnotationFields,
    node_annotation_fields: NodeAnnotationFields,
    glob_minimum_cooldown_ms: u64,
    use_apiserver_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_deletion_ms: Option<u64>,
}

#[derive(Serialize)]
struct FileSource<'a> {
    include: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    exclude: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    line_delimiter: Option<&'a str>,
}

/// Render a label selector in `kubectl -l` syntax, with the opt-out label
/// always excluded.
pub fn label_selector(sel: Option<&LabelSelector>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(sel) = sel {
        parts.extend(sel.match_labels.iter().map(|(k, v)| format!("{k}={v}")));
        for expr in &sel.match_expressions {
            let mut values = expr.values.clone();
            values.sort();
            values.dedup();
            parts.push(match expr.operator {
                SelectorOperator::In => format!("{} in ({})", expr.key, values.join(",")),
                SelectorOperator::NotIn => format!("{} notin ({})", expr.key, values.join(",")),
                SelectorOperator::Exists => expr.key.clone(),
                SelectorOperator::DoesNotExist => format!("!{}", expr.key),
            });
        }
    }
    parts.push(format!("{EXCLUDE_LABEL} notin (true)"));
    parts.join(",")
}

fn delay_ms(raw: Option<&str>) -> Result<Option<u64>, Fault> {
    match raw {
        None => Ok(None),
        Some(s) => {
            let d = parse_duration(s).map_err(|e| Fault::invalid(format!("keepDeletedFilesOpenedFor: {e}")))?;
            u64::try_from(d.as_millis())
                .map(Some)
                .map_err(|_| Fault::invalid(format!("keepDeletedFilesOpenedFor: {s:?} is out of range")))
        }
    }
}

fn kubernetes_stage(id: String, pods: &LabelSelector, namespaces: Option<&LabelSelector>, fields: Vec<String>, delay: Option<u64>) -> Result<Stage, Fault> {
    let params = KubernetesLogs {
        extra_label_selector: label_selector(Some(pods)),
        extra_namespace_label_selector: label_selector(namespaces),
        extra_field_selector: fields.join(","),
        annotation_fields: ANNOTATION_FIELDS,
        node_annotation_fields: NodeAnnotationFields { node_labels: "node_labels" },
        glob_minimum_cooldown_ms: 1000,
        use_apiserver_cache: true,
        delay_deletion_ms: delay,
    };
    Ok(Stage::from_params(StageKind::Source, id, "kubernetes_logs", &params)?)
}

fn kubernetes_pods(name: &str, spec: &KubernetesPodsSpec, delay: Option<u64>) -> Result<Vec<Stage>, Fault> {
    let ns_sel = &spec.namespace_selector;
    let mut namespaces: Vec<&str> = Vec::new();
    for ns in &ns_sel.match_names {
        if !namespaces.contains(&ns.as_str()) {
            namespaces.push(ns);
        }
    }
    let ns_labels = ns_sel.label_selector.as_ref();
    if namespaces.is_empty() {
        let mut fields: Vec<String> =
            ns_sel.exclude_names.iter().map(|ns| format!("metadata.namespace!={ns}")).collect();
        fields.push(SELF_POD_FIELD.to_string());
        return Ok(vec![kubernetes_stage(naming::cluster_source(name), &spec.label_selector, ns_labels, fields, delay)?]);
    }
    namespaces
        .into_iter()
        .map(|ns| {
            let fields = vec![format!("metadata.namespace={ns}"), SELF_POD_FIELD.to_string()];
            kubernetes_stage(naming::cluster_source_in(name, ns), &spec.label_selector, ns_labels, fields, delay)
        })
        .collect()
}

pub fn cluster_sources(cfg: &ClusterLoggingConfig) -> Result<SourceSet, Fault> {
    let name = cfg.name_any();
    let spec = &cfg.spec;
    let base = naming::cluster_source(&name);
    let stages = match spec.source_type {
        SourceType::KubernetesPods => {
            let delay = delay_ms(spec.keep_deleted_files_opened_for.as_deref())?;
            kubernetes_pods(&name, &spec.kubernetes_pods, delay)?
        }
        SourceType::File => {
            if spec.file.include.is_empty() {
                return Err(Fault::invalid("file source without include globs"));
            }
            let params = FileSource {
                include: &spec.file.include,
                exclude: &spec.file.exclude,
                line_delimiter: spec.file.line_delimiter.as_deref(),
            };
            vec![Stage::from_params(StageKind::Source, base.clone(), "file", &params)?]
        }
    };
    Ok(SourceSet { base, kind: spec.source_type, stages })
}

pub fn pod_sources(cfg: &PodLoggingConfig) -> Result<SourceSet, Fault> {
    let name = cfg.name_any();
    let namespace = cfg.namespace().ok_or_else(|| Fault::invalid("namespaced source without namespace"))?;
    let delay = delay_ms(cfg.spec.keep_deleted_files_opened_for.as_deref())?;
    let base = naming::pod_source(&name, &namespace);
    let fields = vec![format!("metadata.namespace={namespace}"), SELF_POD_FIELD.to_string()];
    let stage = kubernetes_stage(base.clone(), &cfg.spec.label_selector, None, fields, delay)?;
    Ok(SourceSet { base, kind: SourceType::KubernetesPods, stages: vec![stage] })
}
