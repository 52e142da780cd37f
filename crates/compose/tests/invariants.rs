use std::collections::BTreeSet;

use logship_compose::compile;
use logship_core::apis::*;
use logship_core::Snapshot;
use proptest::prelude::*;

const KINDS: [DestinationType; 4] =
    [DestinationType::Loki, DestinationType::Elasticsearch, DestinationType::Vector, DestinationType::Socket];

fn destination(i: usize, kind: DestinationType, labelled: bool) -> ClusterLogDestination {
    let mut spec = ClusterLogDestinationSpec { destination_type: kind, ..Default::default() };
    spec.loki.endpoint = "http://loki:3100".into();
    spec.elasticsearch.endpoint = "http://es:9200".into();
    spec.vector.endpoint = "agg:6000".into();
    spec.socket.address = "collector:514".into();
    if labelled {
        spec.extra_labels.insert("app".into(), "{{ app }}".into());
        spec.extra_labels.insert("env".into(), "prod".into());
    }
    ClusterLogDestination::new(&format!("dest-{i}"), spec)
}

fn source(i: usize, namespaces: &[String], refs: Vec<String>, regex: Option<&str>) -> ClusterLoggingConfig {
    let mut spec = ClusterLoggingConfigSpec::default();
    spec.kubernetes_pods.namespace_selector.match_names = namespaces.to_vec();
    spec.destination_refs = refs;
    if let Some(p) = regex {
        spec.label_filters.push(Filter { field: "message".into(), operator: FilterOperator::Regex, values: vec![p.into()] });
    }
    ClusterLoggingConfig::new(&format!("src-{i}"), spec)
}

#[derive(Debug, Clone)]
struct Plan {
    dests: Vec<(usize, bool)>,
    sources: Vec<(Vec<String>, Vec<usize>)>,
    regex: Option<String>,
}

fn plan() -> impl Strategy<Value = Plan> {
    let dests = prop::collection::vec((0usize..KINDS.len(), any::<bool>()), 1..4);
    let sources = prop::collection::vec(
        (prop::collection::vec("ns[0-3]", 0..3), prop::collection::vec(0usize..5, 0..4)),
        0..4,
    );
    (dests, sources, prop::option::of("[a-z]{1,4}")).prop_map(|(dests, sources, regex)| Plan { dests, sources, regex })
}

fn snapshot(plan: &Plan) -> Snapshot {
    let mut snap = Snapshot::offline();
    snap.destinations =
        plan.dests.iter().enumerate().map(|(i, (k, labelled))| destination(i, KINDS[*k], *labelled)).collect();
    snap.cluster_sources = plan
        .sources
        .iter()
        .enumerate()
        .map(|(i, (ns, refs))| {
            source(i, ns, refs.iter().map(|r| format!("dest-{r}")).collect(), plan.regex.as_deref())
        })
        .collect();
    snap.normalize();
    snap
}

proptest! {
    #[test]
    fn graph_is_always_well_formed(plan in plan()) {
        let c = compile(&snapshot(&plan)).unwrap();
        prop_assert!(c.document.validate().is_ok());
        prop_assert_eq!(c.activated, !c.document.is_empty());
        prop_assert_eq!(c.activated, !c.bytes.is_empty());
    }

    #[test]
    fn compilation_is_deterministic(plan in plan()) {
        let snap = snapshot(&plan);
        let a = compile(&snap).unwrap();
        let b = compile(&snap).unwrap();
        prop_assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn one_sink_per_referenced_destination(plan in plan()) {
        let c = compile(&snapshot(&plan)).unwrap();
        let referenced: BTreeSet<String> = plan
            .sources
            .iter()
            .flat_map(|(_, refs)| refs.iter().copied())
            .filter(|r| *r < plan.dests.len())
            .map(|r| format!("destination/cluster/dest-{r}"))
            .collect();
        let sinks: BTreeSet<String> = c.document.sinks.keys().cloned().collect();
        prop_assert_eq!(sinks, referenced);
        for sink in c.document.sinks.values() {
            let unique: BTreeSet<&String> = sink.inputs().iter().collect();
            prop_assert_eq!(unique.len(), sink.inputs().len());
        }
    }

    #[test]
    fn namespaces_fan_out_to_pinned_sources(plan in plan()) {
        let c = compile(&snapshot(&plan)).unwrap();
        for (i, (ns, refs)) in plan.sources.iter().enumerate() {
            if !refs.iter().any(|r| *r < plan.dests.len()) {
                continue;
            }
            let distinct: BTreeSet<&String> = ns.iter().collect();
            let prefix = format!("cluster_logging_config/src-{i}");
            let ids: Vec<&String> = c
                .document
                .sources
                .keys()
                .filter(|id| *id == &prefix || id.starts_with(&format!("{prefix}:")))
                .collect();
            prop_assert_eq!(ids.len(), distinct.len().max(1));
        }
    }

    #[test]
    fn filter_patterns_are_anchored(plan in plan()) {
        let c = compile(&snapshot(&plan)).unwrap();
        if let Some(p) = &plan.regex {
            let needle = format!("r'^{p}$'");
            for (id, t) in &c.document.transforms {
                if id.ends_with("_label_filter") {
                    let source = t.get("condition").and_then(|c| c.get("source")).and_then(|s| s.as_str()).unwrap_or("");
                    prop_assert!(source.contains(&needle), "{}", source);
                }
            }
        }
    }
}
