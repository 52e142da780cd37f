//! Canonical stage ids.

pub const CLUSTER_SOURCE_PREFIX: &str = "cluster_logging_config";
pub const POD_SOURCE_PREFIX: &str = "pod_logging_config";
pub const SINK_PREFIX: &str = "destination/cluster";
pub const TRANSFORM_PREFIX: &str = "d8_tf";

/// `cluster_logging_config/<name>`
pub fn cluster_source(name: &str) -> String {
    format!("{CLUSTER_SOURCE_PREFIX}/{name}")
}

/// `cluster_logging_config/<name>:<namespace>`, one per denormalized namespace.
pub fn cluster_source_in(name: &str, namespace: &str) -> String {
    format!("{CLUSTER_SOURCE_PREFIX}/{name}:{namespace}")
}

/// `pod_logging_config/<name>/<namespace>`
pub fn pod_source(name: &str, namespace: &str) -> String {
    format!("{POD_SOURCE_PREFIX}/{name}/{namespace}")
}

/// `destination/cluster/<name>`
pub fn sink(destination: &str) -> String {
    format!("{SINK_PREFIX}/{destination}")
}

/// Scope of one (source x destination) transform chain.
pub fn chain_scope(source_base: &str, destination: &str) -> String {
    format!("{source_base}:{destination}")
}

/// `d8_tf_<scope>_<NN>_<mnemonic>`
pub fn transform(scope: &str, index: usize, mnemonic: &str) -> String {
    format!("{TRANSFORM_PREFIX}_{scope}_{index:02}_{mnemonic}")
}
