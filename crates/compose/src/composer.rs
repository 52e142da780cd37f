//! Snapshot -> agent config.

use std::collections::BTreeMap;

use kube::ResourceExt;
use logship_core::apis::{DestinationType, Filter, MultilineParser};
use logship_core::{ResourceKind, Snapshot};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::destination::{migrate_cluster_loki, resolve_tls_secret};
use crate::error::{CompileError, Fault};
use crate::model::{ConfigDocument, Pipeline, Stage};
use crate::naming;
use crate::sink::build_sink;
use crate::source::{cluster_sources, pod_sources, SourceSet};
use crate::transform::{destination_chain, source_chain, Draft};

/// Result of one compile pass.
#[derive(Debug, Clone, Default)]
pub struct Compiled {
    pub document: ConfigDocument,
    /// Rendered document; empty when there is nothing to ship.
    pub bytes: Vec<u8>,
    pub activated: bool,
    /// Loki destinations by name: `true` when they point at the in-cluster
    /// Loki without credentials.
    pub loki_auth_required: BTreeMap<String, bool>,
    /// Resources skipped as invalid.
    pub skipped: Vec<(ResourceKind, String)>,
}

struct BuiltDestination {
    sink: Stage,
    chain: Vec<Draft>,
}

struct Composer<'a> {
    snap: &'a Snapshot,
    destinations: FxHashMap<String, BuiltDestination>,
    declared: FxHashSet<String>,
    out: Compiled,
}

impl<'a> Composer<'a> {
    fn new(snap: &'a Snapshot) -> Self {
        Self { snap, destinations: FxHashMap::default(), declared: FxHashSet::default(), out: Compiled::default() }
    }

    /// Sort a builder failure: invalid resources are skipped, anything else aborts.
    fn triage<T>(&mut self, res: Result<T, Fault>, kind: ResourceKind, name: &str) -> Result<Option<T>, CompileError> {
        match res {
            Ok(v) => Ok(Some(v)),
            Err(fault) => {
                let err = fault.at(kind, name);
                if !err.is_input_validation() {
                    return Err(err);
                }
                warn!(kind = %kind, name, error = %err, "skipping invalid resource");
                self.out.skipped.push((kind, name.to_string()));
                Ok(None)
            }
        }
    }

    fn add_destinations(&mut self) -> Result<(), CompileError> {
        let snap = self.snap;
        for d in &snap.destinations {
            let name = d.name_any();
            self.declared.insert(name.clone());
            let mut spec = d.spec.clone();
            let needs_auth = migrate_cluster_loki(&mut spec, snap);
            if spec.destination_type == DestinationType::Loki {
                self.out.loki_auth_required.insert(name.clone(), needs_auth);
            }
            let built = (|| -> Result<Option<BuiltDestination>, Fault> {
                resolve_tls_secret(&mut spec, snap)?;
                let Some(sink) = build_sink(&name, &spec)? else { return Ok(None) };
                Ok(Some(BuiltDestination { sink, chain: destination_chain(&spec)? }))
            })();
            match self.triage(built, ResourceKind::ClusterLogDestination, &name)? {
                Some(Some(b)) => {
                    self.destinations.insert(name, b);
                }
                Some(None) => debug!(name = %name, "destination type has no sink; pipelines to it are dropped"),
                None => {}
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn add_source(
        &mut self,
        kind: ResourceKind,
        name: &str,
        set: Result<SourceSet, Fault>,
        parser: Option<&MultilineParser>,
        label_filters: &[Filter],
        log_filters: &[Filter],
        refs: &[String],
    ) -> Result<(), CompileError> {
        let built = set.and_then(|set| {
            let chain = source_chain(set.kind, parser, label_filters, log_filters)?;
            Ok((set, chain))
        });
        let Some((set, chain)) = self.triage(built, kind, name)? else { return Ok(()) };

        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for dest_name in refs {
            if !seen.insert(dest_name.as_str()) {
                continue;
            }
            let Some(dest) = self.destinations.get(dest_name) else {
                if !self.declared.contains(dest_name) {
                    warn!(kind = %kind, name, destination = %dest_name, "destination not found");
                }
                continue;
            };
            let scope = naming::chain_scope(&set.base, dest_name);
            let transforms = chain
                .iter()
                .chain(dest.chain.iter())
                .cloned()
                .enumerate()
                .map(|(i, d)| {
                    let id = naming::transform(&scope, i, d.mnemonic);
                    d.into_stage(id)
                })
                .collect();
            self.out.document.append_pipeline(Pipeline {
                sources: set.stages.clone(),
                transforms,
                sink: dest.sink.clone(),
            });
        }
        Ok(())
    }

    fn add_sources(&mut self) -> Result<(), CompileError> {
        let snap = self.snap;
        for cfg in &snap.cluster_sources {
            let spec = &cfg.spec;
            self.add_source(
                ResourceKind::ClusterLoggingConfig,
                &cfg.name_any(),
                cluster_sources(cfg),
                spec.multiline_parser.as_ref(),
                &spec.label_filters,
                &spec.log_filters,
                &spec.destination_refs,
            )?;
        }
        for cfg in &snap.pod_sources {
            let spec = &cfg.spec;
            let name = format!("{}/{}", cfg.namespace().unwrap_or_default(), cfg.name_any());
            self.add_source(
                ResourceKind::PodLoggingConfig,
                &name,
                pod_sources(cfg),
                spec.multiline_parser.as_ref(),
                &spec.label_filters,
                &spec.log_filters,
                &spec.cluster_destination_refs,
            )?;
        }
        Ok(())
    }
}

/// Compile a snapshot into the agent configuration.
///
/// Invalid resources are skipped with a warning; rendering failures abort.
pub fn compile(snap: &Snapshot) -> Result<Compiled, CompileError> {
    let mut c = Composer::new(snap);
    c.add_destinations()?;
    c.add_sources()?;
    let mut out = c.out;
    out.bytes = out.document.render()?;
    out.activated = !out.bytes.is_empty();
    info!(
        sources = out.document.sources.len(),
        transforms = out.document.transforms.len(),
        sinks = out.document.sinks.len(),
        skipped = out.skipped.len(),
        "compiled log-shipper config"
    );
    Ok(out)
}
