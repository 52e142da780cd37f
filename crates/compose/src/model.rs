//! Stage model and the config document the composer fills.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    Transform,
    Sink,
}

pub type Inputs = SmallVec<[String; 4]>;

/// One node of the agent graph.
///
/// `params` hold the type-specific options; they are flattened next to
/// `type` and `inputs` when serialized, and can never shadow either key.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    id: String,
    kind: StageKind,
    type_tag: String,
    inputs: Inputs,
    params: Map<String, Value>,
}

impl Stage {
    pub fn new(kind: StageKind, id: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self { id: id.into(), kind, type_tag: type_tag.into(), inputs: Inputs::new(), params: Map::new() }
    }

    /// Build from a typed options struct; it must serialize to a JSON object.
    pub fn from_params<T: Serialize>(
        kind: StageKind,
        id: impl Into<String>,
        type_tag: impl Into<String>,
        params: &T,
    ) -> Result<Self, serde_json::Error> {
        let mut stage = Self::new(kind, id, type_tag);
        if let Value::Object(map) = serde_json::to_value(params)? {
            for (k, v) in map {
                stage.set(k, v);
            }
        }
        Ok(stage)
    }

    pub fn name(&self) -> &str { &self.id }
    pub fn kind(&self) -> StageKind { self.kind }
    pub fn type_tag(&self) -> &str { &self.type_tag }
    pub fn inputs(&self) -> &[String] { &self.inputs }
    pub fn params(&self) -> &Map<String, Value> { &self.params }

    pub fn rename(&mut self, id: impl Into<String>) { self.id = id.into(); }

    /// Set a parameter; `type` and `inputs` are reserved and ignored.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key == "type" || key == "inputs" {
            return;
        }
        self.params.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> { self.params.get(key) }

    pub fn set_inputs<I: IntoIterator<Item = String>>(&mut self, inputs: I) {
        self.inputs = inputs.into_iter().collect();
    }

    /// Append inputs not already present, keeping first-seen order.
    pub fn append_inputs<'a, I: IntoIterator<Item = &'a String>>(&mut self, inputs: I) {
        for i in inputs {
            if !self.inputs.iter().any(|x| x == i) {
                self.inputs.push(i.clone());
            }
        }
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        // Emit keys sorted, like every other map in the document.
        let mut keys: Vec<&str> = self.params.keys().map(String::as_str).collect();
        keys.push("type");
        if self.kind != StageKind::Source {
            keys.push("inputs");
        }
        keys.sort_unstable();
        let mut map = s.serialize_map(Some(keys.len()))?;
        for k in keys {
            match k {
                "type" => map.serialize_entry(k, &self.type_tag)?,
                "inputs" => map.serialize_entry(k, self.inputs.as_slice())?,
                _ => map.serialize_entry(k, &self.params[k])?,
            }
        }
        map.end()
    }
}

/// One (source x destination) route: sources feed the chain, the chain feeds the sink.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub sources: Vec<Stage>,
    pub transforms: Vec<Stage>,
    pub sink: Stage,
}

impl Pipeline {
    /// Ids the sink should receive: the last transform, or every source.
    pub fn tail(&self) -> Vec<String> {
        match self.transforms.last() {
            Some(t) => vec![t.name().to_string()],
            None => self.sources.iter().map(|s| s.name().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("id {0:?} used by more than one stage")]
    DuplicateId(String),
    #[error("{stage:?} reads unknown input {input:?}")]
    DanglingInput { stage: String, input: String },
    #[error("{0:?} has no inputs")]
    MissingInputs(String),
    #[error("{0:?} is part of a cycle")]
    Cycle(String),
}

/// The rendered agent configuration: three id -> stage maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    pub sources: BTreeMap<String, Stage>,
    pub transforms: BTreeMap<String, Stage>,
    pub sinks: BTreeMap<String, Stage>,
}

impl ConfigDocument {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.transforms.is_empty() && self.sinks.is_empty()
    }

    /// Wire and register one pipeline. Sources already present are kept;
    /// a sink already present only gains the new tail as inputs.
    pub fn append_pipeline(&mut self, p: Pipeline) {
        let source_ids: Vec<String> = p.sources.iter().map(|s| s.name().to_string()).collect();
        let tail = p.tail();
        for s in p.sources {
            self.sources.entry(s.name().to_string()).or_insert(s);
        }
        let mut prev: Option<String> = None;
        for mut t in p.transforms {
            match prev.take() {
                None => t.set_inputs(source_ids.iter().cloned()),
                Some(id) => t.set_inputs([id]),
            }
            prev = Some(t.name().to_string());
            self.transforms.insert(t.name().to_string(), t);
        }
        self.sinks
            .entry(p.sink.name().to_string())
            .or_insert(p.sink)
            .append_inputs(tail.iter());
    }

    pub fn get(&self, id: &str) -> Option<&Stage> {
        self.sources.get(id).or_else(|| self.transforms.get(id)).or_else(|| self.sinks.get(id))
    }

    /// Referential integrity, unique ids and acyclicity.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = BTreeSet::new();
        for id in self.sources.keys().chain(self.transforms.keys()).chain(self.sinks.keys()) {
            if !seen.insert(id.as_str()) {
                return Err(GraphError::DuplicateId(id.clone()));
            }
        }
        for stage in self.transforms.values().chain(self.sinks.values()) {
            if stage.inputs().is_empty() {
                return Err(GraphError::MissingInputs(stage.name().to_string()));
            }
            for input in stage.inputs() {
                if !seen.contains(input.as_str()) {
                    return Err(GraphError::DanglingInput { stage: stage.name().to_string(), input: input.clone() });
                }
            }
        }
        // DFS over transform inputs; sources terminate every walk.
        let mut done: BTreeSet<&str> = BTreeSet::new();
        for start in self.transforms.keys() {
            let mut on_path: BTreeSet<&str> = BTreeSet::new();
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            on_path.insert(start.as_str());
            while let Some((id, next)) = stack.pop() {
                let inputs = self.transforms.get(id).map(|t| t.inputs()).unwrap_or(&[]);
                if next < inputs.len() {
                    stack.push((id, next + 1));
                    let child = inputs[next].as_str();
                    if on_path.contains(child) {
                        return Err(GraphError::Cycle(child.to_string()));
                    }
                    if !done.contains(child) && self.transforms.contains_key(child) {
                        on_path.insert(child);
                        stack.push((child, 0));
                    }
                } else {
                    on_path.remove(id);
                    done.insert(id);
                }
            }
        }
        Ok(())
    }

    /// Pretty JSON (two-space indent); empty maps are omitted and an empty
    /// document renders to no bytes at all.
    pub fn render(&self) -> Result<Vec<u8>, serde_json::Error> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::to_vec_pretty(self)
    }
}

impl Serialize for ConfigDocument {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let sections = [("sinks", &self.sinks), ("sources", &self.sources), ("transforms", &self.transforms)];
        let present = sections.iter().filter(|(_, m)| !m.is_empty()).count();
        let mut map = s.serialize_map(Some(present))?;
        for (key, stages) in sections {
            if !stages.is_empty() {
                map.serialize_entry(key, stages)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(id: &str) -> Stage {
        Stage::new(StageKind::Source, id, "file")
    }

    fn transform(id: &str) -> Stage {
        let mut t = Stage::new(StageKind::Transform, id, "remap");
        t.set("source", json!(".a = 1"));
        t
    }

    #[test]
    fn params_are_flattened_and_reserved_keys_ignored() {
        let mut t = transform("t");
        t.set("type", json!("evil"));
        t.set("inputs", json!(["evil"]));
        t.set_inputs(["s".to_string()]);
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v, json!({"type": "remap", "inputs": ["s"], "source": ".a = 1"}));
    }

    #[test]
    fn sources_have_no_inputs_key() {
        let v = serde_json::to_value(source("s")).unwrap();
        assert_eq!(v, json!({"type": "file"}));
    }

    #[test]
    fn append_inputs_dedups() {
        let mut sink = Stage::new(StageKind::Sink, "k", "loki");
        let a = vec!["a".to_string(), "b".to_string()];
        sink.append_inputs(a.iter());
        sink.append_inputs(["b".to_string(), "c".to_string()].iter());
        assert_eq!(sink.inputs(), ["a", "b", "c"]);
    }

    #[test]
    fn pipelines_share_sinks() {
        let mut doc = ConfigDocument::default();
        let sink = Stage::new(StageKind::Sink, "destination/cluster/d", "vector");
        doc.append_pipeline(Pipeline { sources: vec![source("s1"), source("s2")], transforms: vec![transform("t1"), transform("t2")], sink: sink.clone() });
        doc.append_pipeline(Pipeline { sources: vec![source("s3")], transforms: vec![], sink: sink.clone() });
        doc.append_pipeline(Pipeline { sources: vec![source("s3")], transforms: vec![], sink });
        assert_eq!(doc.transforms["t1"].inputs(), ["s1", "s2"]);
        assert_eq!(doc.transforms["t2"].inputs(), ["t1"]);
        assert_eq!(doc.sinks["destination/cluster/d"].inputs(), ["t2", "s3"]);
        doc.validate().unwrap();
    }

    #[test]
    fn validate_catches_dangling_and_cycles() {
        let mut doc = ConfigDocument::default();
        let mut t = transform("t");
        t.set_inputs(["nope".to_string()]);
        doc.transforms.insert("t".into(), t);
        assert!(matches!(doc.validate(), Err(GraphError::DanglingInput { .. })));

        let mut doc = ConfigDocument::default();
        let mut a = transform("a");
        a.set_inputs(["b".to_string()]);
        let mut b = transform("b");
        b.set_inputs(["a".to_string()]);
        doc.transforms.insert("a".into(), a);
        doc.transforms.insert("b".into(), b);
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.to_string().ends_with("is part of a cycle"), "{boxed}");
    }

    #[test]
    fn render_omits_empty_sections() {
        assert!(ConfigDocument::default().render().unwrap().is_empty());
        let mut doc = ConfigDocument::default();
        doc.append_pipeline(Pipeline {
            sources: vec![source("s")],
            transforms: vec![],
            sink: Stage::new(StageKind::Sink, "k", "vector"),
        });
        let text = String::from_utf8(doc.render().unwrap()).unwrap();
        assert!(!text.contains("transforms"));
        assert!(text.starts_with("{\n  \"sinks\": {\n    \"k\": {"));
    }
}
