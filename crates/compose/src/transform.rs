//! Transform chains.
//!
//! Builders return [`Draft`]s: fully parameterized transforms that are only
//! named and wired once the composer knows which pipeline they belong to.

use logship_core::apis::{
    ClusterLogDestinationSpec, DestinationType, Filter, FilterOperator, MultilineParser, MultilineParserType,
    ParserRegex, SocketCodec, SourceType,
};
use logship_vrl::multiline::{self, Boundary, MultilineRule};
use logship_vrl::{anchor, render_filter, template_path};
use serde::Serialize;

use crate::error::Fault;
use crate::model::{Stage, StageKind};

/// An unnamed transform plus the mnemonic used in its id.
#[derive(Debug, Clone)]
pub struct Draft {
    pub mnemonic: &'static str,
    pub stage: Stage,
}

impl Draft {
    fn new<T: Serialize>(mnemonic: &'static str, type_tag: &str, params: &T) -> Result<Self, Fault> {
        Ok(Self { mnemonic, stage: Stage::from_params(StageKind::Transform, "", type_tag, params)? })
    }

    /// Name the transform; inputs are wired by the document.
    pub fn into_stage(self, id: String) -> Stage {
        let mut stage = self.stage;
        stage.rename(id);
        stage
    }
}

#[derive(Serialize)]
struct Remap<'a> {
    source: &'a str,
    drop_on_abort: bool,
}

#[derive(Serialize)]
struct Condition<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    source: &'a str,
}

impl<'a> Condition<'a> {
    fn vrl(source: &'a str) -> Self { Self { kind: "vrl", source } }
}

#[derive(Serialize)]
struct FilterParams<'a> {
    condition: Condition<'a>,
}

#[derive(Serialize)]
struct Hooks {
    process: &'static str,
}

#[derive(Serialize)]
struct Lua<'a> {
    version: &'static str,
    hooks: Hooks,
    source: &'a str,
}

#[derive(Serialize)]
struct Throttle {
    threshold: u64,
    window_secs: u64,
}

#[derive(Serialize)]
struct MergeStrategies {
    message: &'static str,
}

#[derive(Serialize)]
struct Reduce<'a> {
    group_by: [&'static str; 2],
    merge_strategies: MergeStrategies,
    #[serde(skip_serializing_if = "Option::is_none")]
    starts_when: Option<Condition<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ends_when: Option<Condition<'a>>,
}

pub(crate) fn remap(mnemonic: &'static str, source: &str) -> Result<Draft, Fault> {
    Draft::new(mnemonic, "remap", &Remap { source, drop_on_abort: false })
}

fn filter(mnemonic: &'static str, condition: &str) -> Result<Draft, Fault> {
    Draft::new(mnemonic, "filter", &FilterParams { condition: Condition::vrl(condition) })
}

fn reduce(rule: &MultilineRule) -> Result<Draft, Fault> {
    let cond = Some(Condition::vrl(&rule.condition));
    let (starts_when, ends_when) = match rule.boundary {
        Boundary::StartsWhen => (cond, None),
        Boundary::EndsWhen => (None, cond),
    };
    let params = Reduce {
        group_by: ["file", "stream"],
        merge_strategies: MergeStrategies { message: "concat" },
        starts_when,
        ends_when,
    };
    Draft::new("multiline", "reduce", &params)
}

fn custom_boundary(which: Boundary, re: &ParserRegex) -> Result<MultilineRule, Fault> {
    let (pattern, negate) = match (re.regex.as_deref(), re.not_regex.as_deref()) {
        (Some(p), None) => (p, false),
        (None, Some(p)) => (p, true),
        _ => return Err(Fault::invalid(format!("multiline {}: exactly one of regex/notRegex is required", which.key()))),
    };
    regex::Regex::new(pattern).map_err(|e| Fault::invalid(format!("multiline {}: {e}", which.key())))?;
    Ok(multiline::custom(which, pattern, negate))
}

/// Reducer rule for a parser definition, `None` when no grouping is wanted.
pub fn multiline_rule(parser: Option<&MultilineParser>) -> Result<Option<MultilineRule>, Fault> {
    let Some(parser) = parser else { return Ok(None) };
    if parser.parser_type != MultilineParserType::Custom {
        return Ok(multiline::builtin(parser.parser_type));
    }
    let custom = parser
        .custom
        .as_ref()
        .ok_or_else(|| Fault::invalid("multiline parser Custom without custom settings"))?;
    match (&custom.starts_when, &custom.ends_when) {
        (Some(re), None) => custom_boundary(Boundary::StartsWhen, re).map(Some),
        (None, Some(re)) => custom_boundary(Boundary::EndsWhen, re).map(Some),
        _ => Err(Fault::invalid("multiline custom parser needs exactly one of startsWhen/endsWhen")),
    }
}

/// Rewrite a log filter to address the parsed message body.
pub fn to_log_filter(f: &Filter) -> Filter {
    let field = if f.field.is_empty() { "parsed_data".to_string() } else { format!("parsed_data.{}", f.field) };
    Filter { field, ..f.clone() }
}

fn check_patterns(f: &Filter) -> Result<(), Fault> {
    if !matches!(f.operator, FilterOperator::Regex | FilterOperator::NotRegex) {
        return Ok(());
    }
    for v in &f.values {
        if let Some(p) = v.as_str() {
            regex::Regex::new(&anchor(p)).map_err(|e| Fault::invalid(format!("filter on {:?}: {e}", f.field)))?;
        }
    }
    Ok(())
}

/// Per-source chain: multiline, timestamp and metadata normalization, then filters.
pub fn source_chain(
    kind: SourceType,
    parser: Option<&MultilineParser>,
    label_filters: &[Filter],
    log_filters: &[Filter],
) -> Result<Vec<Draft>, Fault> {
    let log_filters: Vec<Filter> = log_filters.iter().map(to_log_filter).collect();
    for f in label_filters.iter().chain(log_filters.iter()) {
        check_patterns(f)?;
    }

    let mut chain = Vec::new();
    if let Some(rule) = multiline_rule(parser)? {
        chain.push(reduce(&rule)?);
    }
    chain.push(remap("local_timezone", logship_vrl::LOCAL_TIMEZONE)?);
    match kind {
        SourceType::KubernetesPods => {
            chain.push(remap("owner_ref", logship_vrl::OWNER_REF)?);
            chain.push(remap("clean_up", logship_vrl::CLEAN_UP)?);
        }
        SourceType::File => chain.push(remap("host_ip", logship_vrl::HOST_IP)?),
    }
    if !log_filters.is_empty() {
        chain.push(remap("json_parse", logship_vrl::PARSE_JSON)?);
    }
    for f in label_filters {
        chain.push(filter("label_filter", &render_filter(f)?)?);
    }
    for f in &log_filters {
        chain.push(filter("log_filter", &render_filter(f)?)?);
    }
    Ok(chain)
}

/// Per-destination chain, appended after the source chain of every pipeline
/// that targets the destination.
pub fn destination_chain(spec: &ClusterLogDestinationSpec) -> Result<Vec<Draft>, Fault> {
    use DestinationType as D;
    let kind = spec.destination_type;
    let has_labels = !spec.extra_labels.is_empty();
    let mut chain = Vec::new();

    if matches!(kind, D::Elasticsearch | D::Logstash) {
        chain.push(Draft::new(
            "elastic_dedot",
            "lua",
            &Lua { version: "2", hooks: Hooks { process: "process" }, source: logship_vrl::DEDOT },
        )?);
    }
    if has_labels && matches!(kind, D::Elasticsearch | D::Logstash | D::Vector | D::Kafka) {
        if spec.extra_labels.values().any(|v| template_path(v).is_some()) {
            chain.push(remap("json_parse", logship_vrl::PARSE_JSON)?);
        }
        chain.push(remap("extra_fields", &logship_vrl::extra_fields(&spec.extra_labels)?)?);
    }
    if kind == D::Elasticsearch && spec.elasticsearch.data_stream_enabled {
        chain.push(remap("ds_timestamp", logship_vrl::DATA_STREAM_TIMESTAMP)?);
    }
    if kind == D::Socket && spec.socket.encoding.codec == SocketCodec::Syslog {
        let source = logship_vrl::syslog_encoding(&spec.extra_labels);
        chain.push(Draft::new("syslog_encoding", "remap", &Remap { source: &source, drop_on_abort: true })?);
    }
    if matches!(kind, D::Splunk | D::Socket) {
        chain.push(remap("datetime", logship_vrl::DATETIME)?);
    }
    if let Some(lines) = spec.rate_limit.as_ref().and_then(|r| r.lines_per_minute) {
        chain.push(Draft::new("ratelimit", "throttle", &Throttle { threshold: lines, window_secs: 60 })?);
    }
    if matches!(kind, D::Elasticsearch | D::Logstash | D::Vector) {
        chain.push(remap("del_parsed_data", logship_vrl::DEL_PARSED_DATA)?);
    } else if kind == D::Loki && has_labels {
        chain.push(remap("json_parse", logship_vrl::PARSE_JSON)?);
    }
    Ok(chain)
}
