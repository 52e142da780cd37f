use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use kube::CustomResourceExt;
use logship_compose::compile;
use logship_core::{ClusterLogDestination, ClusterLoggingConfig, PodLoggingConfig, Snapshot};
use logship_kubehub::{get_kube_client, start_watchers, KubePublisher, KubeSnapshotSource};
use logship_reconcile::{spawn_reconcile_loop, LoopConfig, Reconciler};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "logshipctl", version, about = "log-shipper config controller")]
struct Cli {
    /// Cluster DNS domain, used to recognize the in-cluster Loki
    #[arg(long = "cluster-domain", env = "LOGSHIP_CLUSTER_DOMAIN", global = true, default_value = logship_core::DEFAULT_CLUSTER_DOMAIN)]
    cluster_domain: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch logging resources and keep the agent config secret up to date
    Run {
        /// Coalescing window for watch events
        #[arg(long = "debounce-ms", env = "LOGSHIP_DEBOUNCE_MS", default_value_t = 200)]
        debounce_ms: u64,
        /// Time an in-flight reconcile may take after shutdown is requested
        #[arg(long = "grace-secs", env = "LOGSHIP_GRACE_SECS", default_value_t = 10)]
        grace_secs: u64,
        /// Trigger queue capacity
        #[arg(long = "queue-cap", env = "LOGSHIP_QUEUE_CAP", default_value_t = 1024)]
        queue_cap: usize,
    },
    /// Compile YAML manifests offline and print the agent config
    Render {
        /// Manifest files (`-` reads stdin); multi-document YAML is accepted
        #[arg(short = 'f', long = "filename", required = true, num_args = 1..)]
        files: Vec<PathBuf>,
        /// Also verify the graph (inputs resolve, no cycles)
        #[arg(long = "check", action = ArgAction::SetTrue)]
        check: bool,
    },
    /// Print the CustomResourceDefinitions of the input kinds
    Crds,
}

fn init_tracing() {
    let env = std::env::var("LOGSHIP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("LOGSHIP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid LOGSHIP_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_manifest(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_snapshot(files: &[PathBuf], cluster_domain: &str) -> Result<Snapshot> {
    let mut snap = Snapshot { cluster_domain: cluster_domain.to_string(), ..Snapshot::offline() };
    for f in files {
        let text = read_manifest(f)?;
        snap.extend_from_yaml(&text).with_context(|| format!("loading {}", f.display()))?;
    }
    Ok(snap)
}

fn render(files: &[PathBuf], cluster_domain: &str, check: bool) -> Result<Vec<u8>> {
    let snap = load_snapshot(files, cluster_domain)?;
    let compiled = compile(&snap)?;
    if check {
        compiled.document.validate().map_err(|e| anyhow!("invalid graph: {e}"))?;
    }
    for (kind, name) in &compiled.skipped {
        warn!(kind = %kind, name = %name, "resource skipped");
    }
    Ok(compiled.bytes)
}

fn crds() -> Result<String> {
    let docs = [ClusterLoggingConfig::crd(), PodLoggingConfig::crd(), ClusterLogDestination::crd()];
    let mut out = String::new();
    for crd in docs {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}

async fn run(cluster_domain: String, cfg: LoopConfig) -> Result<()> {
    let client = get_kube_client().await?;
    let (tx, rx) = mpsc::channel(cfg.queue_capacity);
    let watchers = start_watchers(client.clone(), tx);
    let reconciler = Reconciler::new(KubeSnapshotSource::new(client.clone(), cluster_domain), KubePublisher::new(client));
    let (stop_tx, stop_rx) = watch::channel(false);
    let grace = cfg.grace;
    let (state, task) = spawn_reconcile_loop(reconciler, rx, stop_rx, cfg);
    info!("log-shipper controller started");

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    let _ = stop_tx.send(true);
    for w in &watchers {
        w.abort();
    }
    match tokio::time::timeout(grace + Duration::from_secs(1), task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "reconcile loop panicked"),
        Err(_) => warn!("reconcile loop did not stop in time"),
    }
    let last = state.current();
    info!(reconciles = last.epoch, last_error = ?last.last_error, "stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { debounce_ms, grace_secs, queue_cap } => {
            let cfg = LoopConfig {
                debounce: Duration::from_millis(debounce_ms.max(1)),
                grace: Duration::from_secs(grace_secs),
                queue_capacity: queue_cap,
            };
            info!(cluster_domain = %cli.cluster_domain, debounce_ms, grace_secs, "run invoked");
            run(cli.cluster_domain, cfg).await?;
        }
        Commands::Render { files, check } => {
            let bytes = render(&files, &cli.cluster_domain, check)?;
            let mut stdout = std::io::stdout().lock();
            if !bytes.is_empty() {
                stdout.write_all(&bytes)?;
                stdout.write_all(b"\n")?;
            }
        }
        Commands::Crds => print!("{}", crds()?),
    }
    Ok(())
}
