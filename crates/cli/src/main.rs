use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use kevex_core::metrics::MetricsStore;
use kevex_core::EnhancedEvent;
use kevex_watcher::{EventHandler, EventWatcher, WatcherConfig};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kevexctl", version, about = "Watch, filter and enrich Kubernetes events")]
struct Cli {
    /// YAML file with watcher settings; flags override it
    #[arg(short = 'c', long = "config", global = true, env = "KEVEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct Overrides {
    /// Namespace to watch (default: all namespaces)
    #[arg(long = "ns", global = true, env = "KEVEX_NAMESPACE")]
    namespace: Option<String>,

    /// Drop events older than this many seconds
    #[arg(long = "max-event-age-secs", global = true, env = "KEVEX_MAX_EVENT_AGE_SECS")]
    max_event_age_secs: Option<u64>,

    /// Do not look up involved objects
    #[arg(long = "omit-lookup", global = true, action = ArgAction::SetTrue)]
    omit_lookup: bool,

    /// Involved-object metadata cache capacity
    #[arg(long = "cache-size", global = true, env = "KEVEX_CACHE_SIZE")]
    cache_size: Option<usize>,

    /// Cluster name stamped on every event
    #[arg(long = "cluster-name", global = true, env = "KEVEX_CLUSTER_NAME")]
    cluster_name: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream enriched events as JSON lines until interrupted
    Watch {
        /// Replace dots in label and annotation keys with underscores
        #[arg(long = "de-dot", action = ArgAction::SetTrue)]
        de_dot: bool,
    },
    /// Print the effective configuration
    Config,
}

fn init_tracing() {
    let env = std::env::var("KEVEX_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Address for the Prometheus listener, read from `KEVEX_METRICS_ADDR`.
fn metrics_addr(raw: Option<String>) -> Option<SocketAddr> {
    let raw = raw?;
    match raw.parse() {
        Ok(sock) => Some(sock),
        Err(_) => {
            warn!(addr = %raw, "invalid KEVEX_METRICS_ADDR; expected host:port");
            None
        }
    }
}

/// Starts the exporter; only the long-running `watch` path serves metrics.
fn serve_metrics(sock: SocketAddr) {
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
        Ok(()) => info!(addr = %sock, "Prometheus metrics exporter listening"),
        Err(e) => warn!(error = %e, "failed to install metrics exporter"),
    }
}

impl Commands {
    fn serves_metrics(&self) -> bool {
        matches!(self, Commands::Watch { .. })
    }
}

fn load_config(path: Option<&Path>, o: &Overrides) -> Result<WatcherConfig> {
    let mut cfg = match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p).with_context(|| format!("reading config {}", p.display()))?;
            parse_config(&raw).with_context(|| format!("parsing config {}", p.display()))?
        }
        None => WatcherConfig::default(),
    };
    apply_overrides(&mut cfg, o);
    cfg.validate()?;
    Ok(cfg)
}

fn parse_config(raw: &str) -> Result<WatcherConfig> {
    if raw.trim().is_empty() {
        return Ok(WatcherConfig::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

fn apply_overrides(cfg: &mut WatcherConfig, o: &Overrides) {
    if let Some(ns) = &o.namespace {
        cfg.namespace = Some(ns.clone());
    }
    if let Some(secs) = o.max_event_age_secs {
        cfg.max_event_age = Duration::from_secs(secs);
    }
    if o.omit_lookup {
        cfg.omit_lookup = true;
    }
    if let Some(size) = o.cache_size {
        cfg.cache_size = size;
    }
    if let Some(name) = &o.cluster_name {
        cfg.cluster_name = Some(name.clone());
    }
}

fn stdout_handler(de_dot: bool) -> EventHandler {
    Arc::new(move |ev: EnhancedEvent| {
        let ev = if de_dot { ev.de_dot() } else { ev };
        match serde_json::to_string(&ev) {
            Ok(line) => println!("{}", line),
            Err(e) => error!(error = %e, "failed to encode event"),
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref(), &cli.overrides)?;
    if cli.command.serves_metrics() {
        if let Some(sock) = metrics_addr(std::env::var("KEVEX_METRICS_ADDR").ok()) {
            serve_metrics(sock);
        }
    }

    match cli.command {
        Commands::Config => {
            println!("{}", serde_yaml::to_string(&cfg)?);
        }
        Commands::Watch { de_dot } => {
            info!(ns = ?cfg.namespace, max_age_secs = cfg.max_event_age.as_secs(), omit_lookup = cfg.omit_lookup, "watch invoked");
            let client = kube::Client::try_default().await.context("building kube client")?;
            let metrics = Arc::new(MetricsStore::new("kevex"));
            let mut watcher = EventWatcher::new(client, cfg, Arc::clone(&metrics), stdout_handler(de_dot))?;
            watcher.start();
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("interrupt received; stopping");
            watcher.stop().await;
            let snap = metrics.snapshot();
            info!(
                processed = snap.events_processed,
                discarded = snap.events_discarded,
                watch_errors = snap.watch_errors,
                api_reads = snap.kube_api_read_requests,
                cache_hits = snap.kube_api_read_cache_hits,
                "event watcher finished"
            );
        }
    }
    Ok(())
}
