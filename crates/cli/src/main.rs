use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use netop_apply::{KubeApplier, ResourceCache};
use netop_core::{ClusterNetworkConfig, DesiredSpec, FeatureGates, InfraStatus, RenderRequest, Renderer};
use netop_kubehub::{load_feature_gates, spawn_watchers, BootstrapOptions, ClusterOperatorWriter, KubeBootstrapper, KubeConfigSource, KubeMigrator};
use netop_reconcile::config::{DEFAULT_FIELD_MANAGER, DEFAULT_MANIFEST_DIR};
use netop_reconcile::{Collaborators, Engine, EngineConfig, StatusManager};
use netop_render::ManifestRenderer;
use netop_scheduler::SchedulerConfig;

mod check;

#[derive(Parser, Debug)]
#[command(name = "netopd", version, about = "Cluster network operator")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile the cluster network configuration until interrupted
    Run(RunArgs),
    /// Merge, validate and safety-check a desired spec without touching a cluster
    Check(SpecArgs),
    /// Render the manifests a desired spec expands to
    Render {
        #[command(flatten)]
        spec: SpecArgs,
        #[arg(long = "manifest-dir", env = "NETOP_MANIFEST_DIR", default_value = DEFAULT_MANIFEST_DIR)]
        manifest_dir: PathBuf,
        /// Platform type substituted into templates
        #[arg(long, default_value = "None")]
        platform: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long = "resync-secs", env = "NETOP_RESYNC_SECS", default_value_t = 180)]
    resync_secs: u64,
    #[arg(long = "manifest-dir", env = "NETOP_MANIFEST_DIR", default_value = DEFAULT_MANIFEST_DIR)]
    manifest_dir: PathBuf,
    #[arg(long = "cycle-timeout-secs", env = "NETOP_CYCLE_TIMEOUT_SECS", default_value_t = 600)]
    cycle_timeout_secs: u64,
    /// Prometheus listener, host:port
    #[arg(long = "metrics-addr", env = "NETOP_METRICS_ADDR")]
    metrics_addr: Option<String>,
    /// Trigger channel capacity
    #[arg(long = "queue-cap", env = "NETOP_QUEUE_CAP", default_value_t = 2048)]
    queue_cap: usize,
    #[arg(long = "field-manager", default_value = DEFAULT_FIELD_MANAGER)]
    field_manager: String,
    /// Namespace of the hosted control plane, if any
    #[arg(long = "hosted-namespace", env = "NETOP_HOSTED_NAMESPACE")]
    hosted_namespace: Option<String>,
    #[arg(long = "probe-image", env = "NETOP_PROBE_IMAGE")]
    probe_image: Option<String>,
}

#[derive(Args, Debug)]
struct SpecArgs {
    /// Desired spec: a Network object or its bare spec, YAML or JSON
    spec: PathBuf,
    /// Previously applied spec to gate the change against
    #[arg(long)]
    applied: Option<PathBuf>,
    /// Cluster-wide network config (config.openshift.io Network)
    #[arg(long = "cluster-config")]
    cluster_config: Option<PathBuf>,
    /// Host MTU to default from
    #[arg(long = "host-mtu")]
    host_mtu: Option<u32>,
}

impl SpecArgs {
    fn load(&self) -> Result<(DesiredSpec, ClusterNetworkConfig, Option<DesiredSpec>)> {
        let live = check::read_spec_doc(&self.spec)?;
        let cluster = self.cluster_config.as_deref().map(check::read_spec_doc::<ClusterNetworkConfig>).transpose()?.unwrap_or_default();
        let applied = self.applied.as_deref().map(check::read_spec_doc::<DesiredSpec>).transpose()?;
        Ok((live, cluster, applied))
    }
}

fn init_tracing() {
    let env = std::env::var("NETOP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(sock).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        }
    } else {
        warn!(addr = %addr, "invalid NETOP_METRICS_ADDR; expected host:port");
    }
}

async fn run(args: RunArgs) -> Result<()> {
    init_metrics(args.metrics_addr.as_deref());
    let client = kube::Client::try_default().await.context("connecting to the cluster")?;

    let writer = Arc::new(ClusterOperatorWriter::new(client.clone()));
    let prior = match writer.load().await {
        Ok(prior) => prior.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "could not load prior status; starting fresh");
            Default::default()
        }
    };
    let status = Arc::new(StatusManager::with_prior(writer, prior));
    let feature_gates = match load_feature_gates(client.clone()).await {
        Ok(gates) => gates,
        Err(e) => {
            warn!(error = %e, "could not read feature gates; assuming none");
            FeatureGates::default()
        }
    };

    let mut bootstrap = BootstrapOptions { hosted_namespace: args.hosted_namespace, ..Default::default() };
    if let Some(image) = args.probe_image {
        bootstrap.probe_image = image;
    }
    let resources = Arc::new(ResourceCache::new(client.clone()));
    let deps = Collaborators {
        source: Arc::new(KubeConfigSource::new(client.clone())),
        mapper: resources.clone(),
        bootstrapper: Arc::new(KubeBootstrapper::new(client.clone(), bootstrap)),
        renderer: Arc::new(ManifestRenderer::new()),
        applier: Arc::new(KubeApplier::new(client.clone(), resources)),
        migrator: Arc::new(KubeMigrator::new(client.clone())),
    };
    let config = EngineConfig {
        resync_period: Duration::from_secs(args.resync_secs),
        manifest_root: args.manifest_dir,
        field_manager: args.field_manager,
        cycle_deadline: Duration::from_secs(args.cycle_timeout_secs),
        ..Default::default()
    };
    let scheduler_config =
        SchedulerConfig { singleton: config.operator_config_name.clone(), cycle_deadline: config.cycle_deadline, ..Default::default() };
    info!(manifests = %config.manifest_root.display(), resync = ?config.resync_period, "starting network operator");
    let engine = Arc::new(Engine::new(config, deps, status, feature_gates));

    let (tx, rx) = mpsc::channel(args.queue_cap);
    let watchers = spawn_watchers(client, tx);
    let scheduler = netop_scheduler::spawn(engine, scheduler_config, rx);

    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    for w in &watchers {
        w.abort();
    }
    if tokio::time::timeout(Duration::from_secs(30), scheduler.join()).await.is_err() {
        warn!("running cycle did not finish in time; exiting anyway");
    }
    Ok(())
}

fn print_check(report: &check::CheckReport, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            print!("{}", serde_yaml::to_string(&report.merged)?);
            for e in &report.errors {
                println!("invalid: {e}");
            }
            for v in &report.violations {
                println!("unsafe: {v}");
            }
            if report.ok() {
                println!("ok");
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

async fn render(spec: SpecArgs, manifest_dir: PathBuf, platform: String, output: Output) -> Result<()> {
    let (live, cluster, applied) = spec.load()?;
    let report = check::check(&live, &cluster, applied.as_ref(), spec.host_mtu);
    if !report.ok() {
        print_check(&report, output)?;
        bail!("refusing to render an invalid or unsafe configuration");
    }
    let infra = InfraStatus { platform_type: platform, ..Default::default() };
    let gates = FeatureGates::default();
    let out = ManifestRenderer::new()
        .render(RenderRequest { spec: &report.merged, cluster_config: &cluster, manifest_root: &manifest_dir, feature_gates: &gates, infra: &infra })
        .await?;
    let objects = out.objects.iter().map(|o| o.to_json()).collect::<Result<Vec<_>, _>>()?;
    match output {
        Output::Human => {
            for obj in &objects {
                print!("---\n{}", serde_yaml::to_string(obj)?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&objects)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check(spec) => {
            let (live, cluster, applied) = spec.load()?;
            let report = check::check(&live, &cluster, applied.as_ref(), spec.host_mtu);
            print_check(&report, cli.output)?;
            if !report.ok() {
                bail!("configuration rejected");
            }
            Ok(())
        }
        Commands::Render { spec, manifest_dir, platform } => render(spec, manifest_dir, platform, cli.output).await,
    }
}
