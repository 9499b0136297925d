use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use lumen_api::reconcile::{converge, Desired, ManagedResource, Outcome};
use lumen_api::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "lumenctl", version, about = "Lumen cluster CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Cluster name
    #[arg(long = "cluster", global = true, default_value = "lumen")]
    cluster: String,

    /// Kubernetes namespace of the cluster
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    /// Management API port
    #[arg(long = "port", global = true)]
    port: Option<u16>,

    /// Talk to the cluster over https
    #[arg(long = "tls", global = true, action = ArgAction::SetTrue)]
    tls: bool,

    /// Management endpoint; derived from the cluster name when unset
    #[arg(long = "base-url", global = true, env = "LUMEN_BASE_URL")]
    base_url: Option<url::Url>,

    /// API token sent as bearer credential
    #[arg(long = "token", global = true, env = "LUMEN_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Kind { Storage, Ingest }

impl From<Kind> for PartitionKind {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Storage => PartitionKind::Storage,
            Kind::Ingest => PartitionKind::Ingest,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ResourceKind { IngestToken, Parser, Repository, View, Action, Alert }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster status and version
    Status,
    /// Nodes and partition assignments
    Topology,
    /// Check that the API token is accepted
    Token,
    /// Print the management URL derived from the cluster name
    BaseUrl,
    /// Probe the cluster's pods and print the first reachable endpoint
    ResolveEndpoint {
        /// Per-probe timeout in seconds
        #[arg(long = "probe-timeout", default_value_t = 5)]
        probe_timeout: u64,
        /// Pod label whose value is the cluster name
        #[arg(long = "instance-label", default_value = lumen_kubehub::DEFAULT_INSTANCE_LABEL)]
        instance_label: String,
    },
    /// Partition scheme operations
    Partitions {
        #[command(subcommand)]
        op: PartitionOp,
    },
    /// Node lifecycle operations
    Node {
        #[command(subcommand)]
        op: NodeOp,
    },
    /// Ask the cluster to redistribute data across nodes
    Redistribute,
    /// License operations
    License {
        #[command(subcommand)]
        op: LicenseOp,
    },
    /// Converge one resource toward a spec file (YAML or JSON)
    Reconcile {
        #[arg(value_enum)]
        kind: ResourceKind,
        file: PathBuf,
        /// Make sure the resource does not exist
        #[arg(long = "absent", action = ArgAction::SetTrue)]
        absent: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PartitionOp {
    /// Show the suggested assignment (empty when balanced)
    Suggest {
        #[arg(value_enum)]
        kind: Kind,
    },
    /// Apply a scheme from a file, or the current suggestion
    Apply {
        #[arg(value_enum)]
        kind: Kind,
        /// Scheme file (list of {id, nodeIds}); defaults to the suggestion
        #[arg(long = "file")]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum NodeOp {
    /// Move storage and ingest routes off a node
    Drain {
        id: u64,
        /// Unregister the node once drained
        #[arg(long = "unregister", action = ArgAction::SetTrue)]
        unregister: bool,
    },
    /// Remove a drained node from the cluster
    Unregister { id: u64 },
}

#[derive(Subcommand, Debug)]
enum LicenseOp {
    Get,
    /// Install a license read from a file
    Install { file: PathBuf },
}

fn init_tracing() {
    let env = std::env::var("LUMEN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("LUMEN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid LUMEN_METRICS_ADDR; expected host:port");
        }
    }
}

impl Cli {
    fn cluster_ref(&self) -> ClusterRef {
        ClusterRef { name: self.cluster.clone(), namespace: self.namespace.clone(), port: self.port, tls: self.tls }
    }

    /// Env config first, flags on top, cluster-derived URL as last resort.
    fn connect(&self) -> Result<RemoteClient<HttpTransport>> {
        let mut cfg = ClientConfig::from_env()?;
        if let Some(u) = &self.base_url {
            cfg.base_url = Some(u.clone());
        }
        if let Some(t) = &self.token {
            cfg.api_token = Some(t.clone());
        }
        let fallback = base_url(&self.cluster_ref())?;
        let transport = HttpTransport::from_config(&cfg, Some(fallback))?;
        info!(base = %transport.base(), timeout_s = cfg.timeout.as_secs(), "client configured");
        Ok(RemoteClient::new(transport))
    }

    fn print<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        match self.output {
            Output::Human => human(value),
            Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        }
        Ok(())
    }
}

fn read_spec<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn reconcile_file<R>(client: &dyn ClusterClient, path: &Path, desired: Desired) -> Result<Outcome>
where
    R: ManagedResource + DeserializeOwned,
{
    let spec: R = read_spec(path)?;
    Ok(converge(client, &spec, desired).await?)
}

fn print_partitions(kind: PartitionKind, parts: &[Partition]) {
    println!("{} partitions: {}", kind, parts.len());
    for p in parts {
        let nodes: Vec<String> = p.node_ids.iter().map(|n| n.to_string()).collect();
        println!("  {:>4} → [{}]", p.id, nodes.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let t0 = Instant::now();

    match &cli.command {
        Commands::BaseUrl => {
            let url = base_url(&cli.cluster_ref())?;
            println!("{}", url);
        }
        Commands::ResolveEndpoint { probe_timeout, instance_label } => {
            let kube = kube::Client::try_default().await.context("connecting to kubernetes")?;
            let prober = lumen_kubehub::HttpProber::new(Duration::from_secs(*probe_timeout))?;
            let url = lumen_kubehub::discover_base_url(kube, &cli.cluster_ref(), instance_label, &prober).await?;
            println!("{}", url);
        }
        Commands::Status => {
            let st = cli.connect()?.status().await?;
            cli.print(&st, |s| println!("{} (version {})", s.status, s.version))?;
        }
        Commands::Topology => {
            let cluster = cli.connect()?.get_cluster().await?;
            cli.print(&cluster, |c| {
                println!("nodes: {}", c.nodes.len());
                for n in &c.nodes {
                    println!("  {:>4} • {} • {}", n.id, n.uri, if n.is_available { "available" } else { "unavailable" });
                }
                print_partitions(PartitionKind::Storage, &c.storage_partitions);
                print_partitions(PartitionKind::Ingest, &c.ingest_partitions);
            })?;
        }
        Commands::Token => {
            cli.connect()?.test_api_token().await?;
            println!("token accepted");
        }
        Commands::Partitions { op } => {
            let client = cli.connect()?;
            match op {
                PartitionOp::Suggest { kind } => {
                    let kind = PartitionKind::from(*kind);
                    let plan = match kind {
                        PartitionKind::Storage => client.suggested_storage_partitions().await?,
                        PartitionKind::Ingest => client.suggested_ingest_partitions().await?,
                    };
                    cli.print(&plan, |p| {
                        if p.is_empty() {
                            println!("{} partitions are balanced", kind);
                        }
                        for input in p {
                            println!("  {:>4} → {:?}", input.id, input.node_ids);
                        }
                    })?;
                }
                PartitionOp::Apply { kind, file } => {
                    let kind = PartitionKind::from(*kind);
                    let scheme: Vec<PartitionInput> = match file {
                        Some(path) => read_spec(path)?,
                        None => match kind {
                            PartitionKind::Storage => client.suggested_storage_partitions().await?,
                            PartitionKind::Ingest => client.suggested_ingest_partitions().await?,
                        },
                    };
                    if scheme.is_empty() {
                        println!("nothing to apply");
                    } else {
                        match kind {
                            PartitionKind::Storage => client.update_storage_partition_scheme(&scheme).await?,
                            PartitionKind::Ingest => client.update_ingest_partition_scheme(&scheme).await?,
                        }
                        info!(kind = %kind, partitions = scheme.len(), took_ms = %t0.elapsed().as_millis(), "scheme applied");
                        println!("applied {} {} partitions", scheme.len(), kind);
                    }
                }
            }
        }
        Commands::Node { op } => {
            let client = cli.connect()?;
            match op {
                NodeOp::Drain { id, unregister } => {
                    let node = lumen_planner::narrow_node_id(*id)?;
                    client.move_storage_routes_away_from_node(node).await?;
                    client.move_ingest_routes_away_from_node(node).await?;
                    println!("node {} drained", node);
                    if *unregister {
                        client.unregister(node).await?;
                        println!("node {} unregistered", node);
                    }
                    info!(node, took_ms = %t0.elapsed().as_millis(), "drain finished");
                }
                NodeOp::Unregister { id } => {
                    let node = lumen_planner::narrow_node_id(*id)?;
                    client.unregister(node).await?;
                    println!("node {} unregistered", node);
                }
            }
        }
        Commands::Redistribute => {
            cli.connect()?.start_data_redistribution().await?;
            println!("redistribution started");
        }
        Commands::License { op } => {
            let client = cli.connect()?;
            match op {
                LicenseOp::Get => {
                    let lic = client.get_license().await?;
                    cli.print(&lic, |l| println!("{} (expires {})", l.id(), l.expires_at()))?;
                }
                LicenseOp::Install { file } => {
                    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
                    client.install_license(&raw).await?;
                    println!("license installed");
                }
            }
        }
        Commands::Reconcile { kind, file, absent } => {
            let client = cli.connect()?;
            let desired = if *absent { Desired::Absent } else { Desired::Present };
            let outcome = match kind {
                ResourceKind::IngestToken => reconcile_file::<IngestTokenSpec>(&client, file, desired).await?,
                ResourceKind::Parser => reconcile_file::<ParserSpec>(&client, file, desired).await?,
                ResourceKind::Repository => reconcile_file::<RepositorySpec>(&client, file, desired).await?,
                ResourceKind::View => reconcile_file::<ViewSpec>(&client, file, desired).await?,
                ResourceKind::Action => reconcile_file::<ActionSpec>(&client, file, desired).await?,
                ResourceKind::Alert => reconcile_file::<AlertSpec>(&client, file, desired).await?,
            };
            println!("{:?}", outcome);
        }
    }
    Ok(())
}
