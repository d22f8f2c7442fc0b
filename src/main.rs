use clap::{Parser, Subcommand};
use cluster_ipam::config_loader::{self, ConfiguredAdapter};
use cluster_ipam::ip;
use cluster_ipam::reconcile::ClusterRequest;
use cluster_ipam::utils::parse_ipv4_cidr;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{error, info};
use serde::Serialize;
use std::path::PathBuf;

/// Subnet allocator for per-cluster network infrastructure
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to the allocator configuration YAML file
    #[arg(short, long, default_value = "cluster-ipam.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers for `reconcile` (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate a subnet for a cluster, or show the one it already holds
    Create {
        /// Cluster id
        #[arg(long)]
        cluster: String,

        /// Availability zones (defaults to the configured zones)
        #[arg(long = "zone")]
        zones: Vec<String>,
    },

    /// Release a cluster's subnet
    Delete {
        /// Cluster id
        #[arg(long)]
        cluster: String,
    },

    /// List claims and pool usage
    List,

    /// Show how a CIDR splits across zones, without touching the store
    Split {
        /// Cluster subnet to split
        #[arg(long)]
        cidr: String,

        /// Availability zones (defaults to the configured zones)
        #[arg(long = "zone")]
        zones: Vec<String>,
    },

    /// Ensure subnets for many clusters in parallel
    Reconcile {
        /// Cluster ids
        #[arg(long = "cluster", required = true)]
        clusters: Vec<String>,

        /// Availability zones (defaults to the configured zones)
        #[arg(long = "zone")]
        zones: Vec<String>,
    },
}

#[derive(Serialize)]
struct Listing {
    usage: ip::PoolUsage,
    claims: Vec<ip::SubnetClaim>,
}

#[derive(Serialize)]
struct ReconcileOutcome {
    cluster_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<ip::ClusterNetwork>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    retryable: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .wrap_err("Failed to configure thread pool")?;
    }

    let config = config_loader::load_config(&args.config)?;
    let default_zones = &config.network.availability_zones;
    let zones_or_default = |zones: Vec<String>| if zones.is_empty() { default_zones.clone() } else { zones };

    match args.command {
        Command::Create { cluster, zones } => {
            let adapter = config_loader::build_adapter(&config)?;
            let network = adapter.ensure_created(&cluster, &zones_or_default(zones))?;
            print_json(&network)?;
        }
        Command::Delete { cluster } => {
            let adapter = config_loader::build_adapter(&config)?;
            adapter.ensure_deleted(&cluster)?;
            info!("Cluster {} holds no subnet", cluster);
        }
        Command::List => {
            let adapter = config_loader::build_adapter(&config)?;
            let listing = Listing {
                usage: adapter.usage()?,
                claims: adapter.claims()?,
            };
            print_json(&listing)?;
        }
        Command::Split { cidr, zones } => {
            let cidr = parse_ipv4_cidr(&cidr).map_err(|e| eyre!(e))?;
            let range = config.network_range()?;
            let split = ip::split(cidr, &zones_or_default(zones))?;
            let zones: Vec<ip::ZoneNetwork> = split
                .subnets
                .into_iter()
                .map(|subnet| {
                    let tiers = subnet.tiers(&range);
                    ip::ZoneNetwork::new(subnet, tiers)
                })
                .collect();
            print_json(&serde_json::json!({ "zones": zones, "reserved": split.reserved }))?;
        }
        Command::Reconcile { clusters, zones } => {
            let adapter = config_loader::build_adapter(&config)?;
            reconcile_all(&adapter, &clusters, &zones_or_default(zones))?;
        }
    }

    Ok(())
}

/// Drive every cluster through the adapter on the rayon pool and report
/// one outcome per cluster
fn reconcile_all(adapter: &ConfiguredAdapter, clusters: &[String], zones: &[String]) -> Result<()> {
    let requests: Vec<ClusterRequest> = clusters
        .iter()
        .map(|cluster| ClusterRequest::new(cluster.as_str(), zones))
        .collect();

    let outcomes: Vec<ReconcileOutcome> = adapter
        .ensure_created_all(&requests)
        .into_iter()
        .map(|(cluster_id, result)| match result {
            Ok(network) => ReconcileOutcome {
                cluster_id,
                network: Some(network),
                error: None,
                retryable: false,
            },
            Err(e) => {
                error!("{}", e);
                ReconcileOutcome {
                    cluster_id,
                    network: None,
                    retryable: e.is_retryable(),
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();

    let failed = outcomes.iter().filter(|outcome| outcome.error.is_some()).count();
    print_json(&outcomes)?;
    if failed > 0 {
        return Err(eyre!("{} of {} cluster(s) failed to reconcile", failed, outcomes.len()));
    }
    info!("Reconciled {} cluster(s)", outcomes.len());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).wrap_err("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}
