// bin/agent_node.rs - FIPA Agent Node Binary

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use fipa_cluster_agents::cluster::{GroupChannel, TcpChannel};
use fipa_cluster_agents::config::{NodeConfig, PeerConfig};
use fipa_cluster_agents::observability::{init_metrics, init_tracing, TracingFormat};
use fipa_cluster_agents::{AgentCatalog, NodeBuilder, NodeId};

/// FIPA Agent Node
#[derive(Parser, Debug)]
#[command(name = "fipa-node")]
#[command(author = "SavageS")]
#[command(version)]
#[command(about = "FIPA Distributed Agent Node", long_about = None)]
struct Args {
    /// Config file path (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node ID, overrides the config file
    #[arg(short, long)]
    node_id: Option<String>,

    /// Cluster listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Cluster peer as id=host:port (can be specified multiple times)
    #[arg(long)]
    peer: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Enable metrics server
    #[arg(long)]
    metrics: bool,

    /// Metrics listen address
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Worker arbiters for agents
    #[arg(long)]
    workers: Option<usize>,
}

impl Args {
    fn apply(&self, config: &mut NodeConfig) -> Result<()> {
        if let Some(node_id) = &self.node_id {
            config.node_id = node_id.clone();
        }
        if let Some(listen) = &self.listen {
            config.cluster.listen = listen.clone();
        }
        for peer in &self.peer {
            config.cluster.peers.push(PeerConfig::parse(peer)?);
        }
        if let Some(level) = &self.log_level {
            config.tracing.filter = format!("{level},fipa_cluster_agents={level}");
        }
        if let Some(format) = &self.log_format {
            config.tracing.format = format
                .parse::<TracingFormat>()
                .map_err(anyhow::Error::msg)?;
        }
        if self.metrics {
            config.metrics.enabled = true;
        }
        if let Some(addr) = &self.metrics_addr {
            config.metrics.listen = addr.clone();
        }
        if let Some(workers) = self.workers {
            config.runtime.workers = workers;
        }
        config.validate()?;
        Ok(())
    }
}

#[actix_rt::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config)?;

    init_tracing(config.tracing.to_tracing_config());

    info!("Starting FIPA Agent Node");
    info!(node_id = %config.node_id, cluster = %config.cluster.name, "Node identity");

    // Initialize metrics if enabled
    let _metrics_handle = if config.metrics.enabled {
        let metrics_config = config.metrics.to_metrics_config()?;
        match init_metrics(metrics_config) {
            Ok(handle) => {
                info!(addr = %config.metrics.listen, "Metrics recorder initialized");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize metrics");
                None
            }
        }
    } else {
        None
    };

    let node_id = NodeId::new(config.node_id.clone());

    let cluster = TcpChannel::bind(node_id.clone(), &config.cluster)
        .await
        .context("Failed to bind cluster channel")?;
    info!(listen = %cluster.local_addr(), peers = config.cluster.peers.len(), "Cluster channel up");

    let mut builder = NodeBuilder::new(cluster as Arc<dyn GroupChannel>)
        .with_catalog(AgentCatalog::with_builtins())
        .with_workers(config.runtime.workers);

    if let Some(relay_config) = &config.relay {
        let relay = TcpChannel::bind(node_id.clone(), relay_config)
            .await
            .context("Failed to bind relay channel")?;
        info!(listen = %relay.local_addr(), relay = %relay_config.name, "Relay channel up");
        builder = builder.with_relay(relay);
    }

    let node = builder.build();

    for spec in &config.agents {
        match node.start_agent(&spec.module, &spec.class_name, &spec.name, spec.init_args()) {
            Ok(aid) => info!(agent = %aid, "Configured agent started"),
            Err(e) => warn!(agent = %spec.name, module = %spec.module, error = %e, "Configured agent not started"),
        }
    }

    info!("{}", node.ping());
    info!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    info!("Shutting down...");
    node.shutdown();
    Ok(())
}
