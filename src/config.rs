// config.rs - Node Configuration

//! Layered node configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional file
//! (TOML, YAML or JSON by extension), then `FIPA_`-prefixed environment
//! variables with `__` between nested keys, e.g. `FIPA_CLUSTER__LISTEN`.
//! The binary applies its command-line overrides on top.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use crate::actor::InitArgs;
use crate::observability::{MetricsConfig, TracingConfig, TracingFormat};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete node configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique id of this node; the lowest id wins duplicate agent claims
    pub node_id: String,

    pub cluster: ClusterConfig,

    /// Group linking this cluster to peer clusters
    pub relay: Option<ClusterConfig>,

    pub runtime: RuntimeConfig,

    pub tracing: TracingSection,

    pub metrics: MetricsSection,

    /// Agents started at boot
    pub agents: Vec<AgentSpec>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            cluster: ClusterConfig::default(),
            relay: None,
            runtime: RuntimeConfig::default(),
            tracing: TracingSection::default(),
            metrics: MetricsSection::default(),
            agents: Vec::new(),
        }
    }
}

/// One group channel: the cluster itself, or the relay
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Group name; peers with another name are rejected
    pub name: String,

    /// TCP listen address
    pub listen: String,

    /// Statically known peers
    pub peers: Vec<PeerConfig>,

    pub heartbeat_ms: u64,

    /// Delay between dial attempts to an unreachable peer
    pub reconnect_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "fipa-cluster".to_string(),
            listen: "0.0.0.0:7600".to_string(),
            peers: Vec::new(),
            heartbeat_ms: 1000,
            reconnect_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerConfig {
    pub node_id: String,
    pub addr: String,
}

impl PeerConfig {
    /// Parse `id=host:port`
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.split_once('=') {
            Some((node_id, addr)) if !node_id.trim().is_empty() && !addr.trim().is_empty() => Ok(Self {
                node_id: node_id.trim().to_string(),
                addr: addr.trim().to_string(),
            }),
            _ => Err(ConfigError::Invalid(format!("peer must be id=host:port, got '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker arbiters for agent actors; 0 runs agents on the main arbiter
    pub workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingSection {
    pub filter: String,
    pub format: TracingFormat,
}

impl Default for TracingSection {
    fn default() -> Self {
        Self {
            filter: TracingConfig::default().filter,
            format: TracingFormat::Pretty,
        }
    }
}

impl TracingSection {
    pub fn to_tracing_config(&self) -> TracingConfig {
        TracingConfig {
            filter: self.filter.clone(),
            ..TracingConfig::for_format(self.format.clone())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9090".to_string(),
        }
    }
}

impl MetricsSection {
    pub fn to_metrics_config(&self) -> Result<MetricsConfig, ConfigError> {
        let listen_addr: SocketAddr = self
            .listen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("metrics.listen '{}': {e}", self.listen)))?;
        Ok(MetricsConfig {
            listen_addr,
            ..MetricsConfig::default()
        })
    }
}

/// Agent to start at boot
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub module: String,
    pub class_name: String,
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl AgentSpec {
    pub fn init_args(&self) -> InitArgs {
        self.args.clone()
    }
}

impl NodeConfig {
    /// Load from an optional file plus the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(path, None)
    }

    /// Load with an explicit environment map instead of the process
    /// environment
    pub fn build(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("FIPA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: NodeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }

        validate_group("cluster", &self.cluster, &self.node_id)?;

        if let Some(relay) = &self.relay {
            validate_group("relay", relay, &self.node_id)?;
            if relay.name == self.cluster.name {
                return Err(ConfigError::Invalid(
                    "relay.name must differ from cluster.name".into(),
                ));
            }
            if relay.listen == self.cluster.listen {
                return Err(ConfigError::Invalid(
                    "relay.listen must differ from cluster.listen".into(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.is_empty() || agent.module.is_empty() || agent.class_name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent entries need name, module and class_name: {agent:?}"
                )));
            }
            if !seen.insert((agent.name.as_str(), agent.module.as_str())) {
                return Err(ConfigError::Invalid(format!(
                    "agent {}@{} listed twice",
                    agent.name, agent.module
                )));
            }
        }

        Ok(())
    }
}

fn validate_group(section: &str, group: &ClusterConfig, node_id: &str) -> Result<(), ConfigError> {
    if group.name.is_empty() {
        return Err(ConfigError::Invalid(format!("{section}.name must not be empty")));
    }
    if group.listen.is_empty() {
        return Err(ConfigError::Invalid(format!("{section}.listen must not be empty")));
    }
    if group.heartbeat_ms == 0 {
        return Err(ConfigError::Invalid(format!("{section}.heartbeat_ms must be positive")));
    }

    let mut ids = HashSet::new();
    for peer in &group.peers {
        if peer.node_id == node_id {
            return Err(ConfigError::Invalid(format!(
                "{section}.peers lists this node ({node_id})"
            )));
        }
        if !ids.insert(peer.node_id.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "{section}.peers lists {} twice",
                peer.node_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.relay.is_none());
        assert_eq!(config.runtime.workers, 4);
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
node_id = "n2"

[cluster]
name = "market"
listen = "127.0.0.1:7700"
peers = [{{ node_id = "n1", addr = "127.0.0.1:7600" }}]

[relay]
name = "federation"
listen = "127.0.0.1:7800"

[[agents]]
module = "builtin"
class_name = "Echo"
name = "echo"
args = {{ prefix = ">> " }}
"#
        )
        .unwrap();

        let config = NodeConfig::build(Some(file.path()), Some(HashMap::new())).unwrap();
        assert_eq!(config.node_id, "n2");
        assert_eq!(config.cluster.name, "market");
        assert_eq!(config.cluster.peers, vec![PeerConfig::parse("n1=127.0.0.1:7600").unwrap()]);
        assert_eq!(config.cluster.heartbeat_ms, 1000);
        assert_eq!(config.relay.as_ref().unwrap().name, "federation");
        assert_eq!(config.agents[0].init_args().get("prefix").map(String::as_str), Some(">> "));
    }

    #[test]
    fn test_environment_overrides() {
        let env = HashMap::from([
            ("FIPA_NODE_ID".to_string(), "n7".to_string()),
            ("FIPA_CLUSTER__NAME".to_string(), "lab".to_string()),
            ("FIPA_RUNTIME__WORKERS".to_string(), "2".to_string()),
        ]);

        let config = NodeConfig::build(None, Some(env)).unwrap();
        assert_eq!(config.node_id, "n7");
        assert_eq!(config.cluster.name, "lab");
        assert_eq!(config.runtime.workers, 2);
    }

    #[test]
    fn test_validation() {
        let mut config = NodeConfig::default();
        config.cluster.peers.push(PeerConfig::parse("node-1=127.0.0.1:1").unwrap());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = NodeConfig::default();
        config.relay = Some(ClusterConfig::default());
        assert!(config.validate().is_err());

        assert!(PeerConfig::parse("no-address").is_err());
        assert!(PeerConfig::parse("=127.0.0.1:1").is_err());
    }

    #[test]
    fn test_metrics_section() {
        let section = MetricsSection {
            enabled: true,
            listen: "127.0.0.1:9100".into(),
        };
        assert_eq!(section.to_metrics_config().unwrap().listen_addr.port(), 9100);

        let bad = MetricsSection {
            enabled: true,
            listen: "nowhere".into(),
        };
        assert!(bad.to_metrics_config().is_err());
    }
}
