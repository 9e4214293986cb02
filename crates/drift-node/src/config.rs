//! Node configuration for the Drift node.
//!
//! [`NodeConfig`] is assembled from three layers, later ones winning:
//! built-in defaults, an optional TOML/JSON file, and `DRIFT__`-prefixed
//! environment variables (`DRIFT__RPC_PORT=9000`,
//! `DRIFT__NETWORK__SEEDS=a:8106,b:8106`). The binary applies its CLI flags
//! on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use drift_core::constants::DEFAULT_RPC_PORT;
use drift_core::error::DriftError;
use drift_core::settings::ProtocolSettings;
use drift_core::types::Address;
use drift_network::NetworkConfig;

/// Name of the configuration file looked up in the data directory.
pub const CONFIG_FILE_NAME: &str = "drift.toml";

const ENV_PREFIX: &str = "DRIFT";
const ENV_SEPARATOR: &str = "__";

/// Which identity registry decides income eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryConfig {
    /// Every address is registered.
    #[default]
    Open,
    /// Only the listed addresses are registered.
    AllowList { addresses: Vec<Address> },
}

/// Identity of the local validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Address credited with block rewards. Without one the node only
    /// verifies and serves the chain.
    pub address: Option<Address>,
}

/// Configuration for a node instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the node's files, including the default config file.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    pub rpc_port: u16,
    pub network: NetworkConfig,
    pub protocol: ProtocolSettings,
    pub validator: ValidatorConfig,
    pub registry: RegistryConfig,
    /// Log level filter string (e.g. "info", "debug", "drift_consensus=trace").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            network: NetworkConfig::default(),
            protocol: ProtocolSettings::default(),
            validator: ValidatorConfig::default(),
            registry: RegistryConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load the configuration from `path`, or from the default file when
    /// `path` is `None`. A missing default file is not an error; a missing
    /// explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, DriftError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_data_dir().join(CONFIG_FILE_NAME), false),
        };

        let settings = config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("network.seeds"),
            )
            .build()
            .map_err(|e| DriftError::Config(format!("{}: {e}", file.display())))?;

        settings
            .try_deserialize()
            .map_err(|e| DriftError::Config(format!("{}: {e}", file.display())))
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }
}

/// `<platform data dir>/drift`, or `./drift` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drift")
}
