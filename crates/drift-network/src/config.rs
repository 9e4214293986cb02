//! Network configuration for the Drift node.

use std::time::Duration;

use drift_core::constants::DEFAULT_RPC_PORT;
use serde::{Deserialize, Serialize};

/// How a node reaches its neighbors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `host:port` under which this node is reachable. Never used as a
    /// neighbor of itself.
    pub host_target: String,
    /// `host:port` (or full URL) of every known node.
    pub seeds: Vec<String>,
    /// Timeout of a single request to a neighbor, in seconds.
    pub connection_timeout_secs: u64,
    /// Maximum number of neighbors the node talks to.
    pub max_outbounds_count: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_target: format!("127.0.0.1:{DEFAULT_RPC_PORT}"),
            seeds: Vec::new(),
            connection_timeout_secs: 5,
            max_outbounds_count: 8,
        }
    }
}

impl NetworkConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Seeds other than this node, without duplicates, in configuration order.
    pub fn neighbor_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for seed in &self.seeds {
            let seed = seed.trim();
            if seed.is_empty() || same_target(seed, &self.host_target) {
                continue;
            }
            if !targets.iter().any(|t| same_target(t, seed)) {
                targets.push(seed.to_string());
            }
        }
        targets
    }
}

fn same_target(a: &str, b: &str) -> bool {
    strip_scheme(a).trim_end_matches('/') == strip_scheme(b).trim_end_matches('/')
}

fn strip_scheme(target: &str) -> &str {
    target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
        .unwrap_or(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_default_port() {
        let cfg = NetworkConfig::default();
        assert!(cfg.host_target.ends_with(&DEFAULT_RPC_PORT.to_string()));
        assert!(cfg.seeds.is_empty());
        assert_eq!(cfg.connection_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn host_is_never_its_own_neighbor() {
        let cfg = NetworkConfig {
            host_target: "10.0.0.1:8106".into(),
            seeds: vec!["http://10.0.0.1:8106/".into(), "10.0.0.2:8106".into()],
            ..NetworkConfig::default()
        };
        assert_eq!(cfg.neighbor_targets(), vec!["10.0.0.2:8106".to_string()]);
    }

    #[test]
    fn duplicate_and_blank_seeds_are_dropped() {
        let cfg = NetworkConfig {
            seeds: vec![
                "10.0.0.2:8106".into(),
                " ".into(),
                "http://10.0.0.2:8106".into(),
                "10.0.0.3:8106".into(),
            ],
            ..NetworkConfig::default()
        };
        assert_eq!(cfg.neighbor_targets(), vec!["10.0.0.2:8106".to_string(), "10.0.0.3:8106".to_string()]);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: NetworkConfig = serde_json::from_str(r#"{"seeds":["a:1"]}"#).unwrap();
        assert_eq!(cfg.seeds, vec!["a:1".to_string()]);
        assert_eq!(cfg.max_outbounds_count, NetworkConfig::default().max_outbounds_count);
    }
}
