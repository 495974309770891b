//! collab.toml configuration parser.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    pub node: NodeConfig,
    pub gossip: GossipConfig,
    pub tasks: TaskConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Path of the persisted Case file.
    pub case_file: PathBuf,
    /// Workers attached and launched at startup.
    pub workers: usize,
    /// Bind address for the peer HTTP server.
    pub listen: SocketAddr,
    /// Externally mapped IP this node is reachable under, if behind NAT.
    pub external_ip: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            case_file: PathBuf::from("collab.json"),
            workers: 4,
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            external_ip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Maximum peers contacted per catchup round; 0 disables gossip.
    pub gossip_num: usize,
    pub syn_interval_ms: u64,
    /// Period of the dead-peer clean loop.
    pub collaborator_expiry_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            gossip_num: 3,
            syn_interval_ms: 5_000,
            collaborator_expiry_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub task_expire_ms: u64,
    pub remote_timeout_ms: u64,
    pub dial_timeout_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            task_expire_ms: 5_000,
            remote_timeout_ms: 30_000,
            dial_timeout_ms: 2_000,
        }
    }
}

impl CollabConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn syn_interval(&self) -> Duration {
        Duration::from_millis(self.gossip.syn_interval_ms)
    }

    pub fn collaborator_expiry(&self) -> Duration {
        Duration::from_millis(self.gossip.collaborator_expiry_ms)
    }

    pub fn task_expire(&self) -> Duration {
        Duration::from_millis(self.tasks.task_expire_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.tasks.remote_timeout_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.tasks.dial_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = CollabConfig::parse("").unwrap();
        assert_eq!(config, CollabConfig::default());
        assert_eq!(config.gossip.gossip_num, 3);
        assert_eq!(config.task_expire(), Duration::from_secs(5));
        assert_eq!(config.node.listen.port(), 8080);
    }

    #[test]
    fn parse_partial_sections() {
        let config = CollabConfig::parse(
            r#"
[node]
workers = 8
listen = "127.0.0.1:9100"
external_ip = "203.0.113.7"

[gossip]
gossip_num = 5
"#,
        )
        .unwrap();
        assert_eq!(config.node.workers, 8);
        assert_eq!(config.node.listen.port(), 9100);
        assert_eq!(config.node.external_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(config.gossip.gossip_num, 5);
        assert_eq!(config.syn_interval(), Duration::from_secs(5));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = CollabConfig::from_file(Path::new("/nonexistent/collab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collab.toml");
        std::fs::write(&path, "[tasks]\ntask_expire_ms = 250\n").unwrap();
        let config = CollabConfig::from_file(&path).unwrap();
        assert_eq!(config.task_expire(), Duration::from_millis(250));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = CollabConfig::parse("[node\nworkers = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
