//! Node configuration: a single TOML file plus CLI overrides, in the spirit
//! of the teacher's CLI-overrides-merge-into-file-config layering but
//! trimmed to the handful of knobs this peer actually has (no multi-package
//! aggregation, since this node only coordinates the storage-overlay
//! subsystems named in the spec).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("peer-node")
}

fn default_shard_bind() -> SocketAddr {
    "0.0.0.0:7000".parse().unwrap()
}

fn default_advertise_address() -> String {
    "127.0.0.1".to_string()
}

fn default_advertise_port() -> u16 {
    7000
}

fn default_max_tunnels() -> usize {
    3
}

fn default_tunnel_port_start() -> u16 {
    9000
}

fn default_tunnel_port_end() -> u16 {
    9099
}

/// Tunnel gateway pool settings (spec §4.K). Absent section means the node
/// never offers itself as a relay, but can still dial out through others'.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default = "default_max_tunnels")]
    pub max_tunnels: usize,
    #[serde(default = "default_tunnel_port_start")]
    pub port_range_start: u16,
    #[serde(default = "default_tunnel_port_end")]
    pub port_range_end: u16,
    #[serde(default = "default_advertise_address")]
    pub public_host: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            max_tunnels: default_max_tunnels(),
            port_range_start: default_tunnel_port_start(),
            port_range_end: default_tunnel_port_end(),
            public_host: default_advertise_address(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Where identity keys, storage shards/metadata, and other on-disk
    /// state live.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Address the shard transfer server (spec §4.F) binds to.
    #[serde(default = "default_shard_bind")]
    pub shard_bind: SocketAddr,

    /// Address other peers should use to reach this node's shard server.
    #[serde(default = "default_advertise_address")]
    pub advertise_address: String,
    #[serde(default = "default_advertise_port")]
    pub advertise_port: u16,

    #[serde(default)]
    pub tunnel: TunnelConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            shard_bind: default_shard_bind(),
            advertise_address: default_advertise_address(),
            advertise_port: default_advertise_port(),
            tunnel: TunnelConfig::default(),
        }
    }
}

/// CLI overrides applied on top of whatever the config file (or defaults)
/// provide. `None` means "leave the file's value alone."
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub shard_bind: Option<SocketAddr>,
    pub advertise_address: Option<String>,
    pub advertise_port: Option<u16>,
}

impl NodeConfig {
    pub fn load(path: Option<&PathBuf>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => NodeConfig::default(),
        };

        if let Some(dir) = overrides.data_dir {
            config.data_dir = dir;
        }
        if let Some(bind) = overrides.shard_bind {
            config.shard_bind = bind;
        }
        if let Some(addr) = overrides.advertise_address {
            config.advertise_address = addr;
        }
        if let Some(port) = overrides.advertise_port {
            config.advertise_port = port;
        }

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = NodeConfig::default();
        assert_eq!(config.advertise_port, 7000);
        assert!(config.tunnel.port_range_start < config.tunnel.port_range_end);
    }

    #[test]
    fn overrides_win_over_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("node.toml");
        std::fs::write(&config_path, "advertise_port = 8001\n").unwrap();

        let overrides = ConfigOverrides {
            advertise_port: Some(9001),
            data_dir: Some(dir.path().join("data")),
            ..Default::default()
        };
        let config = NodeConfig::load(Some(&config_path), overrides).unwrap();
        assert_eq!(config.advertise_port, 9001);
    }
}
