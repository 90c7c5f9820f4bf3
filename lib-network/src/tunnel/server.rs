//! The tunnel gateway pool: allocates gateways for OPEN_TUNNEL requests, up
//! to `max_tunnels`, from ports drawn out of `port_range`. Implements
//! [`lib_protocols::TunnelPool`] so `lib-protocols`' OPEN_TUNNEL/FIND_TUNNEL
//! handlers can use it without depending on this crate.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use lib_protocols::{GatewayLease, TunnelPool};
use tokio::sync::{broadcast, RwLock};

use super::gateway::Gateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelServerEvent {
    /// Every gateway slot is in use; further `allocate_gateway` calls return `None`.
    Locked,
    /// A slot freed up after being at capacity.
    Unlocked,
}

pub struct TunnelServerConfig {
    pub bind_ip: String,
    pub port_range: RangeInclusive<u16>,
    pub max_tunnels: usize,
    pub public_host: String,
}

pub struct TunnelServer {
    config: TunnelServerConfig,
    gateways: RwLock<HashMap<String, Arc<Gateway>>>,
    used_ports: RwLock<HashSet<u16>>,
    events: broadcast::Sender<TunnelServerEvent>,
}

impl TunnelServer {
    pub fn new(config: TunnelServerConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            gateways: RwLock::new(HashMap::new()),
            used_ports: RwLock::new(HashSet::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TunnelServerEvent> {
        self.events.subscribe()
    }

    pub async fn open_count(&self) -> usize {
        self.gateways.read().await.len()
    }

    /// Release a gateway (its tunnel client disconnected, or the lease
    /// holder is done with it), freeing both its slot and its port.
    pub async fn release(&self, token: &str) {
        let mut gateways = self.gateways.write().await;
        if let Some(gateway) = gateways.remove(token) {
            let was_full = gateways.len() + 1 >= self.config.max_tunnels;
            let mut ports = self.used_ports.write().await;
            ports.remove(&gateway.bind_addr.port());
            if was_full {
                let _ = self.events.send(TunnelServerEvent::Unlocked);
            }
        }
    }

    async fn next_free_port(&self) -> Option<u16> {
        let used = self.used_ports.read().await;
        self.config.port_range.clone().find(|p| !used.contains(p))
    }
}

#[async_trait]
impl TunnelPool for TunnelServer {
    async fn allocate_gateway(&self) -> Option<GatewayLease> {
        {
            let gateways = self.gateways.read().await;
            if gateways.len() >= self.config.max_tunnels {
                return None;
            }
        }

        let port = self.next_free_port().await?;
        let gateway = Gateway::bind(&self.config.bind_ip, port).await.ok()?;
        let token = gateway.token.clone();
        let bind_port = gateway.bind_addr.port();

        self.used_ports.write().await.insert(bind_port);
        let mut gateways = self.gateways.write().await;
        gateways.insert(token.clone(), Arc::new(gateway));
        if gateways.len() >= self.config.max_tunnels {
            let _ = self.events.send(TunnelServerEvent::Locked);
        }

        Some(GatewayLease {
            ws_url: format!("ws://{}:{}/tunnel?token={}", self.config.public_host, bind_port, token),
            address: self.config.public_host.clone(),
            port: bind_port,
        })
    }

    async fn has_free_gateway(&self) -> bool {
        self.gateways.read().await.len() < self.config.max_tunnels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(max_tunnels: usize) -> TunnelServerConfig {
        TunnelServerConfig {
            bind_ip: "127.0.0.1".to_string(),
            port_range: 18000..=18099,
            max_tunnels,
            public_host: "127.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn allocate_gateway_respects_max_tunnels() {
        let server = TunnelServer::new(test_config(1));
        assert!(server.has_free_gateway().await);
        let first = server.allocate_gateway().await;
        assert!(first.is_some());
        assert!(!server.has_free_gateway().await);
        assert!(server.allocate_gateway().await.is_none());
    }

    #[tokio::test]
    async fn release_frees_the_port_and_slot() {
        let server = TunnelServer::new(test_config(1));
        let lease = server.allocate_gateway().await.unwrap();
        let token = lease.ws_url.split("token=").nth(1).unwrap().to_string();
        server.release(&token).await;
        assert!(server.has_free_gateway().await);
        assert_eq!(server.open_count().await, 0);
    }

    #[tokio::test]
    async fn locked_event_fires_at_capacity() {
        let server = TunnelServer::new(test_config(1));
        let mut events = server.subscribe();
        server.allocate_gateway().await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event, TunnelServerEvent::Locked);
    }
}
