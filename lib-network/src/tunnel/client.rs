//! The tunneling node's own side (spec §4.K): dial out to a relay's gateway
//! over WS, then pipe whatever arrives back down to whatever this node
//! actually serves locally — RPC frames become POSTs against the local
//! JSON-RPC endpoint, datachannel frames become bytes on a local TCP
//! connection per `quid`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use super::frame::{DatachannelType, Quid, TunnelFrame};
use super::mux::TunnelMux;

pub struct TunnelClientConfig {
    /// The `ws_url` handed back by OPEN_TUNNEL.
    pub ws_url: String,
    /// Where to forward RPC frames (this node's own JSON-RPC endpoint).
    pub local_rpc_target: String,
    /// Where to forward datachannel bytes (this node's own shard/WS server).
    pub local_data_addr: String,
}

/// Runs the tunnel client loop for the lifetime of the connection. Returns
/// once the outer WS closes or a frame violates the protocol.
pub async fn run(config: TunnelClientConfig) -> anyhow::Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(&config.ws_url).await?;
    let mux = Arc::new(Mutex::new(TunnelMux::new(ws)));
    let local_connections: Arc<Mutex<HashMap<Quid, mpsc::Sender<Vec<u8>>>>> = Arc::new(Mutex::new(HashMap::new()));
    let http = reqwest::Client::new();

    loop {
        let frame = mux.lock().await.next_frame().await;
        match frame {
            Ok(TunnelFrame::Rpc(body)) => {
                let mux = mux.clone();
                let http = http.clone();
                let target = config.local_rpc_target.clone();
                tokio::spawn(async move {
                    let reply = forward_rpc(&http, &target, body).await.unwrap_or_default();
                    let _ = mux.lock().await.send_rpc(reply).await;
                });
            }
            Ok(TunnelFrame::Datachannel { quid, payload, kind }) => {
                route_datachannel(&config, &mux, &local_connections, quid, kind, payload).await;
            }
            Err(_) => break,
        }
    }
    Ok(())
}

async fn forward_rpc(http: &reqwest::Client, target: &str, body: Vec<u8>) -> anyhow::Result<Vec<u8>> {
    let response = http.post(target).body(body).send().await?;
    Ok(response.bytes().await?.to_vec())
}

async fn route_datachannel(
    config: &TunnelClientConfig,
    mux: &Arc<Mutex<TunnelMux<tokio_tungstenite::MaybeTlsStream<TcpStream>>>>,
    local_connections: &Arc<Mutex<HashMap<Quid, mpsc::Sender<Vec<u8>>>>>,
    quid: Quid,
    _kind: DatachannelType,
    payload: Vec<u8>,
) {
    let mut connections = local_connections.lock().await;
    if let Some(sender) = connections.get(&quid) {
        let _ = sender.send(payload).await;
        return;
    }

    let Ok(stream) = TcpStream::connect(&config.local_data_addr).await else {
        return;
    };
    let (tx, rx) = mpsc::channel(64);
    connections.insert(quid, tx);
    drop(connections);

    let mux = mux.clone();
    let connections = local_connections.clone();
    tokio::spawn(pump_local_connection(stream, rx, payload, mux, connections, quid));
}

async fn pump_local_connection(
    mut stream: TcpStream,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    first_payload: Vec<u8>,
    mux: Arc<Mutex<TunnelMux<tokio_tungstenite::MaybeTlsStream<TcpStream>>>>,
    connections: Arc<Mutex<HashMap<Quid, mpsc::Sender<Vec<u8>>>>>,
    quid: Quid,
) {
    if stream.write_all(&first_payload).await.is_err() {
        connections.lock().await.remove(&quid);
        return;
    }

    let mut buf = [0u8; 16 * 1024];
    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if mux.lock().await.send_datachannel(quid, DatachannelType::Binary, buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            incoming = inbound.recv() => {
                match incoming {
                    Some(bytes) => {
                        if stream.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    connections.lock().await.remove(&quid);
}
