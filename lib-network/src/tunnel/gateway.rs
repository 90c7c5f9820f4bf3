//! A single gateway: one public TCP listener bound on the relay, entered
//! either by the tunneling client (over WS, at `/tunnel?token=...`) or by a
//! third party wanting to reach whatever the tunneled node is serving
//! locally (any other path, forwarded as a raw datachannel).
//!
//! Spec §4.K: the gateway's own entrance token is a 32-byte random value,
//! good for exactly one WS upgrade — once the tunnel client attaches, the
//! token is consumed and further attach attempts are rejected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::frame::{random_quid, DatachannelType, Quid, TunnelFrame};
use super::mux::TunnelMux;

const ENTRANCE_TOKEN_BYTES: usize = 32;
const PUBLIC_CHUNK: usize = 16 * 1024;

pub fn random_entrance_token() -> String {
    lib_crypto::random::random_token_hex(ENTRANCE_TOKEN_BYTES)
}

/// Shared state for one gateway's lifetime: the attached tunnel client's mux
/// (once it attaches) and the table routing inbound datachannel frames back
/// to the public connection task waiting on them.
struct GatewayState {
    mux: Mutex<Option<TunnelMux<TcpStream>>>,
    routes: Mutex<HashMap<Quid, mpsc::Sender<Vec<u8>>>>,
}

/// A running gateway: owns the listener task and the one-shot entrance
/// token required to attach as the tunnel client.
pub struct Gateway {
    pub token: String,
    pub bind_addr: SocketAddr,
    state: Arc<GatewayState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Gateway {
    /// Bind a fresh listener on `bind_ip:port` and start accepting. Returns
    /// once the socket is bound; the accept loop runs in the background.
    pub async fn bind(bind_ip: &str, port: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((bind_ip, port)).await?;
        let bind_addr = listener.local_addr()?;
        let token = random_entrance_token();
        let state = Arc::new(GatewayState {
            mux: Mutex::new(None),
            routes: Mutex::new(HashMap::new()),
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let accept_state = state.clone();
        let accept_token = token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let state = accept_state.clone();
                        let token = accept_token.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state, token).await {
                                tracing::debug!(error = %e, "gateway connection ended");
                            }
                        });
                    }
                }
            }
        });

        Ok(Self {
            token,
            bind_addr,
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub async fn has_client_attached(&self) -> bool {
        self.state.mux.lock().await.is_some()
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The first bytes of a raw TCP connection decide its fate: a WS upgrade
/// request for `/tunnel` is the owning client attaching; anything else is a
/// public connection to be relayed as a datachannel.
async fn handle_connection(mut stream: TcpStream, state: Arc<GatewayState>, entrance_token: String) -> anyhow::Result<()> {
    let mut peek = [0u8; 512];
    let n = stream.peek(&mut peek).await?;
    let head = String::from_utf8_lossy(&peek[..n]);

    if head.starts_with("GET /tunnel") {
        handle_client_attach(stream, state, entrance_token).await
    } else {
        handle_public_connection(stream, state).await
    }
}

async fn handle_client_attach(stream: TcpStream, state: Arc<GatewayState>, entrance_token: String) -> anyhow::Result<()> {
    let mut already_attached = state.mux.lock().await;
    if already_attached.is_some() {
        anyhow::bail!("gateway entrance token already consumed");
    }

    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &tokio_tungstenite::tungstenite::handshake::server::Request, resp| {
            let query = req.uri().query().unwrap_or("");
            let token = query
                .split('&')
                .find_map(|kv| kv.strip_prefix("token="))
                .unwrap_or("");
            if token != entrance_token {
                let rejection = http::Response::builder()
                    .status(401)
                    .body(Some("invalid entrance token".to_string()))
                    .expect("static rejection response always builds");
                return Err(rejection);
            }
            Ok(resp)
        },
    )
    .await?;

    let mux = TunnelMux::new(ws);
    *already_attached = Some(mux);
    drop(already_attached);

    demux_loop(state).await
}

/// Pull frames off the attached client's mux for the gateway's lifetime,
/// routing datachannel payloads to whichever public connection is waiting
/// on that `quid`.
async fn demux_loop(state: Arc<GatewayState>) -> anyhow::Result<()> {
    loop {
        let frame = {
            let mut guard = state.mux.lock().await;
            let Some(mux) = guard.as_mut() else { break };
            mux.next_frame().await
        };
        match frame {
            Ok(TunnelFrame::Datachannel { quid, payload, .. }) => {
                let routes = state.routes.lock().await;
                if let Some(sender) = routes.get(&quid) {
                    let _ = sender.send(payload).await;
                }
            }
            Ok(TunnelFrame::Rpc(_)) => {
                // RPC frames over a gateway's demux loop would be forwarded
                // to a local JSON-RPC target; out of scope for the public
                // passthrough path, which only carries datachannels.
            }
            Err(_) => break,
        }
    }
    Ok(())
}

async fn handle_public_connection(mut stream: TcpStream, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let quid = random_quid();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    state.routes.lock().await.insert(quid, tx);

    let mut buf = [0u8; PUBLIC_CHUNK];
    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                let mut guard = state.mux.lock().await;
                let Some(mux) = guard.as_mut() else { break };
                mux.send_datachannel(quid, DatachannelType::Binary, buf[..n].to_vec()).await?;
            }
            incoming = rx.recv() => {
                match incoming {
                    Some(bytes) => stream.write_all(&bytes).await?,
                    None => break,
                }
            }
        }
    }

    state.routes.lock().await.remove(&quid);
    Ok(())
}
