//! Multiplex/demultiplex [`TunnelFrame`]s over one outer WebSocket
//! connection (spec §4.J). One `TunnelMux` wraps one WS stream; RPC frames
//! and datachannel frames share it, distinguished only by their opcode.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::frame::{DatachannelType, FrameError, Quid, TunnelFrame};

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("tunnel websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed tunnel frame: {0}")]
    Frame(#[from] FrameError),
    #[error("tunnel closed")]
    Closed,
}

/// One end of a muxed tunnel connection.
pub struct TunnelMux<S> {
    ws: WebSocketStream<S>,
}

impl<S> TunnelMux<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }

    pub async fn send_rpc(&mut self, body: Vec<u8>) -> Result<(), MuxError> {
        self.send_frame(TunnelFrame::Rpc(body)).await
    }

    pub async fn send_datachannel(&mut self, quid: Quid, kind: DatachannelType, payload: Vec<u8>) -> Result<(), MuxError> {
        self.send_frame(TunnelFrame::Datachannel { quid, kind, payload }).await
    }

    async fn send_frame(&mut self, frame: TunnelFrame) -> Result<(), MuxError> {
        self.ws.send(Message::Binary(frame.encode())).await?;
        Ok(())
    }

    /// Read and decode the next frame. Non-binary WebSocket control frames
    /// (ping/pong/close) are absorbed transparently; a `Close` from the
    /// peer surfaces as `MuxError::Closed`.
    pub async fn next_frame(&mut self) -> Result<TunnelFrame, MuxError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(bytes))) => return Ok(TunnelFrame::decode(&bytes)?),
                Some(Ok(Message::Close(_))) | None => return Err(MuxError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(MuxError::WebSocket(e)),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), MuxError> {
        self.ws.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::MaybeTlsStream;

    async fn connected_pair() -> (TunnelMux<MaybeTlsStream<TcpStream>>, TunnelMux<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        });
        let (client_ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let server_ws = accept.await.unwrap();

        (TunnelMux::new(client_ws), TunnelMux::new(server_ws))
    }

    #[tokio::test]
    async fn rpc_frame_round_trips_over_real_websocket() {
        let (mut client, mut server) = connected_pair().await;
        client.send_rpc(b"hello-rpc".to_vec()).await.unwrap();
        let frame = server.next_frame().await.unwrap();
        assert_eq!(frame, TunnelFrame::Rpc(b"hello-rpc".to_vec()));
    }

    #[tokio::test]
    async fn datachannel_frame_round_trips_over_real_websocket() {
        let (mut client, mut server) = connected_pair().await;
        let quid = super::super::frame::random_quid();
        client.send_datachannel(quid, DatachannelType::Binary, vec![9, 8, 7]).await.unwrap();
        let frame = server.next_frame().await.unwrap();
        assert_eq!(
            frame,
            TunnelFrame::Datachannel {
                quid,
                kind: DatachannelType::Binary,
                payload: vec![9, 8, 7],
            }
        );
    }
}
