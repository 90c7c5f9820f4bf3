//! Shard transfer server (spec §4.F): a raw-TCP HTTP-like endpoint exposing
//! `POST /shards/{hash}?token=...` (upload) and `GET /shards/{hash}?token=...`
//! (download), with streaming integrity verification and CORS on every
//! response. Grounded on the request/response parsing idiom used by the
//! unrelated ZHTP content server this workspace also carries, adapted here
//! for true streaming bodies instead of buffer-everything-then-parse.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use lib_crypto::StreamingHash160;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::adapter::StorageAdapter;
use crate::token::{TokenOperation, TokenTable};

const MAX_HEADER_BYTES: usize = 16 * 1024;
const READ_CHUNK: usize = 64 * 1024;

pub struct ShardServerConfig {
    pub bind_addr: SocketAddr,
}

/// Binds a TCP listener and serves shard upload/download requests until the
/// returned future is dropped or `shutdown` fires.
pub struct ShardServer {
    adapter: Arc<dyn StorageAdapter>,
    tokens: Arc<TokenTable>,
}

impl ShardServer {
    pub fn new(adapter: Arc<dyn StorageAdapter>, tokens: Arc<TokenTable>) -> Self {
        Self { adapter, tokens }
    }

    pub async fn run(&self, config: ShardServerConfig) -> Result<()> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        tracing::info!(addr = %config.bind_addr, "shard server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let adapter = self.adapter.clone();
            let tokens = self.tokens.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, adapter, tokens).await {
                    tracing::warn!(%peer, error = %e, "shard connection error");
                }
            });
        }
    }
}

struct RequestLine {
    method: String,
    path: String,
    query: std::collections::HashMap<String, String>,
}

fn parse_request_line(line: &str) -> Result<RequestLine> {
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?.to_string();
    let target = parts.next().ok_or_else(|| anyhow!("missing target"))?.to_string();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), parse_query(q)),
        None => (target, std::collections::HashMap::new()),
    };
    Ok(RequestLine { method, path, query })
}

fn parse_query(q: &str) -> std::collections::HashMap<String, String> {
    q.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_headers(lines: &[String]) -> std::collections::HashMap<String, String> {
    lines
        .iter()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect()
}

async fn read_header_block(stream: &mut TcpStream) -> Result<(RequestLine, std::collections::HashMap<String, String>)> {
    let mut buf = Vec::with_capacity(1024);
    let mut byte = [0u8; 1];
    loop {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers completed"));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.lines().map(|l| l.to_string());
    let request_line = parse_request_line(&lines.next().ok_or_else(|| anyhow!("empty request"))?)?;
    let header_lines: Vec<String> = lines.collect();
    Ok((request_line, parse_headers(&header_lines)))
}

fn shard_hash_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/shards/").filter(|h| !h.is_empty() && !h.contains('/'))
}

async fn write_status(stream: &mut TcpStream, code: u16, reason: &str, body: &[u8], content_type: &str) -> Result<()> {
    let head = format!(
        "HTTP/1.1 {code} {reason}\r\n\
         Content-Length: {}\r\n\
         Content-Type: {content_type}\r\n\
         Connection: close\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type, Authorization\r\n\
         Access-Control-Max-Age: 86400\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, adapter: Arc<dyn StorageAdapter>, tokens: Arc<TokenTable>) -> Result<()> {
    let (request, headers) = read_header_block(&mut stream).await?;

    if request.method.eq_ignore_ascii_case("OPTIONS") {
        return write_status(&mut stream, 200, "OK", b"", "text/plain").await;
    }

    let hash = match shard_hash_from_path(&request.path) {
        Some(h) => h.to_string(),
        None => return write_status(&mut stream, 404, "Not Found", b"unknown route", "text/plain").await,
    };
    let token = match request.query.get("token") {
        Some(t) => t.clone(),
        None => return write_status(&mut stream, 401, "Unauthorized", b"missing token", "text/plain").await,
    };

    match request.method.to_ascii_uppercase().as_str() {
        "GET" => handle_download(&mut stream, &adapter, &tokens, &hash, &token).await,
        "POST" => {
            let content_length: usize = headers
                .get("content-length")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow!("missing Content-Length"))?;
            handle_upload(&mut stream, &adapter, &tokens, &hash, &token, content_length).await
        }
        _ => write_status(&mut stream, 405, "Method Not Allowed", b"unsupported method", "text/plain").await,
    }
}

async fn handle_download(
    stream: &mut TcpStream,
    adapter: &Arc<dyn StorageAdapter>,
    tokens: &Arc<TokenTable>,
    hash: &str,
    token: &str,
) -> Result<()> {
    if !tokens.authorize(token, hash, TokenOperation::Download).await {
        return write_status(stream, 401, "Unauthorized", b"invalid or expired token", "text/plain").await;
    }
    let Some((item, reader)) = adapter.get(hash).await? else {
        return write_status(stream, 404, "Not Found", b"no contract open for this hash", "text/plain").await;
    };
    let Some(mut reader) = reader else {
        return write_status(stream, 404, "Not Found", b"shard has no bytes yet", "text/plain").await;
    };
    let _ = item;

    // We don't know the size up front without a second adapter call in the
    // general case; read into a bounded staging buffer only to measure, then
    // stream the rest directly. For the filesystem adapter this is a single
    // stat-equivalent via reading; kept simple since shard sizes here are
    // assumed to fit a single response body (no chunked transfer encoding).
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await?;

    write_status(stream, 200, "OK", &body, "application/octet-stream").await
}

async fn handle_upload(
    stream: &mut TcpStream,
    adapter: &Arc<dyn StorageAdapter>,
    tokens: &Arc<TokenTable>,
    hash: &str,
    token: &str,
    content_length: usize,
) -> Result<()> {
    if !tokens.authorize(token, hash, TokenOperation::Upload).await {
        return write_status(stream, 401, "Unauthorized", b"invalid or expired token", "text/plain").await;
    }
    let Some(item) = adapter.peek(hash).await? else {
        return write_status(stream, 404, "Not Found", b"no contract open for this hash", "text/plain").await;
    };
    if let Some(data_size) = item.contracts.values().find_map(|c| c.data_size) {
        if content_length as u64 > data_size {
            return write_status(stream, 400, "Bad Request", b"size exceeded", "text/plain").await;
        }
    }

    let mut writer = adapter.create_write_stream(hash).await?;
    let mut hasher = StreamingHash160::new();
    let mut remaining = content_length;
    let mut buf = vec![0u8; READ_CHUNK.min(content_length.max(1))];

    while remaining > 0 {
        let take = remaining.min(buf.len());
        let n = stream.read(&mut buf[..take]).await?;
        if n == 0 {
            adapter.abort_write(hash).await?;
            return write_status(
                stream,
                400,
                "Bad Request",
                b"connection closed before body completed",
                "text/plain",
            )
            .await;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        remaining -= n;
    }
    writer.flush().await?;
    drop(writer);

    let computed = hasher.finalize();
    if hex::encode(computed) != hash {
        adapter.abort_write(hash).await?;
        return write_status(stream, 400, "Bad Request", b"shard hash mismatch", "text/plain").await;
    }

    adapter.finalize_write(hash).await?;
    tokens.reject(token).await;
    write_status(stream, 200, "OK", b"ok", "text/plain").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_hash_from_path_rejects_nested_segments() {
        assert_eq!(shard_hash_from_path("/shards/abc123"), Some("abc123"));
        assert_eq!(shard_hash_from_path("/shards/"), None);
        assert_eq!(shard_hash_from_path("/shards/abc/def"), None);
        assert_eq!(shard_hash_from_path("/other"), None);
    }

    #[test]
    fn parse_request_line_splits_query_string() {
        let parsed = parse_request_line("GET /shards/deadbeef?token=abc HTTP/1.1").unwrap();
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/shards/deadbeef");
        assert_eq!(parsed.query.get("token"), Some(&"abc".to_string()));
    }

    #[tokio::test]
    async fn upload_then_download_round_trip_over_real_socket() {
        use crate::adapter::{MemoryAdapter, StorageItem};

        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
        let tokens = Arc::new(TokenTable::new());
        let server = ShardServer::new(adapter.clone(), tokens.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_adapter = adapter.clone();
        let server_tokens = tokens.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let a = server_adapter.clone();
                let t = server_tokens.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, a, t).await;
                });
            }
        });
        let _ = &server;

        let body = b"hello shard world";
        let hash = hex::encode(lib_crypto::hash160(body));
        adapter.put(&hash, StorageItem::new()).await.unwrap();
        let upload_token = tokens.accept(&hash, "farmer-1", TokenOperation::Upload).await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "POST /shards/{hash}?token={upload_token} HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        conn.write_all(request.as_bytes()).await.unwrap();
        conn.write_all(body).await.unwrap();
        let mut resp = Vec::new();
        conn.read_to_end(&mut resp).await.unwrap();
        assert!(String::from_utf8_lossy(&resp).starts_with("HTTP/1.1 200"));

        let download_token = tokens.accept(&hash, "farmer-1", TokenOperation::Download).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET /shards/{hash}?token={download_token} HTTP/1.1\r\n\r\n");
        conn.write_all(request.as_bytes()).await.unwrap();
        let mut resp = Vec::new();
        conn.read_to_end(&mut resp).await.unwrap();
        let resp_text = String::from_utf8_lossy(&resp);
        assert!(resp_text.starts_with("HTTP/1.1 200"));
        assert!(resp_text.ends_with("hello shard world"));
    }
}
