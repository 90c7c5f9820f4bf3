//! In-memory `StorageAdapter`, used by tests and by nodes running without a
//! filesystem (e.g. embedded in an integration test harness).

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BoxedReader, BoxedWriter, StorageAdapter, StorageItem};

#[derive(Default)]
pub struct MemoryAdapter {
    items: RwLock<HashMap<String, StorageItem>>,
    // Plain std Mutex: writes are in-memory `Vec` appends, never held across
    // an await point, so there is no benefit to an async lock here.
    shards: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn open(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn put(&self, hash: &str, item: StorageItem) -> anyhow::Result<()> {
        self.items.write().await.insert(hash.to_string(), item);
        Ok(())
    }

    async fn peek(&self, hash: &str) -> anyhow::Result<Option<StorageItem>> {
        Ok(self.items.read().await.get(hash).cloned())
    }

    async fn get(&self, hash: &str) -> anyhow::Result<Option<(StorageItem, Option<BoxedReader>)>> {
        let item = match self.items.read().await.get(hash).cloned() {
            Some(item) => item,
            None => return Ok(None),
        };
        let reader = if item.shard_present {
            let bytes = self.shards.lock().unwrap().get(hash).cloned();
            bytes.map(|b| Box::pin(Cursor::new(b)) as BoxedReader)
        } else {
            None
        };
        Ok(Some((item, reader)))
    }

    async fn del(&self, hash: &str) -> anyhow::Result<()> {
        self.items.write().await.remove(hash);
        self.shards.lock().unwrap().remove(hash);
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.items.read().await.keys().cloned().collect())
    }

    async fn size(&self) -> anyhow::Result<u64> {
        let total: usize = self.shards.lock().unwrap().values().map(|v| v.len()).sum();
        Ok(total as u64)
    }

    async fn create_read_stream(&self, hash: &str) -> anyhow::Result<BoxedReader> {
        let bytes = self
            .shards
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no shard bytes for {hash}"))?;
        Ok(Box::pin(Cursor::new(bytes)))
    }

    async fn create_write_stream(&self, hash: &str) -> anyhow::Result<BoxedWriter> {
        self.shards.lock().unwrap().insert(hash.to_string(), Vec::new());
        Ok(Box::pin(MemoryShardWriter {
            hash: hash.to_string(),
            shards: self.shards.clone(),
        }))
    }

    async fn finalize_write(&self, hash: &str) -> anyhow::Result<()> {
        let mut items = self.items.write().await;
        let item = items.entry(hash.to_string()).or_default();
        item.shard_present = true;
        Ok(())
    }

    async fn abort_write(&self, hash: &str) -> anyhow::Result<()> {
        self.shards.lock().unwrap().remove(hash);
        Ok(())
    }
}

struct MemoryShardWriter {
    hash: String,
    shards: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl tokio::io::AsyncWrite for MemoryShardWriter {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        self.shards
            .lock()
            .unwrap()
            .entry(self.hash.clone())
            .or_default()
            .extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn write_then_finalize_makes_shard_readable() {
        let adapter = MemoryAdapter::new();
        adapter.put("abc", StorageItem::new()).await.unwrap();

        let mut writer = adapter.create_write_stream("abc").await.unwrap();
        writer.write_all(b"shard bytes").await.unwrap();
        adapter.finalize_write("abc").await.unwrap();

        let (item, reader) = adapter.get("abc").await.unwrap().unwrap();
        assert!(item.shard_present);
        assert!(reader.is_some());
    }

    #[tokio::test]
    async fn abort_write_discards_partial_bytes() {
        let adapter = MemoryAdapter::new();
        adapter.put("abc", StorageItem::new()).await.unwrap();
        let mut writer = adapter.create_write_stream("abc").await.unwrap();
        writer.write_all(b"partial").await.unwrap();
        adapter.abort_write("abc").await.unwrap();
        assert!(adapter.create_read_stream("abc").await.is_err());
    }
}
