//! Filesystem-backed `StorageAdapter`: shard bytes under `<base>/shards/`,
//! JSON metadata under `<base>/meta/`, both keyed by the shard's hex hash.
//!
//! Writes land in a `.part` staging file and are renamed into place only on
//! `finalize_write`, so a crash mid-upload never leaves a partial shard
//! visible to `get`/`create_read_stream`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::{BoxedReader, BoxedWriter, StorageAdapter, StorageItem};

pub struct FsAdapter {
    base: PathBuf,
}

impl FsAdapter {
    pub fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        std::fs::create_dir_all(base.join("shards"))?;
        std::fs::create_dir_all(base.join("meta"))?;
        Ok(Self { base })
    }

    fn meta_path(&self, hash: &str) -> PathBuf {
        self.base.join("meta").join(format!("{hash}.json"))
    }

    fn shard_path(&self, hash: &str) -> PathBuf {
        self.base.join("shards").join(hash)
    }

    fn part_path(&self, hash: &str) -> PathBuf {
        self.base.join("shards").join(format!("{hash}.part"))
    }
}

#[async_trait]
impl StorageAdapter for FsAdapter {
    async fn open(&self) -> anyhow::Result<()> {
        fs::create_dir_all(self.base.join("shards")).await?;
        fs::create_dir_all(self.base.join("meta")).await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn put(&self, hash: &str, item: StorageItem) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(&item)?;
        fs::write(self.meta_path(hash), bytes).await?;
        Ok(())
    }

    async fn peek(&self, hash: &str) -> anyhow::Result<Option<StorageItem>> {
        match fs::read(self.meta_path(hash)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, hash: &str) -> anyhow::Result<Option<(StorageItem, Option<BoxedReader>)>> {
        let item = match self.peek(hash).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        let reader = if item.shard_present {
            match fs::File::open(self.shard_path(hash)).await {
                Ok(f) => Some(Box::pin(f) as BoxedReader),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };
        Ok(Some((item, reader)))
    }

    async fn del(&self, hash: &str) -> anyhow::Result<()> {
        let _ = fs::remove_file(self.meta_path(hash)).await;
        let _ = fs::remove_file(self.shard_path(hash)).await;
        let _ = fs::remove_file(self.part_path(hash)).await;
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(self.base.join("meta")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(hash) = name.strip_suffix(".json") {
                    out.push(hash.to_string());
                }
            }
        }
        Ok(out)
    }

    async fn size(&self) -> anyhow::Result<u64> {
        let mut total = 0u64;
        let mut entries = fs::read_dir(self.base.join("shards")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(".part") {
                continue;
            }
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }

    async fn create_read_stream(&self, hash: &str) -> anyhow::Result<BoxedReader> {
        let f = fs::File::open(self.shard_path(hash)).await?;
        Ok(Box::pin(f))
    }

    async fn create_write_stream(&self, hash: &str) -> anyhow::Result<BoxedWriter> {
        let f = fs::File::create(self.part_path(hash)).await?;
        Ok(Box::pin(BufWriter::new(f)))
    }

    async fn finalize_write(&self, hash: &str) -> anyhow::Result<()> {
        fs::rename(self.part_path(hash), self.shard_path(hash)).await?;
        let mut item = self.peek(hash).await?.unwrap_or_default();
        item.shard_present = true;
        self.put(hash, item).await
    }

    async fn abort_write(&self, hash: &str) -> anyhow::Result<()> {
        let _ = fs::remove_file(self.part_path(hash)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn write_finalize_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path()).unwrap();
        adapter.put("hash1", StorageItem::new()).await.unwrap();

        let mut writer = adapter.create_write_stream("hash1").await.unwrap();
        writer.write_all(b"the shard bytes").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);
        adapter.finalize_write("hash1").await.unwrap();

        let (item, reader) = adapter.get("hash1").await.unwrap().unwrap();
        assert!(item.shard_present);
        let mut reader = reader.unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"the shard bytes");
    }

    #[tokio::test]
    async fn abort_leaves_no_final_shard() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path()).unwrap();
        adapter.put("hash2", StorageItem::new()).await.unwrap();

        let mut writer = adapter.create_write_stream("hash2").await.unwrap();
        writer.write_all(b"partial").await.unwrap();
        drop(writer);
        adapter.abort_write("hash2").await.unwrap();

        let item = adapter.peek("hash2").await.unwrap().unwrap();
        assert!(!item.shard_present);
    }

    #[tokio::test]
    async fn keys_lists_only_known_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path()).unwrap();
        adapter.put("a", StorageItem::new()).await.unwrap();
        adapter.put("b", StorageItem::new()).await.unwrap();
        let mut keys = adapter.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
