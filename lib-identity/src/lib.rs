//! Boot-time identity lifecycle: produce a peer's [`lib_crypto::Identity`]
//! fresh or load it from a persisted keyfile, and keep it immutable for the
//! life of the process.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lib_crypto::Identity;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};

pub use lib_crypto::{NodeId, SignatureMode};

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    /// Hex-encoded 32-byte secp256k1 private scalar.
    private_key: String,
    /// Hex-encoded 64-byte HD seed, if the identity was provisioned with one.
    hd_seed: Option<String>,
}

/// Loads or creates the process identity at a fixed path on disk.
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the identity at `path`, or generate and persist a new one if
    /// no keyfile exists yet.
    pub fn load_or_generate(&self) -> Result<Identity> {
        if self.path.exists() {
            self.load()
        } else {
            self.generate_and_persist()
        }
    }

    fn load(&self) -> Result<Identity> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading identity keyfile at {}", self.path.display()))?;
        let keyfile: KeyFile = serde_json::from_str(&contents)
            .with_context(|| "identity keyfile is not valid JSON")?;
        let key_bytes = hex::decode(&keyfile.private_key)?;
        let secret_key = SecretKey::from_slice(&key_bytes)?;

        match keyfile.hd_seed {
            Some(seed_hex) => {
                let seed = hex::decode(seed_hex)?;
                Identity::with_hd_seed(Some(secret_key), &seed)
            }
            None => Identity::new(Some(secret_key)),
        }
    }

    /// Generate a brand-new identity and write its keyfile before returning it.
    /// Exposed separately from `load_or_generate` for CLI key-init tooling.
    pub fn generate_and_persist(&self) -> Result<Identity> {
        let secret_key = SecretKey::new(&mut rand::rngs::OsRng);
        let mut seed = [0u8; 64];
        lib_crypto::random::fill_random(&mut seed);
        let identity = Identity::with_hd_seed(Some(secret_key), &seed)?;

        let keyfile = KeyFile {
            private_key: hex::encode(secret_key.secret_bytes()),
            hd_seed: Some(hex::encode(seed)),
        };
        let serialized = serde_json::to_string_pretty(&keyfile)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_private_file(&self.path, serialized.as_bytes())?;
        Ok(identity)
    }
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    use std::io::Write;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_persist_then_reload_yields_same_node_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let store = IdentityStore::new(&path);

        let identity = store.generate_and_persist().unwrap();
        let node_id = identity.node_id();

        let reloaded = store.load_or_generate().unwrap();
        assert_eq!(reloaded.node_id(), node_id);
    }

    #[test]
    fn load_or_generate_creates_keyfile_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");
        let store = IdentityStore::new(&path);
        assert!(!path.exists());
        store.load_or_generate().unwrap();
        assert!(path.exists());
    }
}
