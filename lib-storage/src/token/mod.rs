//! Token authorization table (spec §4.E): short-lived tokens that gate
//! upload/download access to one shard hash for one remote contact.
//!
//! A token is minted by `accept` when a contract offer is confirmed, and
//! consumed/validated by `authorize` when the shard server sees it on an
//! incoming request. Tokens expire after `TOKEN_EXPIRE` and are swept by a
//! periodic reaper so the table never grows unbounded.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;

/// Spec §6.5: tokens are valid for 30 minutes from the moment they're accepted.
pub const TOKEN_EXPIRE: Duration = Duration::from_secs(30 * 60);

/// Which direction a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOperation {
    Upload,
    Download,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    hash: String,
    contact: String,
    operation: TokenOperation,
    expires_at: SystemTime,
}

impl TokenEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// In-memory token table. Not persisted: a restart invalidates every
/// outstanding token, which is acceptable since they are short-lived and
/// re-issued on demand via a fresh OFFER/CONSIGN or RETRIEVE round trip.
#[derive(Default)]
pub struct TokenTable {
    entries: RwLock<HashMap<String, TokenEntry>>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and register a fresh token authorizing `operation` on `hash` for
    /// `contact` (the counterparty's node id or address), expiring `TOKEN_EXPIRE`
    /// from now.
    pub async fn accept(&self, hash: &str, contact: &str, operation: TokenOperation) -> String {
        let token = lib_crypto::random::random_token_hex(20);
        let entry = TokenEntry {
            hash: hash.to_string(),
            contact: contact.to_string(),
            operation,
            expires_at: SystemTime::now() + TOKEN_EXPIRE,
        };
        self.entries.write().await.insert(token.clone(), entry);
        token
    }

    /// Revoke a token before it expires (counterparty rejected the offer,
    /// or the transfer it was minted for already completed).
    pub async fn reject(&self, token: &str) {
        self.entries.write().await.remove(token);
    }

    /// Validate `token` grants `operation` on `hash`, without consuming it:
    /// the shard server calls this once per request and a retried/resumed
    /// transfer may need the same token more than once within its lifetime.
    pub async fn authorize(&self, token: &str, hash: &str, operation: TokenOperation) -> bool {
        let entries = self.entries.read().await;
        match entries.get(token) {
            Some(entry) => {
                !entry.is_expired(SystemTime::now()) && entry.hash == hash && entry.operation == operation
            }
            None => false,
        }
    }

    pub async fn contact_for(&self, token: &str) -> Option<String> {
        self.entries.read().await.get(token).map(|e| e.contact.clone())
    }

    /// Remove every expired entry. Intended to run on a fixed interval via
    /// `spawn_reaper`.
    pub async fn reap(&self) -> usize {
        let now = SystemTime::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Spawn a background task that calls `reap` every `interval`, for as long
/// as `table` has other live references. Returns the task's `JoinHandle` so
/// callers can abort it on shutdown.
pub fn spawn_reaper(table: std::sync::Arc<TokenTable>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let reaped = table.reap().await;
            if reaped > 0 {
                tracing::debug!(reaped, "swept expired shard tokens");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepted_token_authorizes_matching_hash_and_operation() {
        let table = TokenTable::new();
        let token = table.accept("deadbeef", "contact-1", TokenOperation::Upload).await;
        assert!(table.authorize(&token, "deadbeef", TokenOperation::Upload).await);
        assert!(!table.authorize(&token, "deadbeef", TokenOperation::Download).await);
        assert!(!table.authorize(&token, "other-hash", TokenOperation::Upload).await);
    }

    #[tokio::test]
    async fn rejected_token_no_longer_authorizes() {
        let table = TokenTable::new();
        let token = table.accept("hash", "contact", TokenOperation::Download).await;
        table.reject(&token).await;
        assert!(!table.authorize(&token, "hash", TokenOperation::Download).await);
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let table = TokenTable::new();
        assert!(!table.authorize("not-a-real-token", "hash", TokenOperation::Upload).await);
    }

    #[tokio::test]
    async fn reap_removes_only_expired_entries() {
        let table = TokenTable::new();
        let fresh = table.accept("hash", "contact", TokenOperation::Upload).await;
        {
            let mut entries = table.entries.write().await;
            let expired_entry = TokenEntry {
                hash: "hash2".to_string(),
                contact: "contact2".to_string(),
                operation: TokenOperation::Download,
                expires_at: SystemTime::now() - Duration::from_secs(1),
            };
            entries.insert("expired-token".to_string(), expired_entry);
        }
        let reaped = table.reap().await;
        assert_eq!(reaped, 1);
        assert!(table.authorize(&fresh, "hash", TokenOperation::Upload).await);
        assert!(!table.authorize("expired-token", "hash2", TokenOperation::Download).await);
    }
}
