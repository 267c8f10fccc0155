//! Persisted session storage.
//!
//! The only thing a session record carries is the tenant id. Where it lives
//! (memory, Redis, a database table) is up to the [`SessionStore`]
//! implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rowguard_core::{RowGuardResult, TenantId};
use smol_str::SmolStr;

/// Longest session key accepted from a client.
const MAX_KEY_LEN: usize = 128;

/// Opaque session identifier, carried in a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(SmolStr);

impl SessionKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        Self(SmolStr::new(uuid::Uuid::new_v4().simple().to_string()))
    }

    /// Accept a key supplied by a client.
    ///
    /// Returns `None` for anything that could not have been generated here.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_KEY_LEN
            && raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(SmolStr::new(raw)))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where tenant ids live between requests.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Look up the tenant stored for `key`.
    async fn get(&self, key: &SessionKey) -> RowGuardResult<Option<TenantId>>;

    /// Store `tenant` under `key`, replacing any previous value.
    async fn put(&self, key: &SessionKey, tenant: TenantId) -> RowGuardResult<()>;

    /// Remove the record for `key`, returning the tenant it held.
    async fn remove(&self, key: &SessionKey) -> RowGuardResult<Option<TenantId>>;
}

/// In-process session store.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, TenantId>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Check if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &SessionKey) -> RowGuardResult<Option<TenantId>> {
        Ok(self.sessions.read().get(key).cloned())
    }

    async fn put(&self, key: &SessionKey, tenant: TenantId) -> RowGuardResult<()> {
        self.sessions.write().insert(key.clone(), tenant);
        Ok(())
    }

    async fn remove(&self, key: &SessionKey) -> RowGuardResult<Option<TenantId>> {
        Ok(self.sessions.write().remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_parse() {
        let key = SessionKey::generate();
        assert_eq!(SessionKey::parse(key.as_str()), Some(key));
        assert!(SessionKey::parse("").is_none());
        assert!(SessionKey::parse("abc;def").is_none());
        assert!(SessionKey::parse(&"a".repeat(129)).is_none());
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(SessionKey::generate(), SessionKey::generate());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        let key = SessionKey::generate();
        assert_eq!(store.get(&key).await.unwrap(), None);

        store.put(&key, TenantId::from(7_i64)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(TenantId::from(7_i64)));
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove(&key).await.unwrap(), Some(TenantId::from(7_i64)));
        assert!(store.is_empty());
        assert_eq!(store.remove(&key).await.unwrap(), None);
    }
}
