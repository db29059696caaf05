//! Authenticated session sharing.
//!
//! Tasks belonging to the same identity (institution + account) reuse one
//! authenticated session within a run. The cache maps an identity fingerprint
//! to a shared session handle and is owned by the orchestrator, never global
//! state, so independent runs and tests get independent caches.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;

/// Deterministic hash of (institution name, account name).
///
/// Equal inputs always produce equal fingerprints; this is the sole cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityFingerprint(String);

impl IdentityFingerprint {
    pub fn new(school_name: &str, username: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(school_name.as_bytes());
        hasher.update(username.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque authenticated transport state bound to a portal host.
///
/// The inner client carries the cookie jar established during login. Handles
/// are shared via `Arc` and only ever read or replaced as a whole.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    client: reqwest::Client,
    host: Url,
}

impl SessionHandle {
    pub fn new(client: reqwest::Client, host: Url) -> Self {
        Self { client, host }
    }

    /// HTTP client with the authenticated cookie jar.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Resolved base URL of the portal host.
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Join a path relative to the portal host.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.host.join(path)
    }
}

/// Process-wide (per-run) mapping from identity fingerprint to session handle.
#[derive(Debug, Default)]
pub struct SessionCache {
    inner: HashMap<IdentityFingerprint, Arc<SessionHandle>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn get(&self, fingerprint: &IdentityFingerprint) -> Option<Arc<SessionHandle>> {
        self.inner.get(fingerprint).cloned()
    }

    pub fn put(&mut self, fingerprint: IdentityFingerprint, handle: Arc<SessionHandle>) {
        self.inner.insert(fingerprint, handle);
    }

    pub fn evict(&mut self, fingerprint: &IdentityFingerprint) {
        if self.inner.remove(fingerprint).is_some() {
            log::debug!("evicted session for fingerprint {}", fingerprint.as_str());
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> Arc<SessionHandle> {
        Arc::new(SessionHandle::new(
            reqwest::Client::new(),
            Url::parse("https://portal.example.edu/").unwrap(),
        ))
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = IdentityFingerprint::new("Example University", "20260001");
        let b = IdentityFingerprint::new("Example University", "20260001");
        let c = IdentityFingerprint::new("Example University", "20260002");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn get_returns_the_same_handle() {
        let fp = IdentityFingerprint::new("Example University", "20260001");
        let mut cache = SessionCache::new();
        let stored = handle();
        cache.put(fp.clone(), stored.clone());

        let fetched = cache.get(&fp).expect("hit");
        // The exact same allocation, not a copy.
        assert!(Arc::ptr_eq(&stored, &fetched));
    }

    #[test]
    fn evict_and_clear() {
        let fp = IdentityFingerprint::new("Example University", "20260001");
        let other = IdentityFingerprint::new("Example University", "20260002");
        let mut cache = SessionCache::new();
        cache.put(fp.clone(), handle());
        cache.put(other.clone(), handle());

        cache.evict(&fp);
        assert!(cache.get(&fp).is_none());
        assert!(cache.get(&other).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
