use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

use super::provider::AccessToken;
use crate::tprintln;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    upn: String,
    tenant: String,
    scopes: String,
}

impl CacheKey {
    fn new(upn: &str, scopes: &[String], tenant: Option<&str>) -> Self {
        let mut s: Vec<String> = scopes.iter().map(|x| x.trim().to_ascii_lowercase()).collect();
        s.sort();
        s.dedup();
        Self { upn: upn.to_ascii_lowercase(), tenant: tenant.unwrap_or("").to_ascii_lowercase(), scopes: s.join(" ") }
    }
}

/// In-memory per-user access token cache.
///
/// Entries are served until `skew` before their expiry. Stale entries are dropped on read,
/// and every insert sweeps the ones that went stale without being read again.
pub struct TokenCache {
    entries: RwLock<HashMap<CacheKey, AccessToken>>,
    skew: Duration,
}

impl Default for TokenCache {
    fn default() -> Self { Self::new(Duration::from_secs(5 * 60)) }
}

impl TokenCache {
    pub fn new(skew: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), skew }
    }

    pub fn get(&self, upn: &str, scopes: &[String], tenant: Option<&str>) -> Option<AccessToken> {
        let key = CacheKey::new(upn, scopes, tenant);
        let mut stale = false;
        let out = {
            let map = self.entries.read();
            match map.get(&key) {
                Some(tok) if tok.is_valid_for(self.skew) => Some(tok.clone()),
                Some(_) => { stale = true; None }
                None => None,
            }
        };
        if stale {
            self.entries.write().remove(&key);
        }
        out
    }

    pub fn insert(&self, upn: &str, scopes: &[String], tenant: Option<&str>, token: AccessToken) {
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, t| t.is_valid_for(self.skew));
        if map.len() != before {
            tprintln!("token_cache.sweep count={}", before - map.len());
        }
        map.insert(CacheKey::new(upn, scopes, tenant), token);
    }

    /// Drop every cached token of one user, e.g. after the provider reported revoked consent.
    pub fn evict_user(&self, upn: &str) -> usize {
        let upn = upn.to_ascii_lowercase();
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|k, _| k.upn != upn);
        let removed = before - map.len();
        tprintln!("token_cache.evict user={} count={}", upn, removed);
        removed
    }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }
}
