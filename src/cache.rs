use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// Concurrent string-keyed cache holding arbitrary JSON values.
///
/// Three tiers of these back every call context: one owned by the request
/// (dropped with it), one shared by all requests of a handler, and one shared
/// across the whole server. The shared tiers are reference-counted; the
/// context never owns them.
#[derive(Debug, Default)]
pub struct Cache {
    entries: RwLock<HashMap<String, Value>>,
}

/// Handler- or server-scoped cache tier.
pub type SharedCache = Arc<Cache>;

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(Cache::new())
    }

    /// Returns a clone of the value under `key`, if present.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().unwrap().get(key).cloned()
    }

    /// Stores `value` under `key`, returning the previous value if any.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.write().unwrap().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().unwrap().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_get_remove() {
        let cache = Cache::new();
        assert!(cache.is_empty());
        cache.insert("session", json!({"user": "amelia"}));
        assert_eq!(cache.get("session"), Some(json!({"user": "amelia"})));
        assert_eq!(cache.remove("session"), Some(json!({"user": "amelia"})));
        assert!(cache.get("session").is_none());
    }

    #[test]
    fn test_shared_tier_visible_across_clones() {
        let shared = Cache::shared();
        let other = Arc::clone(&shared);
        shared.insert("hits", json!(1));
        assert_eq!(other.get("hits"), Some(json!(1)));
    }
}
