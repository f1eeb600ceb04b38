//! Location-keyed Asset cache
//!
//! Stores every Asset the process has created so each location is only
//! loaded once, no matter how many Loads reference it. `set` is
//! first-write-wins; callers that need to refresh an entry must `remove`
//! first. Iteration follows insertion order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::asset::Asset;

/// Process-wide Asset store shared by every Load in an Environment.
#[derive(Clone, Default)]
pub struct Cache {
    inner: Arc<Mutex<CacheState>>,
}

#[derive(Default)]
struct CacheState {
    map: HashMap<String, Asset>,
    list: Vec<Asset>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached asset by location.
    pub fn get(&self, location: &str) -> Option<Asset> {
        self.inner.lock().unwrap().map.get(location).cloned()
    }

    /// Set a location's asset unless one is already cached (first-write-wins).
    pub fn set(&self, location: &str, asset: Asset) {
        let mut state = self.inner.lock().unwrap();
        if !state.map.contains_key(location) {
            state.map.insert(location.to_string(), asset.clone());
            state.list.push(asset);
        }
    }

    /// Remove a location from the cache, compacting the insertion-order
    /// list so heavy watch churn cannot grow it without bound.
    pub fn remove(&self, location: &str) {
        let mut state = self.inner.lock().unwrap();
        if state.map.remove(location).is_some() {
            state.list.retain(|asset| asset.location() != location);
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap();
        state.map.clear();
        state.list.clear();
    }

    /// Call a function for each cached asset in insertion order.
    pub fn each(&self, mut callback: impl FnMut(&Asset)) {
        let assets = self.inner.lock().unwrap().list.clone();
        for asset in &assets {
            callback(asset);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;

    fn raw_asset(env: &Environment, location: &str) -> Asset {
        Asset::raw(env, location)
    }

    #[test]
    fn set_then_get_round_trips() {
        let env = Environment::new("/tmp");
        let cache = Cache::new();
        let asset = raw_asset(&env, "/tmp/a.js");

        cache.set("/tmp/a.js", asset.clone());
        let got = cache.get("/tmp/a.js").unwrap();
        assert_eq!(got.location(), "/tmp/a.js");
    }

    #[test]
    fn set_is_first_write_wins() {
        let env = Environment::new("/tmp");
        let cache = Cache::new();
        let first = raw_asset(&env, "/tmp/a.js");
        first.set_content("first");
        let second = raw_asset(&env, "/tmp/a.js");
        second.set_content("second");

        cache.set("/tmp/a.js", first);
        cache.set("/tmp/a.js", second);

        let got = cache.get("/tmp/a.js").unwrap();
        assert_eq!(got.get_content(), "first");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_compacts_the_order_list() {
        let env = Environment::new("/tmp");
        let cache = Cache::new();
        cache.set("/tmp/a.js", raw_asset(&env, "/tmp/a.js"));
        cache.set("/tmp/b.js", raw_asset(&env, "/tmp/b.js"));

        cache.remove("/tmp/a.js");
        assert!(cache.get("/tmp/a.js").is_none());
        assert_eq!(cache.len(), 1);

        let mut seen = Vec::new();
        cache.each(|asset| seen.push(asset.location().to_string()));
        assert_eq!(seen, vec!["/tmp/b.js"]);
    }

    #[test]
    fn each_iterates_in_insertion_order() {
        let env = Environment::new("/tmp");
        let cache = Cache::new();
        for name in ["c.js", "a.js", "b.js"] {
            let location = format!("/tmp/{name}");
            cache.set(&location, raw_asset(&env, &location));
        }

        let mut seen = Vec::new();
        cache.each(|asset| seen.push(asset.location().to_string()));
        assert_eq!(seen, vec!["/tmp/c.js", "/tmp/a.js", "/tmp/b.js"]);
    }

    #[test]
    fn clear_empties_the_cache() {
        let env = Environment::new("/tmp");
        let cache = Cache::new();
        cache.set("/tmp/a.js", raw_asset(&env, "/tmp/a.js"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("/tmp/a.js").is_none());
    }
}
