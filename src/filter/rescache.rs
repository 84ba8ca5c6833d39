//! Match-Result Cache
//!
//! A bounded cache in front of rule-engine matching. Keys are a seeded
//! 64-bit hash of the query facts; the full hostname is stored alongside
//! each entry so a hash collision degrades to a miss instead of serving a
//! wrong result. Negative results ("checked, nothing matched") are cached
//! too, since most queries match nothing.
//!
//! The seed is drawn once per process so cache keys cannot be predicted or
//! precomputed across runs.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::filter::rules::DnsMatch;

lazy_static! {
    static ref HASH_SEED: u64 = rand::random();
}

/// A cached match outcome. `None` records that the engine was consulted
/// and found nothing.
pub type CachedMatch = Option<Arc<DnsMatch>>;

/// The facts a cached result depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    /// Normalized hostname.
    pub host: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Whether the host came from an answer record rather than a question.
    pub is_answer: bool,
}

impl CacheKey {
    /// FNV-1a over a stable little-endian encoding, offset by the process
    /// seed.
    pub fn hash(&self) -> u64 {
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut h = (*HASH_SEED) ^ 0xcbf2_9ce4_8422_2325;
        let mut mix = |b: u8| {
            h ^= u64::from(b);
            h = h.wrapping_mul(FNV_PRIME);
        };

        for &b in self.host.as_bytes() {
            mix(b);
        }
        for &b in &self.qtype.to_le_bytes() {
            mix(b);
        }
        for &b in &self.qclass.to_le_bytes() {
            mix(b);
        }
        mix(self.is_answer as u8);
        h
    }
}

struct Entry {
    host: String,
    value: CachedMatch,
    stamp: u64,
}

struct Inner {
    entries: HashMap<u64, Entry>,
    capacity: usize,
    clock: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) {
        if let Some((&key, _)) = self.entries.iter().min_by_key(|(_, e)| e.stamp) {
            self.entries.remove(&key);
        }
    }
}

enum Mode {
    Off,
    On(Mutex<Inner>),
}

/// Bounded result cache. The off mode is a true no-op used for rule lists
/// whose results must never be cached, such as per-profile custom rules.
pub struct ResultCache(Mode);

impl ResultCache {
    /// A caching instance holding at most `capacity` entries. Zero capacity
    /// yields the no-op cache.
    pub fn new(capacity: usize) -> ResultCache {
        if capacity == 0 {
            return ResultCache(Mode::Off);
        }
        ResultCache(Mode::On(Mutex::new(Inner {
            entries: HashMap::with_capacity(capacity),
            capacity,
            clock: 0,
        })))
    }

    pub fn off() -> ResultCache {
        ResultCache(Mode::Off)
    }

    /// Looks up a key. The outer `Option` is hit or miss; the inner
    /// [`CachedMatch`] may itself be a cached negative. A hash collision
    /// with a different host reads as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<CachedMatch> {
        self.get_hashed(key.hash(), key)
    }

    fn get_hashed(&self, hash: u64, key: &CacheKey) -> Option<CachedMatch> {
        let inner = match &self.0 {
            Mode::Off => return None,
            Mode::On(m) => m,
        };

        let mut inner = inner.lock();
        let stamp = inner.touch();
        let entry = inner.entries.get_mut(&hash)?;
        if entry.host != key.host {
            return None;
        }
        entry.stamp = stamp;
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: &CacheKey, value: CachedMatch) {
        self.insert_hashed(key.hash(), key, value);
    }

    fn insert_hashed(&self, hash: u64, key: &CacheKey, value: CachedMatch) {
        let inner = match &self.0 {
            Mode::Off => return,
            Mode::On(m) => m,
        };

        let mut inner = inner.lock();
        if inner.entries.len() >= inner.capacity && !inner.entries.contains_key(&hash) {
            inner.evict_lru();
        }
        let stamp = inner.touch();
        inner.entries.insert(
            hash,
            Entry {
                host: key.host.clone(),
                value,
                stamp,
            },
        );
    }

    /// Drops every entry. Called under the same lock that swaps in a new
    /// engine, so stale results never outlive the rules that produced them.
    pub fn clear(&self) {
        if let Mode::On(m) = &self.0 {
            m.lock().entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        match &self.0 {
            Mode::Off => 0,
            Mode::On(m) => m.lock().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(host: &str) -> CacheKey {
        CacheKey {
            host: host.to_string(),
            qtype: 1,
            qclass: 1,
            is_answer: false,
        }
    }

    #[test]
    fn test_hit_and_negative_hit() {
        let cache = ResultCache::new(8);
        assert!(cache.get(&key("a.example")).is_none());

        cache.insert(&key("a.example"), None);
        // Outer Some = hit, inner None = cached "no match".
        assert_eq!(cache.get(&key("a.example")), Some(None));

        let m = Arc::new(DnsMatch::default());
        cache.insert(&key("b.example"), Some(m.clone()));
        assert_eq!(cache.get(&key("b.example")), Some(Some(m)));
    }

    #[test]
    fn test_key_facets_are_distinct() {
        let cache = ResultCache::new(8);
        cache.insert(&key("a.example"), None);

        let mut aaaa = key("a.example");
        aaaa.qtype = 28;
        assert!(cache.get(&aaaa).is_none());

        let mut answer = key("a.example");
        answer.is_answer = true;
        assert!(cache.get(&answer).is_none());
    }

    #[test]
    fn test_eviction_prefers_least_recent() {
        let cache = ResultCache::new(2);
        cache.insert(&key("old.example"), None);
        cache.insert(&key("warm.example"), None);

        // Touch the older entry so the other becomes eviction candidate.
        cache.get(&key("old.example"));
        cache.insert(&key("new.example"), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("old.example")).is_some());
        assert!(cache.get(&key("warm.example")).is_none());
    }

    #[test]
    fn test_collision_with_different_host_misses() {
        let cache = ResultCache::new(8);
        let stored = key("a.example");
        let colliding = key("b.example");

        // Force both keys onto the same slot, as a real hash collision
        // would. The stored host must not be served for the other.
        cache.insert_hashed(42, &stored, Some(Arc::new(DnsMatch::default())));
        assert!(cache.get_hashed(42, &colliding).is_none());
        assert!(cache.get_hashed(42, &stored).is_some());
    }

    #[test]
    fn test_clear() {
        let cache = ResultCache::new(4);
        cache.insert(&key("a.example"), None);
        cache.insert(&key("b.example"), None);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&key("a.example")).is_none());
    }

    #[test]
    fn test_off_cache_stores_nothing() {
        let cache = ResultCache::off();
        cache.insert(&key("a.example"), None);
        assert!(cache.get(&key("a.example")).is_none());
        assert_eq!(cache.len(), 0);
    }

    proptest! {
        #[test]
        fn test_hash_is_deterministic(host in "[a-z0-9.]{1,64}", qtype: u16, answer: bool) {
            let a = CacheKey { host: host.clone(), qtype, qclass: 1, is_answer: answer };
            let b = CacheKey { host, qtype, qclass: 1, is_answer: answer };
            prop_assert_eq!(a.hash(), b.hash());
        }

        #[test]
        fn test_roundtrip_under_load(hosts in prop::collection::vec("[a-z]{1,12}\\.example", 1..40)) {
            let cache = ResultCache::new(16);
            for h in &hosts {
                cache.insert(&key(h), None);
            }
            prop_assert!(cache.len() <= 16);
            // The most recent insert always survives.
            prop_assert!(cache.get(&key(hosts.last().unwrap())).is_some());
        }
    }
}
