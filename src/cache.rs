//! TTL cache for refresh results.
//!
//! Time is read from an injected [`Clock`], so expiry can be driven
//! deterministically in tests. Expired entries are kept: they are what the
//! refresh service falls back to when the snapshot source is down.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Key/value cache whose entries go stale after a fixed TTL.
#[derive(Debug)]
pub struct RefreshCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash, V> RefreshCache<K, V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The value for `key` if it has not expired yet.
    pub fn get_fresh(&self, key: &K) -> Option<&V> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| &entry.value)
    }

    /// The value for `key`, expired or not.
    pub fn get_any(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Any value whose key satisfies `matches`, expired or not.
    pub fn find_any<P>(&self, mut matches: P) -> Option<&V>
    where
        P: FnMut(&K) -> bool,
    {
        self.entries
            .iter()
            .find(|(key, _)| matches(key))
            .map(|(_, entry)| &entry.value)
    }

    /// Store `value`, replacing any previous entry and restarting its TTL.
    pub fn insert(&mut self, key: K, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries.insert(key, Entry { value, expires_at });
    }

    /// Drop every entry whose key does not satisfy `keep`.
    pub fn retain<P>(&mut self, mut keep: P)
    where
        P: FnMut(&K) -> bool,
    {
        self.entries.retain(|key, _| keep(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cache() -> (Arc<ManualClock>, RefreshCache<&'static str, u32>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 9, 19, 8, 0, 0).unwrap(),
        ));
        let cache = RefreshCache::new(Duration::seconds(300), clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_fresh_until_ttl() {
        let (clock, mut cache) = cache();
        cache.insert("k", 1);

        assert_eq!(cache.get_fresh(&"k"), Some(&1));
        clock.advance(Duration::seconds(299));
        assert_eq!(cache.get_fresh(&"k"), Some(&1));
        clock.advance(Duration::seconds(1));
        assert_eq!(cache.get_fresh(&"k"), None);
    }

    #[test]
    fn test_expired_entry_still_available_as_stale() {
        let (clock, mut cache) = cache();
        cache.insert("k", 7);
        clock.advance(Duration::hours(2));

        assert_eq!(cache.get_fresh(&"k"), None);
        assert_eq!(cache.get_any(&"k"), Some(&7));
    }

    #[test]
    fn test_insert_restarts_ttl() {
        let (clock, mut cache) = cache();
        cache.insert("k", 1);
        clock.advance(Duration::seconds(200));
        cache.insert("k", 2);
        clock.advance(Duration::seconds(200));

        assert_eq!(cache.get_fresh(&"k"), Some(&2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_retain_and_find_any() {
        let (clock, mut cache) = cache();
        cache.insert("a1", 1);
        cache.insert("a2", 2);
        cache.insert("b1", 3);

        cache.retain(|key| !key.starts_with('a') || *key == "a2");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_any(&"a1"), None);

        clock.advance(Duration::hours(1));
        assert_eq!(cache.find_any(|key| key.starts_with('a')), Some(&2));
        assert_eq!(cache.find_any(|key| key.starts_with('c')), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let (_clock, mut cache) = cache();
        cache.insert("a", 1);
        assert_eq!(cache.get_fresh(&"b"), None);
        assert_eq!(cache.get_fresh(&"a"), Some(&1));
    }
}
