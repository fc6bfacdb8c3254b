//! Time-bucketed TTL memoization.
//!
//! Entries are keyed by `(args, floor(now / ttl))`, which bounds staleness
//! to one TTL window without any invalidation protocol. Entries are
//! immutable once inserted; concurrent readers of the same key may race to
//! compute and the last write wins with an equivalent value.

use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::error::MimirResult;

/// A concurrent memoizer with bounded staleness.
pub struct TtlCache<K, V> {
    ttl_seconds: u64,
    entries: DashMap<(K, u64), V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl_seconds: ttl.as_secs().max(1),
            entries: DashMap::new(),
        }
    }

    fn bucket(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now / self.ttl_seconds
    }

    /// Return the cached value for `key` in the current time bucket, or
    /// compute, store, and return it. Stale buckets are dropped on insert.
    pub fn get_or_try_insert<F>(&self, key: K, compute: F) -> MimirResult<V>
    where
        F: FnOnce() -> MimirResult<V>,
    {
        let bucket = self.bucket();
        if let Some(hit) = self.entries.get(&(key.clone(), bucket)) {
            return Ok(hit.clone());
        }
        let value = compute()?;
        self.entries.retain(|(_, b), _| *b == bucket);
        self.entries.insert((key, bucket), value.clone());
        Ok(value)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}
