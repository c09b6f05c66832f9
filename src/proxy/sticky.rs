//! Session key → egress path bindings with a fixed lifetime

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct StickyBinding {
    path_index: usize,
    bound_at: Instant,
}

/// Sticky bindings keyed by session key
///
/// A binding older than the TTL reads as absent. Expired entries are dropped
/// lazily on lookup and in bulk by [`StickyTable::purge_expired`].
pub struct StickyTable {
    bindings: DashMap<String, StickyBinding>,
    ttl: Duration,
}

impl StickyTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            bindings: DashMap::new(),
            ttl,
        }
    }

    /// Index of the path bound to `key`, if the binding is still live
    pub fn get(&self, key: &str) -> Option<usize> {
        let binding = *self.bindings.get(key)?;
        if binding.bound_at.elapsed() < self.ttl {
            Some(binding.path_index)
        } else {
            self.bindings
                .remove_if(key, |_, b| b.bound_at == binding.bound_at);
            None
        }
    }

    /// Bind `key` to `path_index`, replacing any previous binding
    pub fn bind(&self, key: &str, path_index: usize) {
        self.bindings.insert(
            key.to_string(),
            StickyBinding {
                path_index,
                bound_at: Instant::now(),
            },
        );
    }

    /// Drop every expired binding, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.bindings.len();
        let ttl = self.ttl;
        self.bindings.retain(|_, b| b.bound_at.elapsed() < ttl);
        before.saturating_sub(self.bindings.len())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
