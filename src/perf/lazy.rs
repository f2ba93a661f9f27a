use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use tracing::trace;

use crate::grouping::EventGroup;

/// Subtrees keyed by group key, held weakly: an entry lives only as long as
/// some caller still holds the `Arc`.
#[derive(Debug, Default)]
pub struct WeakGroupCache {
    entries: HashMap<String, Weak<EventGroup>>,
}

impl WeakGroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, group: &Arc<EventGroup>) {
        self.entries.insert(key.into(), Arc::downgrade(group));
    }

    pub fn get(&mut self, key: &str) -> Option<Arc<EventGroup>> {
        let upgraded = self.entries.get(key).and_then(Weak::upgrade);
        if upgraded.is_none() {
            self.entries.remove(key);
        }
        upgraded
    }

    /// Forgets entries whose subtree has been dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, group| group.strong_count() > 0);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Materializes group subtrees on demand and shares them while they are in
/// use. Entries from an older tree generation are dropped on
/// [`sync_generation`](Self::sync_generation).
#[derive(Debug, Default)]
pub struct LazyGroupLoader {
    cache: WeakGroupCache,
    generation: u64,
    loads: u64,
}

impl LazyGroupLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load<F>(&mut self, key: &str, load: F) -> Option<Arc<EventGroup>>
    where
        F: FnOnce() -> Option<EventGroup>,
    {
        if let Some(group) = self.cache.get(key) {
            return Some(group);
        }

        let group = Arc::new(load()?);
        self.loads += 1;
        let pruned = self.cache.prune();
        if pruned > 0 {
            trace!(pruned, "dropped released subtrees");
        }
        self.cache.insert(key, &group);
        Some(group)
    }

    /// Returns whether the cache was reset.
    pub fn sync_generation(&mut self, generation: u64) -> bool {
        if self.generation == generation {
            return false;
        }
        trace!(from = self.generation, to = generation, "group tree changed; dropping subtrees");
        self.generation = generation;
        self.clear_cache();
        true
    }

    pub fn clear_cache(&mut self) {
        if !self.cache.is_empty() {
            trace!(cached = self.cache.len(), "dropping loaded subtrees");
            self.cache.clear();
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn loads(&self) -> u64 {
        self.loads
    }
}
