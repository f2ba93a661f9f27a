use std::{fmt, num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use tracing::trace;
use uuid::Uuid;

use crate::{
    exchange::{Exchange, ExchangeLog},
    grouping::{
        EventGroup, GroupStats, GroupingConfig, GroupingMode, StatsProvider, compute_stats,
        stats::DirectStats,
    },
};

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

/// Identity of one bucket's membership.
///
/// Log stamps are unique and grow with every insert or replace, so the
/// highest stamp among the members moves whenever a member is added or
/// rewritten; dropped members change the length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsCacheKey {
    scope: String,
    len: usize,
    watermark: u64,
}

impl StatsCacheKey {
    pub fn new(scope: &str, exchanges: &[Arc<Exchange>]) -> Self {
        Self {
            scope: scope.to_owned(),
            len: exchanges.len(),
            watermark: exchanges
                .iter()
                .map(|exchange| exchange.revision)
                .max()
                .unwrap_or(0),
        }
    }
}

/// Bounded memo of [`GroupStats`] keyed by the [`ExchangeLog`] stamps of a
/// bucket's members. Buckets holding unstamped exchanges are computed
/// every time.
pub struct StatsCache {
    entries: LruCache<StatsCacheKey, Arc<GroupStats>>,
    hits: u64,
    misses: u64,
}

impl fmt::Debug for StatsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl StatsCache {
    pub fn new(size: usize) -> Self {
        Self {
            entries: LruCache::new(capacity(size)),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_compute(&mut self, scope: &str, exchanges: &[Arc<Exchange>]) -> Arc<GroupStats> {
        // Revision 0 is shared by every exchange that never went through a
        // log, so it cannot identify membership.
        if exchanges.iter().any(|exchange| exchange.revision == 0) {
            self.misses += 1;
            return DirectStats.stats_for(scope, exchanges);
        }

        let key = StatsCacheKey::new(scope, exchanges);
        if let Some(stats) = self.entries.get(&key) {
            self.hits += 1;
            return Arc::clone(stats);
        }

        self.misses += 1;
        let stats = Arc::new(compute_stats(exchanges));
        if let Some((evicted, _)) = self.entries.push(key, Arc::clone(&stats)) {
            trace!(scope = %evicted.scope, "stats cache evicted entry");
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl StatsProvider for StatsCache {
    fn stats_for(&mut self, scope: &str, exchanges: &[Arc<Exchange>]) -> Arc<GroupStats> {
        self.get_or_compute(scope, exchanges)
    }
}

/// Everything a structural tree depends on apart from expansion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupResultKey {
    pub log_id: Uuid,
    pub revision: u64,
    pub mode: GroupingMode,
    pub max_depth: u8,
}

impl GroupResultKey {
    pub fn new(log: &ExchangeLog, config: GroupingConfig) -> Self {
        Self {
            log_id: log.id(),
            revision: log.revision(),
            mode: config.mode,
            max_depth: config.max_depth,
        }
    }
}

/// Trees built with every group collapsed, so expansion changes can reuse
/// them.
pub struct GroupResultCache {
    entries: LruCache<GroupResultKey, Arc<Vec<EventGroup>>>,
}

impl fmt::Debug for GroupResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupResultCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .finish()
    }
}

impl GroupResultCache {
    pub fn new(size: usize) -> Self {
        Self {
            entries: LruCache::new(capacity(size)),
        }
    }

    pub fn get(&mut self, key: &GroupResultKey) -> Option<Arc<Vec<EventGroup>>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: GroupResultKey, groups: Arc<Vec<EventGroup>>) {
        if let Some((evicted, _)) = self.entries.push(key, groups) {
            if evicted != key {
                trace!(mode = %evicted.mode, revision = evicted.revision, "group cache evicted tree");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
