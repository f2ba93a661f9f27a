use std::{collections::HashSet, sync::Arc};

use tracing::{debug, trace};

use crate::{
    exchange::ExchangeLog,
    perf::{
        PerfSettings,
        cache::{GroupResultCache, GroupResultKey, StatsCache},
    },
};

use super::{EventGroup, GroupingConfig, GroupingConfigUpdate, GroupingMode, strategy};

/// Long-lived grouping state plus a lazily derived tree.
///
/// Mutators only touch the mode, depth and expanded keys. The tree is
/// rebuilt on the next [`grouped_events`](Self::grouped_events) call whose
/// inputs differ from the last one, so readers always see a tree consistent
/// with the current log and settings.
#[derive(Debug)]
pub struct GroupingStore {
    config: GroupingConfig,
    expanded: HashSet<String>,
    expansion_generation: u64,
    stats_cache: StatsCache,
    result_cache: GroupResultCache,
    derived: Option<DerivedGroups>,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DerivedKey {
    structure: GroupResultKey,
    expansion_generation: u64,
}

#[derive(Debug)]
struct DerivedGroups {
    key: DerivedKey,
    groups: Arc<[EventGroup]>,
}

impl Default for GroupingStore {
    fn default() -> Self {
        Self::new(&PerfSettings::default())
    }
}

impl GroupingStore {
    pub fn new(settings: &PerfSettings) -> Self {
        let stats_cache = StatsCache::new(settings.cache_size);
        trace!(stats_capacity = stats_cache.capacity(), "grouping store created");
        Self {
            config: GroupingConfig::default(),
            expanded: HashSet::new(),
            expansion_generation: 0,
            stats_cache,
            result_cache: GroupResultCache::new(settings.result_cache_size),
            derived: None,
            generation: 0,
        }
    }

    pub fn grouping_config(&self) -> GroupingConfig {
        self.config
    }

    pub fn grouping_mode(&self) -> GroupingMode {
        self.config.mode
    }

    pub fn expanded_groups(&self) -> &HashSet<String> {
        &self.expanded
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        self.expanded.contains(key)
    }

    /// Bumped every time a new tree is derived.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_grouping_mode(&mut self, mode: GroupingMode) {
        self.set_grouping_config(GroupingConfigUpdate {
            mode: Some(mode),
            max_depth: None,
        });
    }

    pub fn set_grouping_config(&mut self, update: GroupingConfigUpdate) {
        self.config.merge(update);
        if update.mode == Some(GroupingMode::Chronological) {
            self.collapse_all_groups();
        }
        debug!(mode = %self.config.mode, max_depth = self.config.max_depth, "grouping config updated");
    }

    /// Keys that match no current group are still recorded, so the state
    /// applies once such a group appears.
    pub fn toggle_group_expansion(&mut self, key: &str) {
        if !self.expanded.remove(key) {
            self.expanded.insert(key.to_owned());
        }
        self.expansion_generation += 1;
    }

    pub fn expand_all_groups<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.expanded.len();
        self.expanded.extend(keys.into_iter().map(Into::into));
        if self.expanded.len() != before {
            self.expansion_generation += 1;
        }
    }

    /// Drops cached stats and trees. The next read regroups from scratch.
    pub fn clear_caches(&mut self) {
        self.stats_cache.clear();
        self.result_cache.clear();
        self.derived = None;
    }

    pub fn collapse_all_groups(&mut self) {
        if !self.expanded.is_empty() {
            self.expanded.clear();
            self.expansion_generation += 1;
        }
    }

    /// Current tree for `log`. Chronological mode returns an empty tree
    /// without looking at the log.
    pub fn grouped_events(&mut self, log: &ExchangeLog) -> Arc<[EventGroup]> {
        if !self.config.mode.is_grouped() {
            return Arc::from(Vec::new());
        }

        let key = DerivedKey {
            structure: GroupResultKey::new(log, self.config),
            expansion_generation: self.expansion_generation,
        };

        if let Some(derived) = &self.derived {
            if derived.key == key {
                return Arc::clone(&derived.groups);
            }
        }

        let structure = self.structure(key.structure, log);
        let groups: Arc<[EventGroup]> = structure
            .iter()
            .map(|group| with_expansion(group, &self.expanded))
            .collect();

        self.generation += 1;
        trace!(
            mode = %self.config.mode,
            groups = groups.len(),
            exchanges = log.len(),
            generation = self.generation,
            "derived grouped events"
        );

        self.derived = Some(DerivedGroups {
            key,
            groups: Arc::clone(&groups),
        });
        groups
    }

    fn structure(&mut self, key: GroupResultKey, log: &ExchangeLog) -> Arc<Vec<EventGroup>> {
        if let Some(cached) = self.result_cache.get(&key) {
            return cached;
        }

        let built = Arc::new(strategy::group_with(
            self.config.mode,
            self.config.max_depth,
            log.exchanges(),
            &HashSet::new(),
            &mut self.stats_cache,
        ));
        debug!(
            mode = %self.config.mode,
            groups = built.len(),
            exchanges = log.len(),
            stats_hits = self.stats_cache.hits(),
            stats_misses = self.stats_cache.misses(),
            stats_cached = self.stats_cache.len(),
            trees_cached = self.result_cache.len(),
            "regrouped exchanges"
        );
        self.result_cache.insert(key, Arc::clone(&built));
        built
    }
}

fn with_expansion(group: &EventGroup, expanded: &HashSet<String>) -> EventGroup {
    let mut group = group.clone();
    apply_expansion(&mut group, expanded);
    group
}

fn apply_expansion(group: &mut EventGroup, expanded: &HashSet<String>) {
    group.expanded = expanded.contains(&group.key);
    if let Some(children) = &mut group.sub_groups {
        for child in children {
            apply_expansion(child, expanded);
        }
    }
}
