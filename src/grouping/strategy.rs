use std::{cmp::Ordering, collections::HashMap, collections::HashSet, mem, sync::Arc};

use crate::exchange::Exchange;

use super::{EventGroup, GroupingMode, stats::StatsProvider};

const PENDING: &str = "pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Domain,
    Method,
    Status,
    StatusClass,
    Source,
}

impl Dimension {
    fn prefix(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Method => "method",
            Self::Status | Self::StatusClass => "status",
            Self::Source => "source",
        }
    }

    fn value(self, exchange: &Exchange) -> String {
        match self {
            Self::Domain => exchange.hostname().to_lowercase(),
            Self::Method => exchange.method.clone(),
            Self::Status => exchange
                .status_code()
                .map(|status| status.to_string())
                .unwrap_or_else(|| PENDING.to_string()),
            Self::StatusClass => exchange
                .status_code()
                .map(|status| format!("{}xx", status / 100))
                .unwrap_or_else(|| PENDING.to_string()),
            Self::Source => exchange.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    CountDesc,
    StatusAsc,
}

/// Groups with plain stats and the default depth.
#[cfg(test)]
pub fn group_exchanges(
    mode: GroupingMode,
    exchanges: &[Arc<Exchange>],
    expanded: &HashSet<String>,
) -> Vec<EventGroup> {
    group_with(
        mode,
        super::DEFAULT_MAX_DEPTH,
        exchanges,
        expanded,
        &mut super::stats::DirectStats,
    )
}

/// Dispatches to the strategy for `mode`. Chronological mode has no groups.
pub fn group_with<S>(
    mode: GroupingMode,
    max_depth: u8,
    exchanges: &[Arc<Exchange>],
    expanded: &HashSet<String>,
    stats: &mut S,
) -> Vec<EventGroup>
where
    S: StatsProvider + ?Sized,
{
    match mode {
        GroupingMode::Chronological => Vec::new(),
        GroupingMode::Domain => group_by_domain(exchanges, expanded, stats),
        GroupingMode::Method => group_by_method(exchanges, expanded, stats),
        GroupingMode::Status => group_by_status(exchanges, expanded, stats),
        GroupingMode::Source => group_by_source(exchanges, expanded, stats),
        GroupingMode::DomainMethod => {
            group_by_domain_and_method(exchanges, expanded, max_depth, stats)
        }
        GroupingMode::DomainStatus => {
            group_by_domain_and_status(exchanges, expanded, max_depth, stats)
        }
    }
}

pub fn group_by_domain<S>(
    exchanges: &[Arc<Exchange>],
    expanded: &HashSet<String>,
    stats: &mut S,
) -> Vec<EventGroup>
where
    S: StatsProvider + ?Sized,
{
    LevelBuilder { expanded, stats }.single(exchanges, Dimension::Domain, SortOrder::CountDesc)
}

pub fn group_by_method<S>(
    exchanges: &[Arc<Exchange>],
    expanded: &HashSet<String>,
    stats: &mut S,
) -> Vec<EventGroup>
where
    S: StatsProvider + ?Sized,
{
    LevelBuilder { expanded, stats }.single(exchanges, Dimension::Method, SortOrder::CountDesc)
}

/// Exact status codes, ascending, with pending exchanges first.
pub fn group_by_status<S>(
    exchanges: &[Arc<Exchange>],
    expanded: &HashSet<String>,
    stats: &mut S,
) -> Vec<EventGroup>
where
    S: StatsProvider + ?Sized,
{
    LevelBuilder { expanded, stats }.single(exchanges, Dimension::Status, SortOrder::StatusAsc)
}

pub fn group_by_source<S>(
    exchanges: &[Arc<Exchange>],
    expanded: &HashSet<String>,
    stats: &mut S,
) -> Vec<EventGroup>
where
    S: StatsProvider + ?Sized,
{
    LevelBuilder { expanded, stats }.single(exchanges, Dimension::Source, SortOrder::CountDesc)
}

pub fn group_by_domain_and_method<S>(
    exchanges: &[Arc<Exchange>],
    expanded: &HashSet<String>,
    max_depth: u8,
    stats: &mut S,
) -> Vec<EventGroup>
where
    S: StatsProvider + ?Sized,
{
    LevelBuilder { expanded, stats }.nested(exchanges, Dimension::Method, max_depth)
}

/// Domains split into `2xx`-style status classes.
pub fn group_by_domain_and_status<S>(
    exchanges: &[Arc<Exchange>],
    expanded: &HashSet<String>,
    max_depth: u8,
    stats: &mut S,
) -> Vec<EventGroup>
where
    S: StatsProvider + ?Sized,
{
    LevelBuilder { expanded, stats }.nested(exchanges, Dimension::StatusClass, max_depth)
}

struct LevelBuilder<'a, S: ?Sized> {
    expanded: &'a HashSet<String>,
    stats: &'a mut S,
}

impl<S> LevelBuilder<'_, S>
where
    S: StatsProvider + ?Sized,
{
    fn single(
        mut self,
        exchanges: &[Arc<Exchange>],
        dimension: Dimension,
        order: SortOrder,
    ) -> Vec<EventGroup> {
        self.level(exchanges, dimension, order, None)
    }

    /// Domains first, then each domain's own exchanges split by `inner`.
    fn nested(
        mut self,
        exchanges: &[Arc<Exchange>],
        inner: Dimension,
        max_depth: u8,
    ) -> Vec<EventGroup> {
        let mut domains = self.level(exchanges, Dimension::Domain, SortOrder::CountDesc, None);
        if max_depth < 2 {
            return domains;
        }

        for domain in &mut domains {
            let members = mem::take(&mut domain.events);
            let children = self.level(&members, inner, SortOrder::CountDesc, Some(&domain.key));
            domain.sub_groups = Some(children);
        }

        domains
    }

    fn level(
        &mut self,
        exchanges: &[Arc<Exchange>],
        dimension: Dimension,
        order: SortOrder,
        parent_key: Option<&str>,
    ) -> Vec<EventGroup> {
        let mut groups: Vec<EventGroup> = bucket(exchanges, dimension)
            .into_iter()
            .map(|(value, mut events)| {
                let key = match parent_key {
                    Some(parent) => format!("{parent}:{}:{value}", dimension.prefix()),
                    None => format!("{}:{value}", dimension.prefix()),
                };
                events.sort_by(|left, right| left.timestamp.total_cmp(&right.timestamp));
                let stats = self.stats.stats_for(&key, &events);

                EventGroup {
                    expanded: self.expanded.contains(&key),
                    key,
                    label: value,
                    events,
                    stats,
                    sub_groups: None,
                    level: u8::from(parent_key.is_some()),
                    parent_key: parent_key.map(ToOwned::to_owned),
                }
            })
            .collect();

        groups.sort_by(|left, right| compare_groups(left, right, order));
        groups
    }
}

/// Buckets in first-seen order; the caller sorts.
fn bucket(exchanges: &[Arc<Exchange>], dimension: Dimension) -> Vec<(String, Vec<Arc<Exchange>>)> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(String, Vec<Arc<Exchange>>)> = Vec::new();

    for exchange in exchanges {
        let value = dimension.value(exchange);
        match positions.get(&value) {
            Some(&index) => buckets[index].1.push(Arc::clone(exchange)),
            None => {
                positions.insert(value.clone(), buckets.len());
                buckets.push((value, vec![Arc::clone(exchange)]));
            }
        }
    }

    buckets
}

fn compare_groups(left: &EventGroup, right: &EventGroup, order: SortOrder) -> Ordering {
    match order {
        SortOrder::CountDesc => right
            .stats
            .total_requests
            .cmp(&left.stats.total_requests)
            .then_with(|| left.label.cmp(&right.label)),
        SortOrder::StatusAsc => status_rank(&left.label)
            .cmp(&status_rank(&right.label))
            .then_with(|| left.label.cmp(&right.label)),
    }
}

/// `pending` sorts ahead of every numeric status.
fn status_rank(label: &str) -> (u8, u32) {
    if label == PENDING {
        return (0, 0);
    }
    (1, label.parse().unwrap_or(u32::MAX))
}
