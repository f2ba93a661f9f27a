use std::{ops::Range, sync::Arc};

use crate::{
    exchange::Exchange,
    grouping::{EventGroup, GroupStats},
};

use super::{DEFAULT_OVERSCAN, batch::process_in_batches};

/// Scroll state of a list measured in the same unit as `item_height`
/// (terminal rows, pixels, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub scroll_offset: usize,
    pub container_height: usize,
    pub item_height: usize,
    pub overscan: usize,
}

impl Viewport {
    pub fn new(scroll_offset: usize, container_height: usize, item_height: usize) -> Self {
        Self {
            scroll_offset,
            container_height,
            item_height,
            overscan: DEFAULT_OVERSCAN,
        }
    }

    pub fn with_overscan(mut self, overscan: usize) -> Self {
        self.overscan = overscan;
        self
    }
}

/// Indices of the items intersecting the viewport, padded by `overscan` on
/// both sides and clamped to `item_count`.
pub fn visible_range(viewport: &Viewport, item_count: usize) -> Range<usize> {
    if item_count == 0 || viewport.item_height == 0 {
        return 0..0;
    }

    let first = viewport.scroll_offset / viewport.item_height;
    let last = viewport
        .scroll_offset
        .saturating_add(viewport.container_height)
        .div_ceil(viewport.item_height);

    let start = first.saturating_sub(viewport.overscan).min(item_count);
    let end = last.saturating_add(viewport.overscan).min(item_count);
    start..end
}

/// Scrollable extent of a group tree: every header, plus the contents of
/// expanded groups.
pub fn total_height(groups: &[EventGroup], header_height: usize, item_height: usize) -> usize {
    groups
        .iter()
        .map(|group| {
            let body = if !group.expanded {
                0
            } else if group.is_leaf() {
                group.events.len() * item_height
            } else {
                total_height(group.children(), header_height, item_height)
            };
            header_height + body
        })
        .sum()
}

#[derive(Debug, Clone)]
pub enum VirtualRow {
    Header {
        key: String,
        label: String,
        level: u8,
        expanded: bool,
        child_count: usize,
        stats: Arc<GroupStats>,
    },
    Exchange {
        exchange: Arc<Exchange>,
        level: u8,
        group_key: Option<String>,
    },
}

impl VirtualRow {
    pub fn level(&self) -> u8 {
        match self {
            Self::Header { level, .. } | Self::Exchange { level, .. } => *level,
        }
    }

    pub fn group_key(&self) -> Option<&str> {
        match self {
            Self::Header { key, .. } => Some(key),
            Self::Exchange { group_key, .. } => group_key.as_deref(),
        }
    }
}

/// Rows as a list would show them: a header per group, children only under
/// expanded headers.
pub fn flatten_groups(groups: &[EventGroup]) -> Vec<VirtualRow> {
    let mut rows = Vec::new();
    push_rows(groups, &mut rows);
    rows
}

fn push_rows(groups: &[EventGroup], rows: &mut Vec<VirtualRow>) {
    for group in groups {
        rows.push(VirtualRow::Header {
            key: group.key.clone(),
            label: group.label.clone(),
            level: group.level,
            expanded: group.expanded,
            child_count: group.child_count(),
            stats: Arc::clone(&group.stats),
        });

        if !group.expanded {
            continue;
        }

        if group.is_leaf() {
            rows.extend(group.events.iter().map(|exchange| VirtualRow::Exchange {
                exchange: Arc::clone(exchange),
                level: group.level + 1,
                group_key: Some(group.key.clone()),
            }));
        } else {
            push_rows(group.children(), rows);
        }
    }
}

/// Ungrouped rows in capture order, built in chunks of `batch_size`.
pub fn chronological_rows(exchanges: &[Arc<Exchange>], batch_size: usize) -> Vec<VirtualRow> {
    let mut rows = process_in_batches(exchanges, batch_size, |chunk| {
        chunk
            .iter()
            .map(|exchange| VirtualRow::Exchange {
                exchange: Arc::clone(exchange),
                level: 0,
                group_key: None,
            })
            .collect()
    });
    rows.sort_by(|left, right| match (left, right) {
        (
            VirtualRow::Exchange { exchange: left, .. },
            VirtualRow::Exchange { exchange: right, .. },
        ) => left.timestamp.total_cmp(&right.timestamp),
        _ => std::cmp::Ordering::Equal,
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exchange::fixtures::{at, exchange, shared},
        grouping::{GroupingMode, strategy::group_exchanges},
    };
    use std::collections::HashSet;

    fn tree(expanded: &[&str]) -> Vec<EventGroup> {
        let events = shared(vec![
            exchange("1", "GET", "a.com", Some(200)),
            exchange("2", "GET", "a.com", Some(200)),
            exchange("3", "POST", "a.com", Some(500)),
            exchange("4", "GET", "b.com", None),
        ]);
        let expanded: HashSet<String> = expanded.iter().map(|key| key.to_string()).collect();
        group_exchanges(GroupingMode::DomainMethod, &events, &expanded)
    }

    #[test]
    fn range_covers_viewport_plus_overscan() {
        let viewport = Viewport::new(200, 100, 20).with_overscan(2);
        assert_eq!(visible_range(&viewport, 1_000), 8..17);
    }

    #[test]
    fn range_clamps_at_both_ends() {
        let top = Viewport::new(0, 50, 10);
        assert_eq!(visible_range(&top, 100), 0..10);

        let bottom = Viewport::new(950, 100, 10);
        assert_eq!(visible_range(&bottom, 100), 90..100);

        let past_end = Viewport::new(10_000, 100, 10);
        assert_eq!(visible_range(&past_end, 100), 100..100);
    }

    #[test]
    fn degenerate_inputs_yield_empty_ranges() {
        assert_eq!(visible_range(&Viewport::new(0, 100, 10), 0), 0..0);
        assert_eq!(visible_range(&Viewport::new(0, 100, 0), 10), 0..0);
    }

    #[test]
    fn collapsed_tree_shows_headers_only() {
        let groups = tree(&[]);
        assert_eq!(flatten_groups(&groups).len(), 2);
        assert_eq!(total_height(&groups, 30, 20), 60);
    }

    #[test]
    fn expanded_nested_groups_contribute_their_rows() {
        let groups = tree(&["domain:a.com", "domain:a.com:method:GET"]);
        let rows = flatten_groups(&groups);

        // a.com, GET (2 exchanges), POST, b.com
        assert_eq!(rows.len(), 6);
        assert!(matches!(&rows[0], VirtualRow::Header { key, expanded: true, .. } if key == "domain:a.com"));
        assert!(matches!(&rows[1], VirtualRow::Header { level: 1, .. }));
        assert!(matches!(&rows[2], VirtualRow::Exchange { level: 2, .. }));
        assert_eq!(rows[2].group_key(), Some("domain:a.com:method:GET"));
        assert_eq!(rows.len(), total_height(&groups, 1, 1));
        assert_eq!(total_height(&groups, 30, 20), 4 * 30 + 2 * 20);
    }

    #[test]
    fn expanded_child_under_collapsed_parent_stays_hidden() {
        let groups = tree(&["domain:a.com:method:GET"]);
        assert_eq!(flatten_groups(&groups).len(), 2);
    }

    #[test]
    fn chronological_rows_follow_timestamps() {
        let events = shared(vec![
            at(exchange("b", "GET", "a.com", None), 2.0),
            at(exchange("a", "GET", "a.com", None), 1.0),
            at(exchange("c", "GET", "a.com", None), 3.0),
        ]);

        let rows = chronological_rows(&events, 2);
        let ids: Vec<&str> = rows
            .iter()
            .filter_map(|row| match row {
                VirtualRow::Exchange { exchange, .. } => Some(exchange.id.as_str()),
                VirtualRow::Header { .. } => None,
            })
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(rows.iter().all(|row| row.group_key().is_none()));
    }
}
