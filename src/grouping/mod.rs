//! Clusters captured exchanges into a statistics-annotated tree.
//!
//! Strategies in [`strategy`] are pure functions over a slice of exchanges.
//! [`GroupingStore`] owns the long-lived pieces (mode, depth, expanded keys)
//! and derives a fresh tree from the current [`ExchangeLog`] on read.
//!
//! [`ExchangeLog`]: crate::exchange::ExchangeLog

pub mod stats;
pub mod store;
pub mod strategy;

use std::{collections::BTreeMap, fmt, sync::Arc};

use clap::ValueEnum;
use serde::{Serialize, Serializer};

use crate::exchange::Exchange;

pub use stats::{StatsProvider, compute_stats};
pub use store::GroupingStore;

pub const DEFAULT_MAX_DEPTH: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingMode {
    #[default]
    Chronological,
    Domain,
    DomainMethod,
    DomainStatus,
    Method,
    Status,
    Source,
}

impl GroupingMode {
    pub const ALL: [GroupingMode; 7] = [
        GroupingMode::Chronological,
        GroupingMode::Domain,
        GroupingMode::DomainMethod,
        GroupingMode::DomainStatus,
        GroupingMode::Method,
        GroupingMode::Status,
        GroupingMode::Source,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chronological => "chronological",
            Self::Domain => "domain",
            Self::DomainMethod => "domain-method",
            Self::DomainStatus => "domain-status",
            Self::Method => "method",
            Self::Status => "status",
            Self::Source => "source",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Chronological => "Chronological",
            Self::Domain => "Domain",
            Self::DomainMethod => "Domain › Method",
            Self::DomainStatus => "Domain › Status",
            Self::Method => "Method",
            Self::Status => "Status",
            Self::Source => "Source",
        }
    }

    pub fn is_grouped(self) -> bool {
        !matches!(self, Self::Chronological)
    }

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|mode| *mode == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn previous(self) -> Self {
        let index = Self::ALL.iter().position(|mode| *mode == self).unwrap_or(0);
        Self::ALL[(index + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for GroupingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupingConfig {
    pub mode: GroupingMode,
    /// `1` stops two-level modes at the domain level.
    pub max_depth: u8,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            mode: GroupingMode::Chronological,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl GroupingConfig {
    pub fn merge(&mut self, update: GroupingConfigUpdate) {
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(max_depth) = update.max_depth {
            self.max_depth = max_depth;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupingConfigUpdate {
    pub mode: Option<GroupingMode>,
    pub max_depth: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub total_requests: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// Milliseconds; `0.0` when no exchange carried usable timing.
    pub average_response_time: f64,
    pub method_distribution: BTreeMap<String, usize>,
    pub status_distribution: BTreeMap<String, usize>,
}

/// A node of the grouping tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGroup {
    pub key: String,
    pub label: String,
    #[serde(serialize_with = "serialize_event_ids")]
    pub events: Vec<Arc<Exchange>>,
    pub expanded: bool,
    pub stats: Arc<GroupStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_groups: Option<Vec<EventGroup>>,
    pub level: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
}

impl EventGroup {
    pub fn is_leaf(&self) -> bool {
        self.sub_groups.is_none()
    }

    pub fn children(&self) -> &[EventGroup] {
        self.sub_groups.as_deref().unwrap_or_default()
    }

    /// Number of rows the group contributes below its header when expanded.
    pub fn child_count(&self) -> usize {
        match &self.sub_groups {
            Some(groups) => groups.len(),
            None => self.events.len(),
        }
    }

    /// Every exchange held by this node or its descendants.
    #[cfg(test)]
    pub fn leaf_events(&self) -> Vec<&Arc<Exchange>> {
        let mut collected = Vec::with_capacity(self.stats.total_requests);
        collect_leaf_events(self, &mut collected);
        collected
    }
}

#[cfg(test)]
fn collect_leaf_events<'a>(group: &'a EventGroup, into: &mut Vec<&'a Arc<Exchange>>) {
    into.extend(group.events.iter());
    for child in group.children() {
        collect_leaf_events(child, into);
    }
}

fn serialize_event_ids<S>(events: &[Arc<Exchange>], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(events.iter().map(|exchange| exchange.id.as_str()))
}

/// Keys of every node in the tree, parents before children.
pub fn group_keys(groups: &[EventGroup]) -> Vec<String> {
    let mut keys = Vec::new();
    for group in groups {
        keys.push(group.key.clone());
        keys.extend(group_keys(group.children()));
    }
    keys
}

pub fn find_group<'a>(groups: &'a [EventGroup], key: &str) -> Option<&'a EventGroup> {
    groups.iter().find_map(|group| {
        if group.key == key {
            Some(group)
        } else {
            find_group(group.children(), key)
        }
    })
}
