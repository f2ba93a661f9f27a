use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use uuid::Uuid;

/// Stamps are process-wide so two logs never hand out the same value.
static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

fn next_stamp() -> u64 {
    NEXT_STAMP.fetch_add(1, Ordering::Relaxed)
}

/// A single captured HTTP request/response pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub id: String,
    pub method: String,
    pub url: ExchangeUrl,
    pub response: ResponseState,
    /// Milliseconds since the Unix epoch at which the request was captured.
    pub timestamp: f64,
    pub source: String,
    pub timing: TimingEvents,
    /// Assigned by [`ExchangeLog`] whenever the record is inserted or replaced.
    pub revision: u64,
}

impl Exchange {
    pub fn hostname(&self) -> &str {
        &self.url.hostname
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.status_code()
    }

    pub fn response_time(&self) -> Option<f64> {
        self.timing.response_time()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeUrl {
    pub raw: String,
    pub hostname: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponseState {
    #[default]
    Pending,
    Aborted,
    Completed {
        status_code: u16,
        headers: BTreeMap<String, String>,
    },
}

impl ResponseState {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Completed { status_code, .. } => Some(*status_code),
            Self::Pending | Self::Aborted => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingEvents {
    pub request_sent_timestamp: Option<f64>,
    pub response_body_received_timestamp: Option<f64>,
}

impl TimingEvents {
    /// Duration between sending the request and receiving the full response
    /// body. Missing events and non-positive spans yield `None`.
    pub fn response_time(&self) -> Option<f64> {
        let sent = self.request_sent_timestamp?;
        let received = self.response_body_received_timestamp?;
        let elapsed = received - sent;
        (elapsed.is_finite() && elapsed > 0.0).then_some(elapsed)
    }
}

/// Append-only list of exchanges owned by the capture side.
///
/// Every mutation bumps [`revision`](Self::revision), and every stored record
/// carries the stamp it was written with, so consumers can detect changes
/// without diffing contents.
#[derive(Debug)]
pub struct ExchangeLog {
    id: Uuid,
    revision: u64,
    entries: Vec<Arc<Exchange>>,
    positions: HashMap<String, usize>,
    evicted: usize,
}

impl Default for ExchangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeLog {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            revision: next_stamp(),
            entries: Vec::new(),
            positions: HashMap::new(),
            evicted: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn exchanges(&self) -> &[Arc<Exchange>] {
        &self.entries
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&Arc<Exchange>> {
        let index = self.index_of(id)?;
        self.entries.get(index)
    }

    pub fn push(&mut self, mut exchange: Exchange) -> Arc<Exchange> {
        self.revision = next_stamp();
        exchange.revision = self.revision;

        let stored = Arc::new(exchange);
        self.positions
            .insert(stored.id.clone(), self.evicted + self.entries.len());
        self.entries.push(Arc::clone(&stored));
        stored
    }

    /// Swaps the record sharing `exchange.id` for the new value, typically
    /// once its response arrives. An unknown id hands the exchange back.
    pub fn replace(&mut self, exchange: Exchange) -> Result<Arc<Exchange>, Exchange> {
        match self.index_of(&exchange.id) {
            Some(index) => Ok(self.store_at(index, exchange)),
            None => Err(exchange),
        }
    }

    /// Replaces a known record or appends a new one.
    pub fn upsert(&mut self, exchange: Exchange) -> Arc<Exchange> {
        match self.replace(exchange) {
            Ok(stored) => stored,
            Err(exchange) => self.push(exchange),
        }
    }

    /// Drops up to `count` of the oldest records and returns how many went.
    pub fn evict_front(&mut self, count: usize) -> usize {
        let count = count.min(self.entries.len());
        if count == 0 {
            return 0;
        }

        for exchange in self.entries.drain(..count) {
            self.positions.remove(&exchange.id);
        }
        self.evicted += count;
        self.revision = next_stamp();
        count
    }

    pub fn clear(&mut self) {
        self.evicted += self.entries.len();
        self.entries.clear();
        self.positions.clear();
        self.revision = next_stamp();
    }

    fn store_at(&mut self, index: usize, mut exchange: Exchange) -> Arc<Exchange> {
        self.revision = next_stamp();
        exchange.revision = self.revision;

        let stored = Arc::new(exchange);
        self.entries[index] = Arc::clone(&stored);
        stored
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        let absolute = *self.positions.get(id)?;
        absolute.checked_sub(self.evicted)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::exchange;
    use super::*;

    #[test]
    fn push_stamps_records_with_increasing_revisions() {
        let mut log = ExchangeLog::new();
        let initial = log.revision();

        let first = log.push(exchange("1", "GET", "a.com", Some(200)));
        let second = log.push(exchange("2", "GET", "a.com", Some(200)));

        assert!(first.revision > initial);
        assert!(second.revision > first.revision);
        assert_eq!(log.revision(), second.revision);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn replace_restamps_in_place() {
        let mut log = ExchangeLog::new();
        log.push(exchange("1", "GET", "a.com", None));
        log.push(exchange("2", "GET", "b.com", None));

        let updated = log
            .replace(exchange("1", "GET", "a.com", Some(204)))
            .expect("known id should be replaced");

        assert_eq!(log.len(), 2);
        assert_eq!(log.exchanges()[0].status_code(), Some(204));
        assert_eq!(updated.revision, log.revision());
        let unknown = log
            .replace(exchange("missing", "GET", "a.com", None))
            .expect_err("unknown id should be handed back");
        assert_eq!(unknown.id, "missing");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn upsert_appends_unknown_ids() {
        let mut log = ExchangeLog::new();
        log.upsert(exchange("1", "GET", "a.com", None));
        log.upsert(exchange("1", "GET", "a.com", Some(500)));
        log.upsert(exchange("2", "POST", "a.com", None));

        assert_eq!(log.len(), 2);
        assert_eq!(
            log.get("1").and_then(|stored| stored.status_code()),
            Some(500)
        );
    }

    #[test]
    fn evicting_keeps_lookups_consistent() {
        let mut log = ExchangeLog::new();
        for id in ["1", "2", "3"] {
            log.push(exchange(id, "GET", "a.com", None));
        }

        let before = log.revision();
        assert_eq!(log.evict_front(2), 2);
        assert!(log.revision() > before);
        assert!(log.get("1").is_none());
        assert_eq!(log.get("3").map(|stored| stored.id.as_str()), Some("3"));

        log.replace(exchange("3", "GET", "a.com", Some(200)))
            .expect("remaining record should still be addressable");
        assert_eq!(log.exchanges()[0].status_code(), Some(200));
        assert_eq!(log.evict_front(10), 1);
        assert_eq!(log.evict_front(1), 0);
    }

    #[test]
    fn clear_bumps_revision() {
        let mut log = ExchangeLog::new();
        log.push(exchange("1", "GET", "a.com", None));
        let before = log.revision();

        log.clear();

        assert!(log.is_empty());
        assert!(log.revision() > before);
        assert!(log.get("1").is_none());
    }

    #[test]
    fn response_time_requires_positive_span() {
        let timing = TimingEvents {
            request_sent_timestamp: Some(10.0),
            response_body_received_timestamp: Some(35.5),
        };
        assert_eq!(timing.response_time(), Some(25.5));

        let inverted = TimingEvents {
            request_sent_timestamp: Some(40.0),
            response_body_received_timestamp: Some(40.0),
        };
        assert_eq!(inverted.response_time(), None);
        assert_eq!(TimingEvents::default().response_time(), None);
    }
}
