use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::exchange::{Exchange, ExchangeLog};

/// Shared owner of the captured exchange log.
#[derive(Debug)]
pub struct CaptureState {
    retention: Option<usize>,
    inner: RwLock<ExchangeLog>,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CaptureState {
    /// `retention` caps how many exchanges are kept; `None` keeps all.
    pub fn new(retention: Option<usize>) -> Self {
        Self {
            retention,
            inner: RwLock::new(ExchangeLog::new()),
        }
    }

    /// Records a batch under a single write lock, replacing stored exchanges
    /// that share an id. Returns the log length.
    pub async fn record_batch(&self, exchanges: Vec<Exchange>) -> usize {
        let mut inner = self.inner.write().await;
        for exchange in exchanges {
            inner.upsert(exchange);
        }
        self.enforce_retention(&mut inner);
        inner.len()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ExchangeLog> {
        self.inner.read().await
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.clear();
    }

    fn enforce_retention(&self, log: &mut ExchangeLog) {
        let Some(limit) = self.retention else {
            return;
        };

        if log.len() > limit {
            let evicted = log.evict_front(log.len() - limit);
            debug!(evicted, limit, "capture retention reached");
        }
    }
}
