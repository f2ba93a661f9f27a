use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};

/// Coalesces bursts of updates into one delivery after a quiet period.
///
/// Scheduling while a delivery is pending supersedes it: only the most
/// recent value is sent. With a `max_wait` the delivery is never pushed out
/// further than that from the first value of a burst.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    max_wait: Option<Duration>,
    sender: mpsc::UnboundedSender<T>,
    pending: Option<PendingFlush>,
}

/// A scheduled delivery. Whoever sets `claimed` first decides its fate:
/// the task sends the value, a cancel or reschedule drops it.
#[derive(Debug)]
struct PendingFlush {
    handle: JoinHandle<()>,
    claimed: Arc<AtomicBool>,
    burst_started: Instant,
}

impl PendingFlush {
    /// Returns whether the value was still undelivered.
    fn revoke(self) -> bool {
        let revoked = !self.claimed.swap(true, Ordering::AcqRel);
        self.handle.abort();
        revoked
    }

    fn is_pending(&self) -> bool {
        !self.claimed.load(Ordering::Acquire)
    }
}

impl<T> Debouncer<T>
where
    T: Send + 'static,
{
    pub fn new(delay: Duration, sender: mpsc::UnboundedSender<T>) -> Self {
        Self {
            delay,
            max_wait: None,
            sender,
            pending: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self, value: T) {
        let now = Instant::now();
        let burst_started = match self.pending.take() {
            Some(pending) => {
                let started = pending.burst_started;
                if pending.revoke() { started } else { now }
            }
            None => now,
        };

        let mut deadline = now + self.delay;
        if let Some(max_wait) = self.max_wait {
            deadline = deadline.min(burst_started + max_wait);
        }

        let sender = self.sender.clone();
        let claimed = Arc::new(AtomicBool::new(false));
        let task_claimed = Arc::clone(&claimed);
        let handle = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            if !task_claimed.swap(true, Ordering::AcqRel) {
                let _ = sender.send(value);
            }
        });

        self.pending = Some(PendingFlush {
            handle,
            claimed,
            burst_started,
        });
    }

    /// Drops the pending delivery, if any. Returns `true` only when a value
    /// was dropped before it reached the receiver.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some_and(PendingFlush::revoke)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(PendingFlush::is_pending)
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.revoke();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(300);

    #[tokio::test(start_paused = true)]
    async fn delivers_after_quiet_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);
        let started = Instant::now();

        debouncer.schedule(1u32);
        assert!(debouncer.is_pending());

        assert_eq!(rx.recv().await, Some(1));
        assert!(started.elapsed() >= DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn last_write_wins() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);

        debouncer.schedule(1u32);
        time::advance(Duration::from_millis(100)).await;
        debouncer.schedule(2);
        time::advance(Duration::from_millis(100)).await;
        debouncer.schedule(3);

        assert_eq!(rx.recv().await, Some(3));
        let extra = time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(extra.is_err(), "superseded values must not be delivered");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);

        assert!(!debouncer.cancel(), "idle cancel is a no-op");

        debouncer.schedule(7u32);
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());
        assert!(!debouncer.is_pending());

        let delivered = time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(delivered.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn max_wait_caps_a_never_quiet_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx).with_max_wait(Duration::from_millis(500));
        let started = Instant::now();

        debouncer.schedule(0u32);
        time::advance(Duration::from_millis(200)).await;
        debouncer.schedule(1);
        time::advance(Duration::from_millis(200)).await;
        debouncer.schedule(2);

        assert_eq!(rx.recv().await, Some(2));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(700), "delivery should not wait a full delay");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduling_after_delivery_starts_a_new_burst() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);

        debouncer.schedule(1u32);
        assert_eq!(rx.recv().await, Some(1));
        assert!(!debouncer.cancel());

        debouncer.schedule(2);
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_send_reports_nothing_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);

        debouncer.schedule(5u32);
        assert_eq!(rx.recv().await, Some(5));

        // The value is out even if the task has not been reaped yet.
        assert!(!debouncer.is_pending());
        assert!(!debouncer.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_after_send_restarts_the_burst() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx).with_max_wait(Duration::from_millis(400));

        debouncer.schedule(1u32);
        assert_eq!(rx.recv().await, Some(1));

        let resumed = Instant::now();
        debouncer.schedule(2);
        assert_eq!(rx.recv().await, Some(2));
        assert!(resumed.elapsed() >= DELAY, "a new burst waits a full delay");
    }
}
