use std::sync::Arc;

use crate::exchange::Exchange;

use super::GroupStats;

/// Supplies stats for one bucket of exchanges.
///
/// `scope` is the key of the group being built; implementations may use it
/// to memoize but must return exactly what [`compute_stats`] would.
pub trait StatsProvider {
    fn stats_for(&mut self, scope: &str, exchanges: &[Arc<Exchange>]) -> Arc<GroupStats>;
}

/// Recomputes on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectStats;

impl StatsProvider for DirectStats {
    fn stats_for(&mut self, _scope: &str, exchanges: &[Arc<Exchange>]) -> Arc<GroupStats> {
        Arc::new(compute_stats(exchanges))
    }
}

pub fn compute_stats(exchanges: &[Arc<Exchange>]) -> GroupStats {
    let mut stats = GroupStats {
        total_requests: exchanges.len(),
        ..GroupStats::default()
    };

    let mut timed_total = 0.0;
    let mut timed_samples = 0usize;

    for exchange in exchanges {
        *stats
            .method_distribution
            .entry(exchange.method.clone())
            .or_default() += 1;

        let Some(status) = exchange.status_code() else {
            continue;
        };

        match status {
            200..=399 => stats.success_count += 1,
            400.. => stats.error_count += 1,
            _ => {}
        }

        *stats
            .status_distribution
            .entry(status.to_string())
            .or_default() += 1;

        if let Some(elapsed) = exchange.response_time() {
            timed_total += elapsed;
            timed_samples += 1;
        }
    }

    if timed_samples > 0 {
        stats.average_response_time = timed_total / timed_samples as f64;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{
        ResponseState,
        fixtures::{exchange, shared, timed},
    };

    #[test]
    fn tallies_success_and_error_over_completed_exchanges() {
        let mut aborted = exchange("5", "GET", "a.com", None);
        aborted.response = ResponseState::Aborted;

        let events = shared(vec![
            exchange("1", "GET", "a.com", Some(200)),
            exchange("2", "GET", "a.com", Some(302)),
            exchange("3", "POST", "a.com", Some(500)),
            exchange("4", "GET", "a.com", None),
            aborted,
            exchange("6", "OPTIONS", "a.com", Some(101)),
        ]);

        let stats = compute_stats(&events);

        assert_eq!(stats.total_requests, 6);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.method_distribution.get("GET"), Some(&4));
        assert_eq!(stats.method_distribution.get("POST"), Some(&1));
        assert_eq!(stats.method_distribution.get("OPTIONS"), Some(&1));
        assert_eq!(stats.status_distribution.len(), 4);
        assert_eq!(stats.status_distribution.get("101"), Some(&1));
        assert!(!stats.status_distribution.contains_key("pending"));
    }

    #[test]
    fn averages_only_usable_timings() {
        let events = shared(vec![
            timed(exchange("1", "GET", "a.com", Some(200)), 0.0, 40.0),
            timed(exchange("2", "GET", "a.com", Some(200)), 10.0, 30.0),
            timed(exchange("3", "GET", "a.com", Some(200)), 50.0, 20.0),
            exchange("4", "GET", "a.com", Some(200)),
        ]);

        let stats = compute_stats(&events);
        assert_eq!(stats.average_response_time, 30.0);
    }

    #[test]
    fn average_is_zero_without_timing_data() {
        let events = shared(vec![
            exchange("1", "GET", "a.com", Some(200)),
            exchange("2", "GET", "a.com", None),
        ]);

        let stats = compute_stats(&events);
        assert_eq!(stats.average_response_time, 0.0);
        assert!(!stats.average_response_time.is_nan());
    }

    #[test]
    fn empty_input_yields_zeroed_stats() {
        assert_eq!(compute_stats(&[]), GroupStats::default());
    }

    #[test]
    fn direct_provider_matches_compute() {
        let events = shared(vec![exchange("1", "DELETE", "a.com", Some(404))]);
        let provided = DirectStats.stats_for("scope", &events);
        assert_eq!(*provided, compute_stats(&events));
    }
}
