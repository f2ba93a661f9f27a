//! Keeps regrouping affordable while a capture keeps growing.

pub mod batch;
pub mod cache;
pub mod debounce;
pub mod lazy;
pub mod virtualize;

use std::time::Duration;

pub const DEFAULT_CACHE_SIZE: usize = 100;
pub const DEFAULT_RESULT_CACHE_SIZE: usize = 8;
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_OVERSCAN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfSettings {
    pub cache_size: usize,
    pub result_cache_size: usize,
    pub debounce: Duration,
    pub batch_size: usize,
    pub overscan: usize,
}

impl Default for PerfSettings {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            result_cache_size: DEFAULT_RESULT_CACHE_SIZE,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            overscan: DEFAULT_OVERSCAN,
        }
    }
}
