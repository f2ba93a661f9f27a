use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    feed::{DEFAULT_POLL_INTERVAL, FeedConfig},
    grouping::{DEFAULT_MAX_DEPTH, GroupingMode},
    perf::{
        DEFAULT_BATCH_SIZE, DEFAULT_CACHE_SIZE, DEFAULT_DEBOUNCE_MS, DEFAULT_OVERSCAN,
        DEFAULT_RESULT_CACHE_SIZE, PerfSettings,
    },
};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "exlens",
    version,
    about = "Browse captured HTTP exchanges grouped by domain, method, status or source"
)]
pub struct Config {
    /// Capture file: a JSON array of exchanges or one exchange per line.
    #[arg(
        long = "input",
        short = 'i',
        env = "EXLENS_INPUT",
        value_name = "FILE",
        help = "Capture file to read exchanges from"
    )]
    pub input: PathBuf,

    /// Keep reading records appended to the capture file.
    #[arg(long, env = "EXLENS_FOLLOW")]
    pub follow: bool,

    #[arg(
        long,
        value_enum,
        env = "EXLENS_MODE",
        default_value_t = GroupingMode::Chronological,
        help = "Initial grouping mode"
    )]
    pub mode: GroupingMode,

    #[arg(
        long = "max-depth",
        default_value_t = DEFAULT_MAX_DEPTH,
        value_parser = clap::value_parser!(u8).range(1..=2),
        help = "Nesting depth for two-level modes"
    )]
    pub max_depth: u8,

    #[arg(long = "cache-size", env = "EXLENS_CACHE_SIZE", default_value_t = DEFAULT_CACHE_SIZE)]
    pub cache_size: usize,

    #[arg(long = "debounce-ms", env = "EXLENS_DEBOUNCE_MS", default_value_t = DEFAULT_DEBOUNCE_MS)]
    pub debounce_ms: u64,

    #[arg(long = "batch-size", env = "EXLENS_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_OVERSCAN)]
    pub overscan: usize,

    #[arg(
        long,
        env = "EXLENS_RETENTION",
        value_name = "COUNT",
        help = "Keep at most COUNT exchanges, dropping the oldest"
    )]
    pub retention: Option<usize>,

    #[arg(
        long = "poll-ms",
        default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64,
        hide = true
    )]
    pub poll_ms: u64,

    /// Print the grouping to stdout instead of opening the browser.
    #[arg(long)]
    pub print: bool,

    #[arg(long, requires = "print", help = "Print the grouping as JSON")]
    pub json: bool,

    #[arg(
        long = "log-file",
        env = "EXLENS_LOG_FILE",
        value_name = "FILE",
        help = "Append logs to FILE instead of stderr"
    )]
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn perf_settings(&self) -> PerfSettings {
        PerfSettings {
            cache_size: self.cache_size,
            result_cache_size: DEFAULT_RESULT_CACHE_SIZE,
            debounce: Duration::from_millis(self.debounce_ms),
            batch_size: self.batch_size,
            overscan: self.overscan,
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            follow: self.follow && !self.print,
            poll_interval: Duration::from_millis(self.poll_ms.max(1)),
            batch_size: self.batch_size,
            ..FeedConfig::new(&self.input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_defaults() {
        let config = Config::try_parse_from(["exlens", "--input", "capture.ndjson"])
            .expect("config should parse");

        assert_eq!(config.mode, GroupingMode::Chronological);
        assert_eq!(config.perf_settings(), PerfSettings::default());
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(!config.feed_config().follow);
    }

    #[test]
    fn parses_kebab_case_modes() {
        let config = Config::try_parse_from([
            "exlens",
            "-i",
            "capture.ndjson",
            "--mode",
            "domain-status",
            "--max-depth",
            "1",
            "--follow",
        ])
        .expect("config should parse");

        assert_eq!(config.mode, GroupingMode::DomainStatus);
        assert_eq!(config.max_depth, 1);
        assert!(config.feed_config().follow);
    }

    #[test]
    fn print_mode_never_follows() {
        let config = Config::try_parse_from([
            "exlens", "-i", "c.json", "--follow", "--print", "--json",
        ])
        .expect("config should parse");

        assert!(config.json);
        assert!(!config.feed_config().follow);
    }

    #[test]
    fn rejects_out_of_range_depth_and_orphan_json() {
        assert!(Config::try_parse_from(["exlens", "-i", "c.json", "--max-depth", "3"]).is_err());
        assert!(Config::try_parse_from(["exlens", "-i", "c.json", "--json"]).is_err());
    }
}
