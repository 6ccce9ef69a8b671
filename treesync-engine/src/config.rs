use std::time::Duration;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_RETRY_BASE_MS: u64 = 5_000;
const DEFAULT_RETRY_MAX_MS: u64 = 20_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Parallel file operations allowed at once.
    pub concurrency: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
    /// Attempts per parallel operation, first try included.
    pub retry_attempts: u32,
    /// Draws each retry delay uniformly below its exponential ceiling.
    pub retry_jitter: bool,
    /// Suppresses per-operation logging.
    pub silent: bool,
    pub skip_filter_to_target: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            retry_max: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_jitter: false,
            silent: false,
            skip_filter_to_target: false,
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            concurrency: read_positive(&lookup, "TREESYNC_CONCURRENCY", DEFAULT_CONCURRENCY as u64)
                as usize,
            retry_base: Duration::from_millis(read_positive(
                &lookup,
                "TREESYNC_RETRY_BASE_MS",
                DEFAULT_RETRY_BASE_MS,
            )),
            retry_max: Duration::from_millis(read_positive(
                &lookup,
                "TREESYNC_RETRY_MAX_MS",
                DEFAULT_RETRY_MAX_MS,
            )),
            retry_attempts: read_positive(
                &lookup,
                "TREESYNC_RETRY_ATTEMPTS",
                u64::from(DEFAULT_RETRY_ATTEMPTS),
            )
            .min(u64::from(u32::MAX)) as u32,
            retry_jitter: read_bool(&lookup, "TREESYNC_RETRY_JITTER", false),
            silent: read_bool(&lookup, "TREESYNC_SILENT", false),
            skip_filter_to_target: read_bool(&lookup, "TREESYNC_SKIP_FILTER_TO_TARGET", false),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, base: Duration, max: Duration, attempts: u32) -> Self {
        self.retry_base = base;
        self.retry_max = max;
        self.retry_attempts = attempts.max(1);
        self
    }
}

fn read_positive(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
