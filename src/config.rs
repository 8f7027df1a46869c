pub struct Config;

impl Config {
    /// Body bytes handed to the extractor, hard ceiling
    pub const MAX_CONTENT_SIZE: usize = 2 * 1024 * 1024;
    pub const POOL_IDLE_PER_HOST: usize = 25;
    pub const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

    pub const FETCH_TIMEOUT_SECS: u64 = 5;
    pub const CONNECT_TIMEOUT_SECS: u64 = 3;
    pub const ROBOTS_TIMEOUT_SECS: u64 = 10;
    pub const DEAD_LINK_TIMEOUT_SECS: u64 = 2;

    /// Frontier heap capacity; overflow spills to the backlog store
    pub const MAX_QUEUE_SIZE: usize = 100_000;
    /// Refill kicks in when the heap drops below this fraction of capacity
    pub const REFILL_THRESHOLD: f64 = 0.2;
    /// Rough per-task heap footprint used for the memory gauge
    pub const BYTES_PER_TASK: usize = 300;

    pub const BLOOM_EXPECTED_ITEMS: usize = 1_000_000;
    pub const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

    pub const DEAD_LINK_CHANNEL_SIZE: usize = 1_000;
    pub const DEAD_LINK_WORKERS: usize = 3;
    pub const DEAD_LINK_URL_CACHE_MAX: usize = 5_000;
    pub const DEAD_LINK_DOMAIN_CACHE_MAX: usize = 1_000;
    pub const DEFAULT_SAMPLE_RATE: f64 = 0.2;

    pub const RATE_LIMIT_PER_SEC: u64 = 200;
    pub const RATE_LIMIT_BURST: u64 = 200;

    /// Worker back-off when the frontier is momentarily empty
    pub const EMPTY_QUEUE_SLEEP_MS: u64 = 10;
    pub const METRICS_TICK_SECS: u64 = 5;
    pub const METRICS_PUSH_SECS: u64 = 2;
    pub const STORE_FLUSH_INTERVAL_SECS: u64 = 600;

    /// Share of the memory ceiling given to the backlog database
    pub const BACKLOG_CACHE_PCT: u64 = 40;
    /// Share of the memory ceiling given to the findings database
    pub const FINDS_CACHE_PCT: u64 = 30;

    pub const USER_AGENT: &'static str = "GolamV2-Crawler/1.0";
    pub const ACCEPT_HEADER: &'static str =
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
}
