pub mod bloom;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod dashboard;
pub mod deadlink;
pub mod explore;
pub mod extractor;
pub mod frontier;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod robots;
pub mod storage;
pub mod url_utils;

// Re-export main types for library usage
pub use bloom::UrlBloom;
pub use crawler::{CrawlerConfig, CrawlerService};
pub use deadlink::DeadLinkPipeline;
pub use extractor::ContentExtractor;
pub use frontier::{PriorityFrontier, QueueError};
pub use limiter::RateLimiter;
pub use metrics::MetricsCollector;
pub use models::{CrawlMetrics, CrawlMode, CrawlResult, UrlTask};
pub use robots::RobotsPolicy;
pub use storage::{Storage, StorageError};
