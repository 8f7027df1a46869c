//! Worker pool and fetch path.
//!
//! N workers pop tasks from the frontier, clear robots and the global
//! rate limiter, fetch with a size-capped streaming read, run the
//! mode-appropriate extractors and expand outlinks back into the
//! frontier. Every popped task produces exactly one primary result
//! record, whatever path it exits through.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bloom::UrlBloom;
use crate::config::Config;
use crate::extractor::ContentExtractor;
use crate::frontier::{PriorityFrontier, QueueError};
use crate::limiter::RateLimiter;
use crate::metrics::MetricsCollector;
use crate::models::{CrawlMode, CrawlResult, UrlTask};
use crate::robots::RobotsPolicy;
use crate::storage::Storage;
use crate::url_utils;

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub mode: CrawlMode,
    pub keywords: Vec<String>,
    pub max_workers: usize,
    pub max_depth: u32,
    /// Dead-link sampling in `all` mode requires the domains flag to
    /// have been passed explicitly; the mode alone does not decide it
    pub check_dead_links: bool,
    pub rate_limit_per_sec: u64,
    pub rate_limit_burst: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            mode: CrawlMode::All,
            keywords: Vec::new(),
            max_workers: 50,
            max_depth: 5,
            check_dead_links: false,
            rate_limit_per_sec: Config::RATE_LIMIT_PER_SEC,
            rate_limit_burst: Config::RATE_LIMIT_BURST,
        }
    }
}

/// What the fetch step hands to extraction.
enum FetchOutcome {
    /// 2xx HTML body, capped at the content ceiling
    Html { status: u16, body: String },
    /// Headers said non-HTML; body was never read
    NonHtml { status: u16, content_type: String },
    /// Non-2xx status; only the status is recorded
    HttpStatus { status: u16 },
}

pub struct CrawlerService {
    config: CrawlerConfig,
    storage: Arc<Storage>,
    frontier: Arc<PriorityFrontier>,
    bloom: Arc<UrlBloom>,
    robots: Arc<RobotsPolicy>,
    extractor: Arc<ContentExtractor>,
    metrics: Arc<MetricsCollector>,
    limiter: Arc<RateLimiter>,
    client: reqwest::Client,
}

impl CrawlerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CrawlerConfig,
        storage: Arc<Storage>,
        frontier: Arc<PriorityFrontier>,
        bloom: Arc<UrlBloom>,
        robots: Arc<RobotsPolicy>,
        extractor: Arc<ContentExtractor>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(Config::USER_AGENT)
            .timeout(Duration::from_secs(Config::FETCH_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(Config::POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(Config::POOL_IDLE_TIMEOUT_SECS))
            .build()?;

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_per_sec,
            config.rate_limit_burst,
        ));

        Ok(Self {
            config,
            storage,
            frontier,
            bloom,
            robots,
            extractor,
            metrics,
            limiter,
            client,
        })
    }

    /// Admit the seed. Invalid seeds are a configuration error.
    pub fn seed(&self, url: &str) -> Result<(), String> {
        if !url_utils::is_valid_url(url) {
            return Err(format!("invalid seed URL: {}", url));
        }

        self.bloom.add(url);
        let task = UrlTask::new(url.to_string(), 0);
        if self.frontier.push(task.clone()).is_err() {
            self.storage
                .store_url(&task)
                .map_err(|e| format!("failed to store seed URL: {}", e))?;
        }

        Ok(())
    }

    /// Spawn the worker pool and block until cancellation has drained
    /// every worker. There is no natural "done": the frontier may
    /// refill at any time.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut workers = JoinSet::new();

        for worker_id in 0..self.config.max_workers {
            let service = Arc::clone(&self);
            let cancel = cancel.clone();
            workers.spawn(async move {
                service.worker_loop(worker_id, cancel).await;
            });
        }

        tracing::info!("started {} crawl workers", self.config.max_workers);

        while workers.join_next().await.is_some() {}
        tracing::info!("all crawl workers stopped");
    }

    async fn worker_loop(&self, worker_id: usize, cancel: CancellationToken) {
        self.metrics.worker_started();
        tracing::debug!("worker {} up", worker_id);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let task = match self.frontier.pop() {
                Ok(task) => task,
                Err(_) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(Config::EMPTY_QUEUE_SLEEP_MS)) => continue,
                        _ = cancel.cancelled() => break,
                    }
                }
            };

            self.process_task(task, &cancel).await;
        }

        self.metrics.worker_stopped();
        tracing::debug!("worker {} down", worker_id);
    }

    /// Process one task. The result record is stored on every exit
    /// path, then the processed counter is bumped, before the worker
    /// takes another task.
    async fn process_task(&self, task: UrlTask, cancel: &CancellationToken) {
        let started = Instant::now();
        let mut result = CrawlResult::new(task.url.clone());

        self.process_inner(&task, cancel, &mut result).await;

        result.process_time_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self.storage.store_result(&result) {
            tracing::warn!("failed to store result for {}: {}", task.url, e);
        }
        self.metrics.add_urls_processed(1);
    }

    async fn process_inner(
        &self,
        task: &UrlTask,
        cancel: &CancellationToken,
        result: &mut CrawlResult,
    ) {
        if !self.robots.can_fetch(Config::USER_AGENT, &task.url).await {
            result.error = Some("blocked by robots.txt".to_string());
            return;
        }

        if self.limiter.wait(cancel).await.is_err() {
            result.error = Some("rate limit cancelled".to_string());
            return;
        }

        let body = match self.fetch_url(&task.url).await {
            Ok(FetchOutcome::Html { status, body }) => {
                result.status_code = status;
                body
            }
            Ok(FetchOutcome::NonHtml {
                status,
                content_type,
            }) => {
                result.status_code = status;
                result.error = Some(format!("skipped non-HTML content: {}", content_type));
                return;
            }
            Ok(FetchOutcome::HttpStatus { status }) => {
                result.status_code = status;
                return;
            }
            Err(e) => {
                result.error = Some(e.to_string());
                self.metrics.add_errors(1);
                return;
            }
        };

        result.title = self.extractor.extract_title(&body);

        match self.config.mode {
            CrawlMode::Email => self.extract_emails_into(&body, result),
            CrawlMode::Keywords => self.extract_keywords_into(&body, result),
            CrawlMode::Domains => self.sample_dead_links(&body, &task.url, result),
            CrawlMode::All => {
                self.extract_emails_into(&body, result);
                self.extract_keywords_into(&body, result);
                if self.config.check_dead_links {
                    self.sample_dead_links(&body, &task.url, result);
                }
            }
        }

        if task.depth < self.config.max_depth {
            let links = self.extractor.extract_links(&body, &task.url);
            result.new_urls = self.admit_new_urls(&links, task.depth + 1);
        }
    }

    fn extract_emails_into(&self, body: &str, result: &mut CrawlResult) {
        result.emails = self.extractor.extract_emails(body);
        self.metrics.add_emails_found(result.emails.len() as u64);
    }

    fn extract_keywords_into(&self, body: &str, result: &mut CrawlResult) {
        result.keywords = self.extractor.extract_keywords(body, &self.config.keywords);
        let hits: u64 = result.keywords.values().sum();
        self.metrics.add_keywords_found(hits);
    }

    fn sample_dead_links(&self, body: &str, source_url: &str, result: &mut CrawlResult) {
        let links = self.extractor.extract_links(body, source_url);
        let (dead_links, dead_domains) = self.extractor.check_dead_links(&links, source_url);
        // Sampling is async; both lists come back empty and the
        // pipeline persists its own findings later
        result.dead_links = dead_links;
        result.dead_domains = dead_domains;
        self.metrics.add_links_checked(links.len() as u64);
    }

    /// GET with the content-type gate and the streamed 2 MiB cap.
    async fn fetch_url(&self, url: &str) -> Result<FetchOutcome, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .header("Accept", Config::ACCEPT_HEADER)
            .send()
            .await?;

        let status = response.status();

        if let Some(content_type) = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
        {
            if !url_utils::is_html_content_type(content_type) {
                return Ok(FetchOutcome::NonHtml {
                    status: status.as_u16(),
                    content_type: content_type.to_string(),
                });
            }
        }

        if !status.is_success() {
            return Ok(FetchOutcome::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = self.read_capped_body(response).await?;
        Ok(FetchOutcome::Html {
            status: status.as_u16(),
            body,
        })
    }

    /// Stream the body up to the ceiling; anything past it is never
    /// buffered.
    async fn read_capped_body(&self, mut response: reqwest::Response) -> Result<String, reqwest::Error> {
        let mut body: Vec<u8> = Vec::new();

        while let Some(chunk) = response.chunk().await? {
            let remaining = Config::MAX_CONTENT_SIZE - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Dedup-filtered link admission: unseen links become depth+1 tasks
    /// in the frontier, spilling to the backlog store when it is full.
    fn admit_new_urls(&self, links: &[String], depth: u32) -> Vec<String> {
        let mut admitted = Vec::new();

        for link in links {
            if !url_utils::is_valid_url(link) {
                continue;
            }

            // test-then-add is racy across workers; a double add is
            // harmless and the store key collapses duplicate backlog
            // entries
            if self.bloom.test(link) {
                continue;
            }
            self.bloom.add(link);

            let task = UrlTask::new(link.clone(), depth);
            if let Err(QueueError::Full) = self.frontier.push(task.clone()) {
                if let Err(e) = self.storage.store_url(&task) {
                    tracing::warn!("failed to store overflow URL {}: {}", task.url, e);
                    continue;
                }
            }

            admitted.push(link.clone());
        }

        admitted
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}
