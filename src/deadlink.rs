//! Async dead-link pipeline.
//!
//! Sampled outlinks arrive on a bounded channel and a small worker pool
//! HEAD-probes them off the fetch path. A send that would block is
//! dropped: the input is already a lossy sample, and stalling page
//! processing on probe latency is the one thing this pipeline exists to
//! prevent. Findings are written straight to the store as auxiliary
//! result records.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::models::CrawlResult;
use crate::storage::Storage;
use crate::url_utils;

struct LinkCheckRequest {
    url: String,
    source_url: String,
}

struct PipelineShared {
    storage: Arc<Storage>,
    metrics: Arc<MetricsCollector>,
    client: reqwest::Client,
    /// URL -> dead? Cleared wholesale on overflow
    url_cache: Mutex<HashMap<String, bool>>,
    /// host -> dead? Cleared wholesale on overflow
    domain_cache: Mutex<HashMap<String, bool>>,
}

pub struct DeadLinkPipeline {
    tx: flume::Sender<LinkCheckRequest>,
    workers: tokio::sync::Mutex<Option<JoinSet<()>>>,
    shared: Arc<PipelineShared>,
}

impl DeadLinkPipeline {
    pub fn new(
        storage: Arc<Storage>,
        metrics: Arc<MetricsCollector>,
        cancel: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        // Aggressive timeout, no redirects: a probe either answers fast
        // or the target is treated as dead
        let client = reqwest::Client::builder()
            .user_agent(Config::USER_AGENT)
            .timeout(Duration::from_secs(Config::DEAD_LINK_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let (tx, rx) = flume::bounded::<LinkCheckRequest>(Config::DEAD_LINK_CHANNEL_SIZE);

        let shared = Arc::new(PipelineShared {
            storage,
            metrics,
            client,
            url_cache: Mutex::new(HashMap::new()),
            domain_cache: Mutex::new(HashMap::new()),
        });

        let mut workers = JoinSet::new();
        for _ in 0..Config::DEAD_LINK_WORKERS {
            let rx = rx.clone();
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();

            workers.spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        req = rx.recv_async() => match req {
                            Ok(req) => shared.process(req).await,
                            Err(_) => break,
                        },
                    }
                }
            });
        }

        Ok(Self {
            tx,
            workers: tokio::sync::Mutex::new(Some(workers)),
            shared,
        })
    }

    /// Queue a target for probing; silently dropped when the channel is
    /// full.
    pub fn enqueue(&self, url: String, source_url: String) {
        if self.tx.try_send(LinkCheckRequest { url, source_url }).is_err() {
            tracing::debug!("dead-link channel full, dropping sample");
        }
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    /// Wait for the workers to finish their in-flight items after the
    /// cancellation token has fired.
    pub async fn shutdown(&self) {
        let Some(mut workers) = self.workers.lock().await.take() else {
            return;
        };

        while workers.join_next().await.is_some() {}
    }

    #[cfg(test)]
    fn cache_domain(&self, host: &str, dead: bool) {
        self.shared
            .domain_cache
            .lock()
            .insert(host.to_string(), dead);
    }
}

impl PipelineShared {
    async fn process(&self, req: LinkCheckRequest) {
        let Some(host) = url_utils::get_domain(&req.url) else {
            return;
        };

        // Domain-level verdict first: one probe covers every URL on a
        // dead host
        if self.is_domain_dead(&host).await {
            self.emit(&req, vec![req.url.clone()], vec![host]);
            return;
        }

        if self.is_url_dead(&req.url).await {
            // Host answered, so only the URL is dead
            self.emit(&req, vec![req.url.clone()], Vec::new());
        }
    }

    fn emit(&self, req: &LinkCheckRequest, dead_links: Vec<String>, dead_domains: Vec<String>) {
        self.metrics.add_dead_links_found(dead_links.len() as u64);
        self.metrics.add_dead_domains_found(dead_domains.len() as u64);

        let mut result = CrawlResult::new(req.source_url.clone());
        result.dead_links = dead_links;
        result.dead_domains = dead_domains;

        if let Err(e) = self.storage.store_result(&result) {
            tracing::warn!("failed to store dead-link result: {}", e);
        }
    }

    async fn is_domain_dead(&self, host: &str) -> bool {
        if let Some(&cached) = self.domain_cache.lock().get(host) {
            return cached;
        }

        let probe_url = format!("https://{}/", host);
        // Any HTTP response at all means the host is alive
        let dead = self.client.head(&probe_url).send().await.is_err();

        self.cache_domain_verdict(host, dead);
        dead
    }

    async fn is_url_dead(&self, url: &str) -> bool {
        if let Some(&cached) = self.url_cache.lock().get(url) {
            return cached;
        }

        let dead = match self.client.head(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                status == 404 || status == 410 || status >= 500
            }
            // Transport failure on a live host still condemns the URL
            Err(_) => true,
        };

        self.cache_url_verdict(url, dead);
        dead
    }

    fn cache_domain_verdict(&self, host: &str, dead: bool) {
        let mut cache = self.domain_cache.lock();
        if cache.len() > Config::DEAD_LINK_DOMAIN_CACHE_MAX {
            cache.clear();
        }
        cache.insert(host.to_string(), dead);
    }

    fn cache_url_verdict(&self, url: &str, dead: bool) {
        let mut cache = self.url_cache.lock();
        if cache.len() > Config::DEAD_LINK_URL_CACHE_MAX {
            cache.clear();
        }
        cache.insert(url.to_string(), dead);
    }
}
