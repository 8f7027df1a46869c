//! End-to-end crawls against a local mock HTTP server.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use golamv2::{
    ContentExtractor, CrawlMode, CrawlerConfig, CrawlerService, DeadLinkPipeline,
    MetricsCollector, PriorityFrontier, RobotsPolicy, Storage, UrlBloom, UrlTask,
};

struct Crawl {
    _dir: TempDir,
    storage: Arc<Storage>,
    frontier: Arc<PriorityFrontier>,
    metrics: Arc<MetricsCollector>,
    service: Arc<CrawlerService>,
    dead_links: Option<Arc<DeadLinkPipeline>>,
    cancel: CancellationToken,
}

fn build_crawl(config: CrawlerConfig, capacity: usize, sample_rate: f64) -> Crawl {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(Storage::open(dir.path(), config.mode, 64).unwrap());
    let frontier = PriorityFrontier::with_capacity(Arc::clone(&storage), capacity);
    let bloom = Arc::new(UrlBloom::new().unwrap());
    let robots = Arc::new(RobotsPolicy::new().unwrap());
    let metrics = Arc::new(MetricsCollector::new());
    let cancel = CancellationToken::new();

    let needs_pipeline = config.check_dead_links || config.mode == CrawlMode::Domains;
    let dead_links = needs_pipeline.then(|| {
        Arc::new(
            DeadLinkPipeline::new(Arc::clone(&storage), Arc::clone(&metrics), cancel.clone())
                .unwrap(),
        )
    });

    let extractor = Arc::new(ContentExtractor::new(sample_rate, dead_links.clone()));

    let service = Arc::new(
        CrawlerService::new(
            config,
            Arc::clone(&storage),
            Arc::clone(&frontier),
            bloom,
            robots,
            extractor,
            Arc::clone(&metrics),
        )
        .unwrap(),
    );

    Crawl {
        _dir: dir,
        storage,
        frontier,
        metrics,
        service,
        dead_links,
        cancel,
    }
}

impl Crawl {
    /// Run workers until the predicate holds (or the deadline passes),
    /// then cancel and drain everything.
    async fn run_until<F: Fn(&Crawl) -> bool>(&self, predicate: F, deadline: Duration) {
        let service = Arc::clone(&self.service);
        let cancel = self.cancel.clone();
        let runner = tokio::spawn(async move {
            service.run(cancel).await;
        });

        let started = Instant::now();
        while started.elapsed() < deadline && !predicate(self) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.cancel.cancel();
        runner.await.unwrap();

        if let Some(pipeline) = &self.dead_links {
            pipeline.shutdown().await;
        }
    }
}

fn email_config(workers: usize) -> CrawlerConfig {
    CrawlerConfig {
        mode: CrawlMode::Email,
        max_workers: workers,
        max_depth: 5,
        ..Default::default()
    }
}

// Seed-only page with two emails and no links: one result record, both
// emails found, no errors, queue drained.
#[tokio::test]
async fn test_seed_only_email_crawl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><body>write to a@x.io or b@y.io</body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let crawl = build_crawl(email_config(2), 100, 0.2);
    crawl.service.seed(&format!("{}/", server.uri())).unwrap();

    crawl
        .run_until(
            |c| c.storage.snapshot_metrics().urls_processed >= 1,
            Duration::from_secs(10),
        )
        .await;

    let results = crawl.storage.read_results(CrawlMode::All, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].emails, vec!["a@x.io", "b@y.io"]);
    assert!(results[0].error.is_none());

    let metrics = crawl.storage.snapshot_metrics();
    assert_eq!(metrics.urls_processed, 1);
    assert_eq!(metrics.emails_found, 2);
    assert_eq!(metrics.errors, 0);
    assert!(crawl.frontier.is_empty());
}

// A robots.txt that disallows everything: the page is never requested
// and the result carries the exact denial error.
#[tokio::test]
async fn test_robots_denial_issues_no_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let crawl = build_crawl(email_config(1), 100, 0.2);
    crawl.service.seed(&format!("{}/p", server.uri())).unwrap();

    crawl
        .run_until(
            |c| c.storage.snapshot_metrics().urls_processed >= 1,
            Duration::from_secs(10),
        )
        .await;

    let results = crawl.storage.read_results(CrawlMode::All, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error.as_deref(), Some("blocked by robots.txt"));
    assert_eq!(results[0].status_code, 0);
}

// Frontier capacity 4, seed page with 10 links: overflow lands in the
// store, and the crawl still reaches every link through refills.
#[tokio::test]
async fn test_overflow_to_store_and_refill() {
    let server = MockServer::start().await;

    let links: String = (0..10)
        .map(|i| format!("<a href=\"/link{}\">l</a>", i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(links, "text/html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/link\d+$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html><body>leaf</body></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let config = CrawlerConfig {
        mode: CrawlMode::Email,
        max_workers: 1,
        max_depth: 2,
        ..Default::default()
    };
    let crawl = build_crawl(config, 4, 0.2);
    crawl.service.seed(&format!("{}/", server.uri())).unwrap();

    crawl
        .run_until(
            |c| c.storage.snapshot_metrics().urls_processed >= 11,
            Duration::from_secs(15),
        )
        .await;

    // Seed + 10 links all processed despite the tiny frontier
    let metrics = crawl.storage.snapshot_metrics();
    assert_eq!(metrics.urls_processed, 11);
    assert_eq!(metrics.errors, 0);
    assert_eq!(crawl.storage.count_backlog(), 0);
}

// Dedup round-trip on a link cycle: three mutually-linked pages are
// each fetched exactly once.
#[tokio::test]
async fn test_dedup_collapses_link_cycle() {
    let server = MockServer::start().await;
    let uri = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!("<a href=\"{}/a\">a</a>", uri),
            "text/html",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!("<a href=\"{0}/b\">b</a><a href=\"{0}/\">home</a>", uri),
            "text/html",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!("<a href=\"{0}/\">home</a><a href=\"{0}/a\">a</a>", uri),
            "text/html",
        ))
        .mount(&server)
        .await;

    let crawl = build_crawl(email_config(2), 100, 0.2);
    crawl.service.seed(&format!("{}/", uri)).unwrap();

    crawl
        .run_until(
            |c| c.storage.snapshot_metrics().urls_processed >= 3,
            Duration::from_secs(10),
        )
        .await;

    // Give any in-flight duplicate a moment to surface
    tokio::time::sleep(Duration::from_millis(200)).await;

    let results = crawl.storage.read_results(CrawlMode::All, 10).unwrap();
    assert_eq!(results.len(), 3);

    let mut urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
    urls.sort_unstable();
    let expected = {
        let mut v = vec![
            format!("{}/", uri),
            format!("{}/a", uri),
            format!("{}/b", uri),
        ];
        v.sort_unstable();
        v
    };
    assert_eq!(urls, expected);
}

// Domains mode with an unresolvable target: the pipeline writes an
// auxiliary record naming both the dead URL and the dead domain.
#[tokio::test]
async fn test_dead_link_pipeline_records_invalid_domain() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<a href=\"https://dead.invalid/x\">gone</a>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let config = CrawlerConfig {
        mode: CrawlMode::Domains,
        max_workers: 1,
        max_depth: 1,
        check_dead_links: true,
        ..Default::default()
    };
    // Sample rate 1.0 so the single link is guaranteed to be probed
    let crawl = build_crawl(config, 100, 1.0);
    crawl.service.seed(&format!("{}/", server.uri())).unwrap();

    crawl
        .run_until(
            |c| c.metrics.snapshot().dead_domains_found >= 1,
            Duration::from_secs(15),
        )
        .await;

    assert!(crawl.metrics.snapshot().dead_domains_found >= 1);

    let findings = crawl.storage.read_results(CrawlMode::Domains, 50).unwrap();
    let aux = findings
        .iter()
        .find(|r| !r.dead_links.is_empty())
        .expect("a dead-link record must exist");
    assert!(aux.dead_links.contains(&"https://dead.invalid/x".to_string()));
    assert!(aux.dead_domains.contains(&"dead.invalid".to_string()));
}

// Token bucket holds the fetch rate: with 5 permits/sec and burst 5,
// two seconds admit at most 15 GETs no matter how many workers spin.
#[tokio::test]
async fn test_rate_limit_bounds_fetch_initiations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p\d+$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let config = CrawlerConfig {
        mode: CrawlMode::Email,
        max_workers: 10,
        max_depth: 0,
        rate_limit_per_sec: 5,
        rate_limit_burst: 5,
        ..Default::default()
    };
    let crawl = build_crawl(config, 1000, 0.2);

    for i in 0..200 {
        crawl
            .frontier
            .push(UrlTask::new(format!("{}/p{}", server.uri(), i), 0))
            .unwrap();
    }

    let service = Arc::clone(&crawl.service);
    let cancel = crawl.cancel.clone();
    let runner = tokio::spawn(async move {
        service.run(cancel).await;
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    crawl.cancel.cancel();
    runner.await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let page_gets = requests
        .iter()
        .filter(|r| r.method.to_string() == "GET" && r.url.path().starts_with("/p"))
        .count();

    assert!(page_gets >= 1, "no fetches went through");
    assert!(
        page_gets <= 16,
        "rate limit exceeded: {} fetches in 2s",
        page_gets
    );
}

// A worker that pops a task always persists exactly one primary record,
// even when the fetch fails at the transport layer.
#[tokio::test]
async fn test_result_durability_on_transport_failure() {
    let crawl = build_crawl(email_config(1), 100, 0.2);
    crawl.service.seed("https://no-such-host.invalid/").unwrap();

    crawl
        .run_until(
            |c| c.storage.snapshot_metrics().urls_processed >= 1,
            Duration::from_secs(15),
        )
        .await;

    let results = crawl.storage.read_results(CrawlMode::All, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status_code, 0);
    assert!(results[0].error.is_some());

    let metrics = crawl.storage.snapshot_metrics();
    assert_eq!(metrics.urls_processed, 1);
    assert_eq!(metrics.errors, 1);
}
