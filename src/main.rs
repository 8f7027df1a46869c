use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use golamv2::cli::{Cli, Commands};
use golamv2::crawler::{CrawlerConfig, CrawlerService};
use golamv2::models::CrawlMode;
use golamv2::{bloom, dashboard, deadlink, explore, extractor, frontier, logging, metrics, robots, storage, url_utils};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if let Some(Commands::Explore {
        data,
        mode,
        view,
        limit,
        term,
        output,
    }) = &cli.command
    {
        let explorer = match explore::Explorer::open(data, *mode) {
            Ok(e) => e,
            Err(e) => {
                eprintln!("Failed to open data directory: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = explorer.run(*view, *limit, term.as_deref(), output) {
            eprintln!("Explore failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let Some(mode) = cli.derive_mode() else {
        eprintln!(
            "At least one hunting mode must be specified: --email, --domains, or --keywords"
        );
        std::process::exit(1);
    };

    let Some(raw_url) = cli.url.as_deref() else {
        eprintln!("A seed URL is required: --url <URL>");
        std::process::exit(1);
    };
    let seed_url = url_utils::normalize_url_for_cli(raw_url);

    if let Err(e) = logging::init_logging(&cli.data_dir) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    println!("Starting GolamV2 crawler");
    println!("  Mode:       {}", mode);
    println!("  Start URL:  {}", seed_url);
    println!("  Workers:    {}", cli.workers);
    println!("  Max Memory: {}MB", cli.memory);
    println!("  Max Depth:  {}", cli.depth);
    println!("  Dashboard:  http://localhost:{}", cli.dashboard);

    if let Err(code) = run_crawl(&cli, mode, &seed_url).await {
        std::process::exit(code);
    }

    println!("Crawling stopped");
}

async fn run_crawl(cli: &Cli, mode: CrawlMode, seed_url: &str) -> Result<(), i32> {
    // Storage failures at startup are fatal; everything downstream
    // funnels errors into result records instead
    let storage = match storage::Storage::open(&cli.data_dir, mode, cli.memory) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("failed to open storage: {}", e);
            return Err(1);
        }
    };

    let bloom = match bloom::UrlBloom::new() {
        Ok(b) => Arc::new(b),
        Err(e) => {
            tracing::error!("{}", e);
            return Err(1);
        }
    };

    let frontier = frontier::PriorityFrontier::new(Arc::clone(&storage));
    let metrics = Arc::new(metrics::MetricsCollector::new());
    metrics.set_memory_trackers(Arc::clone(&bloom), Arc::clone(&storage), Arc::clone(&frontier));

    let robots = match robots::RobotsPolicy::new() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!("failed to build robots client: {}", e);
            return Err(1);
        }
    };

    let cancel = CancellationToken::new();

    // The dead-link pipeline only exists in modes that sample outlinks
    let check_dead_links = cli.domains || mode == CrawlMode::Domains;
    let dead_links = if check_dead_links {
        match deadlink::DeadLinkPipeline::new(
            Arc::clone(&storage),
            Arc::clone(&metrics),
            cancel.clone(),
        ) {
            Ok(p) => Some(Arc::new(p)),
            Err(e) => {
                tracing::error!("failed to build dead-link client: {}", e);
                return Err(1);
            }
        }
    } else {
        None
    };

    let extractor = Arc::new(extractor::ContentExtractor::new(
        cli.sample_rate,
        dead_links.clone(),
    ));

    let crawler_config = CrawlerConfig {
        mode,
        keywords: cli.keywords.clone(),
        max_workers: cli.workers,
        max_depth: cli.depth,
        check_dead_links,
        ..Default::default()
    };

    let service = match CrawlerService::new(
        crawler_config,
        Arc::clone(&storage),
        Arc::clone(&frontier),
        Arc::clone(&bloom),
        robots,
        extractor,
        Arc::clone(&metrics),
    ) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("failed to build HTTP client: {}", e);
            return Err(1);
        }
    };

    if let Err(e) = service.seed(seed_url) {
        tracing::error!("{}", e);
        return Err(1);
    }

    metrics::spawn_metrics_ticker(
        Arc::clone(&metrics),
        Arc::clone(&frontier),
        Arc::clone(&storage),
        cancel.clone(),
    );
    Arc::clone(&storage).spawn_flush_task(cancel.clone());

    let dashboard_state = dashboard::DashboardState {
        metrics: Arc::clone(&metrics),
        storage: Arc::clone(&storage),
        frontier: Arc::clone(&frontier),
    };
    let dashboard_cancel = cancel.clone();
    let dashboard_port = cli.dashboard;
    tokio::spawn(async move {
        if let Err(e) = dashboard::serve(dashboard_state, dashboard_port, dashboard_cancel).await {
            tracing::error!("dashboard server failed: {}", e);
        }
    });

    setup_shutdown_handler(cancel.clone());

    // Blocks until cancellation has drained every worker
    Arc::clone(&service).run(cancel.clone()).await;

    // Shutdown order: workers are already joined; drain the dead-link
    // pipeline, then close the store so the final counters land on disk
    if let Some(pipeline) = &dead_links {
        pipeline.shutdown().await;
    }
    if let Err(e) = storage.close() {
        tracing::warn!("error closing storage: {}", e);
    }

    Ok(())
}

/// First Ctrl+C cancels gracefully. Second Ctrl+C exits immediately.
fn setup_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down gracefully... (Ctrl+C again to force quit)");
            cancel.cancel();

            tokio::spawn(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nForce quit");
                    std::process::exit(1);
                }
            });
        }
    });
}
