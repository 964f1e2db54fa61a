use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sitefeed::cache::ResponseCache;
use sitefeed::config::Config;
use sitefeed::crawler::fetch::Fetcher;
use sitefeed::crawler::scheduler::{self, CrawlState};
use sitefeed::crawler::Pipeline;
use sitefeed::db::Db;
use sitefeed::embedder::mock::MockEmbedder;
use sitefeed::embedder::openai::OpenAiEmbedder;
use sitefeed::embedder::Embedder;
use sitefeed::query::QueryEngine;
use sitefeed::server::{build_router, AppContext};
use sitefeed::updates;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sitefeed", version, about = "Single-site content indexer and server")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Run a single crawl and exit instead of serving.
    #[arg(long)]
    crawl_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    // 1. Load and validate config
    let config = Arc::new(Config::load(&cli.config)?);
    config.validate()?;
    let base = config.base_url()?;

    // 2. Open the index store
    let db = Db::open(&config.db_path, config.embedding.dimensions)
        .with_context(|| format!("failed to open index store at {}", config.db_path))?;
    let last_crawl = db.get_last_crawl()?;
    let db = Arc::new(TokioMutex::new(db));

    // 3. Pick the embedder
    let embedder: Arc<dyn Embedder> = match resolve_api_key(&config) {
        Some(api_key) => {
            info!("Using OpenAI-compatible embedder: {}", config.embedding.model);
            Arc::new(OpenAiEmbedder::new(&config.embedding, &api_key)?)
        }
        None => {
            warn!("No embedding API key configured, using deterministic mock embedder");
            Arc::new(MockEmbedder::new(config.embedding.dimensions))
        }
    };

    // 4. Assemble the pipeline and shared state
    let pipeline = Pipeline {
        db: Arc::clone(&db),
        embedder: Arc::clone(&embedder),
        fetcher: Fetcher::new(config.crawl.fetch_timeout_secs, config.crawl.fetch_retries)?,
        base,
        config: Arc::clone(&config),
    };
    let cache = Arc::new(ResponseCache::new(config.serve.cache_ttl_secs));
    let crawl_state = Arc::new(CrawlState::new(last_crawl));

    if cli.crawl_once {
        if crawl_state.try_begin() {
            let report = scheduler::crawl_site(&pipeline, &crawl_state, &cache).await?;
            info!(
                "Crawl complete: {} discovered, {} indexed, {} unchanged, {} empty, {} failed",
                report.discovered, report.indexed, report.unchanged, report.empty, report.failed
            );
        }
        return Ok(());
    }

    // 5. Background workers: update queue + recurring crawl
    let (update_tx, update_rx) = mpsc::channel(config.serve.update_queue_depth);
    tokio::spawn(updates::run_worker(
        pipeline.clone(),
        Arc::clone(&cache),
        update_rx,
    ));
    tokio::spawn(scheduler::run_scheduler(
        pipeline.clone(),
        Arc::clone(&crawl_state),
        Arc::clone(&cache),
    ));

    // 6. Serve
    let engine = Arc::new(QueryEngine::new(
        Arc::clone(&db),
        embedder,
        Arc::clone(&cache),
        Arc::clone(&config),
    ));
    let router = build_router(AppContext {
        engine,
        pipeline,
        cache,
        config: Arc::clone(&config),
        crawl_state,
        update_tx,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("Serving {} on {}", config.site_url, config.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn resolve_api_key(config: &Config) -> Option<String> {
    let var = config.embedding.api_key_env.as_deref()?;
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Some(key),
        _ => None,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install shutdown handler: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
