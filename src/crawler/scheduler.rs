/// Recurring crawl task with single-flight mutual exclusion.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cache::ResponseCache;
use super::discover::Discoverer;
use super::{PageOutcome, Pipeline};

/// Process-wide crawl status, shared with health reporting.
pub struct CrawlState {
    running: AtomicBool,
    last_crawl: Mutex<Option<DateTime<Utc>>>,
}

impl CrawlState {
    pub fn new(last_crawl: Option<DateTime<Utc>>) -> Self {
        Self {
            running: AtomicBool::new(false),
            last_crawl: Mutex::new(last_crawl),
        }
    }

    /// Claim the running flag. Returns false when a crawl is already active.
    pub fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self, at: DateTime<Utc>) {
        *self.last_crawl.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
        self.running.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> (bool, Option<DateTime<Utc>>) {
        let last = *self.last_crawl.lock().unwrap_or_else(|e| e.into_inner());
        (self.running.load(Ordering::Acquire), last)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlReport {
    pub discovered: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub empty: usize,
    pub failed: usize,
}

/// Run one full crawl: discover pages, fan out over a bounded worker pool,
/// then persist the crawl timestamp and drop the response cache.
pub async fn crawl_site(
    pipeline: &Pipeline,
    state: &CrawlState,
    cache: &ResponseCache,
) -> anyhow::Result<CrawlReport> {
    let discoverer = Discoverer::new(
        &pipeline.fetcher,
        pipeline.base.clone(),
        pipeline.config.crawl.max_pages,
    );
    let urls = discoverer.discover().await?;

    let mut report = CrawlReport {
        discovered: urls.len(),
        ..Default::default()
    };
    info!("Crawl started: {} pages discovered", urls.len());

    let semaphore = Arc::new(Semaphore::new(pipeline.config.crawl.workers.max(1)));
    let mut tasks = JoinSet::new();
    for url in urls {
        let pipeline = pipeline.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire().await;
            let outcome = pipeline.process_page(&url).await;
            (url, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(PageOutcome::Indexed))) => report.indexed += 1,
            Ok((_, Ok(PageOutcome::Unchanged))) => report.unchanged += 1,
            Ok((_, Ok(PageOutcome::Empty))) => report.empty += 1,
            Ok((url, Err(e))) => {
                warn!("Failed to index {url}: {e:#}");
                report.failed += 1;
            }
            Err(e) => {
                warn!("Crawl worker panicked: {e}");
                report.failed += 1;
            }
        }
    }

    let now = Utc::now();
    {
        let db = pipeline.db.lock().await;
        db.set_last_crawl(now)?;
    }
    state.finish(now);
    cache.invalidate_all();

    info!(
        "Crawl finished: {} indexed, {} unchanged, {} empty, {} failed",
        report.indexed, report.unchanged, report.empty, report.failed
    );
    Ok(report)
}

/// Timer-driven crawl loop. An interval tick that fires while a crawl is
/// still in flight is skipped, never queued.
pub async fn run_scheduler(
    pipeline: Pipeline,
    state: Arc<CrawlState>,
    cache: Arc<ResponseCache>,
) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(pipeline.config.crawl.interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if !state.try_begin() {
            info!("Crawl already running, skipping this interval");
            continue;
        }
        if let Err(e) = crawl_site(&pipeline, &state, &cache).await {
            error!("Crawl failed: {e:#}");
            state.finish(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crawler::fetch::Fetcher;
    use crate::db::Db;
    use crate::embedder::mock::MockEmbedder;
    use httpmock::prelude::*;
    use tokio::sync::Mutex as TokioMutex;
    use url::Url;

    fn pipeline(host: &str, db: Arc<TokioMutex<Db>>) -> Pipeline {
        let mut config = Config::default();
        config.site_url = host.to_string();
        config.crawl.workers = 2;
        Pipeline {
            db,
            embedder: Arc::new(MockEmbedder::new(8)),
            fetcher: Fetcher::new(2, 0).unwrap(),
            base: Url::parse(host).unwrap(),
            config: Arc::new(config),
        }
    }

    #[test]
    fn test_crawl_state_single_flight() {
        let state = CrawlState::new(None);
        assert!(state.try_begin());
        assert!(!state.try_begin());
        assert_eq!(state.snapshot().0, true);

        let at = Utc::now();
        state.finish(at);
        let (running, last) = state.snapshot();
        assert!(!running);
        assert_eq!(last, Some(at));
        assert!(state.try_begin());
    }

    #[tokio::test]
    async fn test_crawl_site_reports_and_invalidates() {
        let server = MockServer::start_async().await;
        let host = server.base_url();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sitemap.xml");
                then.status(200).body(format!(
                    "<urlset><url><loc>{host}/a</loc></url><url><loc>{host}/b</loc></url><url><loc>{host}/gone</loc></url></urlset>"
                ));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a");
                then.status(200)
                    .body("<html><title>A</title><body><p>First page body.</p></body></html>");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/b");
                then.status(200)
                    .body("<html><title>B</title><body><p>Second page body.</p></body></html>");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(404);
            })
            .await;

        let db = Arc::new(TokioMutex::new(Db::open_in_memory(8).unwrap()));
        let pipeline = pipeline(&host, Arc::clone(&db));
        let state = CrawlState::new(None);
        let cache = ResponseCache::new(60);
        cache.put(crate::cache::page_key("/stale"), serde_json::json!(1));

        assert!(state.try_begin());
        let report = crawl_site(&pipeline, &state, &cache).await.unwrap();

        assert_eq!(report.discovered, 3);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.failed, 1);
        assert!(cache.get(&crate::cache::page_key("/stale")).is_none());

        let (running, last) = state.snapshot();
        assert!(!running);
        assert!(last.is_some());
        assert_eq!(db.lock().await.get_last_crawl().unwrap(), last);
    }
}
