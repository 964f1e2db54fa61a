/// Webhook-driven targeted re-indexing, bypassing the full crawl.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::crawler::discover::normalize_rel_path;
use crate::crawler::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub action: UpdateAction,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlError {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct UpdateReport {
    pub processed: usize,
    pub errors: Vec<UrlError>,
}

/// A batch handed to the background worker when too large to run inline.
#[derive(Debug)]
pub struct UpdateJob {
    pub action: UpdateAction,
    pub urls: Vec<String>,
}

/// Apply one update batch. Individual URL failures are collected, never
/// aborting the rest of the batch.
pub async fn apply_batch(
    pipeline: &Pipeline,
    cache: &ResponseCache,
    action: UpdateAction,
    urls: &[String],
) -> UpdateReport {
    let mut report = UpdateReport::default();

    for raw in urls {
        let url = match normalize_rel_path(raw) {
            Ok(url) => url,
            Err(e) => {
                report.errors.push(UrlError {
                    url: raw.clone(),
                    error: e,
                });
                continue;
            }
        };

        let result = match action {
            UpdateAction::Upsert => pipeline
                .process_page(&url)
                .await
                .map(|_| ())
                .map_err(|e| format!("{e:#}")),
            UpdateAction::Delete => {
                let mut db = pipeline.db.lock().await;
                // Deleting an unknown page is a no-op, not an error.
                db.delete_page(&url).map(|_| ()).map_err(|e| e.to_string())
            }
        };

        match result {
            Ok(()) => {
                report.processed += 1;
                cache.invalidate_url(&url);
            }
            Err(e) => {
                warn!("Update failed for {url}: {e}");
                report.errors.push(UrlError { url, error: e });
            }
        }
    }

    report
}

/// Drain queued update jobs until the channel closes.
pub async fn run_worker(
    pipeline: Pipeline,
    cache: Arc<ResponseCache>,
    mut rx: mpsc::Receiver<UpdateJob>,
) {
    while let Some(job) = rx.recv().await {
        let report = apply_batch(&pipeline, &cache, job.action, &job.urls).await;
        info!(
            "Queued update drained: {} processed, {} errors",
            report.processed,
            report.errors.len()
        );
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
        Pipeline {
            db,
            embedder: Arc::new(MockEmbedder::new(8)),
            fetcher: Fetcher::new(2, 0).unwrap(),
            base: Url::parse(host).unwrap(),
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn test_upsert_batch_partial_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/good");
                then.status(200)
                    .body("<html><title>G</title><body><p>Reachable page.</p></body></html>");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let db = Arc::new(TokioMutex::new(Db::open_in_memory(8).unwrap()));
        let pipeline = pipeline(&server.base_url(), Arc::clone(&db));
        let cache = ResponseCache::new(60);

        let report = apply_batch(
            &pipeline,
            &cache,
            UpdateAction::Upsert,
            &[
                "/good".to_string(),
                "/missing".to_string(),
                "no-leading-slash".to_string(),
            ],
        )
        .await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(db.lock().await.get_page("/good").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/x");
                then.status(200)
                    .body("<html><title>X</title><body><p>Page to delete.</p></body></html>");
            })
            .await;

        let db = Arc::new(TokioMutex::new(Db::open_in_memory(8).unwrap()));
        let pipeline = pipeline(&server.base_url(), Arc::clone(&db));
        let cache = ResponseCache::new(60);

        apply_batch(&pipeline, &cache, UpdateAction::Upsert, &["/x".to_string()]).await;
        assert!(db.lock().await.get_page("/x").unwrap().is_some());

        let report =
            apply_batch(&pipeline, &cache, UpdateAction::Delete, &["/x".to_string()]).await;
        assert_eq!(report.processed, 1);
        assert!(report.errors.is_empty());
        assert!(db.lock().await.get_page("/x").unwrap().is_none());

        // Second delete of the same URL still counts as processed.
        let report =
            apply_batch(&pipeline, &cache, UpdateAction::Delete, &["/x".to_string()]).await;
        assert_eq!(report.processed, 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_update_invalidates_page_cache() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/y");
                then.status(200)
                    .body("<html><title>Y</title><body><p>Cached page.</p></body></html>");
            })
            .await;

        let db = Arc::new(TokioMutex::new(Db::open_in_memory(8).unwrap()));
        let pipeline = pipeline(&server.base_url(), Arc::clone(&db));
        let cache = ResponseCache::new(60);
        cache.put(crate::cache::page_key("/y"), serde_json::json!({"old": true}));
        cache.put(crate::cache::page_key("/other"), serde_json::json!(1));

        apply_batch(&pipeline, &cache, UpdateAction::Upsert, &["/y".to_string()]).await;

        assert!(cache.get(&crate::cache::page_key("/y")).is_none());
        assert!(cache.get(&crate::cache::page_key("/other")).is_some());
    }
}
