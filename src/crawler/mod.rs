/// Site crawling: discovery, fetching, and the page indexing pipeline.
pub mod discover;
pub mod fetch;
pub mod scheduler;

use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::chunker;
use crate::config::Config;
use crate::db::models::PageRecord;
use crate::db::Db;
use crate::embedder::Embedder;
use crate::extract;
use fetch::Fetcher;

/// Result of pushing one page through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Page content changed (or is new) and was re-indexed.
    Indexed,
    /// Raw content hash matched the stored page, nothing written.
    Unchanged,
    /// Extraction produced no usable text; recorded as a zero-chunk page.
    Empty,
}

/// Shared fetch → extract → chunk → embed → store pipeline.
///
/// Used both by the scheduled crawl and by webhook-driven updates.
#[derive(Clone)]
pub struct Pipeline {
    pub db: Arc<Mutex<Db>>,
    pub embedder: Arc<dyn Embedder>,
    pub fetcher: Fetcher,
    pub base: Url,
    pub config: Arc<Config>,
}

impl Pipeline {
    /// Fetch and index a single page identified by its canonical relative URL.
    pub async fn process_page(&self, rel_url: &str) -> Result<PageOutcome> {
        let abs = self
            .base
            .join(rel_url)
            .with_context(|| format!("invalid page URL {rel_url}"))?;
        let fetched = self
            .fetcher
            .fetch(&abs)
            .await
            .with_context(|| format!("fetch {rel_url}"))?;

        let content_hash = hex_digest(&fetched.body);
        let existing = {
            let db = self.db.lock().await;
            db.get_content_hash(rel_url)?
        };
        if existing.as_deref() == Some(content_hash.as_str()) {
            debug!("Page {rel_url} unchanged, skipping re-index");
            return Ok(PageOutcome::Unchanged);
        }

        let extracted = extract::extract(&fetched.body, &self.config.extract.deny_tokens);
        let empty = extracted.text.trim().is_empty();

        // Empty extraction still records the page (as zero chunks) so the
        // index listing and change detection stay complete.
        let chunks = if empty {
            debug!("Page {rel_url} has no extractable content");
            Vec::new()
        } else {
            chunker::chunk_text(
                &extracted.text,
                rel_url,
                self.config.chunking.word_budget,
            )
        };
        let embeddings = self.embed_chunks(&chunks).await;

        let page = PageRecord {
            url: rel_url.to_string(),
            title: extracted.title,
            raw_html: fetched.body,
            content_hash,
            published_at: extracted.published_at,
        };

        let mut db = self.db.lock().await;
        db.upsert_page(&page, &chunks, &embeddings)?;
        Ok(if empty {
            PageOutcome::Empty
        } else {
            PageOutcome::Indexed
        })
    }

    /// Embed all chunks of a page off the async runtime.
    ///
    /// A batch failure degrades to per-chunk embedding so a single bad input
    /// cannot take the whole page out of search; chunks that still fail are
    /// stored unembedded and remain readable in page mode.
    async fn embed_chunks(&self, chunks: &[crate::db::models::ChunkRecord]) -> Vec<Option<Vec<f32>>> {
        if chunks.is_empty() {
            return Vec::new();
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embedder = Arc::clone(&self.embedder);

        let result = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            match embedder.embed_batch(&refs) {
                Ok(vectors) => vectors.into_iter().map(Some).collect(),
                Err(e) => {
                    warn!("Batch embedding failed ({e}), retrying per chunk");
                    refs.iter()
                        .map(|text| match embedder.embed(text) {
                            Ok(v) => Some(v),
                            Err(e) => {
                                warn!("Chunk embedding failed: {e}");
                                None
                            }
                        })
                        .collect()
                }
            }
        })
        .await;

        match result {
            Ok(embeddings) => embeddings,
            Err(e) => {
                warn!("Embedding task panicked: {e}");
                vec![None; chunks.len()]
            }
        }
    }
}

/// Hex-encoded SHA-256 of the raw page body, used for change detection.
pub fn hex_digest(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use httpmock::prelude::*;

    fn pipeline(host: &str, db: Arc<Mutex<Db>>) -> Pipeline {
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
    async fn test_process_page_indexes_then_skips_unchanged() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/post");
                then.status(200)
                    .body("<html><title>T</title><body><p>Hello world content.</p></body></html>");
            })
            .await;

        let db = Arc::new(Mutex::new(Db::open_in_memory(8).unwrap()));
        let pipeline = pipeline(&server.base_url(), Arc::clone(&db));

        assert_eq!(
            pipeline.process_page("/post").await.unwrap(),
            PageOutcome::Indexed
        );
        assert_eq!(
            pipeline.process_page("/post").await.unwrap(),
            PageOutcome::Unchanged
        );

        let db = db.lock().await;
        let (summary, chunks) = db.get_page("/post").unwrap().unwrap();
        assert_eq!(summary.title, "T");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].embedded);
    }

    #[tokio::test]
    async fn test_process_page_empty_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/blank");
                then.status(200)
                    .body("<html><body><script>let x = 1;</script></body></html>");
            })
            .await;

        let db = Arc::new(Mutex::new(Db::open_in_memory(8).unwrap()));
        let pipeline = pipeline(&server.base_url(), Arc::clone(&db));

        assert_eq!(
            pipeline.process_page("/blank").await.unwrap(),
            PageOutcome::Empty
        );
        // Recorded as a zero-chunk page, not dropped
        let (summary, chunks) = db.lock().await.get_page("/blank").unwrap().unwrap();
        assert_eq!(summary.chunk_count, 0);
        assert!(chunks.is_empty());
    }
}
