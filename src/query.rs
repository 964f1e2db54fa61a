/// Query engine behind `GET /content`: page, search, and index modes.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cache::{self, ResponseCache};
use crate::chunker;
use crate::config::Config;
use crate::crawler::discover::normalize_rel_path;
use crate::db::Db;
use crate::embedder::Embedder;

pub const SCHEMA_TAG: &str = "sitefeed/1";

const DEFAULT_PAGE_SIZE: usize = 10;
const QUERY_MAX_CHARS: usize = 512;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ContentParams {
    pub url: Option<String>,
    pub q: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub since: Option<String>,
    pub until: Option<String>,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    InvalidParameter(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Mode resolution: an explicit page URL beats a search query beats the
/// default index listing.
enum Mode {
    Page(String),
    Search(String),
    Index {
        page: usize,
        limit: usize,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    },
}

pub struct QueryEngine {
    db: Arc<Mutex<Db>>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<ResponseCache>,
    config: Arc<Config>,
}

impl QueryEngine {
    pub fn new(
        db: Arc<Mutex<Db>>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<ResponseCache>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            embedder,
            cache,
            config,
        }
    }

    /// Resolve the mode and produce the response body.
    ///
    /// Index and page responses are cached; search responses are not, since
    /// their dominant cost is the query embedding that runs per request.
    pub async fn content(&self, params: &ContentParams) -> Result<Value, QueryError> {
        match self.resolve(params)? {
            Mode::Page(url) => {
                let key = cache::page_key(&url);
                if let Some((body, age)) = self.cache.get(&key) {
                    return Ok(mark_cached(body, age));
                }
                let body = self.page_body(&url).await?;
                self.cache.put(key, body.clone());
                Ok(body)
            }
            Mode::Search(query) => self.search_body(&query).await,
            Mode::Index {
                page,
                limit,
                since,
                until,
            } => {
                let key = cache::index_key(
                    page,
                    limit,
                    since.map(|t| t.timestamp()),
                    until.map(|t| t.timestamp()),
                );
                if let Some((body, age)) = self.cache.get(&key) {
                    return Ok(mark_cached(body, age));
                }
                let body = self.index_body(page, limit, since, until).await?;
                self.cache.put(key, body.clone());
                Ok(body)
            }
        }
    }

    fn resolve(&self, params: &ContentParams) -> Result<Mode, QueryError> {
        if let Some(raw) = params.url.as_deref().filter(|u| !u.trim().is_empty()) {
            let url = normalize_rel_path(raw).map_err(QueryError::InvalidParameter)?;
            return Ok(Mode::Page(url));
        }

        if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            if q.chars().count() > QUERY_MAX_CHARS {
                return Err(QueryError::InvalidParameter(format!(
                    "query must be at most {QUERY_MAX_CHARS} characters"
                )));
            }
            return Ok(Mode::Search(q.to_string()));
        }

        let page = params.page.unwrap_or(1);
        if page == 0 {
            return Err(QueryError::InvalidParameter(
                "page must be at least 1".to_string(),
            ));
        }
        let limit = params
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, self.config.serve.page_size_max);
        let since = params
            .since
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(QueryError::InvalidParameter)?;
        let until = params
            .until
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(QueryError::InvalidParameter)?;

        Ok(Mode::Index {
            page,
            limit,
            since,
            until,
        })
    }

    async fn page_body(&self, url: &str) -> Result<Value, QueryError> {
        let found = {
            let db = self.db.lock().await;
            db.get_page(url).map_err(anyhow::Error::from)?
        };
        let Some((summary, chunks)) = found else {
            return Err(QueryError::NotFound(format!("page {url} is not indexed")));
        };

        let full_text: String = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let total_chunks = chunks.len();

        Ok(json!({
            "schema": SCHEMA_TAG,
            "type": "page",
            "url": summary.url,
            "title": summary.title,
            "published_at": summary.published_at,
            "updated_at": summary.updated_at,
            "summary": chunker::summary(&full_text, self.config.chunking.summary_words),
            "chunks": chunks,
            "meta": {
                "total_chunks": total_chunks,
                "returned_chunks": total_chunks,
                "cached": false,
                "cache_age_seconds": 0,
            },
        }))
    }

    async fn index_body(
        &self,
        page: usize,
        limit: usize,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Value, QueryError> {
        // Saturate so an absurd page number yields an empty window instead
        // of an arithmetic panic; capped to keep the i64 bind positive.
        let offset = page
            .saturating_sub(1)
            .saturating_mul(limit)
            .min(i64::MAX as usize);
        let (items, total) = {
            let db = self.db.lock().await;
            db.list_pages(offset, limit, since, until)
                .map_err(anyhow::Error::from)?
        };
        let total_pages = total.div_ceil(limit).max(1);

        Ok(json!({
            "schema": SCHEMA_TAG,
            "type": "index",
            "items": items,
            "page": page,
            "total_pages": total_pages,
            "total": total,
            "meta": {
                "cached": false,
                "cache_age_seconds": 0,
            },
        }))
    }

    /// Embed the query off the runtime, bounded by the embedding timeout.
    /// On timeout or failure the response degrades to an empty result set
    /// with an explicit error instead of failing the request.
    async fn search_body(&self, query: &str) -> Result<Value, QueryError> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let embedding = tokio::time::timeout(
            Duration::from_secs(self.config.embedding.timeout_secs),
            tokio::task::spawn_blocking(move || embedder.embed(&text)),
        )
        .await;

        let vector = match embedding {
            Ok(Ok(Ok(vector))) => vector,
            Ok(Ok(Err(e))) => {
                warn!("Query embedding failed: {e}");
                return Ok(search_error_body(query, "embedding_failed", &e.to_string()));
            }
            Ok(Err(e)) => {
                warn!("Query embedding task panicked: {e}");
                return Ok(search_error_body(query, "embedding_failed", "embedding task failed"));
            }
            Err(_) => {
                warn!("Query embedding timed out");
                return Ok(search_error_body(
                    query,
                    "embedding_timeout",
                    "query embedding timed out",
                ));
            }
        };

        let hits = {
            let db = self.db.lock().await;
            db.nearest(&vector, self.config.serve.search_top_k)
                .map_err(anyhow::Error::from)?
        };

        Ok(json!({
            "schema": SCHEMA_TAG,
            "type": "search",
            "query": query,
            "results": hits,
        }))
    }
}

fn mark_cached(mut body: Value, age_secs: u64) -> Value {
    if let Some(meta) = body.get_mut("meta") {
        meta["cached"] = json!(true);
        meta["cache_age_seconds"] = json!(age_secs);
    }
    body
}

fn search_error_body(query: &str, code: &str, message: &str) -> Value {
    json!({
        "schema": SCHEMA_TAG,
        "type": "search",
        "query": query,
        "results": [],
        "error": { "code": code, "message": message },
    })
}

/// Accepts unix seconds or an RFC 3339 timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| format!("timestamp out of range: {raw}"));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| format!("invalid timestamp: {raw}"))
}
