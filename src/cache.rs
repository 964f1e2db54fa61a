/// TTL response cache with event-driven invalidation.
///
/// Stores serialized response bodies keyed by the normalized query. Entries
/// expire after the configured TTL; index mutations evict the affected page
/// entry plus every index listing, and a completed crawl clears everything.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

struct Entry {
    body: Value,
    stored_at: Instant,
}

pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ResponseCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Look up a fresh entry. Returns the stored body and its age in seconds.
    pub fn get(&self, key: &str) -> Option<(Value, u64)> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) => {
                let age = entry.stored_at.elapsed();
                if age > self.ttl {
                    entries.remove(key);
                    None
                } else {
                    Some((entry.body.clone(), age.as_secs()))
                }
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, body: Value) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            Entry {
                body,
                stored_at: Instant::now(),
            },
        );
    }

    /// Evict the page entry for `url` and all index listings.
    ///
    /// Index listings aggregate page metadata, so any page mutation can
    /// change their content.
    pub fn invalidate_url(&self, url: &str) {
        let page = page_key(url);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|key, _| key != &page && !key.starts_with("index:"));
    }

    pub fn invalidate_all(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

pub fn page_key(url: &str) -> String {
    format!("page:{url}")
}

pub fn index_key(page: usize, limit: usize, since: Option<i64>, until: Option<i64>) -> String {
    format!(
        "index:p{page}:l{limit}:s{}:u{}",
        since.map_or_else(|| "-".to_string(), |t| t.to_string()),
        until.map_or_else(|| "-".to_string(), |t| t.to_string()),
    )
}
