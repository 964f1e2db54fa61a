//! Index store backed by SQLite and sqlite-vec.
//!
//! Owns the durable state of the engine: page records, their chunks, and the
//! chunk embedding vectors. A page is always replaced as a unit inside one
//! transaction, so readers observe either the old or the new chunk set.
use rusqlite::{Connection, Result};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use tracing::info;

pub mod models;
pub mod pages;
pub mod search;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    raw_html TEXT NOT NULL DEFAULT '',
    content_hash TEXT NOT NULL,
    published_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_pages_url ON pages(url);
CREATE INDEX IF NOT EXISTS idx_pages_published ON pages(published_at);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id INTEGER NOT NULL,
    uid TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    embedded INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_page_id ON chunks(page_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_uid ON chunks(uid);

CREATE TABLE IF NOT EXISTS crawl_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_crawl_at DATETIME
);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A wrapper around a SQLite connection initialized with sqlite-vec and the
/// application schema.
pub struct Db {
    pub(crate) conn: Connection,
    pub(crate) dimensions: usize,
}

impl Db {
    /// Open a database at the given path and initialize the schema.
    ///
    /// `dimensions` fixes the width of the vec0 virtual table; it must match
    /// the embedder in use.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing index store: {}", path.display());

        init_sqlite_vec();

        let conn = Connection::open(path)?;
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn, dimensions)?;

        info!("Index store initialized");

        Ok(Self { conn, dimensions })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn, dimensions)?;
        Ok(Self { conn, dimensions })
    }

    fn init_schema(conn: &Connection, dimensions: usize) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)?;
        // vec0 does not support parameterized column widths
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(embedding FLOAT[{dimensions}]);"
        ))?;
        conn.execute(
            "INSERT OR IGNORE INTO crawl_state (id, last_crawl_at) VALUES (1, NULL)",
            [],
        )?;
        Ok(())
    }

    /// Embedding dimensionality this store was opened with.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Helper to serialize a float32 vector into bytes for the vec0 virtual table.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
