use super::{Db, models::*, serialize_vector};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result, params};

impl Db {
    /// Returns the stored content hash for a page, if it is indexed.
    ///
    /// Used by the crawler as a cheap idempotence check before re-extracting.
    pub fn get_content_hash(&self, url: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT content_hash FROM pages WHERE url = ?",
                params![url],
                |row| row.get(0),
            )
            .optional()
    }

    /// Inserts or replaces a page together with its chunks and vectors.
    ///
    /// The whole replace runs in one transaction: a concurrent reader sees
    /// either the previous chunk set or the new one. `embeddings[i]` pairs
    /// with `chunks[i]`; `None` marks the chunk unembedded (excluded from
    /// search, still served in page/index modes). `published_at` is kept
    /// from the existing record when the extractor found none.
    pub fn upsert_page(
        &mut self,
        page: &PageRecord,
        chunks: &[ChunkRecord],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<()> {
        assert_eq!(
            chunks.len(),
            embeddings.len(),
            "chunks and embeddings length mismatch"
        );

        let now = Utc::now();
        let tx = self.conn.transaction()?;

        let existing_published: Option<DateTime<Utc>> = tx
            .query_row(
                "SELECT published_at FROM pages WHERE url = ?",
                params![page.url],
                |row| row.get(0),
            )
            .optional()?;

        let published_at = page
            .published_at
            .or(existing_published)
            .unwrap_or(now);

        let page_id: i64 = tx.query_row(
            r#"
            INSERT INTO pages (url, title, raw_html, content_hash, published_at, updated_at, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                raw_html = excluded.raw_html,
                content_hash = excluded.content_hash,
                published_at = excluded.published_at,
                updated_at = excluded.updated_at,
                indexed_at = CURRENT_TIMESTAMP
            RETURNING id
            "#,
            params![page.url, page.title, page.raw_html, page.content_hash, published_at, now],
            |row| row.get(0),
        )?;

        // Virtual table cascade deletion workaround
        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE page_id = ?)",
            params![page_id],
        )?;
        tx.execute("DELETE FROM chunks WHERE page_id = ?", params![page_id])?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            tx.execute(
                "INSERT INTO chunks (page_id, uid, ordinal, kind, content, embedded) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    page_id,
                    chunk.uid,
                    chunk.ordinal as i64,
                    chunk.kind.as_str(),
                    chunk.text,
                    embedding.is_some(),
                ],
            )?;
            let chunk_id = tx.last_insert_rowid();

            if let Some(vector) = embedding {
                let vector_blob = serialize_vector(vector);
                tx.execute(
                    "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                    params![chunk_id, vector_blob],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Deletes a page and all of its chunks transactionally.
    ///
    /// Returns `false` when the URL was not indexed.
    pub fn delete_page(&mut self, url: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;

        let page_id: Option<i64> = tx
            .query_row("SELECT id FROM pages WHERE url = ?", params![url], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(page_id) = page_id else {
            return Ok(false);
        };

        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE page_id = ?)",
            params![page_id],
        )?;
        // Cascade deletes chunks
        let rows = tx.execute("DELETE FROM pages WHERE id = ?", params![page_id])?;

        tx.commit()?;
        Ok(rows > 0)
    }

    /// Returns a page's metadata and its chunks in ordinal order.
    pub fn get_page(&self, url: &str) -> Result<Option<(PageSummary, Vec<StoredChunk>)>> {
        let summary: Option<PageSummary> = self
            .conn
            .query_row(
                r#"
                SELECT url, title, published_at, updated_at, indexed_at,
                       (SELECT COUNT(*) FROM chunks WHERE page_id = pages.id)
                FROM pages WHERE url = ?
                "#,
                params![url],
                map_summary_row,
            )
            .optional()?;

        let Some(summary) = summary else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT c.uid, c.ordinal, c.kind, c.content, c.embedded
            FROM chunks c JOIN pages p ON c.page_id = p.id
            WHERE p.url = ?
            ORDER BY c.ordinal ASC
            "#,
        )?;
        let rows = stmt.query_map(params![url], |row| {
            let kind: String = row.get(2)?;
            Ok(StoredChunk {
                id: row.get(0)?,
                ordinal: row.get::<_, i64>(1)? as usize,
                kind: ChunkKind::from_db(&kind),
                text: row.get(3)?,
                embedded: row.get(4)?,
            })
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }

        Ok(Some((summary, chunks)))
    }

    /// Lists page summaries ordered by published date descending.
    ///
    /// `since`/`until` bound `updated_at` for differential sync. Returns the
    /// requested window plus the total match count; an out-of-range offset
    /// yields an empty window, not an error.
    pub fn list_pages(
        &self,
        offset: usize,
        limit: usize,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<(Vec<PageSummary>, usize)> {
        let mut where_clauses: Vec<&str> = Vec::new();
        let mut filters: Vec<DateTime<Utc>> = Vec::new();

        if let Some(since) = since {
            where_clauses.push("updated_at >= ?");
            filters.push(since);
        }
        if let Some(until) = until {
            where_clauses.push("updated_at <= ?");
            filters.push(until);
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_clauses.join(" AND "))
        };

        let total: usize = {
            let sql = format!("SELECT COUNT(*) FROM pages{where_sql}");
            let params_ref: Vec<&dyn rusqlite::ToSql> =
                filters.iter().map(|f| f as &dyn rusqlite::ToSql).collect();
            self.conn
                .query_row(&sql, params_ref.as_slice(), |row| row.get::<_, i64>(0))?
                as usize
        };

        let sql = format!(
            r#"
            SELECT url, title, published_at, updated_at, indexed_at,
                   (SELECT COUNT(*) FROM chunks WHERE page_id = pages.id)
            FROM pages{where_sql}
            ORDER BY published_at DESC, url ASC
            LIMIT ? OFFSET ?
            "#
        );

        // Bind timestamps through the same ToSql impl used at write time so
        // the lexicographic comparison matches the stored text format.
        let limit = limit as i64;
        let offset = offset as i64;
        let mut params_ref: Vec<&dyn rusqlite::ToSql> =
            filters.iter().map(|f| f as &dyn rusqlite::ToSql).collect();
        params_ref.push(&limit);
        params_ref.push(&offset);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_ref.as_slice(), map_summary_row)?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }

        Ok((summaries, total))
    }

    /// Persisted time of the last completed crawl run.
    pub fn get_last_crawl(&self) -> Result<Option<DateTime<Utc>>> {
        self.conn
            .query_row("SELECT last_crawl_at FROM crawl_state WHERE id = 1", [], |row| {
                row.get(0)
            })
    }

    /// Records the completion time of a crawl run.
    pub fn set_last_crawl(&self, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE crawl_state SET last_crawl_at = ? WHERE id = 1",
            params![at],
        )?;
        Ok(())
    }
}

fn map_summary_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PageSummary> {
    Ok(PageSummary {
        url: row.get(0)?,
        title: row.get(1)?,
        published_at: row.get(2)?,
        updated_at: row.get(3)?,
        indexed_at: row.get(4)?,
        chunk_count: row.get::<_, i64>(5)? as usize,
    })
}
