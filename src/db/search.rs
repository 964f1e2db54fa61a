use super::{Db, models::ChunkKind, serialize_vector};
use rusqlite::{Result, params};
use serde::Serialize;

/// One ranked hit from nearest-neighbor search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub page_url: String,
    pub page_title: String,
    pub ordinal: usize,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub text: String,
    pub score: f64,
}

impl Db {
    /// Nearest-neighbor search over embedded chunks by cosine similarity.
    ///
    /// Ranking is deterministic: similarity descending, ties broken by
    /// ordinal ascending then URL. Chunks without a vector never appear.
    pub fn nearest(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                c.uid,
                p.url,
                p.title,
                c.ordinal,
                c.kind,
                c.content,
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            JOIN pages p ON c.page_id = p.id
            ORDER BY distance ASC, c.ordinal ASC, p.url ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(
            params![serialize_vector(query_vector), k as i64],
            |row| {
                let kind: String = row.get(4)?;
                let distance: f64 = row.get(6)?;
                Ok(SearchHit {
                    id: row.get(0)?,
                    page_url: row.get(1)?,
                    page_title: row.get(2)?,
                    ordinal: row.get::<_, i64>(3)? as usize,
                    kind: ChunkKind::from_db(&kind),
                    text: row.get(5)?,
                    score: 1.0 - distance,
                })
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ChunkRecord, PageRecord};

    fn page(url: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            title: url.trim_start_matches('/').to_string(),
            raw_html: String::new(),
            content_hash: "h".to_string(),
            published_at: None,
        }
    }

    fn chunk(uid: &str, ordinal: usize, text: &str) -> ChunkRecord {
        ChunkRecord {
            uid: uid.to_string(),
            ordinal,
            kind: ChunkKind::Paragraph,
            text: text.to_string(),
        }
    }

    fn unit(values: [f32; 4]) -> Vec<f32> {
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        values.iter().map(|v| v / norm).collect()
    }

    #[test]
    fn test_nearest_ranks_by_similarity() {
        let mut db = Db::open_in_memory(4).unwrap();

        let close = unit([1.0, 0.1, 0.0, 0.0]);
        let far = unit([0.0, 0.0, 1.0, 0.5]);

        db.upsert_page(
            &page("/close"),
            &[chunk("c-0", 0, "close content")],
            &[Some(close)],
        )
        .unwrap();
        db.upsert_page(
            &page("/far"),
            &[chunk("f-0", 0, "far content")],
            &[Some(far)],
        )
        .unwrap();

        let query = unit([1.0, 0.0, 0.0, 0.0]);
        let hits = db.nearest(&query, 5).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].page_url, "/close");
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].score > 0.9);
    }

    #[test]
    fn test_nearest_is_deterministic() {
        let mut db = Db::open_in_memory(4).unwrap();

        for (url, uid) in [("/a", "a"), ("/b", "b"), ("/c", "c")] {
            // Identical vectors force tie-breaking
            db.upsert_page(
                &page(url),
                &[
                    chunk(&format!("{uid}-0"), 0, "same"),
                    chunk(&format!("{uid}-1"), 1, "same"),
                ],
                &[Some(unit([1.0, 0.0, 0.0, 0.0])), Some(unit([1.0, 0.0, 0.0, 0.0]))],
            )
            .unwrap();
        }

        let query = unit([1.0, 0.0, 0.0, 0.0]);
        let first = db.nearest(&query, 4).unwrap();
        for _ in 0..5 {
            let again = db.nearest(&query, 4).unwrap();
            let ids: Vec<&str> = again.iter().map(|h| h.id.as_str()).collect();
            let expected: Vec<&str> = first.iter().map(|h| h.id.as_str()).collect();
            assert_eq!(ids, expected);
        }
        // Ties resolved by ordinal before URL
        assert_eq!(first[0].ordinal, 0);
    }

    #[test]
    fn test_nearest_skips_unembedded() {
        let mut db = Db::open_in_memory(4).unwrap();

        db.upsert_page(
            &page("/mixed"),
            &[chunk("m-0", 0, "has vector"), chunk("m-1", 1, "no vector")],
            &[Some(unit([1.0, 0.0, 0.0, 0.0])), None],
        )
        .unwrap();

        let hits = db.nearest(&unit([1.0, 0.0, 0.0, 0.0]), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "m-0");
    }
}
