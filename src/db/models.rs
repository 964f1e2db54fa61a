use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a chunk, derived from the extracted text's markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Paragraph,
    Heading,
    List,
    Code,
    Quote,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::List => "list",
            Self::Code => "code",
            Self::Quote => "quote",
        }
    }

    /// Parse the stored column value. Unknown values fall back to paragraph
    /// so an old store never breaks reads.
    pub fn from_db(s: &str) -> Self {
        match s {
            "heading" => Self::Heading,
            "list" => Self::List,
            "code" => Self::Code,
            "quote" => Self::Quote,
            _ => Self::Paragraph,
        }
    }
}

/// A chunk ready for insertion, produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Deterministic ID: hash(page url) + "-" + ordinal.
    pub uid: String,
    pub ordinal: usize,
    pub kind: ChunkKind,
    pub text: String,
}

/// A chunk as read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub ordinal: usize,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub text: String,
    pub embedded: bool,
}

/// A full page record to be written as one unit.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    pub raw_html: String,
    pub content_hash: String,
    /// Publication time extracted from the page, when present.
    pub published_at: Option<DateTime<Utc>>,
}

/// Page metadata returned by index mode and differential sync.
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub chunk_count: usize,
}
