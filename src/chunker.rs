//! Chunking: extracted text → typed, word-budgeted chunks.
//!
//! Paragraphs (blank-line separated blocks) are greedily packed into chunks.
//! A chunk closes once its word count reaches the budget, so a paragraph is
//! never split: an oversized paragraph simply forms its own oversized chunk,
//! and the paragraph that crosses the budget stays in the chunk it crossed it
//! in. Chunk IDs derive from the page URL and the ordinal, so re-chunking
//! unchanged content reproduces identical IDs.
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use regex::Regex;

use crate::db::models::{ChunkKind, ChunkRecord};

/// Words below which a single-line chunk classifies as a heading.
const HEADING_MAX_WORDS: usize = 15;

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s").expect("static regex"));

/// Stable 16-hex-char digest of a page URL; the chunk ID prefix.
pub fn page_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Split extracted text into typed chunks for one page.
pub fn chunk_text(text: &str, page_url: &str, word_budget: usize) -> Vec<ChunkRecord> {
    let prefix = page_hash(page_url);

    let mut chunks: Vec<ChunkRecord> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;

    let mut close = |current: &mut Vec<&str>, current_words: &mut usize, chunks: &mut Vec<ChunkRecord>| {
        if current.is_empty() {
            return;
        }
        let text = current.join("\n\n");
        let ordinal = chunks.len();
        chunks.push(ChunkRecord {
            uid: format!("{prefix}-{ordinal}"),
            ordinal,
            kind: classify(&text),
            text,
        });
        current.clear();
        *current_words = 0;
    };

    for para in text.split("\n\n") {
        let para = para.trim_matches(|c: char| c == '\n' || c == '\r');
        if para.trim().is_empty() {
            continue;
        }

        current.push(para);
        current_words += count_words(para);

        // The paragraph that crosses the budget closes the chunk with it,
        // so a 499-word + 10-word pair stays one 509-word chunk.
        if current_words >= word_budget {
            close(&mut current, &mut current_words, &mut chunks);
        }
    }
    close(&mut current, &mut current_words, &mut chunks);

    chunks
}

/// First `max_words` words of the cleaned text, independent of chunking.
pub fn summary(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }
    let mut out = words[..max_words].join(" ");
    out.push('…');
    out
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Heuristic chunk classification, explicit markers first.
fn classify(text: &str) -> ChunkKind {
    if text.starts_with("```") {
        return ChunkKind::Code;
    }

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if !lines.is_empty() && lines.iter().all(|l| l.starts_with("> ") || *l == ">") {
        return ChunkKind::Quote;
    }

    let listish = lines
        .iter()
        .filter(|l| {
            let l = l.trim_start();
            l.starts_with("- ") || l.starts_with("* ") || NUMBERED_LINE.is_match(l)
        })
        .count();
    if !lines.is_empty() && listish * 2 > lines.len() {
        return ChunkKind::List;
    }

    if lines.len() == 1 && count_words(text) < HEADING_MAX_WORDS {
        return ChunkKind::Heading;
    }

    ChunkKind::Paragraph
}

// ── Tests ────────────────────────────────────────────────────────────
