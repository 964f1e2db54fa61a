//! # sitefeed — single-site content indexing and serving engine
//!
//! Crawls one website, extracts clean text from its pages, chunks and embeds
//! that text into a SQLite + sqlite-vec index, and serves it back to machine
//! consumers (LLM agents, sync clients) through a paginated, chunked JSON
//! protocol.
//!
//! ## Architecture
//!
//! - **[`config`]** — JSON configuration loading, validation, defaults
//! - **[`db`]** — SQLite + sqlite-vec index store (pages, chunks, vectors)
//! - **[`embedder`]** — Text embedding behind a trait (OpenAI-compatible HTTP or mock)
//! - **[`extract`]** — Boilerplate removal, HTML → clean paragraph text
//! - **[`chunker`]** — Word-budgeted chunking with deterministic chunk IDs
//! - **[`crawler`]** — Discovery, fetching, and the recurring crawl scheduler
//! - **[`updates`]** — Webhook-driven targeted re-index (inline + queued)
//! - **[`query`]** — Index / page / search query modes over the store
//! - **[`cache`]** — TTL + event-invalidated response cache
//! - **[`server`]** — axum HTTP surface (`/content`, `/update`, `/health`)

pub mod cache;
pub mod chunker;
pub mod config;
pub mod crawler;
pub mod db;
pub mod embedder;
pub mod extract;
pub mod query;
pub mod server;
pub mod updates;
