/// OpenAI-compatible embeddings client (blocking reqwest).
///
/// Talks to `{endpoint}/embeddings`. Transient failures (timeouts, 429,
/// 5xx) are retried a bounded number of times with exponential backoff;
/// persistent failure surfaces as an [`EmbedderError`] and the caller marks
/// the affected chunks unembedded.
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    retries: usize,
}

impl OpenAiEmbedder {
    pub fn new(cfg: &EmbeddingConfig, api_key: &str) -> Result<Self, EmbedderError> {
        let auth = format!("Bearer {}", api_key.trim());
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbedderError::RequestFailed("invalid API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| EmbedderError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", cfg.endpoint.trim_end_matches('/')),
            model: cfg.model.clone(),
            dimensions: cfg.dimensions,
            retries: cfg.retries,
        })
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut attempt = 0usize;
        loop {
            let body = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };
            match self.client.post(&self.endpoint).json(&body).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return parse_response(resp, inputs.len(), self.dimensions);
                    }

                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if retryable && attempt < self.retries {
                        attempt += 1;
                        thread::sleep(backoff(attempt));
                        continue;
                    }
                    let text = resp.text().unwrap_or_else(|_| "<body unavailable>".into());
                    return Err(EmbedderError::RequestFailed(format!(
                        "{status}: {text}"
                    )));
                }
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                    if retryable && attempt < self.retries {
                        attempt += 1;
                        thread::sleep(backoff(attempt));
                        continue;
                    }
                    return Err(EmbedderError::RequestFailed(err.to_string()));
                }
            }
        }
    }
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(250 * (1 << attempt.min(5) as u32))
}

fn parse_response(
    resp: reqwest::blocking::Response,
    expected_count: usize,
    expected_dim: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let mut parsed: EmbeddingResponse = resp
        .json()
        .map_err(|e| EmbedderError::InvalidResponse(e.to_string()))?;

    if parsed.data.len() != expected_count {
        return Err(EmbedderError::InvalidResponse(format!(
            "{} embeddings for {} inputs",
            parsed.data.len(),
            expected_count
        )));
    }

    parsed.data.sort_by_key(|entry| entry.index);

    let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|e| e.embedding).collect();
    for v in &vectors {
        if v.len() != expected_dim {
            return Err(EmbedderError::DimensionMismatch {
                got: v.len(),
                expected: expected_dim,
            });
        }
    }

    Ok(vectors)
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.request(&[text])?;
        Ok(vectors.remove(0))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
