/// Page fetching with typed failures and bounded retry.
///
/// Only transient failures (timeout, transport error) are retried; HTTP
/// status failures are surfaced immediately. One page's failure never aborts
/// the crawl — callers log it and move on.
use std::time::Duration;

use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("page not found")]
    NotFound,

    #[error("server returned status {0}")]
    ServerError(u16),

    #[error("network error: {0}")]
    Network(String),
}

/// A successfully fetched document.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: String,
    pub status: u16,
}

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    retries: usize,
}

impl Fetcher {
    pub fn new(timeout_secs: u64, retries: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("sitefeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, retries })
    }

    /// Fetch one URL, retrying transient failures with backoff.
    pub async fn fetch(&self, url: &Url) -> Result<Fetched, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.client.get(url.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp
                            .text()
                            .await
                            .map_err(|e| FetchError::Network(e.to_string()))?;
                        return Ok(Fetched {
                            body,
                            status: status.as_u16(),
                        });
                    }
                    // HTTP failures are not retried
                    return Err(match status.as_u16() {
                        404 | 410 => FetchError::NotFound,
                        code => FetchError::ServerError(code),
                    });
                }
                Err(err) => {
                    let mapped = if err.is_timeout() {
                        FetchError::Timeout
                    } else {
                        FetchError::Network(err.to_string())
                    };
                    if attempt < self.retries {
                        attempt += 1;
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(mapped);
                }
            }
        }
    }
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(250 * (1 << attempt.min(5) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn url_of(server: &MockServer, path: &str) -> Url {
        Url::parse(&server.url(path)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/page");
                then.status(200).body("<html>hi</html>");
            })
            .await;

        let fetcher = Fetcher::new(2, 0).unwrap();
        let fetched = fetcher.fetch(&url_of(&server, "/page")).await.unwrap();
        assert_eq!(fetched.status, 200);
        assert_eq!(fetched.body, "<html>hi</html>");
    }

    #[tokio::test]
    async fn test_fetch_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(404);
            })
            .await;

        let fetcher = Fetcher::new(2, 2).unwrap();
        let err = fetcher.fetch(&url_of(&server, "/gone")).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound));
    }

    #[tokio::test]
    async fn test_fetch_server_error_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/boom");
                then.status(503);
            })
            .await;

        let fetcher = Fetcher::new(2, 2).unwrap();
        let err = fetcher.fetch(&url_of(&server, "/boom")).await.unwrap_err();
        assert!(matches!(err, FetchError::ServerError(503)));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_fetch_network_error_retried() {
        // Unroutable port: every attempt is a connect error
        let fetcher = Fetcher::new(1, 2).unwrap();
        let url = Url::parse("http://127.0.0.1:1/none").unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_) | FetchError::Timeout));
    }
}
