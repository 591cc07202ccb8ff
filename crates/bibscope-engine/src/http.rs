use std::time::Duration;

use bibscope_core::config::FetchConfig;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use tracing::debug;

use crate::error::Result;
use crate::sources::FetchError;

/// Longest wait honoured from a `Retry-After` header.
const MAX_RETRY_AFTER_SECS: u64 = 60;

// ─── HttpFetcher ──────────────────────────────────────────────────────────────

/// Blocking GET with retries: transport errors back off exponentially,
/// 429 responses wait for `Retry-After`.
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    pub fn get(&self, url: &str) -> std::result::Result<String, FetchError> {
        let mut attempt = 0u32;
        loop {
            let resp = self.client.get(url).send();
            match resp {
                Ok(r) if r.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= self.max_retries {
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status: r.status().as_u16(),
                        });
                    }
                    let wait = r
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(2u64.pow(attempt))
                        .min(MAX_RETRY_AFTER_SECS);
                    debug!(url, wait, "rate limited, retrying");
                    std::thread::sleep(Duration::from_secs(wait));
                    attempt += 1;
                }
                Ok(r) if r.status() == StatusCode::NOT_FOUND => {
                    return Err(FetchError::NotFound(url.to_string()));
                }
                Ok(r) if !r.status().is_success() => {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: r.status().as_u16(),
                    });
                }
                Ok(r) => return r.text().map_err(FetchError::Http),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(FetchError::Http(e));
                    }
                    let backoff = 2u64.pow(attempt);
                    debug!(url, backoff, error = %e, "request failed, retrying");
                    std::thread::sleep(Duration::from_secs(backoff));
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        let config = FetchConfig {
            timeout_secs: 5,
            max_retries: 0,
            user_agent: "bibscope-test".to_string(),
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert_eq!(fetcher.max_retries, 0);
    }

    #[test]
    fn unreachable_host_is_a_fetch_error() {
        let config = FetchConfig {
            timeout_secs: 2,
            max_retries: 0,
            ..FetchConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        // port 9 on localhost is not expected to serve HTTP
        assert!(fetcher.get("http://127.0.0.1:9/refs.bib").is_err());
    }
}
