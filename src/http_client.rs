use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    pub min_delay: Duration,
    pub rate_limit_tries: u32,
    pub backoff_base_secs: f64,
    pub backoff_cap_secs: f64,
    pub jitter_secs: f64,
    pub server_error_retries: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(3000),
            rate_limit_tries: 6,
            backoff_base_secs: 2.0,
            backoff_cap_secs: 120.0,
            jitter_secs: 1.5,
            server_error_retries: 3,
        }
    }
}

/// Sleep before retry `attempt` (0-based) after a 429:
/// `min(cap, base * 2^attempt + jitter)`.
pub fn backoff_delay(policy: &FetchPolicy, attempt: u32, jitter: f64) -> Duration {
    let raw = policy.backoff_base_secs * 2f64.powi(attempt as i32) + jitter;
    Duration::from_secs_f64(raw.min(policy.backoff_cap_secs).max(0.0))
}

/// Blocking HTTP session for one pipeline run. Spaces requests by the
/// policy's minimum delay and retries rate-limited and 5xx responses.
/// Proxies come from `HTTP_PROXY` / `HTTPS_PROXY`.
pub struct HttpFetcher {
    client: Client,
    policy: FetchPolicy,
    last_request: Option<Instant>,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            policy,
            last_request: None,
        })
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.policy.min_delay {
                thread::sleep(self.policy.min_delay - elapsed);
            }
        }
        self.last_request = Some(Instant::now());
    }

    pub fn get_text(&mut self, url: &str) -> Result<String, FetchError> {
        let mut rate_limited = 0u32;
        let mut server_errors = 0u32;
        loop {
            self.pace();
            debug!(url, "GET");
            let resp = self.client.get(url).send()?;
            let status = resp.status();
            if status.is_success() {
                return Ok(resp.text()?);
            }
            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    rate_limited += 1;
                    if rate_limited >= self.policy.rate_limit_tries {
                        return Err(FetchError::Exhausted {
                            url: url.to_string(),
                            tries: rate_limited,
                        });
                    }
                    let jitter = rand::thread_rng().gen_range(0.0..=self.policy.jitter_secs.max(0.0));
                    let wait = backoff_delay(&self.policy, rate_limited - 1, jitter);
                    warn!(url, attempt = rate_limited, wait_secs = wait.as_secs_f64(), "rate limited, backing off");
                    thread::sleep(wait);
                }
                StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                    if server_errors < self.policy.server_error_retries =>
                {
                    server_errors += 1;
                    warn!(url, status = status.as_u16(), attempt = server_errors, "server error, retrying");
                }
                StatusCode::FORBIDDEN => {
                    warn!(url, "403 forbidden; anti-bot or network blocking");
                    return Err(FetchError::Blocked { url: url.to_string() });
                }
                _ => {
                    return Err(FetchError::Http {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
            }
        }
    }

    pub fn get_json(&mut self, url: &str) -> Result<Value, FetchError> {
        let body = self.get_text(url)?;
        serde_json::from_str(&body).map_err(|source| FetchError::Json {
            url: url.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = FetchPolicy::default();
        assert_eq!(backoff_delay(&policy, 0, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(&policy, 2, 0.5), Duration::from_secs_f64(8.5));
        assert_eq!(backoff_delay(&policy, 10, 1.0), Duration::from_secs(120));
    }
}
