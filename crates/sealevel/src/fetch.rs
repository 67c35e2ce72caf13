use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use slog::{debug, Logger};
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::{sync::Mutex, time::Instant};

pub const USER_AGENT: &str = "sealevel/0.3";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error building http client: {0}")]
    Client(reqwest::Error),
    #[error("error sending request to {url}: {source}")]
    Request {
        url: String,
        source: reqwest_middleware::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("error reading body from {url}: {source}")]
    Body { url: String, source: reqwest::Error },
    #[error("error decoding response from {url}: {source}")]
    Decode { url: String, source: reqwest::Error },
    #[error("rate limit exceeded after retries")]
    RateLimited,
}

pub struct RateLimiter {
    capacity: usize,
    tokens: f64,
    last_refill: Instant,
    refill_per_second: f64,
}

impl RateLimiter {
    pub fn new(capacity: usize, refill_per_second: f64) -> Self {
        RateLimiter {
            capacity,
            tokens: capacity as f64,
            last_refill: Instant::now(),
            refill_per_second,
        }
    }

    fn refill_tokens(&mut self) {
        let now = Instant::now();
        let elapsed_time = now.duration_since(self.last_refill).as_secs_f64();
        let tokens_to_add = elapsed_time * self.refill_per_second;

        self.tokens = (self.tokens + tokens_to_add).min(self.capacity as f64);
        self.last_refill = now;
    }

    pub async fn acquire(&mut self, tokens: f64) -> bool {
        let mut retries = 0;

        loop {
            self.refill_tokens();

            if tokens <= self.tokens {
                self.tokens -= tokens;
                return true;
            }
            if retries >= 3 {
                return false;
            }
            retries += 1;
            let deficit = tokens - self.tokens;
            tokio::time::sleep(Duration::from_secs_f64(deficit / self.refill_per_second)).await;
        }
    }
}

/// Shared entry point for every provider request. One limiter gates all of
/// them so a multi-provider pull does not hammer any single host.
pub struct HttpFetcher {
    client: ClientWithMiddleware,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    logger: Logger,
}

impl HttpFetcher {
    pub fn new(logger: Logger) -> Result<Self, Error> {
        // 4 requests burst, then one every other second
        Self::with_rate_limiter(logger, Arc::new(Mutex::new(RateLimiter::new(4, 0.5))))
    }

    pub fn with_rate_limiter(
        logger: Logger,
        rate_limiter: Arc<Mutex<RateLimiter>>,
    ) -> Result<Self, Error> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(
            Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .map_err(Error::Client)?,
        )
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

        Ok(HttpFetcher {
            client,
            rate_limiter,
            logger,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, Error> {
        let mut limiter = self.rate_limiter.lock().await;
        if !limiter.acquire(1.0).await {
            return Err(Error::RateLimited);
        }
        drop(limiter);

        debug!(self.logger, "requesting: {}", url);
        let response = self.client.get(url).send().await.map_err(|e| Error::Request {
            url: url.to_string(),
            source: e,
        })?;
        if !response.status().is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let response = self.get(url).await?;
        response.json::<T>().await.map_err(|e| Error::Decode {
            url: url.to_string(),
            source: e,
        })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, Error> {
        let response = self.get(url).await?;
        response.text().await.map_err(|e| Error::Body {
            url: url.to_string(),
            source: e,
        })
    }
}

/// Splits `[start, end]` into contiguous windows no longer than `max_days`.
/// The provider data services reject long ranges, so callers page through
/// these windows instead.
pub fn split_time_range(
    start: OffsetDateTime,
    end: OffsetDateTime,
    max_days: i64,
) -> Vec<(OffsetDateTime, OffsetDateTime)> {
    let mut windows = vec![];
    if start >= end {
        return windows;
    }
    let step = time::Duration::days(max_days);
    let mut cursor = start;
    while cursor < end {
        let window_end = (cursor + step).min(end);
        windows.push((cursor, window_end));
        cursor = window_end;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn empty_range_has_no_windows() {
        let start = datetime!(2024-03-01 00:00 UTC);
        assert!(split_time_range(start, start, 30).is_empty());
        assert!(split_time_range(start, start - time::Duration::days(1), 30).is_empty());
    }

    #[test]
    fn short_range_is_a_single_window() {
        let start = datetime!(2024-03-01 00:00 UTC);
        let end = datetime!(2024-03-10 12:00 UTC);
        let windows = split_time_range(start, end, 30);
        assert_eq!(windows, vec![(start, end)]);
    }

    #[test]
    fn long_range_is_contiguous_and_ends_at_end() {
        let start = datetime!(2024-01-01 00:00 UTC);
        let end = datetime!(2024-03-15 06:00 UTC);
        let windows = split_time_range(start, end, 30);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].0, start);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(windows.last().unwrap().1, end);
        for (window_start, window_end) in &windows {
            assert!(*window_end - *window_start <= time::Duration::days(30));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_waits_for_refill() {
        let mut limiter = RateLimiter::new(2, 1.0);
        assert!(limiter.acquire(1.0).await);
        assert!(limiter.acquire(1.0).await);
        // bucket is empty, the paused clock makes the refill wait instant
        assert!(limiter.acquire(1.0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_gives_up_on_oversized_request() {
        let mut limiter = RateLimiter::new(1, 1.0);
        assert!(!limiter.acquire(5.0).await);
    }
}
