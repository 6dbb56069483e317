use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

pub mod musicbrainz;
pub mod omdb;
pub mod tmdb;

// metadata providers
//
// each provider is an opaque search + details endpoint.  results are
// normalized into ProviderMetadata so the merge step can fill media item
// fields without knowing who answered.

#[derive(Clone, Debug)]
pub struct ProviderResult {
    pub external_id: String,
    pub title: String,
    pub year: Option<i32>,
}

#[derive(Clone, Debug, Default)]
pub struct ProviderMetadata {
    pub external_id: String,
    pub raw_data: Value,
    pub rating: Option<f64>,
    pub genre: Option<String>,
    pub director: Option<String>,
    pub runtime: Option<i64>,
    pub original_title: Option<String>,
    pub cover_url: Option<String>,
    pub trailer_url: Option<String>,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    // media type names (per the media_types table) this provider serves
    fn supports(&self, media_type: &str) -> bool;

    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: &str,
    ) -> Result<Vec<ProviderResult>>;

    async fn details(&self, external_id: &str) -> Result<ProviderMetadata>;
}

// per-provider pacing: one request per interval, callers queue on the lock
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;

        if let Some(prev) = *last {
            let elapsed = prev.elapsed();

            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limiter_paces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(30));

        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // three calls, two enforced gaps
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn first_call_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(10));

        let start = Instant::now();
        limiter.acquire().await;

        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
