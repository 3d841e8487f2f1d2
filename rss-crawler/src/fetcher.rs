use crate::types::{CrawlerError, FetchConfig, FetchResult, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::Utc;
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

const BYTES_PER_MB: usize = 1024 * 1024;

/// HTTP client shared by feed retrieval and page fetching.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(redirect)
            .build()?;

        Ok(Self {
            client,
            config,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Fetches a feed document, retrying transport errors and non-success
    /// statuses with exponential backoff. Never returns `Err` for HTTP-level
    /// failures; those are reported through `FetchResult::success`.
    pub async fn fetch_feed(&self, url: &str, etag: Option<&str>, last_modified: Option<&str>) -> Result<FetchResult> {
        let start_time = Instant::now();
        let fetch_time = Utc::now();

        debug!("Fetching feed: {}", url);

        self.wait_for_host_slot(url).await?;

        let mut backoff = self.retry_backoff();
        let mut last_error = None;
        let mut last_status = None;

        for attempt in 0..=self.config.max_retries {
            match self.fetch_with_conditional_headers(url, etag, last_modified).await {
                Ok(response) => {
                    let response_time = start_time.elapsed().as_millis() as u64;
                    let status = response.status();
                    last_status = Some(status.as_u16());

                    if status == reqwest::StatusCode::NOT_MODIFIED {
                        debug!("Feed not modified: {}", url);
                        return Ok(FetchResult {
                            success: true,
                            error: None,
                            fetch_time,
                            response_time_ms: response_time,
                            http_status: Some(status.as_u16()),
                            etag: etag.map(|s| s.to_string()),
                            last_modified: last_modified.map(|s| s.to_string()),
                            content: None,
                        });
                    }

                    if !status.is_success() {
                        last_error = Some(CrawlerError::General(format!(
                            "HTTP {}: {}",
                            status,
                            status.canonical_reason().unwrap_or("Unknown")
                        )));

                        // Client errors other than throttling will not improve on retry.
                        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
                            break;
                        }
                        if attempt < self.config.max_retries {
                            if let Some(delay) = backoff.next_backoff() {
                                warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                                tokio::time::sleep(delay).await;
                                continue;
                            }
                        }
                        break;
                    }

                    let new_etag = header_value(&response, "etag");
                    let new_last_modified = header_value(&response, "last-modified");

                    match self.read_body(response).await {
                        Ok(content) => {
                            info!("Fetched feed: {} ({} bytes)", url, content.len());
                            return Ok(FetchResult {
                                success: true,
                                error: None,
                                fetch_time,
                                response_time_ms: response_time,
                                http_status: Some(status.as_u16()),
                                etag: new_etag,
                                last_modified: new_last_modified,
                                content: Some(content),
                            });
                        }
                        Err(e @ CrawlerError::FeedTooLarge { .. }) => {
                            return Ok(FetchResult::failed(
                                fetch_time,
                                response_time,
                                Some(status.as_u16()),
                                e.to_string(),
                            ));
                        }
                        Err(e) => {
                            last_error = Some(e);
                        }
                    }
                }
                Err(e) => {
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                }
            }
        }

        let error_msg = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        error!("Failed to fetch feed {}: {}", url, error_msg);

        Ok(FetchResult::failed(
            fetch_time,
            start_time.elapsed().as_millis() as u64,
            last_status,
            error_msg,
        ))
    }

    /// Fetches an article page body without retries.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        debug!("Fetching page: {}", url);

        self.wait_for_host_slot(url).await?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlerError::General(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        self.read_body(response).await
    }

    // Reads the body chunk by chunk and gives up once it exceeds
    // `max_feed_size_mb`, whether or not the server announced a length.
    async fn read_body(&self, mut response: Response) -> Result<String> {
        let limit = self.config.max_feed_size_mb * BYTES_PER_MB;

        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit {
                return Err(CrawlerError::FeedTooLarge {
                    size_mb: content_length as usize / BYTES_PER_MB,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(CrawlerError::FeedTooLarge {
                    size_mb: (body.len() + chunk.len()) / BYTES_PER_MB,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn fetch_with_conditional_headers(&self, url: &str, etag: Option<&str>, last_modified: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(url);

        if let Some(etag) = etag {
            request = request.header("If-None-Match", etag);
        }

        if let Some(last_modified) = last_modified {
            request = request.header("If-Modified-Since", last_modified);
        }

        Ok(request.send().await?)
    }

    fn retry_backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let delay = Duration::from_secs(self.config.retry_delay_seconds);
        ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 32,
            multiplier: 2.0,
            max_elapsed_time: Some(delay * 60),
            ..Default::default()
        }
    }

    // Reserves the next request slot for the URL's host and sleeps until it
    // starts. The map lock is released before sleeping.
    async fn wait_for_host_slot(&self, url: &str) -> Result<()> {
        let host = Url::parse(url)?.host_str().unwrap_or("").to_string();
        let interval = Duration::from_millis(self.config.per_host_interval_ms);

        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let start = match slots.get(&host) {
                Some(next) if *next > now => *next,
                _ => now,
            };
            slots.insert(host.clone(), start + interval);
            start.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }

        Ok(())
    }
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
