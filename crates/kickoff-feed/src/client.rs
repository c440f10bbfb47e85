use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use crate::cadence::Cadence;
use crate::error::FetchError;
use crate::range::DateRange;

pub const DEFAULT_BASE_URL: &str = "https://api.football-data.org/v4";
const AUTH_HEADER: &str = "X-Auth-Token";
const BODY_PREVIEW_CHARS: usize = 200;

/// Everything the producer needs to talk to upstream.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub cadence: Cadence,
    pub request_timeout: Duration,
}

/// Source of raw match documents.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(&self, range: &DateRange) -> Result<Bytes, FetchError>;
}

#[async_trait]
impl<T: FetchClient + ?Sized> FetchClient for Arc<T> {
    async fn fetch(&self, range: &DateRange) -> Result<Bytes, FetchError> {
        (**self).fetch(range).await
    }
}

/// football-data.org v4 client.
pub struct FootballDataClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    request_timeout: Duration,
}

impl FootballDataClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(FetchError::Http)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.request_timeout)
        } else {
            FetchError::Http(err)
        }
    }
}

#[async_trait]
impl FetchClient for FootballDataClient {
    #[instrument(skip_all, fields(range = %range))]
    async fn fetch(&self, range: &DateRange) -> Result<Bytes, FetchError> {
        let url = format!("{}/matches", self.base_url);
        debug!(%url, "fetching matches");

        let started = Instant::now();
        let resp = self
            .client
            .get(&url)
            .query(&[("dateFrom", range.date_from()), ("dateTo", range.date_to())])
            .header(AUTH_HEADER, self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.classify(e))?;
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            preview = %preview(&body),
            "upstream responded"
        );

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: preview(&body),
            });
        }
        Ok(body)
    }
}

/// First characters of a body for logs.
fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.into_owned(),
    }
}
