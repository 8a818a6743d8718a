//! HTTP feed fetching.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::parser::parse_feed;
use super::types::{FetchedFeed, Source};
use crate::config::FetchConfig;
use crate::{FeedmailError, Result};

/// Retrieves and parses the feed of a network source.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the source's feed.
    async fn fetch(&self, source: &Source) -> Result<FetchedFeed>;
}

/// reqwest-backed fetcher with a size limit and a total timeout.
///
/// Holds two clients so that `skip_tls_verify` sources don't weaken
/// verification for everyone else.
pub struct HttpFetcher {
    client: Client,
    insecure_client: Client,
    max_feed_size: u64,
}

impl HttpFetcher {
    /// Create a fetcher from the `[fetch]` configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config, false)?,
            insecure_client: build_client(config, true)?,
            max_feed_size: config.max_feed_size_bytes,
        })
    }

    fn too_large(&self, size: u64) -> FeedmailError {
        FeedmailError::Feed(format!(
            "feed too large: {} bytes (max {} bytes)",
            size, self.max_feed_size
        ))
    }
}

fn build_client(config: &FetchConfig, accept_invalid_certs: bool) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .user_agent(config.user_agent.as_str())
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| FeedmailError::Feed(format!("failed to create HTTP client: {e}")))
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, source: &Source) -> Result<FetchedFeed> {
        let url = source.url().ok_or_else(|| {
            FeedmailError::Feed(format!("source '{}' has no URL", source.name))
        })?;

        let client = if source.skip_tls_verify {
            &self.insecure_client
        } else {
            &self.client
        };

        debug!("Fetching feed {}: {}", source.name, url);

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FeedmailError::Feed(format!("failed to fetch feed: {e}")))?;

        if !response.status().is_success() {
            return Err(FeedmailError::Feed(format!("HTTP error: {}", response.status())));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(self.too_large(content_length));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedmailError::Feed(format!("failed to read response: {e}")))?;

        if bytes.len() as u64 > self.max_feed_size {
            return Err(self.too_large(bytes.len() as u64));
        }

        parse_feed(&bytes)
    }
}
