//! Feed types for feedmail.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use url::Url;

use crate::config::FeedConfig;
use crate::template::{TemplateContext, Value};
use crate::{FeedmailError, Result};

/// Where a source's feed bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    /// Fetched over HTTP(S).
    Network { url: Url },
    /// Standard output of an external command.
    Command { argv: Vec<String> },
}

/// A configured feed origin. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    /// Display name used in logs and templates.
    pub name: String,
    /// Network URL or command line.
    pub origin: Origin,
    /// Accept invalid TLS certificates when fetching.
    pub skip_tls_verify: bool,
}

impl Source {
    /// Create a network source. The URL must be http(s) and carry a host.
    pub fn network(name: impl Into<String>, url: &str) -> Result<Self> {
        let name = name.into();
        let url = Url::parse(url)
            .map_err(|e| FeedmailError::Config(format!("feed '{name}': invalid URL '{url}': {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(FeedmailError::Config(format!(
                    "feed '{name}': unsupported URL scheme: {scheme}"
                )));
            }
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(FeedmailError::Config(format!("feed '{name}': URL has no host")));
        }

        Ok(Self {
            name,
            origin: Origin::Network { url },
            skip_tls_verify: false,
        })
    }

    /// Create a command source from a non-empty argument vector.
    pub fn command(name: impl Into<String>, argv: Vec<String>) -> Result<Self> {
        let name = name.into();
        if argv.first().map_or(true, |program| program.is_empty()) {
            return Err(FeedmailError::Config(format!(
                "feed '{name}': exec needs at least a program name"
            )));
        }

        Ok(Self {
            name,
            origin: Origin::Command { argv },
            skip_tls_verify: false,
        })
    }

    /// Set whether TLS certificate verification is skipped.
    pub fn with_skip_tls_verify(mut self, skip: bool) -> Self {
        self.skip_tls_verify = skip;
        self
    }

    /// The feed URL, for network sources.
    pub fn url(&self) -> Option<&Url> {
        match &self.origin {
            Origin::Network { url } => Some(url),
            Origin::Command { .. } => None,
        }
    }

    /// The partition key of a network source: its host, plus the port when
    /// the URL names a non-default one.
    pub fn host_key(&self) -> Option<String> {
        let url = self.url()?;
        let host = url.host_str()?.to_lowercase();
        Some(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        })
    }

    /// Template representation exposed as `source`.
    pub fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        map.insert("name".to_string(), Value::string(&self.name));
        map.insert(
            "url".to_string(),
            Value::string(self.url().map(Url::as_str).unwrap_or_default()),
        );
        let argv = match &self.origin {
            Origin::Command { argv } => argv.clone(),
            Origin::Network { .. } => Vec::new(),
        };
        map.insert("exec".to_string(), Value::from(argv));
        map.insert("skip_tls_verify".to_string(), Value::Bool(self.skip_tls_verify));
        Value::Object(map)
    }
}

impl TryFrom<&FeedConfig> for Source {
    type Error = FeedmailError;

    fn try_from(feed: &FeedConfig) -> Result<Self> {
        let source = match (&feed.url, feed.exec.is_empty()) {
            (Some(url), true) => Source::network(&feed.name, url)?,
            (None, false) => Source::command(&feed.name, feed.exec.clone())?,
            (Some(_), false) => {
                return Err(FeedmailError::Config(format!(
                    "feed '{}': set either url or exec, not both",
                    feed.name
                )));
            }
            (None, true) => {
                return Err(FeedmailError::Config(format!(
                    "feed '{}': one of url or exec is required",
                    feed.name
                )));
            }
        };
        Ok(source.with_skip_tls_verify(feed.skip_tls_verify))
    }
}

/// A parsed feed, as retrieved from one source at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedFeed {
    /// Feed title.
    pub title: Option<String>,
    /// Site URL (the website the feed belongs to).
    pub link: Option<String>,
    /// The feed's own canonical URL (`rel="self"`).
    pub feed_link: Option<String>,
    /// Every link the feed declares.
    pub links: Vec<String>,
    /// Feed description.
    pub description: Option<String>,
    /// Entries in the feed's native order.
    pub items: Vec<Item>,
}

impl FetchedFeed {
    /// Template representation exposed as `feed`.
    pub fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        map.insert("title".to_string(), Value::optional(self.title.clone()));
        map.insert("link".to_string(), Value::optional(self.link.clone()));
        map.insert("feed_link".to_string(), Value::optional(self.feed_link.clone()));
        map.insert("links".to_string(), Value::from(self.links.clone()));
        map.insert(
            "description".to_string(),
            Value::optional(self.description.clone()),
        );
        Value::Object(map)
    }
}

/// One entry of a feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    /// Item title.
    pub title: Option<String>,
    /// Link to the full content.
    pub link: Option<String>,
    /// Globally unique identifier from the source.
    pub guid: Option<String>,
    /// Summary text.
    pub description: Option<String>,
    /// Full body content.
    pub content: Option<String>,
    /// First author's name.
    pub author: Option<String>,
    /// Publication (or last update) time.
    pub published: Option<DateTime<Utc>>,
}

impl Item {
    /// Template representation exposed as `item`.
    pub fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        map.insert("title".to_string(), Value::optional(self.title.clone()));
        map.insert("link".to_string(), Value::optional(self.link.clone()));
        map.insert("guid".to_string(), Value::optional(self.guid.clone()));
        map.insert(
            "description".to_string(),
            Value::optional(self.description.clone()),
        );
        map.insert("content".to_string(), Value::optional(self.content.clone()));
        map.insert("author".to_string(), Value::optional(self.author.clone()));
        map.insert(
            "published".to_string(),
            Value::optional(
                self.published
                    .map(|p| p.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ),
        );
        Value::Object(map)
    }
}

/// Context for the feed identity template: `source` and `feed`.
pub fn feed_context(source: &Source, feed: &FetchedFeed) -> TemplateContext {
    let mut context = TemplateContext::new();
    context.set("source", source.to_value());
    context.set("feed", feed.to_value());
    context
}

/// Context for item templates: `source`, `feed` and `item`.
pub fn item_context(source: &Source, feed: &FetchedFeed, item: &Item) -> TemplateContext {
    let mut context = feed_context(source, feed);
    context.set("item", item.to_value());
    context
}
