//! Test helpers for pipeline tests.
//!
//! Provides a scripted fetcher, a recording mailer and a coordinator
//! builder backed by a temporary identity store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::Instant;

use feedmail::config::{EmailConfig, SmtpConfig, StorageConfig};
use feedmail::{
    Coordinator, FeedFetcher, FeedmailError, FetchedFeed, FileStore, IdentityTemplates, Item,
    Mailer, MessageTemplates, OutgoingMessage, Result, RunOptions, Source, TemplateEngine,
};

/// Recipient used by every test coordinator.
pub const RECIPIENT: &str = "me@example.com";

/// Fetcher serving feeds registered per URL. Unknown URLs fail like a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    feeds: Mutex<HashMap<String, FetchedFeed>>,
    fetches: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `feed` for `url` from now on.
    pub fn set_feed(&self, url: &str, feed: FetchedFeed) {
        self.feeds.lock().unwrap().insert(url.to_string(), feed);
    }

    /// Names of fetched sources with the time each fetch started.
    pub fn fetches(&self) -> Vec<(String, Instant)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, source: &Source) -> Result<FetchedFeed> {
        self.fetches
            .lock()
            .unwrap()
            .push((source.name.clone(), Instant::now()));

        let url = source.url().map(|u| u.to_string()).unwrap_or_default();
        self.feeds
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .ok_or_else(|| FeedmailError::Feed("HTTP error: 404 Not Found".to_string()))
    }
}

/// Mailer that records every message, or refuses them while failing.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMessage>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Subjects of the messages sent so far, sorted.
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.sent().into_iter().map(|m| m.subject).collect();
        subjects.sort();
        subjects
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedmailError::Delivery("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Create an initialized identity store in a temporary directory.
pub fn setup_store() -> (Arc<FileStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::init(temp_dir.path()).unwrap());
    (store, temp_dir)
}

/// Build a coordinator with default templates around the given fakes.
pub fn build_coordinator(
    store: Arc<FileStore>,
    fetcher: Arc<ScriptedFetcher>,
    mailer: Arc<RecordingMailer>,
    fetch_delay: Duration,
) -> Coordinator {
    let engine = TemplateEngine::new();
    let smtp = SmtpConfig {
        address: "localhost:25".to_string(),
        sender: "{{feed.title | nonewlines}} <feeds@example.com>".to_string(),
        recipient: RECIPIENT.to_string(),
        ..Default::default()
    };

    Coordinator::new(
        store,
        fetcher,
        mailer,
        IdentityTemplates::compile(&engine, &StorageConfig::default()).unwrap(),
        MessageTemplates::compile(&engine, &smtp, &EmailConfig::default()).unwrap(),
        RunOptions {
            recipient: RECIPIENT.to_string(),
            fetch_delay,
            queue_capacity: 16,
            exec_jobs: 2,
            smtp_jobs: 2,
        },
    )
}

/// An item with the given guid, titled after it.
pub fn item(guid: &str) -> Item {
    Item {
        title: Some(guid.to_uppercase()),
        link: Some(format!("https://example.com/posts/{guid}")),
        guid: Some(guid.to_string()),
        description: Some(format!("About {guid}")),
        ..Default::default()
    }
}

/// A feed whose self link is `url`, holding items with the given guids.
pub fn feed(url: &str, guids: &[&str]) -> FetchedFeed {
    FetchedFeed {
        title: Some("Example News".to_string()),
        link: Some("https://example.com/".to_string()),
        feed_link: Some(url.to_string()),
        links: vec!["https://example.com/".to_string(), url.to_string()],
        description: None,
        items: guids.iter().map(|g| item(g)).collect(),
    }
}

/// Render a minimal RSS document whose self link is `url`.
pub fn rss(url: &str, guids: &[&str]) -> String {
    let items: String = guids
        .iter()
        .map(|g| {
            format!(
                "<item><title>{}</title><link>https://cmd.example/{g}</link><guid>{g}</guid></item>",
                g.to_uppercase()
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom"><channel>
<title>Command Feed</title><link>https://cmd.example/</link>
<atom:link href="{url}" rel="self"/>
{items}</channel></rss>"#
    )
}
