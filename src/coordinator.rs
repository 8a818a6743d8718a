//! Run orchestration.
//!
//! Starts the delivery pool, fans sources out to the per-host scheduler and
//! the command pool, then shuts everything down in order so that every
//! queued notification is delivered before [`Coordinator::run`] returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::command::CommandIngester;
use crate::config::Config;
use crate::dedup::{DedupFilter, IdentityTemplates};
use crate::dispatch::{MessageTemplates, NotificationDispatcher};
use crate::feed::{FeedFetcher, HttpFetcher, Origin, Source};
use crate::mailer::{Mailer, SmtpMailer};
use crate::scheduler::HostScheduler;
use crate::stats::{RunStats, RunSummary};
use crate::store::{FileStore, IdentityStore};
use crate::template::TemplateEngine;
use crate::Result;

/// Tunables of a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Recipient of every notification.
    pub recipient: String,
    /// Politeness delay between fetches on the same host.
    pub fetch_delay: Duration,
    /// Capacity of every queue.
    pub queue_capacity: usize,
    /// Command workers.
    pub exec_jobs: usize,
    /// Delivery workers.
    pub smtp_jobs: usize,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            recipient: config.smtp.recipient.clone(),
            fetch_delay: Duration::from_millis(config.fetch.delay_ms),
            queue_capacity: config.fetch.queue_capacity,
            exec_jobs: config.exec.jobs,
            smtp_jobs: config.smtp.jobs,
        }
    }
}

/// Wires the pipeline together for one run.
pub struct Coordinator {
    store: Arc<dyn IdentityStore>,
    fetcher: Arc<dyn FeedFetcher>,
    mailer: Arc<dyn Mailer>,
    identities: Arc<IdentityTemplates>,
    messages: Arc<MessageTemplates>,
    options: RunOptions,
}

impl Coordinator {
    /// Create a coordinator from explicit collaborators.
    pub fn new(
        store: Arc<dyn IdentityStore>,
        fetcher: Arc<dyn FeedFetcher>,
        mailer: Arc<dyn Mailer>,
        identities: IdentityTemplates,
        messages: MessageTemplates,
        options: RunOptions,
    ) -> Self {
        Self {
            store,
            fetcher,
            mailer,
            identities: Arc::new(identities),
            messages: Arc::new(messages),
            options,
        }
    }

    /// Create a coordinator with the production store, fetcher and mailer.
    ///
    /// Fails on template syntax errors, unknown helpers, a missing store
    /// marker or an unusable SMTP address.
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = TemplateEngine::new();
        let identities = IdentityTemplates::compile(&engine, &config.storage)?;
        let messages = MessageTemplates::compile(&engine, &config.smtp, &config.email)?;

        let store = FileStore::open(&config.storage.path)?;
        let fetcher = HttpFetcher::new(&config.fetch)?;
        let mailer = SmtpMailer::new(&config.smtp)?;

        Ok(Self::new(
            Arc::new(store),
            Arc::new(fetcher),
            Arc::new(mailer),
            identities,
            messages,
            RunOptions::from_config(config),
        ))
    }

    /// Process every source once and deliver the resulting notifications.
    pub async fn run(&self, sources: Vec<Source>) -> RunSummary {
        let stats = Arc::new(RunStats::new());
        let capacity = self.options.queue_capacity.max(1);

        let (events, receiver) = mpsc::channel(capacity);
        let dispatcher = NotificationDispatcher::start(
            self.options.smtp_jobs,
            receiver,
            Arc::clone(&self.mailer),
            Arc::clone(&self.store),
            Arc::clone(&self.messages),
            self.options.recipient.clone(),
            Arc::clone(&stats),
        );

        let filter = DedupFilter::new(Arc::clone(&self.store), Arc::clone(&self.identities), events);
        let mut scheduler = HostScheduler::new(
            Arc::clone(&self.fetcher),
            filter.clone(),
            Arc::clone(&stats),
            self.options.fetch_delay,
            capacity,
        );
        let commands =
            CommandIngester::start(self.options.exec_jobs, capacity, filter.clone(), Arc::clone(&stats));
        // The ingestion workers now hold the only notification senders
        drop(filter);

        info!("Processing {} feed(s)", sources.len());

        for source in sources {
            let source = Arc::new(source);
            let submitted = if matches!(source.origin, Origin::Command { .. }) {
                commands.submit(source).await
            } else {
                scheduler.submit(source).await
            };
            if let Err(e) = submitted {
                warn!("{}", e);
                stats.record_failed_feed();
            }
        }

        scheduler.shutdown().await;
        commands.shutdown().await;
        dispatcher.join().await;

        let summary = stats.summary();
        info!(
            "Run complete: {} feed(s) fetched, {} failed, {} notification(s) queued, {} sent, {} failed",
            summary.feeds_fetched,
            summary.feeds_failed,
            summary.notifications_queued,
            summary.notifications_delivered,
            summary.notifications_failed
        );
        summary
    }
}
