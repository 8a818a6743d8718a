//! Per-host fetch scheduling for network sources.
//!
//! Every distinct host gets one sequential worker with its own queue, so
//! fetches against the same host never overlap and are spaced by the
//! politeness delay, while different hosts proceed concurrently.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dedup::DedupFilter;
use crate::feed::{FeedFetcher, Source};
use crate::stats::RunStats;
use crate::{FeedmailError, Result};

struct HostWorker {
    sender: mpsc::Sender<Arc<Source>>,
    handle: JoinHandle<()>,
}

/// Dispatches network sources to per-host workers.
pub struct HostScheduler {
    fetcher: Arc<dyn FeedFetcher>,
    filter: DedupFilter,
    stats: Arc<RunStats>,
    delay: Duration,
    capacity: usize,
    workers: HashMap<String, HostWorker>,
}

impl HostScheduler {
    /// Create a scheduler. Workers are spawned lazily by [`submit`](Self::submit).
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        filter: DedupFilter,
        stats: Arc<RunStats>,
        delay: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            fetcher,
            filter,
            stats,
            delay,
            capacity,
            workers: HashMap::new(),
        }
    }

    /// Number of host workers started so far.
    pub fn host_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a network source on its host's worker, starting the worker if
    /// this is the first source for that host.
    pub async fn submit(&mut self, source: Arc<Source>) -> Result<()> {
        let host = source.host_key().ok_or_else(|| {
            FeedmailError::Feed(format!("source '{}' has no host", source.name))
        })?;

        let worker = match self.workers.entry(host) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!("Starting worker for host {}", entry.key());
                let (sender, receiver) = mpsc::channel(self.capacity);
                let handle = tokio::spawn(run_host_worker(
                    entry.key().clone(),
                    receiver,
                    Arc::clone(&self.fetcher),
                    self.filter.clone(),
                    Arc::clone(&self.stats),
                    self.delay,
                ));
                entry.insert(HostWorker { sender, handle })
            }
        };

        worker
            .sender
            .send(source)
            .await
            .map_err(|e| FeedmailError::Feed(format!("host worker stopped, dropping {}", e.0.name)))
    }

    /// Close every host queue and wait for the workers to drain them.
    pub async fn shutdown(self) {
        let mut handles = Vec::with_capacity(self.workers.len());
        for (host, worker) in self.workers {
            drop(worker.sender);
            handles.push((host, worker.handle));
        }
        for (host, handle) in handles {
            if let Err(e) = handle.await {
                warn!("Worker for host {} panicked: {}", host, e);
            }
        }
    }
}

async fn run_host_worker(
    host: String,
    mut receiver: mpsc::Receiver<Arc<Source>>,
    fetcher: Arc<dyn FeedFetcher>,
    filter: DedupFilter,
    stats: Arc<RunStats>,
    delay: Duration,
) {
    while let Some(source) = receiver.recv().await {
        // Applied before every fetch, whatever happened to the previous one
        tokio::time::sleep(delay).await;

        match fetcher.fetch(&source).await {
            Ok(feed) => {
                let queued = filter.process(source, feed).await;
                stats.record_fetched(queued);
            }
            Err(e) => {
                warn!("Failed to fetch feed {}: {}", source.name, e);
                stats.record_failed_feed();
            }
        }
    }
    debug!("Worker for host {} finished", host);
}
