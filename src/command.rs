//! Command sources: feeds produced on the standard output of a program.

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dedup::DedupFilter;
use crate::feed::{parse_feed, Origin, Source};
use crate::stats::RunStats;
use crate::{FeedmailError, Result};

/// Run a command and return its standard output.
///
/// A spawn failure or a non-zero exit is an error carrying the trimmed
/// standard error.
pub async fn run_command(argv: &[String]) -> Result<Vec<u8>> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| FeedmailError::Command("empty command line".to_string()))?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| FeedmailError::Command(format!("failed to run {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FeedmailError::Command(format!(
            "{program} failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}

/// Fixed pool of workers running command sources from a shared queue.
pub struct CommandIngester {
    sender: mpsc::Sender<Arc<Source>>,
    workers: Vec<JoinHandle<()>>,
}

impl CommandIngester {
    /// Spawn `jobs` workers reading from a queue of `capacity` sources.
    pub fn start(jobs: usize, capacity: usize, filter: DedupFilter, stats: Arc<RunStats>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..jobs.max(1))
            .map(|id| {
                tokio::spawn(run_command_worker(
                    id,
                    Arc::clone(&receiver),
                    filter.clone(),
                    Arc::clone(&stats),
                ))
            })
            .collect();

        Self { sender, workers }
    }

    /// Queue a command source.
    pub async fn submit(&self, source: Arc<Source>) -> Result<()> {
        self.sender
            .send(source)
            .await
            .map_err(|e| FeedmailError::Command(format!("command pool stopped, dropping {}", e.0.name)))
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!("Command worker panicked: {}", e);
            }
        }
    }
}

async fn run_command_worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Arc<Source>>>>,
    filter: DedupFilter,
    stats: Arc<RunStats>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(source) = next else {
            break;
        };

        let Origin::Command { argv } = &source.origin else {
            warn!("Source {} is not a command source, skipping", source.name);
            stats.record_failed_feed();
            continue;
        };

        debug!("Worker {} running {:?} for {}", id, argv, source.name);

        let feed = match run_command(argv).await.and_then(|stdout| parse_feed(&stdout)) {
            Ok(feed) => feed,
            Err(e) => {
                warn!("Failed to read feed {}: {}", source.name, e);
                stats.record_failed_feed();
                continue;
            }
        };

        let queued = filter.process(source, feed).await;
        stats.record_fetched(queued);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let stdout = run_command(&sh("printf hello")).await.unwrap();
        assert_eq!(stdout, b"hello");
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit() {
        let err = run_command(&sh("echo '  broken pipe  ' >&2; exit 3"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedmailError::Command(_)));
        assert!(err.to_string().contains(": broken pipe"));
    }

    #[tokio::test]
    async fn test_run_command_missing_program() {
        let argv = vec!["/nonexistent/feedmail-test-program".to_string()];
        assert!(matches!(
            run_command(&argv).await,
            Err(FeedmailError::Command(_))
        ));
    }

    #[tokio::test]
    async fn test_run_command_empty() {
        assert!(run_command(&[]).await.is_err());
    }
}
