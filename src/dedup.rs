//! Deduplication of fetched feeds against the identity store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::feed::{feed_context, item_context, FetchedFeed, Item, Source};
use crate::store::IdentityStore;
use crate::template::{CompiledTemplate, TemplateContext, TemplateEngine};
use crate::Result;

/// Compiled feed and item identity templates.
#[derive(Debug, Clone)]
pub struct IdentityTemplates {
    /// Renders the feed identity from `source` and `feed`.
    pub feed: CompiledTemplate,
    /// Renders the item identity from `source`, `feed` and `item`.
    pub item: CompiledTemplate,
}

impl IdentityTemplates {
    /// Compile the identity templates of the `[storage]` section.
    pub fn compile(engine: &TemplateEngine, config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            feed: engine.compile(&config.feed_identity)?,
            item: engine.compile(&config.item_identity)?,
        })
    }
}

/// A new item waiting to be delivered.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// Source the item came from.
    pub source: Arc<Source>,
    /// Feed the item belongs to, shared by every event of one fetch.
    pub feed: Arc<FetchedFeed>,
    /// The item itself.
    pub item: Item,
    /// Item identity, marked once delivery succeeds.
    pub identity: String,
}

impl NotificationEvent {
    /// Template context with `source`, `feed` and `item`.
    pub fn context(&self) -> TemplateContext {
        item_context(&self.source, &self.feed, &self.item)
    }
}

/// Decides which items of a fetched feed are new and queues them for
/// delivery.
///
/// A feed whose identity has never been stored is imported silently: every
/// item is marked and nothing is queued. Afterwards only items whose
/// identity is absent from the store are queued. Queued items are not
/// marked here; the dispatcher marks them after a successful delivery.
#[derive(Clone)]
pub struct DedupFilter {
    store: Arc<dyn IdentityStore>,
    identities: Arc<IdentityTemplates>,
    events: mpsc::Sender<NotificationEvent>,
}

impl DedupFilter {
    /// Create a filter writing events into `events`.
    pub fn new(
        store: Arc<dyn IdentityStore>,
        identities: Arc<IdentityTemplates>,
        events: mpsc::Sender<NotificationEvent>,
    ) -> Self {
        Self {
            store,
            identities,
            events,
        }
    }

    /// Process one fetched feed. Returns the number of events queued.
    pub async fn process(&self, source: Arc<Source>, feed: FetchedFeed) -> usize {
        let feed = Arc::new(feed);
        let context = feed_context(&source, &feed);

        let feed_identity = match self.identities.feed.render(&context) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Failed to compute feed identity for {}: {}", source.name, e);
                return 0;
            }
        };

        let seen_feed = self.store.has(&feed_identity);
        let mut imported = 0;
        let mut queued = 0;

        for item in &feed.items {
            let mut item_scope = context.child();
            item_scope.set("item", item.to_value());

            let identity = match self.identities.item.render(&item_scope) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!("Failed to compute item identity in {}: {}", source.name, e);
                    continue;
                }
            };

            if !seen_feed {
                self.store.mark(&identity);
                imported += 1;
                continue;
            }

            if self.store.has(&identity) {
                continue;
            }

            let event = NotificationEvent {
                source: Arc::clone(&source),
                feed: Arc::clone(&feed),
                item: item.clone(),
                identity,
            };
            if self.events.send(event).await.is_err() {
                warn!("Notification queue closed, dropping remaining items of {}", source.name);
                break;
            }
            queued += 1;
        }

        if !seen_feed {
            info!(
                "New feed {}: imported {} item(s) without notifying",
                source.name, imported
            );
        } else if queued > 0 {
            info!("Feed {}: {} new item(s)", source.name, queued);
        } else {
            debug!("Feed {}: no new items", source.name);
        }

        self.store.mark(&feed_identity);
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory store for exercising the filter without a filesystem.
    #[derive(Default)]
    struct MemoryStore {
        marked: Mutex<HashSet<String>>,
    }

    impl MemoryStore {
        fn len(&self) -> usize {
            self.marked.lock().unwrap().len()
        }
    }

    impl IdentityStore for MemoryStore {
        fn has(&self, identity: &str) -> bool {
            self.marked.lock().unwrap().contains(identity)
        }

        fn mark(&self, identity: &str) {
            self.marked.lock().unwrap().insert(identity.to_string());
        }
    }

    fn identities() -> Arc<IdentityTemplates> {
        let engine = TemplateEngine::new();
        Arc::new(IdentityTemplates::compile(&engine, &StorageConfig::default()).unwrap())
    }

    fn item(guid: &str) -> Item {
        Item {
            title: Some(format!("Title {guid}")),
            link: Some(format!("https://example.com/{guid}")),
            guid: Some(guid.to_string()),
            ..Default::default()
        }
    }

    fn feed(guids: &[&str]) -> FetchedFeed {
        FetchedFeed {
            title: Some("Example".to_string()),
            feed_link: Some("https://example.com/rss".to_string()),
            items: guids.iter().map(|g| item(g)).collect(),
            ..Default::default()
        }
    }

    fn source() -> Arc<Source> {
        Arc::new(Source::network("Example", "https://example.com/rss").unwrap())
    }

    fn setup() -> (
        DedupFilter,
        Arc<MemoryStore>,
        mpsc::Receiver<NotificationEvent>,
    ) {
        let store = Arc::new(MemoryStore::default());
        let (tx, rx) = mpsc::channel(100);
        let filter = DedupFilter::new(store.clone(), identities(), tx);
        (filter, store, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<NotificationEvent>) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_new_feed_is_imported_silently() {
        let (filter, store, mut rx) = setup();

        let queued = filter.process(source(), feed(&["a", "b", "c"])).await;

        assert_eq!(queued, 0);
        assert!(drain(&mut rx).is_empty());
        assert!(store.has("https://example.com/rss"));
        assert!(store.has("https://example.com/rss|a"));
        assert!(store.has("https://example.com/rss|b"));
        assert!(store.has("https://example.com/rss|c"));
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_unchanged_feed_emits_nothing() {
        let (filter, _store, mut rx) = setup();

        filter.process(source(), feed(&["a", "b"])).await;
        let queued = filter.process(source(), feed(&["a", "b"])).await;

        assert_eq!(queued, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_new_item_is_queued_but_not_marked() {
        let (filter, store, mut rx) = setup();

        filter.process(source(), feed(&["a", "b"])).await;
        let queued = filter.process(source(), feed(&["c", "a", "b"])).await;

        assert_eq!(queued, 1);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity, "https://example.com/rss|c");
        assert_eq!(events[0].item.guid.as_deref(), Some("c"));
        assert!(!store.has("https://example.com/rss|c"));

        // Undelivered items are offered again
        let queued = filter.process(source(), feed(&["c", "a", "b"])).await;
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn test_empty_feed_is_still_marked() {
        let (filter, store, _rx) = setup();

        filter.process(source(), feed(&[])).await;
        assert!(store.has("https://example.com/rss"));

        // Items appearing later are treated as new
        let queued = filter.process(source(), feed(&["first"])).await;
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn test_feed_identity_falls_back_to_source_url() {
        let (filter, store, _rx) = setup();
        let mut feed = feed(&["a"]);
        feed.feed_link = None;

        filter.process(source(), feed).await;
        assert!(store.has("https://example.com/rss"));
        assert!(store.has("https://example.com/rss|a"));
    }

    #[tokio::test]
    async fn test_item_identity_falls_back_to_link() {
        let (filter, store, _rx) = setup();
        let mut feed = feed(&[]);
        feed.items.push(Item {
            link: Some("https://example.com/no-guid".to_string()),
            ..Default::default()
        });

        filter.process(source(), feed).await;
        assert!(store.has("https://example.com/rss|https://example.com/no-guid"));
    }

    #[tokio::test]
    async fn test_feed_identity_render_failure_skips_feed() {
        let engine = TemplateEngine::new();
        let identities = Arc::new(IdentityTemplates {
            // Helper misuse only fails at render time
            feed: engine.compile("{{trim feed.title feed.link}}").unwrap(),
            item: engine.compile("{{item.guid}}").unwrap(),
        });
        let store = Arc::new(MemoryStore::default());
        let (tx, mut rx) = mpsc::channel(10);
        let filter = DedupFilter::new(store.clone(), identities, tx);

        let queued = filter.process(source(), feed(&["a"])).await;
        assert_eq!(queued, 0);
        assert_eq!(store.len(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_item_identity_render_failure_skips_item() {
        let engine = TemplateEngine::new();
        let identities = Arc::new(IdentityTemplates {
            feed: engine.compile("{{feed.feed_link}}").unwrap(),
            // Items without a guid hit the helper misuse
            item: engine
                .compile("{{item.guid}}{{#unless item.guid}}{{trim item.title item.link}}{{/unless}}")
                .unwrap(),
        });
        let store = Arc::new(MemoryStore::default());
        let (tx, mut rx) = mpsc::channel(10);
        let filter = DedupFilter::new(store.clone(), identities, tx);

        let broken = Item {
            title: Some("No guid".to_string()),
            link: Some("https://example.com/no-guid".to_string()),
            ..Default::default()
        };

        let mut first = feed(&["a"]);
        first.items.push(broken.clone());
        assert_eq!(filter.process(source(), first).await, 0);
        assert!(store.has("https://example.com/rss"));
        assert!(store.has("a"));
        assert_eq!(store.len(), 2);

        let mut second = feed(&["b", "a"]);
        second.items.insert(0, broken);
        assert_eq!(filter.process(source(), second).await, 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity, "b");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_command_feeds_without_self_link_are_told_apart() {
        let (filter, store, mut rx) = setup();
        let command = |name: &str| {
            Arc::new(Source::command(name, vec!["fetch-feed".to_string(), name.to_string()]).unwrap())
        };
        let mut unlinked = feed(&["a"]);
        unlinked.feed_link = None;

        filter.process(command("first"), unlinked.clone()).await;
        assert!(store.has("first"));
        assert!(store.has("first|a"));

        // A second command feed is still imported silently
        let queued = filter.process(command("second"), unlinked).await;
        assert_eq!(queued, 0);
        assert!(drain(&mut rx).is_empty());
        assert!(store.has("second|a"));
    }

    #[tokio::test]
    async fn test_event_context_exposes_item() {
        let (filter, _store, mut rx) = setup();

        filter.process(source(), feed(&[])).await;
        filter.process(source(), feed(&["z"])).await;

        let events = drain(&mut rx);
        let context = events[0].context();
        assert_eq!(
            context.get("item.title").map(|v| v.to_display_string()),
            Some("Title z".to_string())
        );
        assert_eq!(
            context.get("source.name").map(|v| v.to_display_string()),
            Some("Example".to_string())
        );
    }
}
