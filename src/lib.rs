//! feedmail - feed poller and email notifier
//!
//! Polls RSS/Atom/JSON feeds (fetched over HTTP or produced by a command),
//! remembers which items it has already reported in a content-addressed
//! store, and emails every new item.

pub mod command;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod logging;
pub mod mailer;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod template;

pub use config::Config;
pub use coordinator::{Coordinator, RunOptions};
pub use dedup::{DedupFilter, IdentityTemplates, NotificationEvent};
pub use dispatch::{MessageTemplates, NotificationDispatcher};
pub use error::{FeedmailError, Result};
pub use feed::{FeedFetcher, FetchedFeed, HttpFetcher, Item, Origin, Source};
pub use mailer::{Mailer, OutgoingMessage, SmtpMailer};
pub use stats::{RunStats, RunSummary};
pub use store::{FileStore, IdentityStore};
pub use template::{CompiledTemplate, TemplateContext, TemplateEngine, Value};
