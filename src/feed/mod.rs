//! Feed sources, parsed feeds and network fetching.

mod fetcher;
mod parser;
mod types;

pub use fetcher::{FeedFetcher, HttpFetcher};
pub use parser::parse_feed;
pub use types::{feed_context, item_context, FetchedFeed, Item, Origin, Source};
