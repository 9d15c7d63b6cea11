mod fetcher;

pub use fetcher::{ContentSource, FeedFetcher};
