//! Content providers: raw items per topic.
//!
//! - `HttpContentProvider` queries a search/news API once per topic
//! - `CachedContentProvider` wraps any provider with a per-topic TTL cache,
//!   so chained slices sharing topics do not refetch them

pub mod cache;
pub mod http;

pub use cache::CachedContentProvider;
pub use http::{ContentApiConfig, HttpContentProvider};
