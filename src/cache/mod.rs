//! Edge cache for outgoing HTTP requests.
//!
//! Sits between the application and the network, applying one of two
//! strategies per request class:
//! - static assets: cache-first, pre-populated at install time
//! - API and other dynamic requests: network-first with cache fallback
//!
//! Cached responses live in version-tagged namespaces; activating a new
//! version purges every namespace carrying a stale tag.

mod layer;
mod storage;
mod traits;

pub use layer::EdgeCache;
pub use storage::{CacheStorage, SqliteCacheStorage};
pub use traits::{CacheOutcome, CacheRequest, CachedResponse, RequestClass, ResponseSource};
