//! Node-selection layer. Only the cache configuration hook lives here; the
//! selection strategies themselves sit with the caller.

pub mod cache;

pub use cache::CacheConfig;
