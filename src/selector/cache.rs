use std::time::Duration;

/// How long a selector may serve a cached view of a service's nodes before
/// rereading the registry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Configuration for a read-through selector cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self { ttl: DEFAULT_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_is_one_minute() {
        assert_eq!(CacheConfig::default().ttl, Duration::from_secs(60));
    }

    #[test]
    fn ttl_can_be_overridden() {
        let config = CacheConfig::new().with_ttl(Duration::from_secs(5));
        assert_eq!(config.ttl, Duration::from_secs(5));
    }
}
