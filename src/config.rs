use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Bind address used when none is configured; port 0 lets the host pick.
pub const DEFAULT_ADDRESS: &str = ":0";
/// Service name used when none is configured.
pub const DEFAULT_NAME: &str = "discovery-rs";
/// Version string used when none is configured.
pub const DEFAULT_VERSION: &str = "1.0.0";
/// How long a registration lives without renewal.
pub const DEFAULT_REGISTER_TTL: Duration = Duration::from_secs(15);
/// How often the background renewal re-registers.
pub const DEFAULT_REGISTER_INTERVAL: Duration = Duration::from_secs(5);

/// Immutable snapshot of one instance's registration parameters.
///
/// Built once through [`ConfigBuilder`] and shared read-only between the
/// registrar and its renewal task afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Service name; nodes of the same service share it.
    pub name: String,
    /// Instance id, unique per running instance.
    pub id: String,
    /// Version published with the registration.
    pub version: String,
    /// Bind address, `host:port` or `host`.
    pub address: String,
    /// Externally reachable address published instead of `address` when set.
    pub advertise: Option<String>,
    /// Free-form key/value pairs carried on the node.
    pub metadata: HashMap<String, String>,
    /// Registration time-to-live.
    pub register_ttl: Duration,
    /// Renewal cadence; zero disables background renewal.
    pub register_interval: Duration,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Node id this instance registers under: `{name}-{id}`. Stable across
    /// register, renew and deregister calls.
    pub fn node_id(&self) -> String {
        format!("{}-{}", self.name, self.id)
    }

    /// Address to publish: the advertise address when set, the bind address
    /// otherwise.
    pub fn advertised(&self) -> &str {
        match &self.advertise {
            Some(advertise) if !advertise.is_empty() => advertise,
            _ => &self.address,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`Config`]. Unset fields get documented defaults in `build`;
/// an empty string counts as unset.
///
/// | field               | default when unset              |
/// |---------------------|---------------------------------|
/// | `name`              | `"discovery-rs"`                |
/// | `id`                | fresh UUID v4, minted per build |
/// | `version`           | `"1.0.0"`                       |
/// | `address`           | `":0"`                          |
/// | `advertise`         | none, bind address is used      |
/// | `metadata`          | empty map                       |
/// | `register_ttl`      | 15s                             |
/// | `register_interval` | 5s, zero disables renewal       |
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    name: String,
    id: String,
    version: String,
    address: String,
    advertise: Option<String>,
    metadata: HashMap<String, String>,
    register_ttl: Option<Duration>,
    register_interval: Option<Duration>,
}

impl ConfigBuilder {
    /// Service name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Instance id unique to this running instance.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Version of the service.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Address to bind to, `host:port` or `host`.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Address to advertise for discovery, overriding the bind address.
    pub fn advertise(mut self, advertise: impl Into<String>) -> Self {
        self.advertise = Some(advertise.into());
        self
    }

    /// Metadata published with the node.
    pub fn metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Registration time-to-live.
    pub fn register_ttl(mut self, ttl: Duration) -> Self {
        self.register_ttl = Some(ttl);
        self
    }

    /// Renewal cadence. Zero disables the renewal loop and leaves
    /// registration to the caller.
    pub fn register_interval(mut self, interval: Duration) -> Self {
        self.register_interval = Some(interval);
        self
    }

    /// Apply defaults to unset fields and freeze the configuration.
    pub fn build(self) -> Config {
        Config {
            name: non_empty_or(self.name, DEFAULT_NAME),
            id: if self.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                self.id
            },
            version: non_empty_or(self.version, DEFAULT_VERSION),
            address: non_empty_or(self.address, DEFAULT_ADDRESS),
            advertise: self.advertise.filter(|advertise| !advertise.is_empty()),
            metadata: self.metadata,
            register_ttl: self.register_ttl.unwrap_or(DEFAULT_REGISTER_TTL),
            register_interval: self.register_interval.unwrap_or(DEFAULT_REGISTER_INTERVAL),
        }
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::builder().build();
        assert_eq!(config.name, DEFAULT_NAME);
        assert_eq!(config.version, DEFAULT_VERSION);
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.advertise, None);
        assert!(config.metadata.is_empty());
        assert_eq!(config.register_ttl, DEFAULT_REGISTER_TTL);
        assert_eq!(config.register_interval, DEFAULT_REGISTER_INTERVAL);
        // ids are minted, not defaulted
        assert!(Uuid::parse_str(&config.id).is_ok());
    }

    #[test]
    fn each_build_mints_a_fresh_id() {
        let a = Config::builder().build();
        let b = Config::builder().build();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn empty_strings_count_as_unset() {
        let config = Config::builder()
            .name("")
            .version("")
            .address("")
            .advertise("")
            .build();
        assert_eq!(config.name, DEFAULT_NAME);
        assert_eq!(config.version, DEFAULT_VERSION);
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.advertise, None);
    }

    #[test]
    fn explicit_values_win() {
        let mut metadata = HashMap::new();
        metadata.insert("protocol".to_string(), "grpc".to_string());

        let config = Config::builder()
            .name("auth")
            .id("abc")
            .version("2.3.1")
            .address("10.0.0.1:8080")
            .advertise("203.0.113.4:8080")
            .metadata(metadata.clone())
            .register_ttl(Duration::from_secs(30))
            .register_interval(Duration::from_secs(10))
            .build();

        assert_eq!(config.name, "auth");
        assert_eq!(config.id, "abc");
        assert_eq!(config.version, "2.3.1");
        assert_eq!(config.address, "10.0.0.1:8080");
        assert_eq!(config.advertise.as_deref(), Some("203.0.113.4:8080"));
        assert_eq!(config.metadata, metadata);
        assert_eq!(config.register_ttl, Duration::from_secs(30));
        assert_eq!(config.register_interval, Duration::from_secs(10));
    }

    #[test]
    fn node_id_joins_name_and_id() {
        let config = Config::builder().name("auth").id("abc").build();
        assert_eq!(config.node_id(), "auth-abc");
    }

    #[test]
    fn advertise_takes_precedence_when_set() {
        let config = Config::builder()
            .address("0.0.0.0:8080")
            .advertise("10.0.0.5:9090")
            .build();
        assert_eq!(config.advertised(), "10.0.0.5:9090");

        let config = Config::builder().address("0.0.0.0:8080").build();
        assert_eq!(config.advertised(), "0.0.0.0:8080");
    }
}
