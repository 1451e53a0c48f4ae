#![allow(clippy::uninlined_format_args)]

//! Presence and change notification for service discovery.
//!
//! The crate keeps one service instance registered in a distributed registry
//! (TTL lease plus periodic renewal) and normalizes the registry's raw change
//! feed into create / update / delete lifecycle events.
//!
//! ```rust,ignore
//! let endpoints = vec!["http://localhost:2379".to_string()];
//! let registry = Arc::new(EtcdRegistry::connect(endpoints, None).await?);
//! let config = Config::builder().name("auth").address(":8080").build();
//! let registrar = Registrar::new(registry.clone(), config);
//!
//! registrar.register().await?;
//! registrar.start().await;            // background TTL renewal
//!
//! let (handle, mut watcher) = registry.watch().await?;
//! while let Ok(event) = watcher.next().await {
//!     println!("{} {}", event.action, event.service.name);
//! }
//!
//! registrar.stop().await?;           // stops renewal, deregisters
//! handle.stop().await;               // closes the watch stream
//! ```

pub mod addr;
pub mod config;
pub mod registrar;
pub mod registry;
pub mod selector;
pub mod utils;

pub use config::{Config, ConfigBuilder};
pub use registrar::Registrar;
pub use registry::etcd::EtcdRegistry;
pub use registry::memory::MemoryRegistry;
pub use registry::{
    Action, Endpoint, Node, Registry, RegistryError, Service, WatchEvent, WatchHandle, Watcher,
};
