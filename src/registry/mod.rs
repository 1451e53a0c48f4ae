pub mod etcd;
pub mod memory;

mod error;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use error::{RegistryError, Result};

/// A single addressable instance of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// An operation a service advertises alongside its nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What the registry stores for a service: identity plus the nodes serving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Service {
    /// Copy of this service carrying a single node. Registry entries are kept
    /// per node so a departing node tombstones only itself.
    pub(crate) fn for_node(&self, node: &Node) -> Service {
        Service {
            name: self.name.clone(),
            version: self.version.clone(),
            endpoints: self.endpoints.clone(),
            nodes: vec![node.clone()],
        }
    }
}

/// Lifecycle of a watched registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// One normalized change notification. Every raw backend notification maps to
/// at most one event; batches are never merged.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub action: Action,
    pub service: Service,
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Register the service's nodes with a time-to-live; calling again with
    /// the same node ids renews the TTL.
    async fn register(&self, service: &Service, ttl: Duration) -> Result<()>;

    /// Remove the service's nodes. Deregistering an absent node is not an error.
    async fn deregister(&self, service: &Service) -> Result<()>;

    /// Subscribe to changes under the registry prefix. Returns the
    /// cancellation handle and the event stream it closes.
    async fn watch(&self) -> Result<(WatchHandle, Box<dyn Watcher>)>;
}

#[async_trait]
pub trait Watcher: Send {
    /// Block until the next lifecycle event. Returns `StreamClosed` once the
    /// subscription has ended, on that call and every call after it.
    async fn next(&mut self) -> Result<WatchEvent>;
}

/// Cancellation side of a watch subscription, handed out by
/// [`Registry::watch`] next to the event stream.
///
/// Kept apart from [`Watcher`] so a controller task can stop a watcher whose
/// `next` is blocked in a consumer task. Clones share one single-fire guard.
#[derive(Clone)]
pub struct WatchHandle {
    stopped: Arc<AtomicBool>,
    canceler: Arc<dyn Canceler>,
}

impl WatchHandle {
    pub(crate) fn new(canceler: Arc<dyn Canceler>) -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            canceler,
        }
    }

    /// Cancel the subscription. Idempotent under repeated and concurrent
    /// calls; a blocked `next` observes the closure and returns the terminal
    /// error.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.canceler.cancel().await;
    }
}

/// Backend teardown behind [`WatchHandle`]; invoked at most once.
#[async_trait]
pub(crate) trait Canceler: Send + Sync {
    async fn cancel(&self);
}

/// Byte-level codec for stored service payloads.
pub(crate) fn encode(service: &Service) -> Result<Vec<u8>> {
    serde_json::to_vec(service).map_err(RegistryError::codec)
}

/// Decode a stored payload; `None` when malformed, callers skip those.
pub(crate) fn decode(bytes: &[u8]) -> Option<Service> {
    serde_json::from_slice(bytes).ok()
}
