use std::time::Duration;

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

/// Failures surfaced by registry backends, the registrar and watchers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The configured bind/advertise host could not be turned into an address
    /// other instances can dial.
    #[error("no routable address for host {host:?}")]
    NoRoutableAddress { host: String },

    /// The backend call failed. Carries the backend's own error unchanged.
    #[error("registry transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A service payload could not be encoded or decoded.
    #[error("service payload codec error: {0}")]
    Codec(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Registration TTLs are whole seconds on the wire; anything shorter
    /// cannot be expressed as a lease.
    #[error("register ttl {0:?} is shorter than one second")]
    InvalidTtl(Duration),

    /// The watch subscription ended. Terminal: create a new watcher to resume.
    #[error("watch stream closed")]
    StreamClosed,
}

impl RegistryError {
    pub(crate) fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RegistryError::Transport(Box::new(err))
    }

    pub(crate) fn codec(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RegistryError::Codec(Box::new(err))
    }
}
