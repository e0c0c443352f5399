//! Host-side adapter server.
//!
//! The server binds the configured socket endpoint, accepts connections in
//! a background thread, and serves each connection with a dedicated worker.
//! Calls are routed through an [`AdapterRouter`] built once at startup.

mod connection;
mod errors;
mod listener;
mod router;
mod stream;

use std::sync::Arc;

use gantry_config::{BulkTransferSettings, SocketEndpoint};

use crate::protocol::VersionPolicy;

use self::connection::ConnectionWorker;
use self::listener::{ListenerHandle, SocketListener};

pub use self::errors::ListenerError;
pub use self::router::{AdapterHandler, AdapterRouter, DispatchError};
pub use self::stream::{ConnectionHandler, ConnectionStream};

const SERVER_TARGET: &str = "gantry_ipc::server";

/// Adapter server configuration and entry point.
#[derive(Debug)]
pub struct AdapterServer {
    router: Arc<AdapterRouter>,
    version_policy: VersionPolicy,
    bulk: BulkTransferSettings,
}

impl AdapterServer {
    /// Creates a server around the given routing table with a lenient
    /// version policy and default bulk-transfer settings.
    #[must_use]
    pub fn new(router: AdapterRouter) -> Self {
        Self {
            router: Arc::new(router),
            version_policy: VersionPolicy::default(),
            bulk: BulkTransferSettings::default(),
        }
    }

    /// Overrides the protocol version policy.
    #[must_use]
    pub const fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Overrides the bulk-transfer settings used for oversized results.
    #[must_use]
    pub fn with_bulk_settings(mut self, settings: BulkTransferSettings) -> Self {
        self.bulk = settings;
        self
    }

    /// Binds the endpoint and starts accepting connections.
    pub fn start(self, endpoint: &SocketEndpoint) -> Result<ServerHandle, ListenerError> {
        let listener = SocketListener::bind(endpoint)?;
        let local_addr = listener.local_addr();
        let worker = Arc::new(ConnectionWorker::new(
            self.router,
            self.version_policy,
            self.bulk,
        ));
        let handle = listener.start(worker)?;
        Ok(ServerHandle {
            inner: handle,
            local_addr,
        })
    }
}

/// Handle to a running adapter server.
pub struct ServerHandle {
    inner: ListenerHandle,
    local_addr: Option<std::net::SocketAddr>,
}

impl ServerHandle {
    /// Signals the accept loop to stop.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Waits for the accept loop to exit.
    pub fn join(self) -> Result<(), ListenerError> {
        self.inner.join()
    }

    /// Returns the bound TCP address, when the endpoint is TCP.
    #[must_use]
    pub const fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.local_addr
    }
}
