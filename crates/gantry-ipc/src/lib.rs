//! Socket transport between the Gantry host and its plugin workers.
//!
//! The protocol is newline-delimited JSON: each message is a single JSON
//! object terminated by `\n`. The host runs an [`AdapterServer`] bound to a
//! configurable socket endpoint; workers connect with an
//! [`AdapterConnection`] and issue [`protocol::AdapterCall`]s against a
//! fixed allow-list of adapter roles. Responses are correlated strictly by
//! request id, never by position, so calls multiplexed over one connection
//! may complete out of submission order.
//!
//! Arguments and results above a configurable size threshold do not cross
//! the socket inline. The [`bulk`] module spills them to temp files and
//! sends only a descriptor; the receiving side claims the file exactly
//! once.

pub mod bulk;
pub mod client;
pub mod protocol;
pub mod proxy;
pub mod server;
#[cfg(test)]
pub(crate) mod test_support;

pub use bulk::{BulkTransferError, BulkValue};
pub use client::{AdapterConnection, CallError};
pub use protocol::{
    AdapterCall, AdapterName, AdapterResponse, CallContext, ErrorPayload, PROTOCOL_VERSION,
    VersionPolicy,
};
pub use proxy::{EmbeddingsProxy, ProxyError, RemoteAdapter};
pub use server::{AdapterHandler, AdapterRouter, AdapterServer, DispatchError, ServerHandle};
