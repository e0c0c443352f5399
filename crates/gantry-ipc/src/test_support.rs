//! Shared fixtures for transport tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

use gantry_config::SocketEndpoint;

use crate::protocol::{AdapterName, CallContext, VersionPolicy};
use crate::server::{AdapterHandler, AdapterRouter, AdapterServer, DispatchError, ServerHandle};

/// Echo-style handler used to exercise the transport end to end.
///
/// `echo` returns its first argument. `sleepThenEcho` sleeps for the number
/// of milliseconds in its first argument, then returns its second.
pub(crate) struct EchoHandler;

impl AdapterHandler for EchoHandler {
    fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        _context: Option<&CallContext>,
    ) -> Result<Value, DispatchError> {
        match method {
            "echo" => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            "sleepThenEcho" => {
                let millis = args.first().and_then(Value::as_u64).unwrap_or(0);
                thread::sleep(Duration::from_millis(millis));
                Ok(args.into_iter().nth(1).unwrap_or(Value::Null))
            }
            other => Err(DispatchError::UnknownMethod {
                method: other.to_owned(),
            }),
        }
    }
}

/// Embeddings handler with fixed vectors and a fetch counter on
/// `dimensions`.
pub(crate) struct FixedEmbeddings {
    pub(crate) dimension_fetches: AtomicUsize,
}

impl FixedEmbeddings {
    pub(crate) fn new() -> Self {
        Self {
            dimension_fetches: AtomicUsize::new(0),
        }
    }
}

impl AdapterHandler for FixedEmbeddings {
    fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        _context: Option<&CallContext>,
    ) -> Result<Value, DispatchError> {
        match method {
            "embed" => Ok(json!([0.1, 0.2, 0.3])),
            "embedBatch" => {
                let count = args
                    .first()
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                Ok(json!(vec![vec![0.1, 0.2, 0.3]; count]))
            }
            "dimensions" => {
                let _ = self.dimension_fetches.fetch_add(1, Ordering::SeqCst);
                Ok(json!(3))
            }
            "badShape" => Ok(json!("not a vector")),
            other => Err(DispatchError::UnknownMethod {
                method: other.to_owned(),
            }),
        }
    }
}

/// Starts a TCP server on a loopback port and returns the handle plus a
/// client-facing endpoint for it.
pub(crate) fn start_server(
    router: AdapterRouter,
    policy: VersionPolicy,
) -> (ServerHandle, SocketEndpoint) {
    let handle = AdapterServer::new(router)
        .with_version_policy(policy)
        .start(&SocketEndpoint::tcp("127.0.0.1", 0))
        .expect("start adapter server");
    let addr = handle.local_addr().expect("tcp server address");
    (handle, SocketEndpoint::tcp("127.0.0.1", addr.port()))
}

/// Starts a server with an [`EchoHandler`] registered on the storage role.
pub(crate) fn start_echo_server(policy: VersionPolicy) -> (ServerHandle, SocketEndpoint) {
    let router = AdapterRouter::new().register(AdapterName::Storage, Arc::new(EchoHandler));
    start_server(router, policy)
}
