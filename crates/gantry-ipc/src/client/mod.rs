//! Worker-side connection to the adapter server.
//!
//! A connection multiplexes many in-flight calls over one socket. A
//! dedicated reader thread parses response lines and completes the pending
//! call with the matching request id, so responses arriving out of
//! submission order resolve the right callers. When the server closes the
//! socket every pending call fails instead of hanging.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use gantry_config::{BulkTransferSettings, SocketEndpoint};

use crate::bulk::{self, BulkTransferError};
use crate::protocol::{AdapterCall, AdapterName, AdapterResponse, CallContext, ErrorPayload};
use crate::server::ConnectionStream;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

const CLIENT_TARGET: &str = "gantry_ipc::client";

type PendingMap = Arc<Mutex<HashMap<String, mpsc::Sender<AdapterResponse>>>>;

/// Errors surfaced by adapter calls issued over a connection.
#[derive(Debug, Error)]
pub enum CallError {
    /// Connecting to the endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    /// The endpoint kind is unsupported on this platform.
    #[error("unix endpoints are unsupported on this platform: {endpoint}")]
    UnsupportedEndpoint { endpoint: String },
    /// Writing the call to the socket failed.
    #[error("failed to send adapter call: {source}")]
    Send {
        #[source]
        source: std::io::Error,
    },
    /// Encoding the call failed.
    #[error("failed to encode adapter call: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    /// No response arrived within the caller's deadline.
    #[error("adapter call timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    /// The connection closed while the call was pending.
    #[error("connection closed with the call still pending")]
    ConnectionClosed,
    /// The server answered with a structured error.
    #[error("adapter call failed: {0}", .payload.payload.message)]
    Remote {
        #[source]
        payload: RemoteFailure,
    },
    /// The response arrived without a result or error body.
    #[error("adapter response carried neither result nor error")]
    EmptyResponse,
    /// Claiming or spilling a bulk value failed.
    #[error(transparent)]
    Bulk(#[from] BulkTransferError),
}

/// A server-side failure re-raised locally with its taxonomy intact.
#[derive(Debug, Error)]
#[error("{}", .payload.message)]
pub struct RemoteFailure {
    /// The error payload exactly as the server serialised it.
    pub payload: ErrorPayload,
}

impl CallError {
    /// Returns the remote error payload when the failure came from the
    /// server.
    #[must_use]
    pub fn remote_payload(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Remote { payload } => Some(&payload.payload),
            _ => None,
        }
    }
}

/// Client connection to the adapter server.
#[derive(Debug)]
pub struct AdapterConnection {
    writer: Mutex<ConnectionStream>,
    pending: PendingMap,
    bulk: BulkTransferSettings,
}

impl AdapterConnection {
    /// Connects to the given endpoint and starts the reader thread.
    pub fn connect(endpoint: &SocketEndpoint) -> Result<Arc<Self>, CallError> {
        Self::connect_with(endpoint, BulkTransferSettings::default())
    }

    /// Connects with explicit bulk-transfer settings for outbound spills.
    pub fn connect_with(
        endpoint: &SocketEndpoint,
        bulk: BulkTransferSettings,
    ) -> Result<Arc<Self>, CallError> {
        let stream = open_stream(endpoint)?;
        let reader = stream.try_clone().map_err(|source| CallError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let connection = Arc::new(Self {
            writer: Mutex::new(stream),
            pending: Arc::new(Mutex::new(HashMap::new())),
            bulk,
        });

        let pending = Arc::clone(&connection.pending);
        thread::spawn(move || run_reader(reader, &pending));

        Ok(connection)
    }

    /// Issues a call and waits up to `timeout` for its response.
    ///
    /// Oversized arguments are spilled before the call crosses the socket;
    /// a spilled result is claimed before it is returned. A remote error is
    /// re-raised as [`CallError::Remote`] carrying the server's payload.
    pub fn call(
        &self,
        adapter: AdapterName,
        method: &str,
        args: Vec<serde_json::Value>,
        context: Option<CallContext>,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallError> {
        let mut wrapped = Vec::with_capacity(args.len());
        for arg in args {
            wrapped.push(bulk::spill(arg, &self.bulk)?);
        }
        let mut call = AdapterCall::new(adapter, method, wrapped);
        if let Some(context) = context {
            call = call.with_context(context);
        }
        let request_id = call.request_id().to_owned();

        let (sender, receiver) = mpsc::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let _ = pending.insert(request_id.clone(), sender);
        }

        if let Err(error) = self.send(&call) {
            self.forget(&request_id);
            return Err(error);
        }

        let response = match receiver.recv_timeout(timeout) {
            Ok(response) => response,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.forget(&request_id);
                return Err(CallError::Timeout { timeout });
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.forget(&request_id);
                return Err(CallError::ConnectionClosed);
            }
        };

        match response.into_body() {
            Ok(Some(result)) => Ok(bulk::claim(result)?),
            Ok(None) => Err(CallError::EmptyResponse),
            Err(payload) => Err(CallError::Remote {
                payload: RemoteFailure { payload },
            }),
        }
    }

    fn send(&self, call: &AdapterCall) -> Result<(), CallError> {
        let mut line =
            serde_json::to_vec(call).map_err(|source| CallError::Encode { source })?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(&line)
            .and_then(|()| writer.flush())
            .map_err(|source| CallError::Send { source })
    }

    fn forget(&self, request_id: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = pending.remove(request_id);
    }
}

fn open_stream(endpoint: &SocketEndpoint) -> Result<ConnectionStream, CallError> {
    match endpoint {
        SocketEndpoint::Tcp { host, port } => TcpStream::connect((host.as_str(), *port))
            .map(ConnectionStream::Tcp)
            .map_err(|source| CallError::Connect {
                endpoint: endpoint.to_string(),
                source,
            }),
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                UnixStream::connect(path.as_std_path())
                    .map(ConnectionStream::Unix)
                    .map_err(|source| CallError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    })
            }

            #[cfg(not(unix))]
            {
                Err(CallError::UnsupportedEndpoint {
                    endpoint: endpoint.to_string(),
                })
            }
        }
    }
}

/// Reader loop: completes pending calls by request id until the socket
/// closes, then drops every remaining sender so blocked callers fail.
fn run_reader(stream: ConnectionStream, pending: &PendingMap) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                warn!(
                    target: CLIENT_TARGET,
                    error = %error,
                    "connection reader error"
                );
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let response: AdapterResponse = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    target: CLIENT_TARGET,
                    error = %error,
                    "skipping malformed response line"
                );
                continue;
            }
        };

        let sender = {
            let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
            map.remove(response.request_id())
        };
        match sender {
            Some(sender) => {
                // A send failure means the caller already gave up on the
                // call.
                drop(sender.send(response));
            }
            None => {
                warn!(
                    target: CLIENT_TARGET,
                    request_id = response.request_id(),
                    "response for unknown request id"
                );
            }
        }
    }

    let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
    map.clear();
}

#[cfg(test)]
mod tests;
