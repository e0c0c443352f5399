//! Per-connection read loop and call dispatch.

use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::warn;

use gantry_config::BulkTransferSettings;
use gantry_plugins::ErrorCode;

use crate::bulk;
use crate::protocol::{AdapterCall, AdapterName, AdapterResponse, ErrorPayload, VersionPolicy};

use super::router::AdapterRouter;
use super::stream::{ConnectionHandler, ConnectionStream};
use super::SERVER_TARGET;

/// Ceiling on a single buffered message, inline bulk payloads included.
const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Serves one accepted connection: scans the inbound buffer for complete
/// lines and dispatches each call on its own thread, so long-running calls
/// do not block later ones and responses may interleave out of submission
/// order. The writer is shared behind a mutex to keep each response line
/// intact.
pub(crate) struct ConnectionWorker {
    router: Arc<AdapterRouter>,
    version_policy: VersionPolicy,
    bulk: BulkTransferSettings,
}

impl ConnectionWorker {
    pub(crate) fn new(
        router: Arc<AdapterRouter>,
        version_policy: VersionPolicy,
        bulk: BulkTransferSettings,
    ) -> Self {
        Self {
            router,
            version_policy,
            bulk,
        }
    }
}

impl ConnectionHandler for ConnectionWorker {
    fn handle(&self, stream: ConnectionStream) {
        let writer = match stream.try_clone() {
            Ok(clone) => Arc::new(Mutex::new(clone)),
            Err(error) => {
                warn!(
                    target: SERVER_TARGET,
                    error = %error,
                    "failed to clone connection stream"
                );
                return;
            }
        };

        let mut reader = stream;
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(read) => read,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    warn!(
                        target: SERVER_TARGET,
                        error = %error,
                        "connection read error"
                    );
                    break;
                }
            };
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);

            while let Some(pos) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                self.dispatch_line(line, &writer);
            }

            if buffer.len() > MAX_MESSAGE_BYTES {
                warn!(
                    target: SERVER_TARGET,
                    buffered = buffer.len(),
                    "dropping connection with oversized unterminated message"
                );
                break;
            }
        }
    }
}

impl ConnectionWorker {
    fn dispatch_line(&self, line: Vec<u8>, writer: &Arc<Mutex<ConnectionStream>>) {
        let router = Arc::clone(&self.router);
        let version_policy = self.version_policy;
        let bulk_settings = self.bulk.clone();
        let writer = Arc::clone(writer);
        thread::spawn(move || {
            if let Some(response) = serve_line(&line, &router, version_policy, &bulk_settings) {
                write_response(&writer, &response);
            }
        });
    }
}

/// Parses and serves one message line, producing at most one response.
///
/// A malformed line without a recoverable request id cannot be answered and
/// is logged and skipped instead.
fn serve_line(
    line: &[u8],
    router: &AdapterRouter,
    version_policy: VersionPolicy,
    bulk_settings: &BulkTransferSettings,
) -> Option<AdapterResponse> {
    let value: serde_json::Value = match serde_json::from_slice(line) {
        Ok(value) => value,
        Err(error) => {
            warn!(
                target: SERVER_TARGET,
                error = %error,
                "skipping malformed message line"
            );
            return None;
        }
    };
    let recovered_id = value
        .get("requestId")
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned);

    let call: AdapterCall = match serde_json::from_value(value.clone()) {
        Ok(call) => call,
        Err(error) => {
            let request_id = match recovered_id {
                Some(request_id) => request_id,
                None => {
                    warn!(
                        target: SERVER_TARGET,
                        error = %error,
                        "skipping unparseable call without request id"
                    );
                    return None;
                }
            };
            return Some(AdapterResponse::failure(
                request_id,
                classify_parse_failure(&value, &error),
            ));
        }
    };

    if VersionPolicy::is_mismatch(call.version()) {
        if version_policy.rejects(call.version()) {
            let payload = ErrorPayload::new(
                ErrorCode::ProtocolVersionMismatch,
                format!(
                    "call version {} does not match server version {}",
                    call.version(),
                    crate::protocol::PROTOCOL_VERSION
                ),
            );
            return Some(AdapterResponse::failure(call.request_id(), payload));
        }
        warn!(
            target: SERVER_TARGET,
            version = call.version(),
            request_id = call.request_id(),
            "serving call with mismatched protocol version"
        );
    }

    let (request_id, adapter, method, args, context) = call.into_parts();

    let Some(handler) = router.resolve(adapter) else {
        return Some(AdapterResponse::failure(
            request_id,
            ErrorPayload::new(
                ErrorCode::UnknownAdapter,
                format!("adapter {adapter} is not available on this host"),
            ),
        ));
    };

    let mut claimed = Vec::with_capacity(args.len());
    for arg in args {
        match bulk::claim(arg) {
            Ok(value) => claimed.push(value),
            Err(error) => {
                return Some(AdapterResponse::failure(
                    request_id,
                    ErrorPayload::new(ErrorCode::BulkTransferIoError, error.to_string()),
                ));
            }
        }
    }

    match handler.handle(&method, claimed, context.as_ref()) {
        Ok(result) => match bulk::spill(result, bulk_settings) {
            Ok(wrapped) => Some(AdapterResponse::success(request_id, wrapped)),
            Err(error) => Some(AdapterResponse::failure(
                request_id,
                ErrorPayload::new(ErrorCode::BulkTransferIoError, error.to_string()),
            )),
        },
        Err(error) => Some(AdapterResponse::failure(
            request_id,
            error.into_payload(adapter),
        )),
    }
}

/// Distinguishes an unknown adapter role from other parse failures so the
/// caller sees the right taxonomy code.
fn classify_parse_failure(value: &serde_json::Value, error: &serde_json::Error) -> ErrorPayload {
    if let Some(role) = value.get("adapter").and_then(serde_json::Value::as_str)
        && AdapterName::from_str(role).is_err()
    {
        return ErrorPayload::new(
            ErrorCode::UnknownAdapter,
            format!("adapter {role} is not in the allow-list"),
        );
    }
    ErrorPayload::new(ErrorCode::Internal, format!("malformed adapter call: {error}"))
}

fn write_response(writer: &Mutex<ConnectionStream>, response: &AdapterResponse) {
    let mut line = match serde_json::to_vec(response) {
        Ok(line) => line,
        Err(error) => {
            warn!(
                target: SERVER_TARGET,
                error = %error,
                "failed to encode adapter response"
            );
            return;
        }
    };
    line.push(b'\n');

    let mut stream = writer.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(error) = stream.write_all(&line).and_then(|()| stream.flush()) {
        warn!(
            target: SERVER_TARGET,
            error = %error,
            request_id = response.request_id(),
            "failed to write adapter response"
        );
    }
}
