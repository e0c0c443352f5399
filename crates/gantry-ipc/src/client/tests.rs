//! Tests for call timeouts and connection-loss handling.

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use serde_json::json;

use gantry_config::SocketEndpoint;

use crate::protocol::AdapterName;

use super::*;

/// Binds a loopback listener that accepts one connection, reads one line,
/// and then either holds the connection open or drops it.
fn silent_server(drop_after_read: bool) -> SocketEndpoint {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind silent server");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        drop(reader.read_line(&mut line));
        if drop_after_read {
            drop(reader);
        } else {
            thread::sleep(Duration::from_secs(5));
        }
    });
    SocketEndpoint::tcp("127.0.0.1", addr.port())
}

#[test]
fn call_times_out_when_no_response_arrives() {
    let endpoint = silent_server(false);
    let connection = AdapterConnection::connect(&endpoint).expect("connect");

    let error = connection
        .call(
            AdapterName::Storage,
            "echo",
            vec![json!(1)],
            None,
            Duration::from_millis(100),
        )
        .expect_err("timeout expected");
    assert!(matches!(error, CallError::Timeout { .. }));
}

#[test]
fn server_eof_fails_the_pending_call() {
    let endpoint = silent_server(true);
    let connection = AdapterConnection::connect(&endpoint).expect("connect");

    let error = connection
        .call(
            AdapterName::Storage,
            "echo",
            vec![json!(1)],
            None,
            Duration::from_secs(5),
        )
        .expect_err("connection loss expected");
    assert!(matches!(error, CallError::ConnectionClosed));
}

#[test]
fn connecting_to_a_dead_endpoint_fails() {
    // Bind and immediately drop to obtain a port nothing listens on.
    let port = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind probe");
        listener.local_addr().expect("local addr").port()
    };
    let endpoint = SocketEndpoint::tcp("127.0.0.1", port);
    let error = AdapterConnection::connect(&endpoint).expect_err("connect should fail");
    assert!(matches!(error, CallError::Connect { .. }));
}
