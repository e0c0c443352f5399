//! Tests for the typed embeddings proxy and its memoised dimensionality.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::client::AdapterConnection;
use crate::protocol::{AdapterName, VersionPolicy};
use crate::server::AdapterRouter;
use crate::test_support::{FixedEmbeddings, start_server};

use super::*;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

fn embeddings_fixture() -> (
    crate::server::ServerHandle,
    Arc<FixedEmbeddings>,
    EmbeddingsProxy,
) {
    let handler = Arc::new(FixedEmbeddings::new());
    let router = AdapterRouter::new().register(
        AdapterName::Embeddings,
        Arc::clone(&handler) as Arc<dyn crate::server::AdapterHandler>,
    );
    let (handle, endpoint) = start_server(router, VersionPolicy::Lenient);
    let connection = AdapterConnection::connect(&endpoint).expect("connect");
    let proxy = EmbeddingsProxy::new(connection, CALL_TIMEOUT);
    (handle, handler, proxy)
}

#[test]
fn embed_returns_a_numeric_vector() {
    let (handle, _handler, proxy) = embeddings_fixture();
    let vector = proxy.embed("hello").expect("embed");
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    handle.shutdown();
    handle.join().expect("join server");
}

#[test]
fn embed_batch_preserves_input_arity() {
    let (handle, _handler, proxy) = embeddings_fixture();
    let texts = vec![String::from("a"), String::from("b")];
    let vectors = proxy.embed_batch(&texts).expect("embed batch");
    assert_eq!(vectors.len(), 2);
    handle.shutdown();
    handle.join().expect("join server");
}

#[test]
fn dimensions_are_fetched_once_and_memoised() {
    let (handle, handler, proxy) = embeddings_fixture();

    assert_eq!(proxy.dimensions().expect("first fetch"), 3);
    assert_eq!(proxy.dimensions().expect("second fetch"), 3);
    assert_eq!(
        handler.dimension_fetches.load(Ordering::SeqCst),
        1,
        "the adapter must be asked exactly once"
    );
    assert_eq!(proxy.dimensions_cached().expect("cached"), 3);

    handle.shutdown();
    handle.join().expect("join server");
}

#[test]
fn reading_cached_dimensions_before_the_fetch_fails_loudly() {
    let (handle, handler, proxy) = embeddings_fixture();

    let error = proxy
        .dimensions_cached()
        .expect_err("cache must be empty before the first fetch");
    assert!(matches!(error, ProxyError::DimensionsNotFetched));
    assert_eq!(handler.dimension_fetches.load(Ordering::SeqCst), 0);

    handle.shutdown();
    handle.join().expect("join server");
}

#[test]
fn non_numeric_results_surface_as_shape_errors() {
    let (handle, _handler, proxy) = embeddings_fixture();

    let error = proxy
        .remote
        .call("badShape", Vec::new())
        .map(|value| parse_vector("badShape", &value))
        .expect("transport succeeds");
    assert!(matches!(
        error.expect_err("shape error"),
        ProxyError::UnexpectedShape { .. }
    ));

    handle.shutdown();
    handle.join().expect("join server");
}
