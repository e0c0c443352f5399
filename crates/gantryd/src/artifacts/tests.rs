//! Tests for the filesystem artifact writer.

use std::path::PathBuf;

use rstest::rstest;

use gantry_plugins::{ArtifactSpec, ChainLimits, ExecutionContext};

use super::*;

fn context() -> ExecutionContext {
    ExecutionContext::root("reporter", "1.0.0", "tenant-a", ChainLimits::default())
}

#[test]
fn artifacts_land_under_tenant_and_trace_directories() {
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = FsArtifactWriter::new(dir.path());
    let context = context();
    let spec = ArtifactSpec {
        name: String::from("summary"),
        path: PathBuf::from("reports/summary.json"),
    };

    writer
        .write(&context, &spec, &serde_json::json!({"total": 3}))
        .expect("artifact write");

    let written = dir
        .path()
        .join("tenant-a")
        .join(context.trace_id())
        .join("reports/summary.json");
    let raw = std::fs::read_to_string(written).expect("read artifact");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("parse artifact");
    assert_eq!(parsed, serde_json::json!({"total": 3}));
}

#[rstest]
#[case::absolute("/etc/passwd")]
#[case::parent_traversal("../outside.json")]
fn escaping_artifact_paths_are_rejected(#[case] path: &str) {
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = FsArtifactWriter::new(dir.path());
    let spec = ArtifactSpec {
        name: String::from("escape"),
        path: PathBuf::from(path),
    };

    let error = writer
        .write(&context(), &spec, &serde_json::Value::Null)
        .expect_err("escaping path must fail");
    assert_eq!(error.kind(), std::io::ErrorKind::InvalidInput);
}
