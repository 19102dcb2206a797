//! End-to-end tests for the HTTP adapter.
//!
//! These tests start a real server on an ephemeral port and talk to it with
//! `reqwest`. Tests that compile code return early if `cargo` is missing.

use coderun_common::{RuntimeConfig, WorkspaceConfig};
use coderun_core::{AdapterResponse, Orchestrator, Toolchain};
use coderun_server::{CoderunServer, TestHandle};
use tokio_test::assert_ok;

async fn start(dir: &std::path::Path) -> Option<TestHandle> {
    let mut config = RuntimeConfig::default();
    config.workspace = WorkspaceConfig {
        root: Some(dir.join("workspaces")),
    };

    let toolchain = match Toolchain::detect(&config.toolchain).await {
        Ok(toolchain) => toolchain,
        Err(e) => {
            eprintln!("skipping: {e}");
            return None;
        }
    };

    let orchestrator = Orchestrator::new(&config, toolchain);
    Some(assert_ok!(
        CoderunServer::start_test(orchestrator, config.limits).await
    ))
}

#[tokio::test]
async fn test_execute_hello_world() {
    let dir = tempfile::tempdir().unwrap();
    let Some(server) = start(dir.path()).await else {
        return;
    };

    let response = reqwest::Client::new()
        .post(format!("{}/execute", server.url()))
        .json(&serde_json::json!({
            "source": "fn main() { println!(\"hi\"); }",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));

    let body: AdapterResponse = response.json().await.unwrap();
    assert!(body.success, "{:?}", body.errors);
    assert!(body.output.contains("hi"));
    assert_eq!(body.exit_code, 0);
    assert!(body.metadata.compilation_time > 0.0);
    assert!(body.metadata.toolchain_name.starts_with("cargo"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_execute_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    let Some(server) = start(dir.path()).await else {
        return;
    };

    let body: AdapterResponse = reqwest::Client::new()
        .post(format!("{}/execute", server.url()))
        .json(&serde_json::json!({
            "source": "fn main() { undefined_symbol(); }",
            "context": { "optimization_level": "O2" },
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(!body.success);
    assert_ne!(body.exit_code, 0);
    assert!(body.errors.len() > 1);
    assert_eq!(body.metadata.execution_time, 0.0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_health_and_ready() {
    let dir = tempfile::tempdir().unwrap();
    let Some(server) = start(dir.path()).await else {
        return;
    };
    let client = reqwest::Client::new();

    let health = client
        .get(format!("{}/health", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let ready: serde_json::Value = client
        .get(format!("{}/ready", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["in_flight"], 0);

    server.shutdown().await;
}
