use std::fs;
use std::path::Path;

use predicates::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn repodata(apps: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "timestamp": 1_700_000_000, "apps": apps })
}

fn appwatch(dir: &Path, endpoint: &str) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("appwatch");
    cmd.current_dir(dir);
    cmd.env_remove("RUST_LOG");
    cmd.args([
        "--endpoint",
        endpoint,
        "--state-file",
        dir.join("state/known_apps.json").to_str().unwrap(),
        "--log-file",
        dir.join("logs/app_updates.log").to_str().unwrap(),
    ]);
    cmd
}

async fn serve(server: &MockServer, body: serde_json::Value) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/repodata.0.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn once_reports_new_apps_then_updates_on_next_run() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/repodata.0.json", server.uri());
    let tmp = tempfile::tempdir().unwrap();

    serve(
        &server,
        repodata(serde_json::json!({
            "app.a": { "name": "Alpha", "min_version_code": 1, "signing_cert_hashes": ["X"] },
            "app.b": { "name": "Beta", "min_version_code": 4, "signing_cert_hashes": ["B"] }
        })),
    )
    .await;

    appwatch(tmp.path(), &endpoint)
        .arg("--once")
        .assert()
        .success()
        .stdout(predicate::str::contains("Repository summary"))
        .stdout(predicate::str::contains(
            "[2023-11-14 22:13:20 UTC] NEW    : app.a (Alpha) vc=1",
        ))
        .stdout(predicate::str::contains("NEW    : app.b (Beta) vc=4"));

    let state_path = tmp.path().join("state/known_apps.json");
    let state: serde_json::Value =
        serde_json::from_slice(&fs::read(&state_path).unwrap()).unwrap();
    assert_eq!(state["app.a"]["version_code"], 1);
    assert_eq!(state["app.b"]["fingerprint"], "B");

    serve(
        &server,
        repodata(serde_json::json!({
            "app.a": { "name": "Alpha", "min_version_code": 2, "signing_cert_hashes": ["Y"] },
            "app.c": { "min_version_code": 1, "signing_cert_hashes": ["C"] }
        })),
    )
    .await;

    appwatch(tmp.path(), &endpoint)
        .arg("--once")
        .assert()
        .success()
        .stdout(predicate::str::contains("Repository summary").not())
        .stdout(predicate::str::contains("NEW    : app.c (-) vc=1"))
        .stdout(predicate::str::contains("REMOVED: app.b (Beta) was vc=4"))
        .stdout(predicate::str::contains("UPDATED: app.a (Alpha) 1 -> 2"))
        .stdout(predicate::str::contains(
            "CERT   : app.a (Alpha) signing cert changed: X -> Y",
        ));

    let state: serde_json::Value =
        serde_json::from_slice(&fs::read(&state_path).unwrap()).unwrap();
    assert!(state.get("app.b").is_none());
    assert_eq!(state["app.a"]["version_code"], 2);

    assert!(tmp.path().join("logs").read_dir().unwrap().next().is_some());
}

#[tokio::test]
async fn quiet_once_prints_nothing() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/repodata.0.json", server.uri());
    let tmp = tempfile::tempdir().unwrap();
    serve(
        &server,
        repodata(serde_json::json!({
            "app.a": { "min_version_code": 1, "signing_cert_hashes": ["X"] }
        })),
    )
    .await;

    appwatch(tmp.path(), &endpoint)
        .args(["--once", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert!(tmp.path().join("state/known_apps.json").exists());
}

#[tokio::test]
async fn exits_nonzero_after_max_failures_without_state_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;
    let endpoint = format!("{}/repodata.0.json", server.uri());
    let tmp = tempfile::tempdir().unwrap();

    appwatch(tmp.path(), &endpoint)
        .args(["--interval", "1", "--max-backoff-secs", "1", "--max-failures", "3"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains(
            "Max consecutive failures (3) reached. Exiting.",
        ));

    assert!(!tmp.path().join("state/known_apps.json").exists());
}

#[tokio::test]
async fn schema_mismatch_fails_one_shot_run() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/repodata.0.json", server.uri());
    let tmp = tempfile::tempdir().unwrap();
    serve(
        &server,
        repodata(serde_json::json!({
            "app.a": { "min_version_code": 1 }
        })),
    )
    .await;

    appwatch(tmp.path(), &endpoint)
        .arg("--once")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Check failed (schema)"));

    assert!(!tmp.path().join("state/known_apps.json").exists());
}

#[test]
fn invalid_endpoint_is_rejected_before_polling() {
    let tmp = tempfile::tempdir().unwrap();
    appwatch(tmp.path(), "file:///etc/passwd")
        .arg("--once")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unsupported scheme"));

    assert!(!tmp.path().join("logs").exists());
}

#[test]
fn state_file_without_file_name_is_rejected_before_polling() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("appwatch");
    cmd.current_dir(tmp.path())
        .env_remove("RUST_LOG")
        .args([
            "--endpoint",
            "http://127.0.0.1:9/repodata.0.json",
            "--state-file",
            "state/",
            "--log-file",
            tmp.path().join("logs/app_updates.log").to_str().unwrap(),
            "--once",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid state file"));

    assert!(!tmp.path().join("logs").exists());
    assert!(!tmp.path().join("state").exists());
}
