use assert_cmd::Command;
use httpmock::prelude::*;

async fn json(server: &MockServer, path: &'static str, body: &'static str) {
    server
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(200)
                .header("content-type", "application/json")
                .body(body);
        })
        .await;
}

async fn backend(db_status: u16) -> MockServer {
    let server = MockServer::start_async().await;

    json(&server, "/resources", r#"{"cpu":40.0,"memory":50.0,"disk":30.0,"networkConnections":8}"#).await;
    json(&server, "/processes", r#"[]"#).await;
    json(&server, "/logs", r#"[{"id":1,"timestamp":"2025-01-01T00:00:00Z","level":"info","message":"engine ready","source":"engine"}]"#).await;
    json(&server, "/metrics", r#"{"uptime":3600,"responseTime":120}"#).await;
    json(&server, "/analysis-history", r#"[]"#).await;
    json(&server, "/user-prompts", r#"{"prompts":[]}"#).await;
    json(&server, "/health", r#"{"status":"ok"}"#).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/db-health");
            then.status(db_status)
                .header("content-type", "application/json")
                .body(r#"{"healthy":true}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/stream");
            then.status(503);
        })
        .await;
    server
}

fn cli() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pulsegate-cli"));
    cmd.env("PULSEGATE_CONFIG", "/nonexistent/pulsegate.toml")
        .env_remove("PULSEGATE_URL")
        .env_remove("PULSEGATE_TOKEN")
        .timeout(std::time::Duration::from_secs(20));
    cmd
}

#[tokio::test]
async fn once_prints_stable_dashboard() {
    let server = backend(200).await;

    cli()
        .args(["--url", &server.base_url(), "--no-color", "once"])
        .assert()
        .success()
        .stdout(predicates::str::contains("System stable"))
        .stdout(predicates::str::contains("engine ready"))
        .stdout(predicates::str::contains("healthy"));
}

#[tokio::test]
async fn once_reports_database_outage() {
    let server = backend(500).await;

    cli()
        .args(["--url", &server.base_url(), "--no-color", "once"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Database unavailable"))
        .stdout(predicates::str::contains("Stale"))
        .stdout(predicates::str::contains("database"));
}

#[tokio::test]
async fn once_json_is_machine_readable() {
    let server = backend(200).await;

    let output = cli()
        .args(["--url", &server.base_url(), "once", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let view: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(view["insights"][0]["title"], "System stable");
    assert_eq!(view["window"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn once_against_unreachable_backend_shows_banner() {
    cli()
        .args(["--url", "http://127.0.0.1:59999", "--no-color", "once"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No telemetry source answered"));
}

#[tokio::test]
async fn broken_config_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulsegate.toml");
    std::fs::write(&path, "[polling]\ninterval_ms = 0\n").unwrap();

    cli()
        .args(["--config", path.to_str().unwrap(), "once"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("loading config"));
}

#[tokio::test]
async fn broken_default_config_warns_and_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulsegate.toml");
    std::fs::write(&path, "[polling\ninterval_ms = ").unwrap();

    cli()
        .env("PULSEGATE_CONFIG", &path)
        .env("RUST_LOG", "warn")
        .args(["--url", "http://127.0.0.1:59999", "--no-color", "once"])
        .assert()
        .success()
        .stderr(predicates::str::contains("[config]"))
        .stderr(predicates::str::contains("using defaults"));
}
