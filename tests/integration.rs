use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const BILLING_CSV: &str = "\
invoice_month,account_id,subscription,service,resource_group,resource_id,region,usage_qty,unit_cost,cost
2025-04,acct-1,sub-1,Compute,rg-prod,res-1,eastus,10,10,100
2025-04,acct-1,sub-1,Storage,rg-dev,res-2,westus,0.5,60,30
2025-05,acct-1,sub-1,Compute,rg-prod,res-1,eastus,5,10,50
2025-05,acct-1,sub-1,,,res-3,eastus,0,0,0
";

const RESOURCES_CSV: &str = "\
resource_id,owner,env,tags_json
res-1,alice,prod,{}
res-2,bob,dev,{}
";

fn copilot_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("copilot");
    path
}

fn write_config(root: &Path, port: u16) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/copilot.sqlite"

[index]
dir = "{root}/data/index"

[embedding]
provider = "hash"
dims = 64

[completion]
provider = "disabled"

[server]
bind = "127.0.0.1:{port}"
"#,
        root = root.display(),
        port = port,
    );

    let config_path = config_dir.join("copilot.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("billing.csv"), BILLING_CSV).unwrap();
    fs::write(files_dir.join("resources.csv"), RESOURCES_CSV).unwrap();

    let config_path = write_config(&root, 8000);
    (tmp, config_path)
}

fn run_copilot(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = copilot_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run copilot binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Initializes the database and loads both test CSVs.
fn load_fixtures(tmp: &TempDir, config_path: &Path) {
    let files = tmp.path().join("files");
    let (_, stderr, success) = run_copilot(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);

    let resources = files.join("resources.csv");
    let (_, stderr, success) =
        run_copilot(config_path, &["load", "resources", resources.to_str().unwrap()]);
    assert!(success, "load resources failed: {}", stderr);

    let billing = files.join("billing.csv");
    let (_, stderr, success) =
        run_copilot(config_path, &["load", "billing", billing.to_str().unwrap()]);
    assert!(success, "load billing failed: {}", stderr);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_copilot(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/copilot.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_copilot(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_copilot(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_database_is_fatal() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_copilot(&config_path, &["kpi", "2025-04"]);
    assert!(!success);
    assert!(stderr.contains("Database not found"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_copilot(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_load_reports_counts_and_checks() {
    let (tmp, config_path) = setup_test_env();
    run_copilot(&config_path, &["init"]);

    let files = tmp.path().join("files");
    let (stdout, _, success) = run_copilot(
        &config_path,
        &["load", "resources", files.join("resources.csv").to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("resources upserted: 2"));

    let (stdout, _, success) = run_copilot(
        &config_path,
        &["load", "billing", files.join("billing.csv").to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("rows inserted: 4"));
    assert!(stdout.contains("quality checks: duplicate_resource_ids"));
}

#[test]
fn test_generate_sample_and_load() {
    let (tmp, config_path) = setup_test_env();
    let sample_dir = tmp.path().join("sample");

    let (stdout, stderr, success) = run_copilot(
        &config_path,
        &[
            "generate-sample",
            "--dir",
            sample_dir.to_str().unwrap(),
            "--resources",
            "5",
            "--months",
            "2",
            "--seed",
            "1",
        ],
    );
    assert!(success, "generate-sample failed: {}", stderr);
    assert!(stdout.contains("sample generated"));

    run_copilot(&config_path, &["init"]);
    let (stdout, _, success) = run_copilot(
        &config_path,
        &["load", "resources", sample_dir.join("resources.csv").to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("resources upserted: 5"));

    let (stdout, _, success) = run_copilot(
        &config_path,
        &["load", "billing", sample_dir.join("billing.csv").to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("rows inserted: 10"));
}

#[test]
fn test_kpi_report() {
    let (tmp, config_path) = setup_test_env();
    load_fixtures(&tmp, &config_path);

    let (stdout, stderr, success) = run_copilot(&config_path, &["kpi", "2025-04"]);
    assert!(success, "kpi failed: {}", stderr);
    assert!(stdout.contains("total cost: 130.00"));
    assert!(stdout.contains("alice"));
    assert!(stdout.contains("100.00"));
    assert!(stdout.contains("rg-dev"));
}

#[test]
fn test_kpi_rejects_bad_month() {
    let (tmp, config_path) = setup_test_env();
    load_fixtures(&tmp, &config_path);

    let (_, stderr, success) = run_copilot(&config_path, &["kpi", "April"]);
    assert!(!success);
    assert!(stderr.contains("YYYY-MM"));
}

#[test]
fn test_trend_report() {
    let (tmp, config_path) = setup_test_env();
    load_fixtures(&tmp, &config_path);

    let (stdout, _, success) = run_copilot(&config_path, &["trend", "Alice"]);
    assert!(success);
    let april = stdout.find("2025-04").expect("april missing");
    let may = stdout.find("2025-05").expect("may missing");
    assert!(april < may);
    assert!(stdout.contains("50.00"));
}

#[test]
fn test_recommend_report() {
    let (tmp, config_path) = setup_test_env();
    load_fixtures(&tmp, &config_path);

    let (stdout, _, success) = run_copilot(&config_path, &["recommend", "--threshold", "1"]);
    assert!(success);
    assert!(stdout.contains("idle resources: 2"));
    assert!(stdout.contains("billing:2"));
    assert!(stdout.contains("missing tags: 1"));
    assert!(stdout.contains("res-3"));
}

#[test]
fn test_index_rebuild_and_search() {
    let (tmp, config_path) = setup_test_env();
    load_fixtures(&tmp, &config_path);

    let (stdout, stderr, success) = run_copilot(&config_path, &["index", "rebuild"]);
    assert!(success, "index rebuild failed: {}", stderr);
    assert!(stdout.contains("documents: 7"));
    assert!(tmp.path().join("data/index/vector_store.index").exists());
    assert!(tmp.path().join("data/index/vector_store.index.json").exists());

    let (stdout, _, success) = run_copilot(
        &config_path,
        &["index", "search", "Compute eastus res-1", "--k", "2"],
    );
    assert!(success);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("2. ["));
    assert!(!stdout.contains("3. ["));
}

#[test]
fn test_index_search_without_index_uses_fallback() {
    let (tmp, config_path) = setup_test_env();
    load_fixtures(&tmp, &config_path);

    let (stdout, _, success) = run_copilot(&config_path, &["index", "search", "anything"]);
    assert!(success);
    assert!(stdout.contains("fallback"));
    assert!(stdout.contains("Monitor Azure cost anomalies using Cost Explorer."));
}

#[test]
fn test_ask_with_disabled_completion() {
    let (tmp, config_path) = setup_test_env();
    load_fixtures(&tmp, &config_path);

    let (stdout, stderr, success) = run_copilot(
        &config_path,
        &["ask", "What was cost by owner alice in 2025-04?"],
    );
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("Sorry, I could not generate an answer right now."));
    assert!(stdout.contains("sources: finops_tips.md"));
    assert!(stdout.contains(r#"table: [["alice",100.0]]"#));
}

#[test]
fn test_status() {
    let (tmp, config_path) = setup_test_env();
    load_fixtures(&tmp, &config_path);

    let (stdout, _, success) = run_copilot(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("Billing rows:  4"));
    assert!(stdout.contains("Resources:     2"));
    assert!(stdout.contains("not ready"));
}

// ─── serve ──────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Kills the server process when the test ends, pass or fail.
struct ServerGuard(std::process::Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[tokio::test]
async fn test_serve_endpoints() {
    let (tmp, _) = setup_test_env();
    let port = find_free_port();
    let config_path = write_config(tmp.path(), port);
    load_fixtures(&tmp, &config_path);

    let child = Command::new(copilot_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("serve")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("failed to start server");
    let _guard = ServerGuard(child);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());

    let resp = client
        .get(format!("{}/cost_by_owner?month=2025-04", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["month"], "2025-04");
    assert_eq!(
        body["data"],
        serde_json::json!([["alice", 100.0], ["bob", 30.0]])
    );

    let resp = client
        .get(format!("{}/cost_by_owner", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/ask", base))
        .json(&serde_json::json!({"question": "cost by owner alice in 2025-04"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(
        body["answer"],
        "Sorry, I could not generate an answer right now."
    );
    assert_eq!(body["table"], serde_json::json!([["alice", 100.0]]));
    assert_eq!(body["suggestions"], serde_json::json!([]));
}
