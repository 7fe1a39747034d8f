//! HTTP tests against an in-process server: an in-memory cost store, a
//! temp-dir text index, and a mocked chat-completions endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use finops_copilot::answer::AppContext;
use finops_copilot::completion::{CompletionBackend, OpenAiCompatible};
use finops_copilot::config::parse_config;
use finops_copilot::server::router;
use finops_copilot::text_index::TextIndex;
use finops_copilot_core::models::{BillingRecord, ResourceRecord};
use finops_copilot_core::store::memory::InMemoryCostStore;
use finops_copilot_core::store::CostStore;

struct TestServer {
    base: String,
    client: reqwest::Client,
    _index_dir: TempDir,
}

fn billing(
    month: &str,
    service: &str,
    group: &str,
    resource: &str,
    usage: f64,
    cost: f64,
) -> BillingRecord {
    BillingRecord {
        invoice_month: month.into(),
        account_id: "acct-1".into(),
        subscription: "sub-1".into(),
        service: service.into(),
        resource_group: group.into(),
        resource_id: resource.into(),
        region: "eastus".into(),
        usage_qty: usage,
        unit_cost: 1.0,
        cost,
    }
}

fn resource(id: &str, owner: &str) -> ResourceRecord {
    ResourceRecord {
        resource_id: id.into(),
        owner: Some(owner.into()),
        env: "prod".into(),
        tags_json: "{}".into(),
    }
}

async fn seeded_store() -> InMemoryCostStore {
    let store = InMemoryCostStore::new();
    store
        .insert_billing(&[
            billing("2025-04", "Compute", "rg-prod", "res-1", 10.0, 100.0),
            billing("2025-04", "Storage", "rg-dev", "res-2", 0.5, 30.0),
            billing("2025-05", "Compute", "rg-prod", "res-1", 5.0, 50.0),
            billing("2025-05", "unknown", "unknown", "res-3", 0.0, 8.0),
        ])
        .await
        .unwrap();
    store
        .upsert_resources(&[resource("res-1", "alice"), resource("res-2", "bob")])
        .await
        .unwrap();
    store
}

/// Starts the router on an ephemeral port with the completion API at `llm_url`.
async fn start(llm_url: &str, extra_config: &str) -> TestServer {
    let index_dir = TempDir::new().unwrap();
    let config = parse_config(&format!(
        "[db]\npath = \"unused.sqlite\"\n\
         [index]\ndir = {:?}\n\
         [embedding]\ndims = 64\n\
         [completion]\nbase_url = {:?}\n\
         {}",
        index_dir.path().display().to_string(),
        llm_url,
        extra_config,
    ))
    .unwrap();

    let index = Arc::new(TextIndex::new(&config.index.dir, &config.embedding).unwrap());
    let completion: Arc<dyn CompletionBackend> = Arc::new(OpenAiCompatible::with_key(
        &config.completion,
        "test-key".to_string(),
    ));
    let ctx = AppContext::new(config, Arc::new(seeded_store().await), index, completion);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(Arc::new(ctx))).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        _index_dir: index_dir,
    }
}

impl TestServer {
    async fn get(&self, route: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, route))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, route: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, route))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

async fn mock_llm(reply: ResponseTemplate) -> MockServer {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(reply)
        .mount(&llm)
        .await;
    llm
}

#[tokio::test]
async fn health_reports_version() {
    let llm = MockServer::start().await;
    let server = start(&llm.uri(), "").await;

    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn cost_by_owner_and_kpi() {
    let llm = MockServer::start().await;
    let server = start(&llm.uri(), "").await;

    let (status, body) = server.get("/cost_by_owner?month=2025-04").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"], json!([["alice", 100.0], ["bob", 30.0]]));

    let (status, body) = server.get("/kpi?month=2025-05").await;
    assert_eq!(status, 200);
    assert_eq!(body["month"], "2025-05");
    assert_eq!(body["cost_by_owner"], json!([["alice", 50.0], ["unknown", 8.0]]));

    let (status, body) = server.get("/cost_by_owner?month=April").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn kpi_summary_breaks_down_by_service_and_group() {
    let llm = MockServer::start().await;
    let server = start(&llm.uri(), "").await;

    let (status, body) = server.get("/kpi/summary?month=2025-04").await;
    assert_eq!(status, 200);
    assert_eq!(body["total_cost"], 130.0);
    assert_eq!(body["by_service"], json!({"Compute": 100.0, "Storage": 30.0}));
    assert_eq!(body["by_resource_group"], json!({"rg-dev": 30.0, "rg-prod": 100.0}));
}

#[tokio::test]
async fn monthly_trend_requires_owner() {
    let llm = MockServer::start().await;
    let server = start(&llm.uri(), "").await;

    let (status, body) = server.get("/monthly_trend?owner=alice").await;
    assert_eq!(status, 200);
    assert_eq!(
        body["monthly_trend"],
        json!([
            {"month": "2025-04", "total_cost": 100.0},
            {"month": "2025-05", "total_cost": 50.0}
        ])
    );

    let (status, _) = server.get("/monthly_trend").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn recommendations_use_threshold() {
    let llm = MockServer::start().await;
    let server = start(&llm.uri(), "").await;

    let (status, body) = server.get("/recommendations").await;
    assert_eq!(status, 200);
    assert!(body["month"].is_null());
    let idle = body["idle_resources"].as_array().unwrap();
    assert_eq!(idle.len(), 2);
    assert_eq!(body["missing_tags"][0]["resource_id"], "res-3");

    let (status, body) = server.get("/recommendations?threshold=0").await;
    assert_eq!(status, 200);
    assert_eq!(body["idle_resources"].as_array().unwrap().len(), 1);

    let (status, _) = server.get("/recommendations?threshold=lots").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn ask_returns_completion_and_datasets() {
    let llm = mock_llm(chat_reply("  Alice spent $100.00 in April.  ")).await;
    let server = start(&llm.uri(), "").await;

    let (status, body) = server
        .post("/ask", json!({"question": "What was cost by owner alice in 2025-04?"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], "Alice spent $100.00 in April.");
    assert_eq!(body["table"], json!([["alice", 100.0]]));
    assert_eq!(body["sources"], json!(["finops_tips.md", "finops_tips.md", "finops_tips.md"]));
    assert!(body["trend"].is_null());

    let requests = llm.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let prompt = sent["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("Owner=alice, Cost=$100.00"));
}

#[tokio::test]
async fn ask_degrades_to_apology_when_completion_fails() {
    let llm = mock_llm(ResponseTemplate::new(500)).await;
    let server = start(&llm.uri(), "").await;

    let (status, body) = server
        .post("/ask", json!({"question": "show the trend for alice"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], "Sorry, I could not generate an answer right now.");
    assert_eq!(body["trend"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn ask_degrades_to_apology_on_completion_timeout() {
    let llm = mock_llm(chat_reply("late").set_delay(Duration::from_secs(3))).await;
    let server = start(&llm.uri(), "[timeouts]\ncompletion_secs = 1\n").await;

    let (status, body) = server.post("/ask", json!({"question": "hello"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], "Sorry, I could not generate an answer right now.");
}

#[tokio::test]
async fn ask_answers_blank_questions() {
    let llm = mock_llm(chat_reply("Ask me about your cloud costs.")).await;
    let server = start(&llm.uri(), "").await;

    for question in ["", "   ", "```"] {
        let (status, body) = server.post("/ask", json!({ "question": question })).await;
        assert_eq!(status, 200, "question {:?}", question);
        assert_eq!(body["answer"], "Ask me about your cloud costs.");
        assert_eq!(body["sources"].as_array().unwrap().len(), 3);
        assert!(body["table"].is_null());
    }
}

#[tokio::test]
async fn ask_rejects_malformed_bodies() {
    let llm = MockServer::start().await;
    let server = start(&llm.uri(), "").await;

    let (status, body) = server.post("/ask", json!({"prompt": "hi"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn index_rebuild_feeds_retrieval() {
    let llm = mock_llm(chat_reply("ok")).await;
    let server = start(&llm.uri(), "[retrieval]\ntop_k = 2\n").await;

    let (status, body) = server.post("/index/rebuild", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["documents"], 7);

    let (status, body) = server
        .post(
            "/ask",
            json!({
                "question": "Invoice Month: 2025-04, Service: Compute, \
                             Resource Group: rg-prod, Resource ID: res-1, Region: eastus"
            }),
        )
        .await;
    assert_eq!(status, 200);
    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0], "billing+resources");
}
