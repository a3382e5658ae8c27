//! Integration tests for the digest run endpoint.
//!
//! Each test spins up an Axum server on a random port backed by an
//! in-memory libSQL store and stub content / summary / delivery providers,
//! then exercises the real HTTP contract with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use digest_dispatch::api::digest_routes;
use digest_dispatch::config::DigestConfig;
use digest_dispatch::error::{ContentError, DeliveryError, SummaryError, TriggerError};
use digest_dispatch::pipeline::runner::{DigestDeps, DigestRunner};
use digest_dispatch::pipeline::types::{
    ContentFetch, ContentItem, ContentProvider, ContentSet, ContinuationTrigger, DeliveryProvider,
    DeliveryReceipt, PreparedDigest, Recipient, RunStatus, Summarizer, Tier, TopicSummary,
};
use digest_dispatch::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const SECRET: &str = "integration-secret";

// ── Stubs ───────────────────────────────────────────────────────────────

struct StubContent;

#[async_trait]
impl ContentProvider for StubContent {
    async fn fetch_content(&self, topics: &[String]) -> Result<ContentFetch, ContentError> {
        let content = topics
            .iter()
            .map(|t| {
                let item = ContentItem {
                    title: format!("{t} headline"),
                    url: format!("https://news.example.com/{t}"),
                    snippet: "snippet".into(),
                    source: None,
                    published_at: None,
                };
                (t.clone(), ContentSet::new(t.clone(), vec![item]))
            })
            .collect();
        Ok(ContentFetch::complete(content))
    }
}

struct StubSummarizer;

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(
        &self,
        topic: &str,
        content: &ContentSet,
        tier: Tier,
    ) -> Result<TopicSummary, SummaryError> {
        Ok(TopicSummary {
            topic: topic.to_string(),
            tier,
            summary: format!("{} stories about {topic}", content.items.len()),
            key_points: vec![],
            sources: vec![],
        })
    }
}

#[derive(Default)]
struct StubDelivery {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl DeliveryProvider for StubDelivery {
    fn name(&self) -> &str {
        "stub"
    }

    async fn send(
        &self,
        address: &str,
        _digest: &PreparedDigest,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        self.sent.lock().unwrap().push(address.to_string());
        Ok(DeliveryReceipt::default())
    }
}

#[derive(Default)]
struct RecordingTrigger {
    cursors: Mutex<Vec<usize>>,
}

impl ContinuationTrigger for RecordingTrigger {
    fn fire(&self, cursor: usize) -> Result<(), TriggerError> {
        self.cursors.lock().unwrap().push(cursor);
        Ok(())
    }
}

struct TestServer {
    base: String,
    db: Arc<LibSqlBackend>,
    delivery: Arc<StubDelivery>,
    trigger: Arc<RecordingTrigger>,
}

/// Start an Axum server on a random port with `population` recipients.
async fn start_server(population: usize, batch_size: usize) -> TestServer {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    for i in 0..population {
        db.upsert_recipient(&Recipient {
            id: format!("r{i:02}"),
            email: format!("r{i:02}@example.com"),
            name: None,
            tier: if i % 2 == 0 { Tier::Free } else { Tier::Pro },
            topics: vec!["rust".into(), "ai".into()],
            paused: false,
        })
        .await
        .unwrap();
    }

    let delivery = Arc::new(StubDelivery::default());
    let trigger = Arc::new(RecordingTrigger::default());
    let config = DigestConfig {
        batch_size,
        send_interval: Duration::from_millis(1),
        summary_timeout: Duration::from_secs(2),
        ..DigestConfig::default()
    };
    let runner = Arc::new(DigestRunner::new(
        config,
        DigestDeps {
            recipients: db.clone(),
            content: Arc::new(StubContent),
            summarizer: Arc::new(StubSummarizer),
            delivery: delivery.clone(),
            archive: db.clone(),
            audit: db.clone(),
            trigger: trigger.clone(),
        },
    ));

    let app = digest_routes(runner, SecretString::from(SECRET));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        db,
        delivery,
        trigger,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_public() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(0, 10).await;
        let body: Value = reqwest::get(format!("{}/health", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn run_without_secret_is_unauthorized() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(3, 10).await;
        let client = reqwest::Client::new();

        let missing = client
            .post(format!("{}/api/digests/run", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 401);

        let wrong = client
            .post(format!("{}/api/digests/run", server.base))
            .header("x-cron-secret", "nope")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 401);

        assert!(server.delivery.sent.lock().unwrap().is_empty());
        assert!(server.db.list_runs(10).await.unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bad_query_is_unauthorized_before_it_is_invalid() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(3, 10).await;
        let client = reqwest::Client::new();
        let url = format!("{}/api/digests/run?cursor=abc", server.base);

        let anonymous = client.post(&url).send().await.unwrap();
        assert_eq!(anonymous.status(), 401);

        let authorized = client.post(&url).bearer_auth(SECRET).send().await.unwrap();
        assert_eq!(authorized.status(), 400);

        assert!(server.delivery.sent.lock().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn blank_secret_header_is_unauthorized() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(3, 10).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/digests/run", server.base))
            .header("x-cron-secret", "")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        assert!(server.delivery.sent.lock().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn first_slice_reports_remaining_and_chains() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(23, 10).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/digests/run", server.base))
            .bearer_auth(SECRET)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["results"]["processed"], 10);
        assert_eq!(body["results"]["successful"], 10);
        assert_eq!(body["results"]["status"], "success");
        assert_eq!(body["remaining"], 13);
        assert_eq!(body["nextBatchTriggered"], true);
        assert!(body["executionTimeMs"].is_u64());
        assert!(body["message"].as_str().unwrap().contains("10"));

        assert_eq!(*server.trigger.cursors.lock().unwrap(), vec![10]);
        assert_eq!(server.delivery.sent.lock().unwrap().len(), 10);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn last_slice_via_body_cursor_ends_chain() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(23, 10).await;
        let body: Value = reqwest::Client::new()
            .post(format!("{}/api/digests/run", server.base))
            .header("x-cron-secret", SECRET)
            .json(&json!({ "cursor": 20 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["results"]["processed"], 3);
        assert!(body.get("remaining").is_none());
        assert!(body.get("nextBatchTriggered").is_none());
        assert!(server.trigger.cursors.lock().unwrap().is_empty());

        let runs = server.db.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].cursor, 20);
        assert_eq!(runs[0].result.status, RunStatus::Success);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cursor_in_query_string_is_honored() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(12, 10).await;
        let body: Value = reqwest::Client::new()
            .post(format!("{}/api/digests/run?cursor=10", server.base))
            .bearer_auth(SECRET)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["results"]["processed"], 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cursor_past_end_is_a_noop() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(5, 10).await;
        let body: Value = reqwest::Client::new()
            .post(format!("{}/api/digests/run", server.base))
            .bearer_auth(SECRET)
            .json(&json!({ "cursor": 50 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["results"]["processed"], 0);
        assert!(server.delivery.sent.lock().unwrap().is_empty());
        assert!(server.trigger.cursors.lock().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(1, 10).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/digests/run", server.base))
            .bearer_auth(SECRET)
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        assert!(server.delivery.sent.lock().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn delivered_digests_are_archived() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(2, 10).await;
        reqwest::Client::new()
            .post(format!("{}/api/digests/run", server.base))
            .bearer_auth(SECRET)
            .send()
            .await
            .unwrap();

        let archived = server.db.list_archive("r00").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].topics, vec!["rust", "ai"]);
    })
    .await
    .expect("test timed out");
}
