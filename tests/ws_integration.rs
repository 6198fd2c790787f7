//! Integration tests for the task WebSocket + REST surface.
//!
//! Each test spins up an Axum server on a random port with stubbed
//! fetch collaborators, connects via tokio-tungstenite, and exercises
//! the real WS / REST contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use slugdl::error::FetchError;
use slugdl::event::Broker;
use slugdl::fetch::{
    Aggregator, AggregatorRegistry, DownloadDirs, Filehost, FilehostRegistry, Page, ProgressFn,
    UrlDriver,
};
use slugdl::runner::{Runner, RunnerDeps};
use slugdl::server::{self, AppState};
use slugdl::store::MemoryStore;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Aggregator that answers from the URL alone (no real site).
struct StubAggregator;

#[async_trait]
impl Aggregator for StubAggregator {
    fn name(&self) -> &str {
        "stub"
    }

    fn resolve_url(&self, slug: &str) -> String {
        if slug.starts_with("http") {
            slug.to_string()
        } else {
            format!("https://stub.example/item/{slug}")
        }
    }

    async fn is_404(&self, _page: &mut dyn Page) -> Result<bool, FetchError> {
        Ok(false)
    }

    async fn display_name(&self, page: &mut dyn Page) -> Result<String, FetchError> {
        let url = page.current_url();
        Ok(url.rsplit('/').next().unwrap_or_default().to_string())
    }

    async fn open_download_page(&self, page: &mut dyn Page) -> Result<String, FetchError> {
        let url = page.current_url();
        let slug = url.rsplit('/').next().unwrap_or_default();
        let host_url = format!("https://files.stub.example/{slug}");
        page.goto(&host_url).await?;
        Ok(host_url)
    }
}

/// Filehost that succeeds instantly unless a gate holds the slug open.
#[derive(Default)]
struct StubFilehost {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl StubFilehost {
    fn gate(&self, slug: &str) -> Arc<Notify> {
        let mut gates = self.gates.lock().unwrap();
        Arc::clone(gates.entry(slug.to_string()).or_default())
    }
}

#[async_trait]
impl Filehost for StubFilehost {
    fn name(&self) -> &str {
        "stub-files"
    }

    async fn file_name(&self, page: &mut dyn Page) -> Result<String, FetchError> {
        Ok(page.current_url().rsplit('/').next().unwrap_or_default().to_string())
    }

    async fn file_ext(&self, _page: &mut dyn Page) -> Result<String, FetchError> {
        Ok("zip".to_string())
    }

    async fn download(
        &self,
        page: &mut dyn Page,
        _dirs: &DownloadDirs,
        _filename: &str,
        on_progress: ProgressFn<'_>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), FetchError> {
        let url = page.current_url();
        let slug = url.rsplit('/').next().unwrap_or_default().to_string();

        let gate = {
            let gates = self.gates.lock().unwrap();
            gates.get(&slug).map(Arc::clone)
        };
        if let Some(gate) = gate {
            tokio::select! {
                _ = gate.notified() => {}
                changed = cancel.changed() => {
                    if changed.is_ok() && *cancel.borrow() {
                        return Err(FetchError::Cancelled);
                    }
                }
            }
        }
        on_progress(100);
        Ok(())
    }
}

struct TestServer {
    port: u16,
    runner: Arc<Runner>,
    filehost: Arc<StubFilehost>,
    _shutdown_tx: watch::Sender<bool>,
}

/// Start an Axum server on a random port with stubbed collaborators.
async fn start_server() -> TestServer {
    let mut aggregators = AggregatorRegistry::new();
    aggregators
        .register(
            Arc::new(StubAggregator),
            vec![Regex::new(r"^https?://stub\.example/").unwrap()],
        )
        .unwrap();

    let filehost = Arc::new(StubFilehost::default());
    let mut filehosts = FilehostRegistry::new();
    filehosts
        .register(filehost.clone(), vec!["files.stub.example".to_string()])
        .unwrap();

    let broker = Arc::new(Broker::new());
    let runner = Runner::new(RunnerDeps {
        broker: Arc::clone(&broker),
        store: Arc::new(MemoryStore::new()),
        driver: Arc::new(UrlDriver),
        aggregators: Arc::new(aggregators),
        filehosts: Arc::new(filehosts),
        dirs: DownloadDirs {
            temp_dir: PathBuf::from("/tmp"),
            final_dir: PathBuf::from("/tmp"),
        },
        max_concurrent: 2,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    runner.spawn(shutdown_rx);

    let app = server::router(AppState {
        runner: Arc::clone(&runner),
        broker,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        port,
        runner,
        filehost,
        _shutdown_tx: shutdown_tx,
    }
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {other:?}"),
    }
}

// ── WebSocket Tests ──────────────────────────────────────────────────

#[tokio::test]
async fn ws_connect_receives_empty_sync() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
            .await
            .expect("WS connect failed");

        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);

        assert_eq!(json["type"], "sync");
        assert!(json["tasks"].as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_connect_receives_existing_tasks_on_sync() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        // Hold the task open so the sync sees it mid-flight.
        server.filehost.gate("a");
        let snap = server.runner.admit("stub", "a").await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
            .await
            .unwrap();

        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);

        assert_eq!(json["type"], "sync");
        let tasks = json["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["id"], snap.id.as_str());
        assert_eq!(tasks[0]["slug"], "a");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_receives_lifecycle_broadcast() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
            .await
            .unwrap();

        // Consume the initial sync.
        let _ = ws.next().await.unwrap().unwrap();

        let snap = server.runner.admit("stub", "b").await.unwrap();

        // Admitted → activated → progress → completed, in order.
        let mut kinds = Vec::new();
        while kinds.len() < 4 {
            let msg = ws.next().await.unwrap().unwrap();
            let json = parse_ws_json(&msg);
            kinds.push(json["type"].as_str().unwrap().to_string());
            if json["type"] == "admitted" {
                assert_eq!(json["task"]["id"], snap.id.as_str());
            }
        }
        assert_eq!(kinds, ["admitted", "activated", "progress", "completed"]);
    })
    .await
    .expect("test timed out");
}

// ── REST Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_responds() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{}/health", server.port))
            .await
            .unwrap();
        assert!(resp.status().is_success());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_admit_and_list() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.filehost.gate("a");
        server.filehost.gate("b");

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("http://127.0.0.1:{}/api/tasks", server.port))
            .json(&serde_json::json!({
                "aggregator": "stub",
                "slugs": ["a", "b", "a"],
            }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["admitted"].as_array().unwrap().len(), 2);
        // The repeated slug is rejected, not silently dropped.
        let rejected = body["rejected"].as_array().unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0]["slug"], "a");

        let listed: Value = reqwest::get(format!("http://127.0.0.1:{}/api/tasks", server.port))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_remove_unknown_task_is_404() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let client = reqwest::Client::new();
        let resp = client
            .delete(format!(
                "http://127.0.0.1:{}/api/tasks/stub:nope",
                server.port
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_clear_completed_tasks() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let snap = server.runner.admit("stub", "done").await.unwrap();

        // Wait for the task to finish.
        let client = reqwest::Client::new();
        loop {
            let listed: Value =
                reqwest::get(format!("http://127.0.0.1:{}/api/tasks", server.port))
                    .await
                    .unwrap()
                    .json()
                    .await
                    .unwrap();
            let tasks = listed.as_array().unwrap();
            if tasks.len() == 1 && tasks[0]["state"] == "completed" {
                assert_eq!(tasks[0]["id"], snap.id.as_str());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // state=2 is completed; see CompletionState ordinals.
        let resp = client
            .delete(format!(
                "http://127.0.0.1:{}/api/tasks?state=2",
                server.port
            ))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["removed"], 1);

        // Clearing running tasks is rejected outright.
        let resp = client
            .delete(format!(
                "http://127.0.0.1:{}/api/tasks?state=1",
                server.port
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

        // Out-of-range ordinals are a client error.
        let resp = client
            .delete(format!(
                "http://127.0.0.1:{}/api/tasks?state=7",
                server.port
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_retry_failed_task() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let snap = server.runner.admit("stub", "r").await.unwrap();

        // Wait for completion, then retry over REST.
        loop {
            if server
                .runner
                .list()
                .await
                .iter()
                .any(|(s, state)| s.id == snap.id && state.to_string() == "completed")
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let client = reqwest::Client::new();
        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/tasks/{}/retry",
                server.port,
                snap.id.as_str()
            ))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["id"], snap.id.as_str());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_cancel_running_task() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.filehost.gate("c");
        let snap = server.runner.admit("stub", "c").await.unwrap();

        // Wait until it is actually running.
        loop {
            if server
                .runner
                .list()
                .await
                .iter()
                .any(|(s, state)| s.id == snap.id && state.to_string() == "running")
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let client = reqwest::Client::new();
        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/tasks/{}/cancel",
                server.port,
                snap.id.as_str()
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

        // The task drains to completed with a cancelled error.
        loop {
            let done = server.runner.list().await.iter().any(|(s, state)| {
                s.id == snap.id
                    && state.to_string() == "completed"
                    && s.error.as_deref() == Some("cancelled")
            });
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("test timed out");
}
