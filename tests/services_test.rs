//! External service clients against local mock servers.

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tasktape_lib::config::{HuggingFaceConfig, OpenRouterConfig};
use tasktape_lib::error::TaskTapeError;
use tasktape_lib::recording::{Action, ActionKind, RecordingSequence, Task, TaskSource};
use tasktape_lib::services::{DatasetUploader, TaskGenerator};

/// Serve `router` on an ephemeral local port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<(String, Option<String>, String)>>>,
}

fn sample_sequence() -> RecordingSequence {
    let mut sequence = RecordingSequence::open(
        &Task::new("Search for rust", TaskSource::Llm),
        "https://example.com",
    );
    sequence
        .append(
            Action::new(
                ActionKind::Goto {
                    url: "https://example.com/search".to_string(),
                },
                1,
            )
            .with_screenshot("data:image/png;base64,AAAA"),
        )
        .unwrap();
    sequence.close(true)
}

// ---------------------------------------------------------------------------
// Dataset upload
// ---------------------------------------------------------------------------

async fn commit(
    State(seen): State<Seen>,
    AxumPath((owner, name)): AxumPath<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.requests
        .lock()
        .push((format!("{}/{}", owner, name), auth, body));
    if owner == "locked" {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "no write access"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "commitOid": "abc123",
            "commitUrl": format!("https://hub.example/datasets/{}/{}/commit/abc123", owner, name)
        })),
    )
}

fn hub(seen: Seen) -> Router {
    Router::new()
        .route("/api/datasets/:owner/:name/commit/main", post(commit))
        .with_state(seen)
}

#[tokio::test]
async fn test_upload_commits_sequence_file() {
    let seen = Seen::default();
    let base_url = serve(hub(seen.clone())).await;
    let uploader = DatasetUploader::new(&HuggingFaceConfig {
        base_url,
        ..HuggingFaceConfig::default()
    });
    let sequence = sample_sequence();

    let result = uploader
        .upload_sequence(&sequence, "hf_token", "alice/web-tasks")
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(
        result.commit_url.as_deref(),
        Some("https://hub.example/datasets/alice/web-tasks/commit/abc123")
    );

    let requests = seen.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    let (repo, auth, body) = &requests[0];
    assert_eq!(repo, "alice/web-tasks");
    assert_eq!(auth.as_deref(), Some("Bearer hf_token"));

    let file: Value = serde_json::from_str(body.lines().nth(1).unwrap()).unwrap();
    assert_eq!(file["value"]["path"], format!("data/{}.json", sequence.id));
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(file["value"]["content"].as_str().unwrap())
        .unwrap();
    let uploaded: RecordingSequence = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(uploaded, sequence);
}

#[tokio::test]
async fn test_upload_failures_are_values() {
    let seen = Seen::default();
    let base_url = serve(hub(seen)).await;
    let uploader = DatasetUploader::new(&HuggingFaceConfig {
        base_url,
        ..HuggingFaceConfig::default()
    });
    let sequence = sample_sequence();

    let rejected = uploader
        .upload_sequence(&sequence, "hf_token", "locked/web-tasks")
        .await;
    assert!(!rejected.success);
    assert!(rejected.message.contains("403"));
    assert!(rejected.commit_url.is_none());

    // Nothing listens on port 9 locally.
    let offline = DatasetUploader::new(&HuggingFaceConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        ..HuggingFaceConfig::default()
    });
    let unreachable = offline
        .upload_sequence(&sequence, "hf_token", "alice/web-tasks")
        .await;
    assert!(!unreachable.success);
}

// ---------------------------------------------------------------------------
// Task generation
// ---------------------------------------------------------------------------

fn completions(reply: &'static str, status: StatusCode) -> Router {
    Router::new().route(
        "/chat/completions",
        post(move |Json(body): Json<Value>| async move {
            if body["model"] != "test/model" {
                return (StatusCode::BAD_REQUEST, Json(json!({"error": "wrong model"})));
            }
            (
                status,
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": reply}}]
                })),
            )
        }),
    )
}

fn generator(base_url: String) -> TaskGenerator {
    TaskGenerator::new(&OpenRouterConfig {
        api_key: None,
        model: "test/model".to_string(),
        base_url,
    })
}

#[tokio::test]
async fn test_generate_task_cleans_reply() {
    let base_url = serve(completions(
        "<think>Something short.</think>\n\"Open the pricing page and pick the cheapest plan\"",
        StatusCode::OK,
    ))
    .await;

    let task = generator(base_url).generate_task("sk-or-test").await.unwrap();
    assert_eq!(task.description, "Open the pricing page and pick the cheapest plan");
    assert_eq!(task.source, TaskSource::Llm);
    assert!(!task.id.is_empty());
}

#[tokio::test]
async fn test_generate_task_errors_are_transport() {
    let failing = serve(completions("unused", StatusCode::INTERNAL_SERVER_ERROR)).await;
    let err = generator(failing).generate_task("sk-or-test").await.unwrap_err();
    assert!(matches!(err, TaskTapeError::Transport(_)));

    let empty = serve(completions("<think>only thoughts</think>", StatusCode::OK)).await;
    let err = generator(empty).generate_task("sk-or-test").await.unwrap_err();
    assert!(matches!(err, TaskTapeError::Transport(_)));

    let err = generator("http://127.0.0.1:9".to_string())
        .generate_task("sk-or-test")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskTapeError::Transport(_)));
}
