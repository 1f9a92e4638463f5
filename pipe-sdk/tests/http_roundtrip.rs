//! End-to-end tests against an in-process HTTP server

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use resource_pipe::{FilePart, HttpTransport, Pipe, PipeConfig, PipeError, Record};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Db {
    next_id: u64,
    projects: Vec<Value>,
}

type Shared = Arc<Mutex<Db>>;

async fn list(State(db): State<Shared>) -> Json<Value> {
    Json(Value::Array(db.lock().projects.clone()))
}

async fn create(State(db): State<Shared>, Json(mut project): Json<Value>) -> Json<Value> {
    let mut db = db.lock();
    db.next_id += 1;
    project["id"] = json!(db.next_id);
    db.projects.push(project.clone());
    Json(project)
}

async fn fetch(State(db): State<Shared>, Path(id): Path<u64>) -> Result<Json<Value>, StatusCode> {
    db.lock()
        .projects
        .iter()
        .find(|p| p["id"] == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update(
    State(db): State<Shared>,
    Path(id): Path<u64>,
    Json(mut project): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut db = db.lock();
    let slot = db
        .projects
        .iter_mut()
        .find(|p| p["id"] == id)
        .ok_or(StatusCode::NOT_FOUND)?;
    project["id"] = json!(id);
    *slot = project.clone();
    Ok(Json(project))
}

async fn destroy(State(db): State<Shared>, Path(id): Path<u64>) -> StatusCode {
    db.lock().projects.retain(|p| p["id"] != id);
    StatusCode::NO_CONTENT
}

async fn upload(headers: HeaderMap, body: Bytes) -> Json<Value> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({
        "content_type": content_type,
        "size": body.len(),
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!([]))
}

async fn not_json() -> &'static str {
    "<html>maintenance</html>"
}

async fn serve() -> String {
    let app = Router::new()
        .route("/api/projects", get(list).post(create))
        .route("/api/projects/:id", get(fetch).put(update).delete(destroy))
        .route("/api/uploads", post(upload))
        .route("/api/slow", get(slow))
        .route("/api/broken", get(not_json))
        .with_state(Shared::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/", addr)
}

fn pipe(config: PipeConfig) -> Pipe {
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    Pipe::with_transport(config, Arc::new(HttpTransport::with_client(http))).unwrap()
}

#[tokio::test]
async fn create_read_update_remove() {
    let base = serve().await;
    let projects = pipe(PipeConfig::new(&base, "projects").unwrap());

    let created = projects
        .save(Record::new().with("title", "Hello World").with("style", "project-234-255-0"))
        .await
        .unwrap();
    let id = created["id"].as_u64().unwrap();

    let fetched = projects.read(id).await.unwrap();
    assert_eq!(fetched["title"], "Hello World");
    assert_eq!(fetched["style"], "project-234-255-0");

    let mut record = Record::from_json(fetched).unwrap();
    record.insert("title", "Hello Update World!");
    let updated = projects.save(record.clone()).await.unwrap();
    assert_eq!(updated["title"], "Hello Update World!");
    assert_eq!(updated["id"], id);

    projects
        .save(Record::new().with("title", "Second"))
        .await
        .unwrap();
    let all = projects.read_all().await.unwrap();
    let titles: Vec<_> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["Hello Update World!", "Second"]);

    projects.remove(record).await.unwrap();
    let missing = projects.read(id).await.unwrap_err();
    assert_eq!(missing.status(), Some(404));
}

#[tokio::test]
async fn multipart_upload_over_http() {
    let base = serve().await;
    let uploads = pipe(PipeConfig::new(&base, "uploads").unwrap());

    let last_progress = Arc::new(Mutex::new((0u64, 0u64)));
    let sink = last_progress.clone();
    uploads.set_upload_progress(move |_, written, total| {
        let mut last = sink.lock();
        assert!(written >= last.0);
        *last = (written, total);
    });

    let record = Record::new()
        .with("somekey", "somevalue")
        .with("file1", FilePart::data(&b"Lorem ipsum dolor sit amet.."[..], "file1", "data1.txt", "text/plain"))
        .with(
            "file2",
            FilePart::stream(&b"from a stream"[..], "file2", "stream.bin", "application/octet-stream"),
        );
    let response = uploads.save(record).await.unwrap();

    assert!(response["content_type"]
        .as_str()
        .unwrap()
        .starts_with("multipart/form-data; boundary="));
    let body = response["body"].as_str().unwrap();
    assert!(body.contains("Lorem ipsum dolor sit amet.."));
    assert!(body.contains("filename=\"stream.bin\""));

    let (written, total) = *last_progress.lock();
    assert_eq!(written, total);
    assert_eq!(response["size"], total);
}

#[tokio::test]
async fn slow_server_times_out() {
    let base = serve().await;
    let config = PipeConfig::new(&base, "slow")
        .unwrap()
        .with_timeout(Duration::from_millis(200));
    let slow = pipe(config);

    let result = slow.read_all().await;
    assert!(matches!(result, Err(PipeError::Timeout(_))));
}

#[tokio::test]
async fn success_status_with_bad_body_is_a_decoding_error() {
    let base = serve().await;
    let broken = pipe(PipeConfig::new(&base, "broken").unwrap());

    let result = broken.read_all().await;
    assert!(matches!(result, Err(PipeError::Decoding(_))));
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let projects = pipe(PipeConfig::new(&format!("http://{}/", addr), "projects").unwrap());
    let result = projects.read_all().await;
    assert!(matches!(result, Err(PipeError::NetworkUnreachable(_))));
}
