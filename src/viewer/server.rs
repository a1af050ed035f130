//! HTTP server and API handlers for the review dashboard.
//!
//! The server owns all mutable application state: per-bucket preload runs,
//! the object-store client, and the study store. Handlers read and write that
//! state through `AppState`; nothing lives in page-level globals.

use crate::storage::{ObjectStore, StorageError};
use crate::studies::{StudyRecord, StudyStore, StudyStoreError};
use crate::viewer::links;
use crate::viewer::pipeline::{PreloadConfig, Preloader};
use crate::viewer::progress::{ProgressSnapshot, ProgressTracker};
use crate::viewer::records::{SubmissionRecord, SubmissionTable};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use uuid::Uuid;

/// One bucket's preload run: the table being filled, its progress, and the
/// stop handle for superseding it.
pub struct PreloadRun {
    pub run_id: Uuid,
    pub table: Arc<RwLock<SubmissionTable>>,
    pub progress: Arc<ProgressTracker>,
    stop: watch::Sender<bool>,
}

/// Application state shared across handlers.
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub studies: StudyStore,
    pub preload: PreloadConfig,
    /// Base URL of the mobile capture client, if configured.
    pub capture_base: Option<String>,
    runs: RwLock<HashMap<String, Arc<PreloadRun>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        studies: StudyStore,
        preload: PreloadConfig,
        capture_base: Option<String>,
    ) -> Self {
        Self {
            store,
            studies,
            preload,
            capture_base,
            runs: RwLock::new(HashMap::new()),
        }
    }

    fn run_for(&self, bucket: &str) -> Option<Arc<PreloadRun>> {
        self.runs.read().unwrap().get(bucket).cloned()
    }
}

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub open_browser: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8060,
            open_browser: true,
        }
    }
}

/// Start the HTTP server; returns when the shutdown signal fires.
pub async fn run_server(
    state: Arc<AppState>,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    if config.open_browser {
        let url = format!("http://127.0.0.1:{}", config.port);
        tracing::info!(url = %url, "Opening browser");
        #[cfg(target_os = "macos")]
        let _ = std::process::Command::new("open").arg(&url).spawn();
        #[cfg(target_os = "linux")]
        let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
    }

    tracing::info!(addr = %addr, "Server running");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}

/// Build the full route table. Separated from `run_server` so tests can drive
/// the router directly.
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = find_static_dir();

    Router::new()
        .route("/", get(index_handler))
        .route("/studies", get(studies_page_handler))
        .route("/links", get(links_page_handler))
        .route("/api/health", get(health_handler))
        .route("/api/files", get(files_handler))
        .route("/api/file", get(file_handler))
        .route("/api/image", get(image_handler))
        .route(
            "/api/studies",
            get(list_studies_handler).post(create_study_handler),
        )
        .route(
            "/api/studies/:id",
            get(get_study_handler)
                .put(update_study_handler)
                .delete(delete_study_handler),
        )
        .route("/api/preload", post(preload_handler))
        .route("/api/preload/progress", get(preload_progress_handler))
        .route("/api/submissions", get(submissions_handler))
        .route("/api/capture-url", get(capture_url_handler))
        .nest_service("/static", ServeDir::new(&static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// --- Errors ---

/// API error taxonomy: not-found, bad-request, and upstream/storage failure.
/// Every handler converts its errors here; no retries anywhere.
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Upstream { error: String, details: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(error) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": error }))).into_response()
            }
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
            }
            ApiError::Upstream { error, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error, "details": details })),
            )
                .into_response(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound(e.to_string())
        } else {
            ApiError::Upstream {
                error: "Storage request failed".to_string(),
                details: e.to_string(),
            }
        }
    }
}

impl From<StudyStoreError> for ApiError {
    fn from(e: StudyStoreError) -> Self {
        match e {
            StudyStoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            StudyStoreError::AlreadyExists(_)
            | StudyStoreError::InvalidId(_)
            | StudyStoreError::MissingField(_) => ApiError::BadRequest(e.to_string()),
            StudyStoreError::Io(_) | StudyStoreError::Json(_) => ApiError::Upstream {
                error: "Study store failure".to_string(),
                details: e.to_string(),
            },
        }
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| {
        ApiError::BadRequest(format!("Missing required query parameter: {}", name))
    })
}

// --- Pages ---

/// Embedded pages (fallback when no external static dir is present).
const EMBEDDED_INDEX_HTML: &str = include_str!("static/index.html");
const EMBEDDED_STUDIES_HTML: &str = include_str!("static/studies.html");
const EMBEDDED_LINKS_HTML: &str = include_str!("static/links.html");

/// Find the static files directory.
/// Checks in-container path first, then local dev path.
fn find_static_dir() -> String {
    let candidates = ["/static", "src/viewer/static"];
    for path in candidates {
        if std::path::Path::new(path).exists() {
            return path.to_string();
        }
    }
    "/static".to_string()
}

/// Serve a page, preferring an external file (hot-reload during development)
/// over the embedded copy.
fn serve_page(name: &str, embedded: &'static str) -> Html<String> {
    let external_paths = [
        format!("/static/{}", name),
        format!("src/viewer/static/{}", name),
    ];
    for path in external_paths {
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Html(content);
        }
    }
    Html(embedded.to_string())
}

async fn index_handler() -> Html<String> {
    serve_page("index.html", EMBEDDED_INDEX_HTML)
}

async fn studies_page_handler() -> Html<String> {
    serve_page("studies.html", EMBEDDED_STUDIES_HTML)
}

async fn links_page_handler() -> Html<String> {
    serve_page("links.html", EMBEDDED_LINKS_HTML)
}

// --- Handlers ---

/// GET /api/health - health check endpoint for dev tooling.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

/// GET /api/files - list JSON result objects in a bucket.
#[derive(Deserialize)]
struct FilesQuery {
    bucket: Option<String>,
}

async fn files_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilesQuery>,
) -> Result<Response, ApiError> {
    let bucket = required(query.bucket.filter(|b| !b.is_empty()), "bucket")?;
    let files = state.store.list_objects(&bucket, Some(".json")).await?;
    Ok(Json(json!({ "files": files })).into_response())
}

/// GET /api/file - fetch one result object's parsed JSON.
///
/// When a preload table exists for the bucket, the matching record is
/// refreshed in place with the freshly fetched payload (the detail-view path);
/// sibling records and run counters are untouched.
#[derive(Deserialize)]
struct FileQuery {
    bucket: Option<String>,
    filename: Option<String>,
}

async fn file_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileQuery>,
) -> Result<Response, ApiError> {
    let bucket = required(query.bucket.filter(|b| !b.is_empty()), "bucket")?;
    let filename = required(query.filename.filter(|f| !f.is_empty()), "filename")?;

    let bytes = state.store.get_object(&bucket, &filename).await?;
    let content: Value = serde_json::from_slice(&bytes).map_err(|e| ApiError::Upstream {
        error: "File is not valid JSON".to_string(),
        details: e.to_string(),
    })?;

    if let Some(run) = state.run_for(&bucket) {
        run.table
            .write()
            .unwrap()
            .refresh_by_key(&filename, content.clone());
    }

    Ok(Json(json!({ "content": content })).into_response())
}

/// GET /api/image - stream a submission's paired JPEG.
#[derive(Deserialize)]
struct ImageQuery {
    bucket: Option<String>,
    path: Option<String>,
    #[serde(default)]
    download: Option<String>,
}

async fn image_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    let bucket = required(query.bucket.filter(|b| !b.is_empty()), "bucket")?;
    let path = required(query.path.filter(|p| !p.is_empty()), "path")?;
    let key = format!("{}.jpeg", path);

    // The pair image may be absent; check before downloading.
    match state.store.head_object(&bucket, &key).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            return Err(ApiError::NotFound("Image not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    }
    let bytes = state.store.get_object(&bucket, &key).await?;

    let download = matches!(query.download.as_deref(), Some("1") | Some("true"));
    if download {
        let file_stem = path.rsplit('/').next().unwrap_or(&path);
        let disposition = format!("attachment; filename=\"{}.jpeg\"", file_stem);
        Ok((
            [
                (header::CONTENT_TYPE, "image/jpeg".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            bytes,
        )
            .into_response())
    } else {
        Ok(([(header::CONTENT_TYPE, "image/jpeg".to_string())], bytes).into_response())
    }
}

/// GET /api/studies - list study records.
async fn list_studies_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StudiesResponse>, ApiError> {
    Ok(Json(StudiesResponse {
        studies: state.studies.list()?,
    }))
}

#[derive(Serialize)]
struct StudiesResponse {
    studies: Vec<StudyRecord>,
}

/// POST /api/studies - create a study. Requires `studyId` and `label`.
async fn create_study_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let study = state.studies.create(&body)?;
    Ok((StatusCode::CREATED, Json(study)).into_response())
}

/// GET /api/studies/:id
async fn get_study_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StudyRecord>, ApiError> {
    Ok(Json(state.studies.get(&id)?))
}

/// PUT /api/studies/:id - replace a study's document. `studyId` and
/// `createdAt` are preserved; `updatedAt` is refreshed.
async fn update_study_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<StudyRecord>, ApiError> {
    Ok(Json(state.studies.update(&id, &body)?))
}

/// DELETE /api/studies/:id
async fn delete_study_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.studies.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/preload - list a bucket and start (or restart) its preload run.
#[derive(Deserialize)]
struct PreloadRequest {
    bucket: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreloadResponse {
    run_id: Uuid,
    total: usize,
}

async fn preload_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreloadRequest>,
) -> Result<Json<PreloadResponse>, ApiError> {
    let bucket = body
        .bucket
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing required field: bucket".to_string()))?;

    let metas = state.store.list_objects(&bucket, Some(".json")).await?;
    let total = metas.len();

    let table = Arc::new(RwLock::new(SubmissionTable::new(&metas)));
    let progress = Arc::new(ProgressTracker::new(total));
    let (stop_tx, stop_rx) = watch::channel(false);
    let run = Arc::new(PreloadRun {
        run_id: Uuid::new_v4(),
        table: table.clone(),
        progress: progress.clone(),
        stop: stop_tx,
    });

    // A restarted bucket supersedes its previous run.
    if let Some(previous) = state
        .runs
        .write()
        .unwrap()
        .insert(bucket.clone(), run.clone())
    {
        let _ = previous.stop.send(true);
    }

    let preloader = Preloader::new(state.store.clone(), state.preload);
    tokio::spawn(async move {
        preloader.run(&bucket, table, progress, stop_rx).await;
    });

    Ok(Json(PreloadResponse {
        run_id: run.run_id,
        total,
    }))
}

/// GET /api/preload/progress - monotonic progress snapshot for a bucket's run.
#[derive(Deserialize)]
struct ProgressQuery {
    bucket: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressResponse {
    run_id: Uuid,
    #[serde(flatten)]
    progress: ProgressSnapshot,
}

async fn preload_progress_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let bucket = required(query.bucket.filter(|b| !b.is_empty()), "bucket")?;
    let run = state
        .run_for(&bucket)
        .ok_or_else(|| ApiError::NotFound(format!("No preload run for bucket {}", bucket)))?;

    Ok(Json(ProgressResponse {
        run_id: run.run_id,
        progress: run.progress.snapshot(),
    }))
}

/// GET /api/submissions - enriched records for a bucket's run, filterable by
/// study and search text, sortable server-side.
#[derive(Deserialize)]
struct SubmissionsQuery {
    bucket: Option<String>,
    #[serde(default)]
    study: Option<String>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    sort: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionsResponse {
    run_id: Uuid,
    total: usize,
    records: Vec<SubmissionRecord>,
}

async fn submissions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmissionsQuery>,
) -> Result<Json<SubmissionsResponse>, ApiError> {
    let bucket = required(query.bucket.filter(|b| !b.is_empty()), "bucket")?;
    let run = state
        .run_for(&bucket)
        .ok_or_else(|| ApiError::NotFound(format!("No preload run for bucket {}", bucket)))?;

    let table = run.table.read().unwrap();
    let total = table.len();

    let mut records: Vec<SubmissionRecord> = table
        .records()
        .iter()
        .filter(|record| {
            if let Some(study) = &query.study {
                let matches = record
                    .parsed
                    .as_ref()
                    .map(|parsed| &parsed.study == study)
                    .unwrap_or(false);
                if !matches {
                    return false;
                }
            }
            if let Some(search) = &query.search {
                let needle = search.to_lowercase();
                let matches_key = record.key.to_lowercase().contains(&needle);
                let matches_name = record
                    .parsed
                    .as_ref()
                    .map(|parsed| parsed.name.to_lowercase().contains(&needle))
                    .unwrap_or(false);
                if !matches_key && !matches_name {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect();
    drop(table);

    match query.sort.as_deref() {
        None | Some("key") => {}
        Some("date") => {
            // Most recent first, undated records last.
            records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        }
        Some("scores") => {
            records.sort_by(|a, b| b.summary.score_count.cmp(&a.summary.score_count));
        }
        Some("concerns") => {
            records.sort_by(|a, b| b.summary.concern_total.cmp(&a.summary.concern_total));
        }
        Some(other) => {
            return Err(ApiError::BadRequest(format!("Unknown sort key: {}", other)));
        }
    }

    Ok(Json(SubmissionsResponse {
        run_id: run.run_id,
        total,
        records,
    }))
}

/// GET /api/capture-url - build the mobile capture client URL for a study.
#[derive(Deserialize)]
struct CaptureUrlQuery {
    study: Option<String>,
    #[serde(default)]
    participant: Option<String>,
    #[serde(default)]
    base: Option<String>,
}

async fn capture_url_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CaptureUrlQuery>,
) -> Result<Response, ApiError> {
    let study = required(query.study.filter(|s| !s.is_empty()), "study")?;
    let base = query
        .base
        .or_else(|| state.capture_base.clone())
        .ok_or_else(|| ApiError::BadRequest("No capture base URL configured".to_string()))?;

    let url = links::capture_url(&base, &study, query.participant.as_deref());
    Ok(Json(json!({ "url": url })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FakeObjectStore;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::util::ServiceExt; // for `oneshot`

    const BUCKET: &str = "captures";

    async fn seeded_fake() -> FakeObjectStore {
        let store = FakeObjectStore::new();
        store
            .insert_json(
                BUCKET,
                "s1-20260101-p1-morning.json",
                &json!({
                    "status": "complete",
                    "validSelfie": true,
                    "scores": [{"q": 0.9}, {"q": 0.8}],
                    "concerns": {"minor": 1, "moderate": 0, "severe": 0},
                    "device": {"brand": "Pixel"},
                    "network": {"quality": "good"}
                }),
            )
            .await;
        store
            .insert_json(
                BUCKET,
                "s2-20260102-p2-evening.json",
                &json!({"status": "pending", "scores": []}),
            )
            .await;
        store
            .insert_object(BUCKET, "s1-20260101-p1-morning.jpeg", "jpegdata".into())
            .await;
        store
    }

    async fn test_app(store: FakeObjectStore) -> (TempDir, Router) {
        let tmp = TempDir::new().unwrap();
        let studies = StudyStore::new(tmp.path().join("studies")).unwrap();
        let state = Arc::new(AppState::new(
            Arc::new(store),
            studies,
            PreloadConfig::default(),
            Some("https://capture.app/start".to_string()),
        ));
        (tmp, build_router(state))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    /// Drive a preload to completion via the API.
    async fn preload_and_wait(app: &Router) {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/preload", json!({"bucket": BUCKET})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(get_request(&format!("/api/preload/progress?bucket={}", BUCKET)))
                .await
                .unwrap();
            let body = body_json(response).await;
            if body["done"] == json!(true) {
                assert_eq!(body["percent"], json!(100));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("preload did not finish");
    }

    #[tokio::test]
    async fn test_health() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app.oneshot(get_request("/api/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_files_requires_bucket() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app.oneshot(get_request("/api/files")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("bucket"));
    }

    #[tokio::test]
    async fn test_files_lists_json_objects_only() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app
            .oneshot(get_request(&format!("/api/files?bucket={}", BUCKET)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 2, "jpeg objects are excluded from the listing");
        assert!(files
            .iter()
            .all(|f| f["key"].as_str().unwrap().ends_with(".json")));
    }

    #[tokio::test]
    async fn test_file_returns_parsed_content() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app
            .oneshot(get_request(&format!(
                "/api/file?bucket={}&filename=s1-20260101-p1-morning.json",
                BUCKET
            )))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["content"]["status"], "complete");
    }

    #[tokio::test]
    async fn test_file_missing_is_404() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app
            .oneshot(get_request(&format!(
                "/api/file?bucket={}&filename=ghost.json",
                BUCKET
            )))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_image_served_with_content_type() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app
            .oneshot(get_request(&format!(
                "/api/image?bucket={}&path=s1-20260101-p1-morning",
                BUCKET
            )))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
    }

    #[tokio::test]
    async fn test_image_download_sets_disposition() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app
            .oneshot(get_request(&format!(
                "/api/image?bucket={}&path=s1-20260101-p1-morning&download=1",
                BUCKET
            )))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(disposition.contains("attachment"));
        assert!(disposition.contains("s1-20260101-p1-morning.jpeg"));
    }

    #[tokio::test]
    async fn test_image_missing_is_404_with_error_body() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app
            .oneshot(get_request(&format!("/api/image?bucket={}&path=missing", BUCKET)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "Image not found"}));
    }

    #[tokio::test]
    async fn test_study_crud_flow() {
        let (_tmp, app) = test_app(seeded_fake().await).await;

        // Create: record gains createdAt/updatedAt timestamps.
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/studies",
                json!({"studyId": "S1", "label": "Foo", "site": "lab-3"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["label"], "Foo");
        let created_at = created["createdAt"].as_str().unwrap().to_string();
        assert!(created["updatedAt"].is_string());

        // Update: createdAt preserved, label replaced, updatedAt refreshed.
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/studies/S1",
                json!({"label": "Bar"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated = body_json(response).await;
        assert_eq!(updated["label"], "Bar");
        assert_eq!(updated["studyId"], "S1");
        assert_eq!(updated["createdAt"].as_str().unwrap(), created_at);

        // List includes the study.
        let response = app.clone().oneshot(get_request("/api/studies")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["studies"].as_array().unwrap().len(), 1);

        // Delete, then gone.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/studies/S1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(get_request("/api/studies/S1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_study_missing_label_is_400() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app
            .oneshot(json_request("POST", "/api/studies", json!({"studyId": "S1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_preload_then_submissions() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        preload_and_wait(&app).await;

        let response = app
            .oneshot(get_request(&format!("/api/submissions?bucket={}", BUCKET)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 2);
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);

        let first = records
            .iter()
            .find(|r| r["key"] == "s1-20260101-p1-morning.json")
            .unwrap();
        assert_eq!(first["status"], "loaded");
        assert_eq!(first["scoreCount"], 2);
        assert_eq!(first["concernTotal"], 1);
        assert_eq!(first["devicePresent"], true);
        assert_eq!(first["networkQuality"], "good");
        assert_eq!(first["parsed"]["study"], "s1");
    }

    #[tokio::test]
    async fn test_submissions_filter_by_study() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        preload_and_wait(&app).await;

        let response = app
            .oneshot(get_request(&format!(
                "/api/submissions?bucket={}&study=s2",
                BUCKET
            )))
            .await
            .unwrap();

        let body = body_json(response).await;
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["parsed"]["study"], "s2");
        assert_eq!(body["total"], 2, "total reflects the whole table");
    }

    #[tokio::test]
    async fn test_submissions_unknown_sort_is_400() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        preload_and_wait(&app).await;

        let response = app
            .oneshot(get_request(&format!(
                "/api/submissions?bucket={}&sort=bogus",
                BUCKET
            )))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submissions_without_run_is_404() {
        let (_tmp, app) = test_app(seeded_fake().await).await;
        let response = app
            .oneshot(get_request("/api/submissions?bucket=never-loaded"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_fetch_refreshes_preloaded_record() {
        let store = seeded_fake().await;
        let (_tmp, app) = test_app(store.clone()).await;
        preload_and_wait(&app).await;

        // The payload changes upstream; opening the detail view re-fetches it.
        store
            .insert_json(
                BUCKET,
                "s2-20260102-p2-evening.json",
                &json!({"status": "complete", "scores": [1, 2, 3]}),
            )
            .await;

        let response = app
            .clone()
            .oneshot(get_request(&format!(
                "/api/file?bucket={}&filename=s2-20260102-p2-evening.json",
                BUCKET
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get_request(&format!("/api/submissions?bucket={}", BUCKET)))
            .await
            .unwrap();
        let body = body_json(response).await;
        let records = body["records"].as_array().unwrap();

        let refreshed = records
            .iter()
            .find(|r| r["key"] == "s2-20260102-p2-evening.json")
            .unwrap();
        assert_eq!(refreshed["scoreCount"], 3, "record reflects the re-fetch");

        let sibling = records
            .iter()
            .find(|r| r["key"] == "s1-20260101-p1-morning.json")
            .unwrap();
        assert_eq!(sibling["scoreCount"], 2, "sibling record untouched");
    }

    #[tokio::test]
    async fn test_capture_url() {
        let (_tmp, app) = test_app(seeded_fake().await).await;

        let response = app
            .clone()
            .oneshot(get_request("/api/capture-url?study=trial7&participant=p042"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["url"],
            "https://capture.app/start?study=trial7&participant=p042"
        );

        let response = app.oneshot(get_request("/api/capture-url")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
