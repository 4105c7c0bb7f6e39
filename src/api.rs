use crate::config::StudioConfig;
use crate::error::{StudioError, StudioErrorKind};
use crate::models::UploadResult;
use crate::poller::Job;
use crate::reorder::MovePolicy;
use crate::selection::SelectionKind;
use crate::studio::{GenerationOptions, SessionSnapshot, Studio};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub studio: Arc<Studio>,
    pub prometheus_handle: PrometheusHandle,
    pub metrics_key: Option<String>,
}

pub fn router(state: AppState, config: &StudioConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/photos", post(fetch_photos))
        .route("/sessions/{id}/toggle", post(toggle_selection))
        .route("/sessions/{id}/generate", post(generate))
        .route("/sessions/{id}/regenerate", post(regenerate))
        .route("/sessions/{id}/job", delete(abandon_job))
        .route("/sessions/{id}/output/select", post(select_output))
        .route("/sessions/{id}/output/move", post(move_output))
        .route("/sessions/{id}/output/remove", post(remove_output))
        .route("/sessions/{id}/listing", post(create_listing))
        .route("/sessions/{id}/upload", post(upload_listing))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(config.request_max_bytes))
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug)]
pub struct AppError(StudioError);

impl From<StudioError> for AppError {
    fn from(value: StudioError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            StudioErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            StudioErrorKind::Conflict => StatusCode::CONFLICT,
            StudioErrorKind::NotFound => StatusCode::NOT_FOUND,
            StudioErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            StudioErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(target = "studio.api", code = self.0.code(), error = %self.0, "request failed");
        }
        let payload = ApiError {
            error: self.0.code().to_string(),
            detail: Some(self.0.to_string()),
        };
        (status, Json(payload)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

/// Health check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "listing-studio",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret.as_str() {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct CreatedSession {
    id: Uuid,
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<CreatedSession>) {
    crate::metrics::inc_requests("/sessions");
    let id = state.studio.create_session().await;
    (StatusCode::CREATED, Json(CreatedSession { id }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(state.studio.snapshot(id).await?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.studio.delete_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PhotosRequest {
    listing: String,
}

/// Loads a marketplace listing's photos into the session.
///
/// - Method: `POST`
/// - Path: `/sessions/{id}/photos`
/// - Body: `{"listing": "<item id or item URL>"}`
/// - Response: the session snapshot after the fetch stream finished
async fn fetch_photos(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PhotosRequest>,
) -> ApiResult<SessionSnapshot> {
    crate::metrics::inc_requests("/sessions/photos");
    info!(target = "studio.api", session = %id, listing = %req.listing, "fetch photos");
    Ok(Json(state.studio.fetch_photos(id, &req.listing).await?))
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    set: SelectionKind,
    key: String,
}

async fn toggle_selection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(state.studio.toggle(id, req.set, &req.key).await?))
}

#[derive(Debug, Serialize)]
struct JobStarted {
    task_id: Option<String>,
    total: u32,
}

impl From<Option<Job>> for JobStarted {
    fn from(job: Option<Job>) -> Self {
        match job {
            Some(job) => Self {
                task_id: Some(job.id),
                total: job.total,
            },
            None => Self {
                task_id: None,
                total: 0,
            },
        }
    }
}

/// Submits a generation job for every working item still pending.
///
/// - Method: `POST`
/// - Path: `/sessions/{id}/generate`
/// - Body: `{"image_type"?: "PROFESSIONAL", "prompt_modifier"?: "..."}`
/// - Response: `{"task_id", "total"}`; `task_id` is null when every
///   remaining item keeps its original and the output was built directly.
async fn generate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(options): Json<GenerationOptions>,
) -> Result<(StatusCode, Json<JobStarted>), AppError> {
    crate::metrics::inc_requests("/sessions/generate");
    let job = state.studio.start_generation(id, options).await?;
    let status = if job.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(JobStarted::from(job))))
}

async fn regenerate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(options): Json<GenerationOptions>,
) -> Result<(StatusCode, Json<JobStarted>), AppError> {
    crate::metrics::inc_requests("/sessions/regenerate");
    let job = state.studio.start_regeneration(id, options).await?;
    Ok((StatusCode::ACCEPTED, Json(JobStarted::from(Some(job)))))
}

async fn abandon_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(state.studio.abandon_job(id).await?))
}

#[derive(Debug, Deserialize)]
struct IndexRequest {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    from: usize,
    to: usize,
    #[serde(default)]
    policy: MovePolicy,
}

async fn select_output(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<IndexRequest>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(state.studio.toggle_index(id, req.index).await?))
}

async fn move_output(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveRequest>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(
        state
            .studio
            .move_output(id, req.from, req.to, req.policy)
            .await?,
    ))
}

async fn remove_output(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<IndexRequest>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(state.studio.remove_output(id, req.index).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CreateListingBody {
    #[serde(default)]
    listing: Option<Value>,
}

/// Builds a listing from the session's output list.
///
/// - Method: `POST`
/// - Path: `/sessions/{id}/listing`
/// - Body: `{"listing"?: {...}}`; defaults to the fetched listing summary
/// - Response: the `data` payload of the create-listing stream
async fn create_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateListingBody>,
) -> ApiResult<Option<Value>> {
    crate::metrics::inc_requests("/sessions/listing");
    Ok(Json(state.studio.create_listing(id, body.listing).await?))
}

#[derive(Debug, Default, Deserialize)]
struct UploadBody {
    #[serde(default)]
    filename: Option<String>,
}

async fn upload_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UploadBody>,
) -> ApiResult<UploadResult> {
    crate::metrics::inc_requests("/sessions/upload");
    Ok(Json(state.studio.upload_listing(id, body.filename).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HttpBackend;
    use crate::poller::JobPoller;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(metrics_key: Option<&str>) -> Router {
        // Unreachable backend: these tests never leave the router.
        let config = StudioConfig {
            backend_url: "http://127.0.0.1:1".into(),
            ..StudioConfig::default()
        };
        let backend = Arc::new(HttpBackend::new(&config));
        let studio = Studio::new(backend, JobPoller::new(Duration::from_millis(10)));
        let state = AppState {
            studio: Arc::new(studio),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            metrics_key: metrics_key.map(str::to_string),
        };
        router(state, &config)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_service() {
        let app = app(None);
        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "listing-studio");
    }

    #[tokio::test]
    async fn metrics_require_key_when_configured() {
        let app = app(Some("s3cret"));
        let (status, _) = send(&app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::get("/metrics")
            .header("X-Metrics-Key", "s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn session_lifecycle_and_error_mapping() {
        let app = app(None);
        let (status, body) = send(&app, post_json("/sessions", json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            Request::get(format!("/sessions/{id}")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["working"], json!([]));
        assert_eq!(body["job_running"], false);

        // Nothing loaded yet, so every item is trivially skipped.
        let (status, body) = send(&app, post_json(&format!("/sessions/{id}/generate"), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "all_items_skipped");

        let (status, body) = send(
            &app,
            post_json(&format!("/sessions/{id}/output/select"), json!({"index": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "index_out_of_range");

        let (status, _) = send(
            &app,
            Request::delete(format!("/sessions/{id}")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(
            &app,
            Request::get(format!("/sessions/{id}")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn unreachable_backend_maps_to_bad_gateway() {
        let app = app(None);
        let (_, body) = send(&app, post_json("/sessions", json!({}))).await;
        let id = body["id"].as_str().unwrap().to_string();
        let (status, body) = send(
            &app,
            post_json(&format!("/sessions/{id}/photos"), json!({"listing": "123"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "transport");
    }
}
