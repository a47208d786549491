//! Job-facing HTTP surface.
//!
//! Submitting a scrape only creates a job and spawns the detached task —
//! the response never waits on the browser. Everything the pipeline does
//! afterwards reaches clients exclusively through the job's state.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use dealscope_common::{JobStatus, ScrapeRequest};
use dealscope_scraper::Scraper;

use crate::jobs::JobRegistry;

pub struct AppState {
    pub registry: JobRegistry,
    pub scraper: Arc<Scraper>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        .route("/scrape", post(start_scrape))
        .route("/status/{job_id}", get(job_status))
        .route("/result/{job_id}", get(job_result))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

// --- Request bodies ---

/// All fields optional at the wire level so a missing field is a 400 with
/// a named field, not a framework-shaped 422.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeBody {
    city_name: Option<String>,
    street: Option<String>,
    house_number: Option<String>,
    max_pages: Option<u32>,
}

// --- Handlers ---

async fn start_scrape(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScrapeBody>,
) -> impl IntoResponse {
    let request = ScrapeRequest {
        city_name: body.city_name.unwrap_or_default(),
        street: body.street.unwrap_or_default(),
        house_number: body.house_number.unwrap_or_default(),
        max_pages: body.max_pages,
    };
    if let Some(field) = request.missing_field() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Missing required field: {field}") })),
        )
            .into_response();
    }

    let job = state.registry.create();
    let job_id = job.id;
    info!(%job_id, city = %request.city_name, street = %request.street, "Scrape queued");

    // Fire-and-forget: one detached task per job, no retries on crash.
    let task_state = state.clone();
    tokio::spawn(async move {
        task_state.registry.mark_running(&job_id);
        match task_state.scraper.run(&request).await {
            Ok(outcome) => task_state.registry.complete(&job_id, outcome),
            Err(e) => {
                warn!(%job_id, error = %e, "Scrape failed");
                task_state.registry.fail(&job_id, format!("{e:#}"));
            }
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "jobId": job_id, "status": "processing" })),
    )
        .into_response()
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let Some(job) = parse_id(&job_id).and_then(|id| state.registry.get(&id)) else {
        return not_found(&job_id);
    };
    Json(json!({
        "jobId": job.id,
        "status": job.status,
        "createdAt": job.created_at,
        "updatedAt": job.updated_at,
    }))
    .into_response()
}

async fn job_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let Some(job) = parse_id(&job_id).and_then(|id| state.registry.get(&id)) else {
        return not_found(&job_id);
    };
    match job.status {
        JobStatus::Done => Json(json!({
            "jobId": job.id,
            "status": job.status,
            "result": job.result,
            "updatedAt": job.updated_at,
        }))
        .into_response(),
        JobStatus::Queued | JobStatus::Running => (
            StatusCode::CONFLICT,
            Json(json!({
                "jobId": job.id,
                "status": job.status,
                "message": "Job is still processing",
            })),
        )
            .into_response(),
        JobStatus::Error => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "jobId": job.id,
                "status": job.status,
                "error": job.error,
                "updatedAt": job.updated_at,
            })),
        )
            .into_response(),
    }
}

// --- Helpers ---

fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

fn not_found(job_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Unknown job: {job_id}") })),
    )
        .into_response()
}
