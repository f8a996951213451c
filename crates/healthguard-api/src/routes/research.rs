use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, header},
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use healthguard_core::StreamItem;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, RunStatus};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub query: String,
    pub specialists: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SpecialistView {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub keywords: Vec<String>,
    pub default: bool,
}

#[derive(Debug, Serialize)]
pub struct SpecialistsResponse {
    pub specialists: Vec<SpecialistView>,
}

pub fn research_router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/runs/:id", get(run_status))
        .route("/specialists", get(list_specialists))
        .route("/route", post(route_query))
}

fn require_query(request: QueryRequest) -> Result<String, AppError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }
    Ok(query.to_string())
}

/// Each progress event becomes one SSE frame named after its type; quiet
/// intervals become keepalive comments.
fn to_sse(item: StreamItem) -> Event {
    match item {
        StreamItem::Event(event) => Event::default()
            .event(event.type_name())
            .data(event.to_json()),
        StreamItem::KeepAlive => Event::default().comment("keepalive"),
    }
}

#[instrument(skip_all)]
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, AppError> {
    let query = require_query(request)?;
    let (run_id, stream) = state.start_run(query)?;
    info!(%run_id, "research run accepted");

    let events = stream
        .into_stream()
        .map(|item| Ok::<Event, Infallible>(to_sse(item)));
    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
    ];
    Ok((headers, Sse::new(events)))
}

async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, AppError> {
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|_| AppError::bad_request(format!("`{run_id}` is not a valid run id")))?;
    state
        .status(&run_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("run {run_id} not found")))
}

async fn list_specialists(State(state): State<AppState>) -> Json<SpecialistsResponse> {
    let registry = state.pipeline().registry();
    let specialists = registry
        .iter()
        .map(|descriptor| SpecialistView {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            endpoint: descriptor.endpoint.clone(),
            keywords: descriptor.keywords.clone(),
            default: registry.default_set().contains(&descriptor.name),
        })
        .collect();
    Json(SpecialistsResponse { specialists })
}

async fn route_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<RouteResponse> {
    let specialists = state.pipeline().router().select(&request.query);
    Json(RouteResponse {
        query: request.query,
        specialists,
    })
}
