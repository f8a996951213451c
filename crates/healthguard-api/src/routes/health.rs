use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::state::{AppState, CapacitySnapshot};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    specialists: usize,
    capacity: CapacitySnapshot,
}

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
}

async fn live(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(build_response("ok", &state))
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let response = build_response("ok", &state);
    if response.capacity.available_permits == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "saturated",
                ..response
            }),
        );
    }
    (StatusCode::OK, Json(response))
}

fn build_response(status: &'static str, state: &AppState) -> HealthResponse {
    HealthResponse {
        status,
        specialists: state.pipeline().registry().len(),
        capacity: state.capacity(),
    }
}
