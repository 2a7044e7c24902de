use crate::record::Record;
use crate::service::RecordSubmitter;
use crate::stats::StatusSnapshot;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct HttpState {
    pub submitter: RecordSubmitter,
}

#[derive(Debug, Deserialize)]
struct RecordsRequest {
    records: Vec<Record>,
}

#[derive(Debug, Serialize)]
struct RecordsResponse {
    accepted: u64,
    evicted: u64,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_status(State(state): State<HttpState>) -> Json<StatusSnapshot> {
    Json(state.submitter.status())
}

async fn post_records(
    State(state): State<HttpState>,
    Json(payload): Json<RecordsRequest>,
) -> Json<RecordsResponse> {
    let mut response = RecordsResponse {
        accepted: 0,
        evicted: 0,
    };
    for record in payload.records {
        let receipt = state.submitter.submit(record);
        if receipt.accepted {
            response.accepted += 1;
        }
        response.evicted += receipt.evicted as u64;
    }
    Json(response)
}

/// Host-facing surface: archive records in, channel status out.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status))
        .route("/v1/records", post(post_records))
        .with_state(state)
}
