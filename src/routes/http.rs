// GET handlers (version, snapshot, machines, ingress stats) and POST event intake

use axum::http::{StatusCode, header};
use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

use super::AppState;
use crate::ingress::{self, IngressError};
use crate::models::StatusEvent;
use crate::publisher;
use crate::version::{NAME, VERSION};

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/snapshot — latest published snapshot (pull side of the publisher).
pub(super) async fn snapshot_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot_rx.borrow().as_ref().clone();
    Json(snapshot)
}

/// GET /api/machines — registry contents, ordered by id.
pub(super) async fn machines_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.all())
}

/// GET /api/machines/{id}
pub(super) async fn machine_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.get(&id) {
        Some(machine) => Json(machine).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "MACHINE_NOT_FOUND" })),
        )
            .into_response(),
    }
}

/// GET /api/ingress/stats — drop/accept counters for operators.
pub(super) async fn ingress_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.counters.stats())
}

/// POST /api/events — validate and enqueue a single event. 202 on enqueue,
/// 422 malformed, 503 retryable when the queue rejects or is shut down.
pub(super) async fn submit_event_handler(
    State(state): State<AppState>,
    Json(event): Json<StatusEvent>,
) -> Response {
    match enqueue_event(&state, event) {
        EnqueueOutcome::Accepted => StatusCode::ACCEPTED.into_response(),
        EnqueueOutcome::Malformed(reason) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": "MALFORMED_EVENT", "reason": reason })),
        )
            .into_response(),
        EnqueueOutcome::Rejected(error) => retryable_response(error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BulkEventsRequest {
    events: Vec<StatusEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BulkEventsResponse {
    accepted: u32,
    rejected: u32,
}

/// POST /api/events/bulk — per-item validation; a bad item never fails the
/// batch (agents flush their offline queue through here).
pub(super) async fn submit_events_bulk_handler(
    State(state): State<AppState>,
    Json(request): Json<BulkEventsRequest>,
) -> Response {
    let mut accepted: u32 = 0;
    let mut rejected: u32 = 0;
    for event in request.events {
        match enqueue_event(&state, event) {
            EnqueueOutcome::Accepted => accepted += 1,
            EnqueueOutcome::Malformed(_) | EnqueueOutcome::Rejected(IngressError::QueueFull) => {
                rejected += 1;
            }
            EnqueueOutcome::Rejected(error @ IngressError::Unavailable) => {
                // Shutdown in progress; the whole remainder would fail too.
                return retryable_response(error);
            }
        }
    }
    (StatusCode::ACCEPTED, Json(BulkEventsResponse { accepted, rejected })).into_response()
}

enum EnqueueOutcome {
    Accepted,
    Malformed(&'static str),
    Rejected(IngressError),
}

fn enqueue_event(state: &AppState, event: StatusEvent) -> EnqueueOutcome {
    let now = publisher::now_ms();
    if let Err(reason) = ingress::validate_event(&event, now, &state.config.ingress) {
        state
            .counters
            .rejected_malformed
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            machine_id = %event.machine_id,
            reason,
            operation = "validate_event",
            "malformed event dropped"
        );
        return EnqueueOutcome::Malformed(reason);
    }
    match state.queue.push(event) {
        Ok(None) => EnqueueOutcome::Accepted,
        Ok(Some(displaced)) => {
            state
                .counters
                .dropped_overflow
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                machine_id = %displaced.machine_id,
                operation = "enqueue_event",
                "queue full; oldest event dropped"
            );
            EnqueueOutcome::Accepted
        }
        Err(error) => {
            if matches!(error, IngressError::QueueFull) {
                state
                    .counters
                    .dropped_overflow
                    .fetch_add(1, Ordering::Relaxed);
            }
            EnqueueOutcome::Rejected(error)
        }
    }
}

fn retryable_response(error: IngressError) -> Response {
    let code = match error {
        IngressError::QueueFull => "QUEUE_FULL",
        IngressError::Unavailable => "REGISTRY_UNAVAILABLE",
    };
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "1")],
        Json(serde_json::json!({ "error": code, "reason": error.to_string() })),
    )
        .into_response()
}
