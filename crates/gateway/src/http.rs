//! C13 — HTTP Boundary. Router and per-route handlers (spec.md §4.13,
//! §6.1), grounded in the teacher's axum `main.rs` router assembly and
//! `api::*` handler modules.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cortex_domain::model::{AckOutcome, NewInboxMessage};
use cortex_store::{InboxQueue, OutboxQueue};

use crate::auth::require_bearer_token;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/ingest", post(ingest))
        .route("/outbox/poll", post(outbox_poll))
        .route("/outbox/ack", post(outbox_ack))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authenticated)
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    ApiError::NotFound
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime: u64,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.uptime_seconds(),
    })
}

#[derive(Deserialize)]
struct IngestRequest {
    #[serde(default)]
    source: String,
    #[serde(rename = "externalMessageId", default)]
    external_message_id: String,
    #[serde(rename = "idempotencyKey", default)]
    idempotency_key: String,
    #[serde(rename = "topicKey", default)]
    topic_key: String,
    #[serde(rename = "userId", default)]
    user_id: String,
    #[serde(default)]
    text: String,
    #[serde(rename = "occurredAt", default)]
    occurred_at: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

fn require_nonempty(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{field} is required and must be non-empty"));
    }
}

async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestRequest>,
) -> Result<axum::response::Response, ApiError> {
    let mut errors = Vec::new();
    require_nonempty(&mut errors, "source", &body.source);
    require_nonempty(&mut errors, "externalMessageId", &body.external_message_id);
    require_nonempty(&mut errors, "idempotencyKey", &body.idempotency_key);
    require_nonempty(&mut errors, "topicKey", &body.topic_key);
    require_nonempty(&mut errors, "userId", &body.user_id);
    require_nonempty(&mut errors, "text", &body.text);

    let occurred_at = DateTime::parse_from_rfc3339(&body.occurred_at)
        .map(|dt| dt.timestamp_millis())
        .ok();
    if occurred_at.is_none() {
        errors.push("occurredAt must be a valid ISO-8601 timestamp".to_string());
    }

    if !errors.is_empty() {
        return Err(ApiError::InvalidRequest(errors));
    }

    let result = InboxQueue::new(&state.store)
        .enqueue(NewInboxMessage {
            source: body.source,
            external_message_id: body.external_message_id,
            topic_key: body.topic_key,
            user_id: body.user_id,
            text: body.text,
            occurred_at: occurred_at.unwrap(),
            idempotency_key: body.idempotency_key,
            metadata: body.metadata,
        })?;

    if result.duplicate {
        Ok((
            StatusCode::OK,
            Json(json!({"eventId": result.id, "status": "duplicate_ignored"})),
        )
            .into_response())
    } else {
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({"eventId": result.id, "status": "queued"})),
        )
            .into_response())
    }
}

#[derive(Deserialize)]
struct OutboxPollRequest {
    #[serde(default)]
    source: String,
    #[serde(rename = "topicKey", default)]
    topic_key: Option<String>,
    max: Option<u32>,
    #[serde(rename = "leaseSeconds")]
    lease_seconds: Option<u32>,
}

async fn outbox_poll(
    State(state): State<AppState>,
    Json(body): Json<OutboxPollRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut errors = Vec::new();
    require_nonempty(&mut errors, "source", &body.source);

    let max = body.max.unwrap_or(state.config.outbox.outbox_poll_default_batch);
    if !(1..=100).contains(&max) {
        errors.push("max must be in 1..=100".to_string());
    }
    let lease_seconds = body
        .lease_seconds
        .unwrap_or(state.config.outbox.outbox_lease_seconds);
    if !(10..=300).contains(&lease_seconds) {
        errors.push("leaseSeconds must be in 10..=300".to_string());
    }

    if !errors.is_empty() {
        return Err(ApiError::InvalidRequest(errors));
    }

    let messages = OutboxQueue::new(&state.store).poll(
        &body.source,
        max,
        lease_seconds,
        state.config.outbox.outbox_max_attempts,
        body.topic_key.as_deref(),
    )?;

    let messages: Vec<_> = messages
        .into_iter()
        .map(|m| {
            json!({
                "messageId": m.message_id,
                "leaseToken": m.lease_token,
                "topicKey": m.topic_key,
                "text": m.text,
                "payload": m.payload,
            })
        })
        .collect();

    Ok(Json(json!({ "messages": messages })))
}

#[derive(Deserialize)]
struct OutboxAckRequest {
    #[serde(rename = "messageId", default)]
    message_id: String,
    #[serde(rename = "leaseToken", default)]
    lease_token: String,
}

async fn outbox_ack(
    State(state): State<AppState>,
    Json(body): Json<OutboxAckRequest>,
) -> Result<axum::response::Response, ApiError> {
    let mut errors = Vec::new();
    require_nonempty(&mut errors, "messageId", &body.message_id);
    require_nonempty(&mut errors, "leaseToken", &body.lease_token);
    if !errors.is_empty() {
        return Err(ApiError::InvalidRequest(errors));
    }

    let outcome = OutboxQueue::new(&state.store).ack(&body.message_id, &body.lease_token)?;

    match outcome {
        AckOutcome::Delivered => {
            Ok((StatusCode::OK, Json(json!({"ok": true, "status": "delivered"}))).into_response())
        }
        AckOutcome::AlreadyDelivered => Ok((
            StatusCode::OK,
            Json(json!({"ok": true, "status": "already_delivered"})),
        )
            .into_response()),
        AckOutcome::NotFound => Err(ApiError::NotFound),
        AckOutcome::LeaseConflict => Err(ApiError::LeaseConflict),
    }
}
