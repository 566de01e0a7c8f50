//! Status API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<StatusState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::flywheel::Flywheel;
use crate::scheduler::{format_remaining, TaskName, TimerView};
use crate::storage::LedgerStore;
use crate::types::{Event, EventStatus, EventType, Snapshot, WorkflowOutcome};

const DEFAULT_ACTIVITY_LIMIT: i64 = 20;
const MAX_ACTIVITY_LIMIT: i64 = 200;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct StatusState {
    pub ledger: Arc<dyn LedgerStore>,
    pub flywheel: Arc<Flywheel>,
    pub fee_vault: String,
    pub primary_token: String,
}

pub type AppState = Arc<StatusState>;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub fee_vault: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub event_type: EventType,
    pub status: EventStatus,
    pub message: String,
    pub tx_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntry {
    #[serde(flatten)]
    pub timer: TimerView,
    pub remaining: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Activity messages
// ---------------------------------------------------------------------------

fn amount(value: Option<Decimal>) -> String {
    value.unwrap_or_default().normalize().to_string()
}

fn symbol(token: &Option<String>, fallback: &str) -> String {
    token
        .as_deref()
        .map(str::to_uppercase)
        .unwrap_or_else(|| fallback.to_string())
}

/// Human-readable one-liner for the activity feed.
pub fn activity_message(event: &Event, primary_token: &str) -> String {
    let text = match event.event_type {
        EventType::FeeCollection => format!(
            "Collected {} {} from Fees -> Converting to Gold",
            amount(event.amount_in),
            symbol(&event.token_in, "SOL")
        ),
        EventType::GoldPurchase => format!(
            "Purchased {} {} (Gold)",
            amount(event.amount_out),
            symbol(&event.token_out, "XAUT")
        ),
        EventType::GoldSale => format!(
            "Sold {} {} Gold -> Receiving {}",
            amount(event.amount_in),
            symbol(&event.token_in, "XAUT"),
            symbol(&event.token_out, "SOL")
        ),
        EventType::RedeployFinish => format!(
            "Buyback Complete: {} {} -> {}",
            amount(event.amount_in),
            symbol(&event.token_in, "SOL"),
            primary_token
        ),
        EventType::FeeClaim => "Claimed creator rewards".to_string(),
        EventType::FeeSweep => format!(
            "Swept {} {} into the fee vault",
            amount(event.amount_in),
            symbol(&event.token_in, "SOL")
        ),
        EventType::BotStart => "Flywheel System Started - Online".to_string(),
        EventType::SystemNotice => match event.meta_str("reason") {
            Some("insufficient_fees") => format!(
                "Fee Check: Balance ({} SOL) is too low to swap.",
                event.meta_str("balance").unwrap_or("0")
            ),
            Some("no_gold_to_sell") => "Redeploy Check: No Gold (XAUT) found to sell.".to_string(),
            reason => format!("System: {}", reason.unwrap_or("Notice")),
        },
        EventType::SystemError => format!(
            "ERROR [{}]: {}",
            event.meta_str("context").unwrap_or("System"),
            event.error_message.as_deref().unwrap_or("unknown error")
        ),
    };

    match event.status {
        EventStatus::Pending | EventStatus::Failed | EventStatus::Unknown
            if !matches!(event.event_type, EventType::SystemError) =>
        {
            format!("{text} [{}]", event.status)
        }
        _ => text,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
        fee_vault: state.fee_vault.clone(),
    })
}

/// GET /api/activity?limit=N
pub async fn get_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);
    let events = state.ledger.list_recent(None, limit).await.map_err(|e| {
        warn!(error = %format!("{e:#}"), "Activity query failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable")
    })?;

    Ok(Json(
        events
            .iter()
            .map(|e| ActivityEntry {
                id: e.id,
                event_type: e.event_type,
                status: e.status,
                message: activity_message(e, &state.primary_token),
                tx_ref: e.tx_ref.clone(),
                created_at: e.created_at,
            })
            .collect(),
    ))
}

/// GET /api/snapshot
pub async fn get_snapshot(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    match state.ledger.latest_snapshot().await {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "no snapshot yet")),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Snapshot query failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable"))
        }
    }
}

/// GET /api/schedule
pub async fn get_schedule(State(state): State<AppState>) -> Json<Vec<ScheduleEntry>> {
    let now = Utc::now();
    Json(
        state
            .flywheel
            .scheduler()
            .timers(now)
            .into_iter()
            .map(|timer| ScheduleEntry {
                remaining: format_remaining(timer.next_fire - now),
                timer,
            })
            .collect(),
    )
}

/// POST /api/trigger/:task
pub async fn trigger(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> Result<Json<WorkflowOutcome>, ApiError> {
    let task: TaskName = task
        .parse()
        .map_err(|e: anyhow::Error| api_error(StatusCode::NOT_FOUND, e.to_string()))?;
    if !state.flywheel.has_task(task) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No workflow registered for {task}"),
        ));
    }

    info!(task = %task, "Manual trigger");
    Ok(Json(state.flywheel.fire(task).await))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
