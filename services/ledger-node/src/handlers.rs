use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sovledger_core::audit::AuditReport;
use sovledger_gate::{AssuranceLevel, CallerContext, CallerProfile, CommitReceipt, LedgerStats};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const DID_HEADER: &str = "x-sovledger-did";
pub const PUBKEY_HEADER: &str = "x-sovledger-pubkey";
pub const SIGNATURE_HEADER: &str = "x-sovledger-signature";
pub const ASSURANCE_HEADER: &str = "x-sovledger-assurance";
pub const DEVICE_HEADER: &str = "x-sovledger-device-id";
pub const SESSION_HEADER: &str = "x-sovledger-session-id";

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub payload: Value,
    #[serde(default)]
    pub creator: CallerContext,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn profile(peer: SocketAddr, headers: &HeaderMap) -> CallerProfile {
    let trace_id = header(headers, TRACE_ID_HEADER).unwrap_or_else(|| Uuid::new_v4().to_string());
    CallerProfile {
        origin: Some(peer.ip().to_string()),
        trace_id: Some(trace_id),
        user_agent: header(headers, "user-agent"),
    }
}

/// Caller context for raw-body requests, carried in headers
fn creator_from_headers(headers: &HeaderMap) -> CallerContext {
    let assurance_level = match header(headers, ASSURANCE_HEADER)
        .map(|v| v.to_ascii_lowercase())
        .as_deref()
    {
        Some("high") => AssuranceLevel::High,
        Some("substantial") => AssuranceLevel::Substantial,
        _ => AssuranceLevel::Low,
    };

    CallerContext {
        did: header(headers, DID_HEADER).unwrap_or_default(),
        pubkey: header(headers, PUBKEY_HEADER).unwrap_or_default(),
        signature: header(headers, SIGNATURE_HEADER).unwrap_or_default(),
        device_id: header(headers, DEVICE_HEADER),
        session_id: header(headers, SESSION_HEADER),
        assurance_level,
    }
}

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<CommitReceipt>), ApiError> {
    let profile = profile(peer, &headers);
    let receipt = state
        .gate
        .dispatch(request.payload, &request.creator, &profile)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn ingest_burst(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CommitReceipt>), ApiError> {
    let profile = profile(peer, &headers);
    let creator = creator_from_headers(&headers);
    let receipt = state.gate.ingest_burst(&creator, &profile, &body).await?;
    info!(
        bytes = body.len(),
        canonical_id = %receipt.canonical_id,
        "Sensory burst anchored"
    );
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<LedgerStats>, ApiError> {
    Ok(Json(state.gate.stats().await?))
}

pub async fn audit(State(state): State<Arc<AppState>>) -> Result<Json<AuditReport>, ApiError> {
    Ok(Json(state.gate.audit().await?))
}

/// Operator acknowledgment after a repaired breach
pub async fn acknowledge_breach(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.gate.acknowledge_breach().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let halted = state.gate.pipeline().is_halted();
    Json(json!({
        "status": if halted { "halted" } else { "healthy" },
        "service": "sovledger-node",
        "timestamp": Utc::now().to_rfc3339()
    }))
}
