//! REST API handlers for workspace files, agents, and gateway access
//!
//! All responses use the `ApiResponse` envelope. Domain errors carry their
//! own HTTP status mapping; handlers never invent status codes locally.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapters::agent_sync::AgentSynchronizer;
use crate::adapters::broadcast::Broadcaster;
use crate::adapters::file_cache::WorkspaceFileCache;
use crate::adapters::gateway_client::GatewayClient;
use crate::config::Settings;
use crate::domain::{AgentPatch, AgentRecord, Command, CoreError};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub settings: Arc<Settings>,
    pub cache: Arc<WorkspaceFileCache>,
    pub agents: Arc<AgentSynchronizer>,
    pub gateway: Arc<GatewayClient>,
    pub broadcaster: Arc<Broadcaster>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn failure<T>(err: &CoreError) -> (StatusCode, Json<ApiResponse<T>>) {
    (err.status_code(), Json(ApiResponse::error(err.to_string())))
}

#[derive(Serialize, Deserialize)]
pub struct FileDto {
    pub filename: String,
    pub content: String,
    pub size: u64,
    pub last_modified: chrono::DateTime<chrono::Utc>,
}

impl From<crate::domain::CachedFile> for FileDto {
    fn from(entry: crate::domain::CachedFile) -> Self {
        Self {
            filename: entry.filename,
            content: entry.content,
            size: entry.size,
            last_modified: entry.last_modified,
        }
    }
}

#[derive(Deserialize)]
pub struct PutFileRequest {
    pub content: String,
}

#[derive(Serialize, Deserialize)]
pub struct AgentListDto {
    pub agents: Vec<AgentRecord>,
    pub total: usize,
}

// ============================================================================
// Workspace File Endpoints
// ============================================================================

/// GET /api/config/files/:filename - Read a workspace file through the cache
pub async fn get_file(
    State(state): State<ApiState>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    match state.cache.get_file(&filename).await {
        Ok(entry) => (StatusCode::OK, Json(ApiResponse::success(FileDto::from(entry)))),
        Err(e) => failure(&e),
    }
}

/// PUT /api/config/files/:filename - Write a workspace file through to the gateway
pub async fn put_file(
    State(state): State<ApiState>,
    Path(filename): Path<String>,
    Json(req): Json<PutFileRequest>,
) -> impl IntoResponse {
    match state.cache.put_file(&filename, &req.content).await {
        Ok(entry) => (StatusCode::OK, Json(ApiResponse::success(FileDto::from(entry)))),
        Err(e) => failure(&e),
    }
}

// ============================================================================
// Agent Endpoints
// ============================================================================

/// GET /api/agents - List all agents from the local store
pub async fn list_agents(State(state): State<ApiState>) -> impl IntoResponse {
    match state.agents.list_agents().await {
        Ok(agents) => {
            let total = agents.len();
            (
                StatusCode::OK,
                Json(ApiResponse::success(AgentListDto { agents, total })),
            )
        }
        Err(e) => failure(&e),
    }
}

/// GET /api/agents/:id - Get a single agent
pub async fn get_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.agents.get_agent(&id).await {
        Ok(agent) => (StatusCode::OK, Json(ApiResponse::success(agent))),
        Err(e) => failure(&e),
    }
}

/// PUT /api/agents/:id - Merge a partial update into an agent record
pub async fn update_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(patch): Json<AgentPatch>,
) -> impl IntoResponse {
    match state.agents.update_agent(&id, patch).await {
        Ok(agent) => (StatusCode::OK, Json(ApiResponse::success(agent))),
        Err(e) => failure(&e),
    }
}

// ============================================================================
// Gateway Endpoints
// ============================================================================

/// GET /api/gateway/status - Current gateway health snapshot
///
/// Never fails: an unreachable gateway is reported as offline, not as an
/// HTTP error.
pub async fn gateway_status(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.gateway.gateway_status().await;
    (StatusCode::OK, Json(ApiResponse::success(status)))
}

/// POST /api/gateway/execute - Run a raw command against the gateway
///
/// The command result is returned as-is; gateway-reported failures still
/// produce a 200 with `ok: false` in the payload, while transport failures
/// map to the usual error statuses.
pub async fn execute_command(
    State(state): State<ApiState>,
    Json(command): Json<Command>,
) -> impl IntoResponse {
    let result = state.gateway.execute(command).await;
    match &result.failure {
        Some(f) => failure(&CoreError::from_failure(f)),
        None => (StatusCode::OK, Json(ApiResponse::success(result))),
    }
}
