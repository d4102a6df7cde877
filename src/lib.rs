//! # Iris - Gateway Sync Server
//!
//! Iris sits between a web configuration UI and a local agent gateway. It
//! caches gateway-owned workspace files with bounded staleness, keeps agent
//! records authoritative in a local database with best-effort mirroring to
//! the gateway, and fans out state-change notifications to connected viewer
//! sessions over WebSocket.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use iris::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let settings = Settings::new()?;
//!
//!     // Server will start on configured host:port
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: Core types and the error taxonomy
//! - **Adapters**: Gateway client, file cache, agent synchronizer,
//!   broadcaster, REST and WebSocket handlers
//! - **Persistence**: SQLx-backed stores for agents and cached files
//! - **Config**: Configuration loading and validation

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod persistence;

use crate::adapters::api_handler::{self, ApiState};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::ws::ws_handler;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Creates the Axum application router with all endpoints configured.
pub fn create_app(state: ApiState, health_handler: Arc<HealthHandler>) -> Router {
    let health_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }));

    let api_router = Router::new()
        // Workspace files (read-through cache, write-through to gateway)
        .route(
            "/config/files/:filename",
            get(api_handler::get_file).put(api_handler::put_file),
        )
        // Agents (local store authoritative)
        .route("/agents", get(api_handler::list_agents))
        .route(
            "/agents/:id",
            get(api_handler::get_agent).put(api_handler::update_agent),
        )
        // Gateway passthrough
        .route("/gateway/status", get(api_handler::gateway_status))
        .route(
            "/gateway/execute",
            axum::routing::post(api_handler::execute_command),
        )
        // Viewer sessions
        .route("/ws", get(ws_handler))
        .with_state(state);

    let router = health_router.nest("/api", api_router);

    router.layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}
