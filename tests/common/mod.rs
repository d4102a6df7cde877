//! Shared test fixtures: a sqlite-backed server with a scripted gateway.

use async_trait::async_trait;
use chrono::Utc;
use iris::adapters::agent_sync::AgentSynchronizer;
use iris::adapters::api_handler::ApiState;
use iris::adapters::broadcast::Broadcaster;
use iris::adapters::file_cache::WorkspaceFileCache;
use iris::adapters::gateway_client::{GatewayClient, GatewayTransport};
use iris::adapters::health_handler::HealthHandler;
use iris::config::Settings;
use iris::domain::{AgentRecord, AgentStatus, Command, CommandResult, GatewayFailure};
use iris::persistence::DataStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Scripted stand-in for the real gateway. Serves file content from an
/// in-memory map and can be flipped offline at any point.
pub struct ScriptedGateway {
    pub files: Mutex<HashMap<String, String>>,
    pub online: AtomicBool,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub agent_updates: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            agent_updates: AtomicUsize::new(0),
        }
    }

    pub async fn seed_file(&self, filename: &str, content: &str) {
        self.files
            .lock()
            .await
            .insert(filename.to_string(), content.to_string());
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn offline(&self) -> Result<CommandResult, GatewayFailure> {
        Err(GatewayFailure::Unreachable {
            message: "connection refused".into(),
        })
    }
}

#[async_trait]
impl GatewayTransport for ScriptedGateway {
    async fn dispatch(
        &self,
        command: &Command,
        _timeout: Duration,
    ) -> Result<CommandResult, GatewayFailure> {
        match command.name.as_str() {
            "read" => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                if !self.online.load(Ordering::SeqCst) {
                    return self.offline();
                }
                let filename = command.args.first().cloned().unwrap_or_default();
                match self.files.lock().await.get(&filename) {
                    Some(content) => Ok(CommandResult::success(json!({"content": content}))),
                    None => Ok(CommandResult::gateway_error(format!(
                        "No such file: {}",
                        filename
                    ))),
                }
            }
            "write" => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                if !self.online.load(Ordering::SeqCst) {
                    return self.offline();
                }
                let filename = command.args.first().cloned().unwrap_or_default();
                let content = command.args.get(1).cloned().unwrap_or_default();
                self.files.lock().await.insert(filename, content);
                Ok(CommandResult::success(json!({"ok": true})))
            }
            "agents" if command.args.first().map(String::as_str) == Some("update") => {
                self.agent_updates.fetch_add(1, Ordering::SeqCst);
                if !self.online.load(Ordering::SeqCst) {
                    return self.offline();
                }
                Ok(CommandResult::success(json!({"ok": true})))
            }
            _ => {
                if !self.online.load(Ordering::SeqCst) {
                    return self.offline();
                }
                Ok(CommandResult::success(json!({})))
            }
        }
    }

    async fn fetch_status(&self, _timeout: Duration) -> Result<CommandResult, GatewayFailure> {
        if !self.online.load(Ordering::SeqCst) {
            return self.offline();
        }
        Ok(CommandResult::success(
            json!({"version": "0.9.0", "uptime": 120, "endpoints": ["/api/execute"]}),
        ))
    }
}

/// A fully wired server over a temp-file sqlite database.
pub struct TestServer {
    pub app: axum::Router,
    pub gateway: Arc<ScriptedGateway>,
    pub store: DataStore,
    pub broadcaster: Arc<Broadcaster>,
    // Dropped last; keeps the database file alive
    _dir: TempDir,
}

pub async fn test_server() -> TestServer {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("iris-test.db");
    let mut settings = Settings {
        server: iris::config::ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        gateway: Default::default(),
        cache: Default::default(),
        broadcast: Default::default(),
        database: iris::persistence::PersistenceConfig {
            url: format!("sqlite://{}?mode=rwc", db_path.display()),
            max_connections: 1,
            auto_migrate: true,
        },
    };
    // Keep retry delays negligible in tests
    settings.gateway.retry.delay_ms = 1;

    let store = DataStore::new(&settings.database).await.expect("connect");
    store.migrate().await.expect("migrate");

    let gateway_transport = Arc::new(ScriptedGateway::new());
    let gateway = Arc::new(GatewayClient::new(
        gateway_transport.clone(),
        settings.gateway.clone(),
    ));
    let broadcaster = Arc::new(Broadcaster::new(settings.broadcast.session_buffer));
    let cache = Arc::new(WorkspaceFileCache::new(
        store.files(),
        gateway.clone(),
        broadcaster.clone(),
        settings.cache.allowed_files.clone(),
        settings.cache.staleness_secs,
    ));
    let agents = Arc::new(AgentSynchronizer::new(
        store.agents(),
        gateway.clone(),
        broadcaster.clone(),
    ));

    let settings = Arc::new(settings);
    let health_handler = Arc::new(HealthHandler::new(store.clone()));
    let state = ApiState {
        settings,
        cache,
        agents,
        gateway,
        broadcaster: broadcaster.clone(),
    };
    let app = iris::create_app(state, health_handler);

    TestServer {
        app,
        gateway: gateway_transport,
        store,
        broadcaster,
        _dir: dir,
    }
}

pub fn sample_agent(id: &str) -> AgentRecord {
    AgentRecord {
        id: id.to_string(),
        name: "Scout".to_string(),
        description: Some("Exploration agent".to_string()),
        soul: "Curious and methodical.".to_string(),
        tools: vec!["read".to_string(), "write".to_string()],
        channels: vec!["general".to_string()],
        memory: Default::default(),
        status: AgentStatus::Active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
