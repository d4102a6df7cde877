use clap::Parser;
use iris::adapters::agent_sync::AgentSynchronizer;
use iris::adapters::api_handler::ApiState;
use iris::adapters::broadcast::Broadcaster;
use iris::adapters::file_cache::WorkspaceFileCache;
use iris::adapters::gateway_client::GatewayClient;
use iris::adapters::health_handler::HealthHandler;
use iris::adapters::status_poller::StatusPoller;
use iris::cli::Cli;
use iris::config::Settings;
use iris::persistence::DataStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting Iris gateway sync server on {}:{}", host, port);

    // Initialize persistence
    let store = DataStore::new(&settings.database).await?;
    if settings.database.auto_migrate {
        let result = store.migrate().await?;
        info!(
            backend = %store.backend(),
            applied = result.applied,
            skipped = result.skipped,
            "Database migrations complete"
        );
    }

    let settings = Arc::new(settings);

    // Wire up the core components
    let gateway = Arc::new(GatewayClient::from_settings(settings.gateway.clone()));
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

    // Background gateway status polling
    let poller = StatusPoller::new(
        gateway.clone(),
        broadcaster.clone(),
        settings.gateway.status_poll_secs,
    );
    tokio::spawn(poller.run());

    let health_handler = Arc::new(HealthHandler::new(store.clone()));
    let state = ApiState {
        settings: settings.clone(),
        cache,
        agents,
        gateway,
        broadcaster,
    };
    let app = iris::create_app(state, health_handler);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
