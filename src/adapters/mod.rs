pub mod agent_sync;
pub mod api_handler;
pub mod broadcast;
pub mod file_cache;
pub mod gateway_client;
pub mod health_handler;
pub mod keyed_lock;
pub mod status_poller;
pub mod ws;
