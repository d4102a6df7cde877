//! Gateway client
//!
//! Translates high-level intents (read file, write file, list agents, get
//! agent, update agent, get status) into wire commands, dispatches them to
//! the gateway endpoint, and returns a normalized `CommandResult`. Dispatch
//! never raises: every failure is classified and carried in the result.
//!
//! Retries apply only to transient failures (timeout, unreachable) on
//! idempotent commands. Writes are never retried here; duplicate writes are
//! not guaranteed idempotent at the gateway, so retry-on-write is the
//! caller's decision.

use crate::config::GatewaySettings;
use crate::domain::{
    AgentPatch, Command, CommandResult, GatewayFailure, GatewayHealth, GatewayStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Transport seam for dispatching commands to the gateway.
///
/// Production uses [`HttpGatewayTransport`]; tests substitute a scripted
/// transport.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Dispatch a command within the deadline. A transport-level problem
    /// comes back as a classified `GatewayFailure`; a gateway that was
    /// reached but reported failure comes back as `Ok` with `ok: false`.
    async fn dispatch(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<CommandResult, GatewayFailure>;

    /// Probe the gateway's status endpoint within the deadline.
    async fn fetch_status(&self, timeout: Duration) -> Result<CommandResult, GatewayFailure>;
}

/// HTTP transport speaking the gateway's JSON protocol.
pub struct HttpGatewayTransport {
    base_url: String,
    client: Client,
}

impl HttpGatewayTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    fn classify(error: reqwest::Error, timeout: Duration) -> GatewayFailure {
        if error.is_timeout() {
            GatewayFailure::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if error.is_connect() {
            GatewayFailure::Unreachable {
                message: error.to_string(),
            }
        } else if error.is_decode() {
            GatewayFailure::Protocol {
                message: error.to_string(),
            }
        } else {
            GatewayFailure::Unreachable {
                message: error.to_string(),
            }
        }
    }

    async fn read_result(
        response: reqwest::Response,
        timeout: Duration,
    ) -> Result<CommandResult, GatewayFailure> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayFailure::Http {
                code: status.as_u16(),
                message,
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        // The gateway envelope carries its own success flag; absence of the
        // flag means a bare payload from an older gateway.
        match payload.get("success").and_then(|v| v.as_bool()) {
            Some(true) | None => Ok(CommandResult::success(
                payload.get("data").cloned().unwrap_or(payload),
            )),
            Some(false) => {
                let message = payload
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("gateway reported failure")
                    .to_string();
                Ok(CommandResult::gateway_error(message))
            }
        }
    }
}

#[async_trait]
impl GatewayTransport for HttpGatewayTransport {
    async fn dispatch(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<CommandResult, GatewayFailure> {
        let url = format!("{}/api/execute", self.base_url);
        let request_id = Uuid::new_v4();
        debug!(%request_id, command = %command.name, "Dispatching gateway command");
        let response = self
            .client
            .post(&url)
            .header("x-request-id", request_id.to_string())
            .timeout(timeout)
            .json(command)
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        Self::read_result(response, timeout).await
    }

    async fn fetch_status(&self, timeout: Duration) -> Result<CommandResult, GatewayFailure> {
        let url = format!("{}/api/status", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        Self::read_result(response, timeout).await
    }
}

/// Shape of the gateway's status payload.
#[derive(Debug, Deserialize)]
struct StatusPayload {
    version: Option<String>,
    #[serde(alias = "uptime")]
    uptime_seconds: Option<u64>,
    #[serde(default)]
    endpoints: Vec<String>,
}

/// Client for issuing commands to the gateway with per-call timeouts,
/// failure classification, and bounded retry.
///
/// Explicitly constructed and passed to the components that need it; there
/// is no process-wide instance.
pub struct GatewayClient {
    transport: Arc<dyn GatewayTransport>,
    settings: GatewaySettings,
}

impl GatewayClient {
    pub fn new(transport: Arc<dyn GatewayTransport>, settings: GatewaySettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Build a client backed by the HTTP transport from settings.
    pub fn from_settings(settings: GatewaySettings) -> Self {
        let transport = Arc::new(HttpGatewayTransport::new(settings.url.clone()));
        Self::new(transport, settings)
    }

    /// Execute a command. Never raises; all failure is carried in the
    /// result. Idempotent commands are retried on transient failure with a
    /// linearly increasing delay; writes get exactly one attempt.
    pub async fn execute(&self, command: Command) -> CommandResult {
        let timeout = Duration::from_millis(
            command
                .timeout_ms
                .unwrap_or(self.settings.command_timeout_ms),
        );
        let attempts = if command.is_idempotent() {
            self.settings.retry.max_attempts.max(1)
        } else {
            1
        };

        let mut last_failure = None;
        for attempt in 1..=attempts {
            match self.transport.dispatch(&command, timeout).await {
                Ok(result) => return result,
                Err(failure) => {
                    if failure.is_transient() && attempt < attempts {
                        let delay =
                            Duration::from_millis(self.settings.retry.delay_ms * attempt as u64);
                        debug!(
                            command = %command.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            failure = %failure,
                            "Transient gateway failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        last_failure = Some(failure);
                    } else {
                        return CommandResult::failed(failure);
                    }
                }
            }
        }

        // Attempts exhausted; report the last transient failure
        match last_failure {
            Some(failure) => CommandResult::failed(failure),
            None => CommandResult::gateway_error("no attempts were made"),
        }
    }

    /// Probe gateway status with the short status timeout. Retried like any
    /// other idempotent call.
    pub async fn status(&self) -> CommandResult {
        let timeout = Duration::from_millis(self.settings.status_timeout_ms);
        let attempts = self.settings.retry.max_attempts.max(1);

        let mut last_failure = None;
        for attempt in 1..=attempts {
            match self.transport.fetch_status(timeout).await {
                Ok(result) => return result,
                Err(failure) if failure.is_transient() && attempt < attempts => {
                    tokio::time::sleep(Duration::from_millis(
                        self.settings.retry.delay_ms * attempt as u64,
                    ))
                    .await;
                    last_failure = Some(failure);
                }
                Err(failure) => return CommandResult::failed(failure),
            }
        }

        match last_failure {
            Some(failure) => CommandResult::failed(failure),
            None => CommandResult::gateway_error("no attempts were made"),
        }
    }

    /// True when the status probe succeeded.
    pub async fn ping(&self) -> bool {
        self.status().await.ok
    }

    /// Current gateway status as a value. Never fails: any internal failure
    /// degrades to `error`, transport-level unavailability to `offline`.
    pub async fn gateway_status(&self) -> GatewayStatus {
        let result = self.status().await;
        let last_check = Utc::now();

        if result.ok {
            let parsed = result
                .payload
                .and_then(|p| serde_json::from_value::<StatusPayload>(p).ok());
            match parsed {
                Some(payload) => GatewayStatus {
                    status: GatewayHealth::Online,
                    version: payload.version,
                    uptime_seconds: payload.uptime_seconds,
                    endpoints: payload.endpoints,
                    last_check,
                },
                // Reached and healthy, just an unexpected payload shape
                None => GatewayStatus {
                    status: GatewayHealth::Online,
                    version: None,
                    uptime_seconds: None,
                    endpoints: Vec::new(),
                    last_check,
                },
            }
        } else {
            let health = match result.failure {
                Some(GatewayFailure::Timeout { .. }) | Some(GatewayFailure::Unreachable { .. }) => {
                    GatewayHealth::Offline
                }
                _ => GatewayHealth::Error,
            };
            if let Some(error) = &result.error {
                warn!(error = %error, "Gateway status probe failed");
            }
            GatewayStatus {
                status: health,
                version: None,
                uptime_seconds: None,
                endpoints: Vec::new(),
                last_check,
            }
        }
    }

    /// Read a workspace file's content from the gateway.
    pub async fn read_file(&self, filename: &str) -> CommandResult {
        self.execute(Command::new("read", [filename.to_string()]))
            .await
    }

    /// Write a workspace file's content to the gateway.
    pub async fn write_file(&self, filename: &str, content: &str) -> CommandResult {
        self.execute(Command::new(
            "write",
            [filename.to_string(), content.to_string()],
        ))
        .await
    }

    /// List all agents known to the gateway.
    pub async fn list_agents(&self) -> CommandResult {
        self.execute(Command::new("agents", ["list".to_string()]))
            .await
    }

    /// Get a single agent's details from the gateway.
    pub async fn get_agent(&self, id: &str) -> CommandResult {
        self.execute(Command::new(
            "agents",
            ["get".to_string(), id.to_string()],
        ))
        .await
    }

    /// Mirror a partial agent update to the gateway.
    pub async fn update_agent(&self, id: &str, patch: &AgentPatch) -> CommandResult {
        let payload = match serde_json::to_string(patch) {
            Ok(json) => json,
            Err(e) => {
                return CommandResult::failed(GatewayFailure::Protocol {
                    message: format!("Failed to encode agent patch: {}", e),
                })
            }
        };
        self.execute(Command::new(
            "agents",
            ["update".to_string(), id.to_string(), payload],
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Transport that replays a script of outcomes and records calls.
    struct ScriptedTransport {
        calls: AtomicUsize,
        timeouts_seen: Mutex<Vec<Duration>>,
        script: Mutex<Vec<Result<CommandResult, GatewayFailure>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<CommandResult, GatewayFailure>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                timeouts_seen: Mutex::new(Vec::new()),
                script: Mutex::new(script),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GatewayTransport for ScriptedTransport {
        async fn dispatch(
            &self,
            _command: &Command,
            timeout: Duration,
        ) -> Result<CommandResult, GatewayFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.timeouts_seen.lock().await.push(timeout);
            self.script.lock().await.remove(0)
        }

        async fn fetch_status(&self, timeout: Duration) -> Result<CommandResult, GatewayFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.timeouts_seen.lock().await.push(timeout);
            self.script.lock().await.remove(0)
        }
    }

    fn settings() -> GatewaySettings {
        GatewaySettings {
            url: "http://localhost:18789".into(),
            command_timeout_ms: 10_000,
            status_timeout_ms: 5_000,
            retry: RetrySettings {
                max_attempts: 3,
                delay_ms: 1,
            },
            status_poll_secs: 30,
        }
    }

    #[tokio::test]
    async fn test_read_retries_transient_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(GatewayFailure::Unreachable {
                message: "refused".into(),
            }),
            Err(GatewayFailure::Timeout { timeout_ms: 10 }),
            Ok(CommandResult::success(json!({"content": "hello"}))),
        ]));
        let client = GatewayClient::new(transport.clone(), settings());

        let result = client.read_file("SOUL.md").await;
        assert!(result.ok);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_read_returns_last_failure_after_exhaustion() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(GatewayFailure::Timeout { timeout_ms: 10 }),
            Err(GatewayFailure::Timeout { timeout_ms: 10 }),
            Err(GatewayFailure::Unreachable {
                message: "refused".into(),
            }),
        ]));
        let client = GatewayClient::new(transport.clone(), settings());

        let result = client.read_file("SOUL.md").await;
        assert!(!result.ok);
        assert!(matches!(
            result.failure,
            Some(GatewayFailure::Unreachable { .. })
        ));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_write_is_never_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(GatewayFailure::Timeout {
            timeout_ms: 10,
        })]));
        let client = GatewayClient::new(transport.clone(), settings());

        let result = client.write_file("SOUL.md", "hi").await;
        assert!(!result.ok);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_http_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(GatewayFailure::Http {
            code: 500,
            message: "boom".into(),
        })]));
        let client = GatewayClient::new(transport.clone(), settings());

        let result = client.read_file("SOUL.md").await;
        assert!(!result.ok);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_status_uses_shorter_timeout() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(CommandResult::success(json!({}))),
            Ok(CommandResult::success(json!({"content": ""}))),
        ]));
        let client = GatewayClient::new(transport.clone(), settings());

        client.status().await;
        client.read_file("SOUL.md").await;

        let timeouts = transport.timeouts_seen.lock().await;
        assert_eq!(timeouts[0], Duration::from_millis(5_000));
        assert_eq!(timeouts[1], Duration::from_millis(10_000));
        assert!(timeouts[0] < timeouts[1]);
    }

    #[tokio::test]
    async fn test_ping_reflects_status_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(CommandResult::success(
            json!({}),
        ))]));
        let client = GatewayClient::new(transport, settings());
        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn test_gateway_status_maps_transient_to_offline() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(GatewayFailure::Unreachable {
                message: "refused".into(),
            }),
            Err(GatewayFailure::Unreachable {
                message: "refused".into(),
            }),
            Err(GatewayFailure::Unreachable {
                message: "refused".into(),
            }),
        ]));
        let client = GatewayClient::new(transport, settings());

        let status = client.gateway_status().await;
        assert_eq!(status.status, GatewayHealth::Offline);
        assert!(status.endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_status_parses_payload() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(CommandResult::success(
            json!({"version": "1.2.0", "uptime": 120, "endpoints": ["/status"]}),
        ))]));
        let client = GatewayClient::new(transport, settings());

        let status = client.gateway_status().await;
        assert_eq!(status.status, GatewayHealth::Online);
        assert_eq!(status.version.as_deref(), Some("1.2.0"));
        assert_eq!(status.uptime_seconds, Some(120));
        assert_eq!(status.endpoints, vec!["/status".to_string()]);
    }

    #[tokio::test]
    async fn test_gateway_error_result_maps_to_error_health() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(
            CommandResult::gateway_error("internal"),
        )]));
        let client = GatewayClient::new(transport, settings());

        let status = client.gateway_status().await;
        assert_eq!(status.status, GatewayHealth::Error);
    }
}
