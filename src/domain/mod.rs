use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod error;

pub use error::CoreError;

/// Lifecycle status of a managed agent.
///
/// No state machine is enforced at this layer; any status may follow any
/// other status.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Error,
}

/// A managed agent record.
///
/// The local store is the authoritative home for agent metadata; the gateway
/// only receives best-effort mirrors of updates.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AgentRecord {
    /// Stable identifier, immutable after creation
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form identity text (SOUL.md content), required non-empty
    pub soul: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub memory: Map<String, Value>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for an agent record. Fields left as `None` are untouched
/// by the merge; `updated_at` is always refreshed on apply.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AgentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soul: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
}

impl AgentPatch {
    /// True when the patch carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.soul.is_none()
            && self.tools.is_none()
            && self.channels.is_none()
            && self.status.is_none()
    }
}

impl AgentRecord {
    /// Apply a partial update, refreshing `updated_at`. Unspecified fields
    /// are left untouched (merge, not replace). Empty `name` and `soul`
    /// values are ignored so both fields stay non-empty.
    pub fn apply(&mut self, patch: &AgentPatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            if !name.is_empty() {
                self.name = name.clone();
            }
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(soul) = &patch.soul {
            if !soul.is_empty() {
                self.soul = soul.clone();
            }
        }
        if let Some(tools) = &patch.tools {
            self.tools = tools.clone();
        }
        if let Some(channels) = &patch.channels {
            self.channels = channels.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.updated_at = now;
    }
}

/// A cached copy of a named workspace file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CachedFile {
    pub filename: String,
    pub content: String,
    /// Byte length of `content`; always recomputed on write, never trusted
    /// from input
    pub size: u64,
    /// Timestamp of the last successful refresh or write
    pub last_modified: DateTime<Utc>,
}

impl CachedFile {
    /// Build an entry with `size` derived from the content.
    pub fn new(filename: impl Into<String>, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        let content = content.into();
        Self {
            filename: filename.into(),
            size: content.len() as u64,
            content,
            last_modified: now,
        }
    }
}

/// Gateway health as observed by the last status probe.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayHealth {
    Online,
    Offline,
    Error,
}

/// Snapshot of gateway status. Computed per query, never persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GatewayStatus {
    pub status: GatewayHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub last_check: DateTime<Utc>,
}

impl GatewayStatus {
    /// Status value used when nothing is known about the gateway yet or
    /// when a probe fails internally.
    pub fn unknown(health: GatewayHealth) -> Self {
        Self {
            status: health,
            version: None,
            uptime_seconds: None,
            endpoints: Vec::new(),
            last_check: Utc::now(),
        }
    }
}

/// State-change notification fanned out to connected viewer sessions.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChangeNotification {
    AgentUpdated(AgentRecord),
    FileUpdated { filename: String, content: String },
    GatewayStatusChanged(GatewayStatus),
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ChangeNotification {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentUpdated(_) => "agent_updated",
            Self::FileUpdated { .. } => "file_updated",
            Self::GatewayStatusChanged(_) => "gateway_status_changed",
            Self::Error { .. } => "error",
        }
    }
}

/// Wire-level command sent to the gateway.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().collect(),
            timeout_ms: None,
        }
    }

    /// Commands safe to retry: they can be issued twice without changing
    /// gateway state.
    pub fn is_idempotent(&self) -> bool {
        match self.name.as_str() {
            "read" | "status" => true,
            "agents" => matches!(self.args.first().map(String::as_str), Some("list") | Some("get")),
            _ => false,
        }
    }
}

/// Classified failure for a gateway call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayFailure {
    /// Call exceeded its deadline; the in-flight request was cancelled
    Timeout { timeout_ms: u64 },
    /// Transport-level connection failure
    Unreachable { message: String },
    /// Gateway responded with a non-success HTTP status
    Http { code: u16, message: String },
    /// Response arrived but could not be interpreted
    Protocol { message: String },
}

impl GatewayFailure {
    /// Transient failures are candidates for retry on idempotent commands.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unreachable { .. })
    }
}

impl std::fmt::Display for GatewayFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { timeout_ms } => write!(f, "request timeout after {}ms", timeout_ms),
            Self::Unreachable { message } => write!(f, "gateway unreachable: {}", message),
            Self::Http { code, message } => write!(f, "HTTP {}: {}", code, message),
            Self::Protocol { message } => write!(f, "protocol error: {}", message),
        }
    }
}

/// Normalized result of a gateway command. All failure is carried in the
/// value; dispatch never raises.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CommandResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classification of the failure when `ok` is false and the failure
    /// happened below the gateway (transport, timeout, protocol)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<GatewayFailure>,
}

impl CommandResult {
    pub fn success(payload: Value) -> Self {
        Self {
            ok: true,
            payload: Some(payload),
            error: None,
            failure: None,
        }
    }

    /// Gateway was reached but reported failure itself.
    pub fn gateway_error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: None,
            error: Some(message.into()),
            failure: None,
        }
    }

    /// Dispatch failed below the gateway.
    pub fn failed(failure: GatewayFailure) -> Self {
        Self {
            ok: false,
            payload: None,
            error: Some(failure.to_string()),
            failure: Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_merges_only_present_fields() {
        let now = Utc::now();
        let mut record = AgentRecord {
            id: "a1".into(),
            name: "scout".into(),
            description: None,
            soul: "wanders".into(),
            tools: vec!["x".into()],
            channels: vec!["general".into()],
            memory: Map::new(),
            status: AgentStatus::Inactive,
            created_at: now,
            updated_at: now,
        };

        let later = now + chrono::Duration::seconds(5);
        record.apply(
            &AgentPatch {
                status: Some(AgentStatus::Active),
                ..Default::default()
            },
            later,
        );

        assert_eq!(record.status, AgentStatus::Active);
        assert_eq!(record.tools, vec!["x".to_string()]);
        assert_eq!(record.name, "scout");
        assert_eq!(record.updated_at, later);
        assert_eq!(record.created_at, now);
    }

    #[test]
    fn test_apply_ignores_empty_name_and_soul() {
        let now = Utc::now();
        let mut record = AgentRecord {
            id: "a1".into(),
            name: "scout".into(),
            description: None,
            soul: "wanders".into(),
            tools: Vec::new(),
            channels: Vec::new(),
            memory: Map::new(),
            status: AgentStatus::Active,
            created_at: now,
            updated_at: now,
        };

        record.apply(
            &AgentPatch {
                name: Some(String::new()),
                soul: Some(String::new()),
                description: Some("new desc".into()),
                ..Default::default()
            },
            now,
        );

        assert_eq!(record.name, "scout");
        assert_eq!(record.soul, "wanders");
        assert!(!record.soul.is_empty());
        assert_eq!(record.description.as_deref(), Some("new desc"));
    }

    #[test]
    fn test_cached_file_size_recomputed() {
        let file = CachedFile::new("SOUL.md", "hello", Utc::now());
        assert_eq!(file.size, 5);

        let empty = CachedFile::new("SOUL.md", "", Utc::now());
        assert_eq!(empty.size, 0);
    }

    #[test]
    fn test_command_idempotence() {
        assert!(Command::new("read", ["SOUL.md".into()]).is_idempotent());
        assert!(Command::new("status", []).is_idempotent());
        assert!(Command::new("agents", ["list".into()]).is_idempotent());
        assert!(Command::new("agents", ["get".into(), "a1".into()]).is_idempotent());
        assert!(!Command::new("write", ["SOUL.md".into(), "hi".into()]).is_idempotent());
        assert!(!Command::new("agents", ["update".into(), "a1".into()]).is_idempotent());
    }

    #[test]
    fn test_notification_serialization_shape() {
        let note = ChangeNotification::FileUpdated {
            filename: "SOUL.md".into(),
            content: "hello".into(),
        };
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "file_updated",
                "data": { "filename": "SOUL.md", "content": "hello" }
            })
        );
    }
}
