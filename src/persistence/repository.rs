//! Repositories for agent records and cached workspace files
//!
//! The agents table is the authoritative home for agent metadata. The
//! workspace_files table only caches gateway-owned content; staleness is
//! evaluated by the cache layer at read time, never enforced here.

use crate::domain::{AgentRecord, AgentStatus, CachedFile};
use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::Row;

/// Repository trait for agent record operations
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Get an agent by id
    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, PersistenceError>;

    /// List all agents, most recently updated first
    async fn list_agents(&self) -> Result<Vec<AgentRecord>, PersistenceError>;

    /// Insert or replace an agent record
    async fn upsert_agent(&self, record: &AgentRecord) -> Result<(), PersistenceError>;
}

/// Repository trait for cached workspace file operations
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Get a cached file by filename
    async fn get_cached_file(&self, filename: &str)
        -> Result<Option<CachedFile>, PersistenceError>;

    /// Insert or replace a cached file entry
    async fn upsert_cached_file(&self, entry: &CachedFile) -> Result<(), PersistenceError>;
}

/// SQLx-based implementation of AgentStore
pub struct SqlxAgentStore {
    pool: ConnectionPool,
}

impl SqlxAgentStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Parse a row into an AgentRecord
    fn parse_row(row: &sqlx::any::AnyRow) -> Result<AgentRecord, PersistenceError> {
        let tools_str: String = row.try_get("tools")?;
        let tools: Vec<String> = serde_json::from_str(&tools_str)?;

        let channels_str: String = row.try_get("channels")?;
        let channels: Vec<String> = serde_json::from_str(&channels_str)?;

        let memory_str: String = row.try_get("memory")?;
        let memory: Map<String, Value> = serde_json::from_str(&memory_str)?;

        let status_str: String = row.try_get("status")?;
        let status = parse_status(&status_str)?;

        Ok(AgentRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            soul: row.try_get("soul")?,
            tools,
            channels,
            memory,
            status,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}

fn parse_status(s: &str) -> Result<AgentStatus, PersistenceError> {
    match s {
        "active" => Ok(AgentStatus::Active),
        "inactive" => Ok(AgentStatus::Inactive),
        "error" => Ok(AgentStatus::Error),
        other => Err(PersistenceError::Internal(format!(
            "Unknown agent status in store: '{}'",
            other
        ))),
    }
}

fn status_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Active => "active",
        AgentStatus::Inactive => "inactive",
        AgentStatus::Error => "error",
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Internal(format!("Invalid timestamp '{}': {}", s, e)))
}

#[async_trait]
impl AgentStore for SqlxAgentStore {
    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(Self::parse_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY updated_at DESC")
            .fetch_all(self.pool.pool())
            .await?;

        let mut records = Vec::new();
        for row in rows {
            records.push(Self::parse_row(&row)?);
        }

        Ok(records)
    }

    async fn upsert_agent(&self, record: &AgentRecord) -> Result<(), PersistenceError> {
        let tools = serde_json::to_string(&record.tools)?;
        let channels = serde_json::to_string(&record.channels)?;
        let memory = serde_json::to_string(&record.memory)?;

        sqlx::query(
            "INSERT INTO agents (id, name, description, soul, tools, channels, memory, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, description = excluded.description, soul = excluded.soul, \
             tools = excluded.tools, channels = excluded.channels, memory = excluded.memory, \
             status = excluded.status, updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.soul)
        .bind(&tools)
        .bind(&channels)
        .bind(&memory)
        .bind(status_str(record.status))
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }
}

/// SQLx-based implementation of FileStore
pub struct SqlxFileStore {
    pool: ConnectionPool,
}

impl SqlxFileStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::any::AnyRow) -> Result<CachedFile, PersistenceError> {
        let size: i64 = row.try_get("size")?;

        Ok(CachedFile {
            filename: row.try_get("filename")?,
            content: row.try_get("content")?,
            size: size as u64,
            last_modified: parse_timestamp(&row.try_get::<String, _>("last_modified")?)?,
        })
    }
}

#[async_trait]
impl FileStore for SqlxFileStore {
    async fn get_cached_file(
        &self,
        filename: &str,
    ) -> Result<Option<CachedFile>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM workspace_files WHERE filename = ?")
            .bind(filename)
            .fetch_optional(self.pool.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(Self::parse_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_cached_file(&self, entry: &CachedFile) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO workspace_files (filename, content, size, last_modified) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(filename) DO UPDATE SET \
             content = excluded.content, size = excluded.size, last_modified = excluded.last_modified",
        )
        .bind(&entry.filename)
        .bind(&entry.content)
        .bind(entry.size as i64)
        .bind(entry.last_modified.to_rfc3339())
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            AgentStatus::Active,
            AgentStatus::Inactive,
            AgentStatus::Error,
        ] {
            assert_eq!(parse_status(status_str(status)).unwrap(), status);
        }
        assert!(parse_status("degraded").is_err());
    }

    #[test]
    fn test_parse_timestamp_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_timestamp("not-a-date").is_err());
    }
}
