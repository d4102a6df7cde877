//! Database migrations for the persistence layer

use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use sqlx::Row;

/// Initial schema migration SQL
const MIGRATION_001_INITIAL: &str = r#"
-- Managed agent records (authoritative local copy)
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    soul TEXT NOT NULL,
    tools TEXT NOT NULL,
    channels TEXT NOT NULL,
    memory TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Cached workspace files (gateway is the source of truth)
CREATE TABLE IF NOT EXISTS workspace_files (
    filename TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    size INTEGER NOT NULL,
    last_modified TEXT NOT NULL
);

-- Migration tracking table
CREATE TABLE IF NOT EXISTS _iris_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL,
    checksum TEXT NOT NULL
);

-- Create indexes for better query performance
CREATE INDEX IF NOT EXISTS idx_agents_updated ON agents(updated_at);
CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);
CREATE INDEX IF NOT EXISTS idx_files_modified ON workspace_files(last_modified);
"#;

/// Migration definition
struct Migration {
    name: &'static str,
    sql: &'static str,
    checksum: &'static str,
}

/// Get all migrations in order
fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        name: "001_initial_schema",
        sql: MIGRATION_001_INITIAL,
        checksum: "v1",
    }]
}

/// Migration runner for the persistence layer
pub struct MigrationRunner {
    pool: ConnectionPool,
}

impl MigrationRunner {
    /// Create a new migration runner
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations
    pub async fn migrate_up(&self) -> Result<MigrationResult, PersistenceError> {
        let migrations = get_migrations();
        let mut applied = 0;
        let mut skipped = 0;

        self.ensure_migrations_table().await?;

        for migration in migrations {
            if self.is_migration_applied(migration.name).await? {
                tracing::debug!("Migration '{}' already applied, skipping", migration.name);
                skipped += 1;
                continue;
            }

            tracing::info!("Applying migration: {}", migration.name);

            // SQLite needs statements executed one by one; comment lines
            // are stripped so a leading comment never hides a statement
            for statement in migration.sql.split(';') {
                let statement = statement
                    .lines()
                    .filter(|line| !line.trim_start().starts_with("--"))
                    .collect::<Vec<_>>()
                    .join("\n");
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }

                sqlx::query(statement)
                    .execute(self.pool.pool())
                    .await
                    .map_err(|e| {
                        PersistenceError::Migration(format!(
                            "Failed to execute migration '{}': {}",
                            migration.name, e
                        ))
                    })?;
            }

            self.record_migration(migration.name, migration.checksum)
                .await?;

            tracing::info!("Migration '{}' applied successfully", migration.name);
            applied += 1;
        }

        Ok(MigrationResult { applied, skipped })
    }

    /// Ensure the migrations tracking table exists
    async fn ensure_migrations_table(&self) -> Result<(), PersistenceError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS _iris_migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL,
                checksum TEXT NOT NULL
            )
        "#;

        sqlx::query(sql)
            .execute(self.pool.pool())
            .await
            .map_err(|e| {
                PersistenceError::Migration(format!("Failed to create migrations table: {}", e))
            })?;

        Ok(())
    }

    /// Check if a migration has been applied
    async fn is_migration_applied(&self, name: &str) -> Result<bool, PersistenceError> {
        let result = sqlx::query("SELECT COUNT(*) as count FROM _iris_migrations WHERE name = ?")
            .bind(name)
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| {
                PersistenceError::Migration(format!("Failed to check migration status: {}", e))
            })?;

        let count: i64 = result.try_get("count").unwrap_or(0);
        Ok(count > 0)
    }

    /// Record a migration as applied
    async fn record_migration(&self, name: &str, checksum: &str) -> Result<(), PersistenceError> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO _iris_migrations (name, applied_at, checksum) VALUES (?, ?, ?)")
            .bind(name)
            .bind(&now)
            .bind(checksum)
            .execute(self.pool.pool())
            .await
            .map_err(|e| PersistenceError::Migration(format!("Failed to record migration: {}", e)))?;

        Ok(())
    }
}

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationResult {
    /// Number of migrations applied
    pub applied: usize,
    /// Number of migrations skipped (already applied)
    pub skipped: usize,
}
