//! PostgreSQL branch store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::types::{BranchId, BranchMessageEntry, BranchRecord, Message, MessageId};

use super::{BranchStore, MessageStore};

/// DDL for the branch records table.
pub const BRANCHES_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS branches (
    id UUID PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    name TEXT NOT NULL,
    parent_branch_id UUID REFERENCES branches(id),
    branch_point_message_id UUID,
    created_at TIMESTAMPTZ NOT NULL,
    description TEXT,
    active BOOLEAN NOT NULL DEFAULT TRUE,

    CONSTRAINT branches_conversation_name_idx UNIQUE (conversation_id, name)
);

CREATE INDEX IF NOT EXISTS idx_branches_conversation
    ON branches(conversation_id);
CREATE INDEX IF NOT EXISTS idx_branches_parent
    ON branches(parent_branch_id);
"#;

/// DDL for the frozen snapshot rows.
pub const BRANCH_MESSAGE_ENTRIES_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS branch_message_entries (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    branch_id UUID NOT NULL REFERENCES branches(id),
    message_id UUID NOT NULL,
    sequence INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_branch_message_entries_branch
    ON branch_message_entries(branch_id, sequence);
"#;

/// DDL for the per-conversation current-branch pointer.
pub const CONVERSATION_HEADS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_heads (
    conversation_id TEXT PRIMARY KEY,
    branch_id UUID NOT NULL REFERENCES branches(id)
);
"#;

/// Configuration for PostgreSQL connection pool.
///
/// Production defaults:
/// - Pool size balances concurrency with connection limits
/// - Timeouts are aggressive to fail fast
/// - Idle timeout releases unused connections
/// - Max lifetime forces periodic reconnection for health
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/branches".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// Error type for the PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// PostgreSQL message and branch store.
///
/// Reads the conversation log from the surrounding system's `messages`
/// table and owns the branch tables. Every mutating [`BranchStore`]
/// method runs inside one transaction. Uses connection pooling with
/// production-tuned settings.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    /// Create the branch tables and indexes if they do not exist.
    ///
    /// The `messages` table belongs to the surrounding system and is not
    /// touched here.
    pub async fn ensure_schema(&self) -> Result<(), PostgresError> {
        for ddl in [
            BRANCHES_TABLE_SCHEMA,
            BRANCH_MESSAGE_ENTRIES_TABLE_SCHEMA,
            CONVERSATION_HEADS_TABLE_SCHEMA,
        ] {
            sqlx::raw_sql(ddl).execute(&self.pool).await?;
        }
        tracing::info!("Branch schema ensured");
        Ok(())
    }

    fn parse_message_row(row: &sqlx::postgres::PgRow) -> Result<Message, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        let conversation_id: String = row.try_get("conversation_id")?;
        let prompt: String = row.try_get("prompt")?;
        let response: String = row.try_get("response")?;
        let created_at: chrono::DateTime<chrono::Utc> = row.try_get("created_at")?;
        Ok(Message::new(
            MessageId::new(id),
            conversation_id,
            prompt,
            response,
            created_at,
        ))
    }

    fn parse_branch_row(row: &sqlx::postgres::PgRow) -> Result<BranchRecord, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        let conversation_id: String = row.try_get("conversation_id")?;
        let name: String = row.try_get("name")?;
        let parent_branch_id: Option<Uuid> = row.try_get("parent_branch_id")?;
        let branch_point_message_id: Option<Uuid> = row.try_get("branch_point_message_id")?;
        let description: Option<String> = row.try_get("description")?;
        let active: bool = row.try_get("active")?;
        let created_at: chrono::DateTime<chrono::Utc> = row.try_get("created_at")?;

        Ok(BranchRecord {
            id: BranchId::new(id),
            conversation_id,
            name,
            parent_branch_id: parent_branch_id.map(BranchId::new),
            branch_point_message_id: branch_point_message_id.map(MessageId::new),
            description,
            active,
            created_at,
        })
    }

    fn is_unique_violation(e: &sqlx::Error) -> bool {
        matches!(
            e.as_database_error().and_then(|d| d.code()),
            Some(code) if code == "23505"
        )
    }
}

#[async_trait]
impl MessageStore for PostgresStore {
    type Error = PostgresError;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, prompt, response, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_message_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)
    }

    async fn get_messages_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>, Self::Error> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, prompt, response, created_at
            FROM messages
            WHERE id = ANY($1)
            "#,
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_id: BTreeMap<MessageId, Message> = BTreeMap::new();
        for row in &rows {
            let message = Self::parse_message_row(row)?;
            by_id.insert(message.id, message);
        }

        // Requested order, silently omitting unresolved ids.
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

#[async_trait]
impl BranchStore for PostgresStore {
    type Error = PostgresError;

    async fn insert_branch(
        &self,
        record: &BranchRecord,
        entries: &[BranchMessageEntry],
    ) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO branches (
                id, conversation_id, name, parent_branch_id,
                branch_point_message_id, created_at, description, active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.conversation_id)
        .bind(&record.name)
        .bind(record.parent_branch_id.map(|id| id.as_uuid()))
        .bind(record.branch_point_message_id.map(|id| id.as_uuid()))
        .bind(record.created_at)
        .bind(&record.description)
        .bind(record.active)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            // Name collisions are signaled, never surfaced as raw errors.
            if Self::is_unique_violation(&e) {
                return Ok(false);
            }
            return Err(e.into());
        }

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO branch_message_entries (branch_id, message_id, sequence)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(entry.branch_id.as_uuid())
            .bind(entry.message_id.as_uuid())
            .bind(entry.sequence as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn get_branch(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<Option<BranchRecord>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, name, parent_branch_id,
                   branch_point_message_id, created_at, description, active
            FROM branches
            WHERE conversation_id = $1 AND name = $2
            "#,
        )
        .bind(conversation_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_branch_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_branch_by_id(&self, id: &BranchId) -> Result<Option<BranchRecord>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, name, parent_branch_id,
                   branch_point_message_id, created_at, description, active
            FROM branches
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_branch_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_branches(
        &self,
        conversation_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<BranchRecord>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, name, parent_branch_id,
                   branch_point_message_id, created_at, description, active
            FROM branches
            WHERE conversation_id = $1 AND (active OR $2)
            ORDER BY created_at, id
            "#,
        )
        .bind(conversation_id)
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_branch_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)
    }

    async fn rename_branch(
        &self,
        conversation_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            r#"
            UPDATE branches
            SET name = $3
            WHERE conversation_id = $1 AND name = $2
            "#,
        )
        .bind(conversation_id)
        .bind(old_name)
        .bind(new_name)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            // New name already taken within the conversation.
            Err(e) if Self::is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn archive_branch(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<bool, Self::Error> {
        let done = sqlx::query(
            r#"
            UPDATE branches
            SET active = FALSE
            WHERE conversation_id = $1 AND name = $2
            "#,
        )
        .bind(conversation_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn has_children(&self, id: &BranchId) -> Result<bool, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM branches WHERE parent_branch_id = $1
            ) AS present
            "#,
        )
        .bind(id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("present")?)
    }

    async fn delete_branches(&self, ids: &[BranchId]) -> Result<(), Self::Error> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM branch_message_entries WHERE branch_id = ANY($1)")
            .bind(&uuids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversation_heads WHERE branch_id = ANY($1)")
            .bind(&uuids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM branches WHERE id = ANY($1)")
            .bind(&uuids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_entries(
        &self,
        branch_id: &BranchId,
    ) -> Result<Vec<BranchMessageEntry>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT branch_id, message_id, sequence
            FROM branch_message_entries
            WHERE branch_id = $1
            ORDER BY sequence
            "#,
        )
        .bind(branch_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let branch_id: Uuid = row.try_get("branch_id")?;
                let message_id: Uuid = row.try_get("message_id")?;
                let sequence: i32 = row.try_get("sequence")?;
                Ok(BranchMessageEntry::new(
                    BranchId::new(branch_id),
                    MessageId::new(message_id),
                    sequence as u32,
                ))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(PostgresError::from)
    }

    async fn count_entries(
        &self,
        branch_ids: &[BranchId],
    ) -> Result<BTreeMap<BranchId, usize>, Self::Error> {
        let uuids: Vec<Uuid> = branch_ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT branch_id, COUNT(*) AS entry_count
            FROM branch_message_entries
            WHERE branch_id = ANY($1)
            GROUP BY branch_id
            "#,
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            let branch_id: Uuid = row.try_get("branch_id")?;
            let count: i64 = row.try_get("entry_count")?;
            counts.insert(BranchId::new(branch_id), count as usize);
        }
        Ok(counts)
    }

    async fn current_branch(
        &self,
        conversation_id: &str,
    ) -> Result<Option<BranchId>, Self::Error> {
        let row =
            sqlx::query("SELECT branch_id FROM conversation_heads WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => {
                let branch_id: Uuid = r.try_get("branch_id")?;
                Ok(Some(BranchId::new(branch_id)))
            }
            None => Ok(None),
        }
    }

    async fn set_current_branch(
        &self,
        conversation_id: &str,
        branch_id: Option<BranchId>,
    ) -> Result<(), Self::Error> {
        match branch_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    INSERT INTO conversation_heads (conversation_id, branch_id)
                    VALUES ($1, $2)
                    ON CONFLICT (conversation_id) DO UPDATE SET branch_id = $2
                    "#,
                )
                .bind(conversation_id)
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM conversation_heads WHERE conversation_id = $1")
                    .bind(conversation_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}
