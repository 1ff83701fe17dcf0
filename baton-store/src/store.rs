//! The Store: transactional access to the embedded database.

use crate::migrations;
use crate::rows::*;
use baton_core::*;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{ConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Filter for `list_contexts`.
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    pub scope: Option<ContextScope>,
    pub compression_level: Option<CompressionLevel>,
    pub include_archived: bool,
}

/// Filter for `query_events`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<Vec<EventKind>>,
    pub min_importance: Option<u8>,
    pub since_sequence: Option<i64>,
}

/// Identity-document index entry for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDocRecord {
    pub context_id: ContextId,
    pub path: PathBuf,
    pub content_sha256: String,
}

/// Handle to the embedded database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    path: Option<PathBuf>,
    degraded: bool,
}

fn q(e: sqlx::Error) -> StoreError {
    StoreError::Query {
        reason: e.to_string(),
    }
}

impl Store {
    /// Open (or create) the database file.
    ///
    /// WAL is mandatory; the file is integrity-checked first, falling back
    /// to `<path>.backup` when the check fails. After a successful open a
    /// fresh backup copy is written.
    pub async fn open(path: impl AsRef<Path>) -> BatonResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut degraded = false;

        if path.exists() {
            if let Err(reason) = integrity_check(&path).await {
                let backup = backup_path(&path);
                if backup.exists() {
                    warn!(path = %path.display(), %reason, "store corrupt; restoring backup");
                    restore_backup(&path, &backup)?;
                    degraded = true;
                } else {
                    error!(path = %path.display(), %reason, "store corrupt; no backup available");
                    return Err(StoreError::Corrupt {
                        path: path.display().to_string(),
                        reason,
                    }
                    .into());
                }
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        migrations::run(&pool).await?;

        let store = Self {
            pool,
            path: Some(path),
            degraded,
        };

        if degraded {
            store
                .record_incident("fatal-degradation", "opened from known-good backup")
                .await?;
        }
        store.checkpoint_backup().await;

        Ok(store)
    }

    /// Open an in-memory database for tests.
    pub async fn open_in_memory() -> BatonResult<Self> {
        // A memory database lives and dies with its connection; the pool
        // must keep exactly one alive forever.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Open {
                path: ":memory:".to_string(),
                reason: e.to_string(),
            })?;
        migrations::run(&pool).await?;
        Ok(Self {
            pool,
            path: None,
            degraded: false,
        })
    }

    /// Whether this store was opened from a backup after corruption.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Highest applied schema version.
    pub async fn schema_version(&self) -> BatonResult<i64> {
        Ok(migrations::version(&self.pool).await?)
    }

    /// Checkpoint the WAL and refresh the known-good backup copy.
    /// Called after open and by orderly shutdown. Best-effort.
    pub async fn checkpoint_backup(&self) {
        let Some(path) = &self.path else { return };
        if sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .is_err()
        {
            return;
        }
        if let Err(e) = std::fs::copy(path, backup_path(path)) {
            warn!(error = %e, "failed to refresh store backup");
        }
    }

    /// Record an operational incident (corruption, degraded open).
    pub async fn record_incident(&self, kind: &str, detail: &str) -> BatonResult<()> {
        sqlx::query("INSERT INTO store_incidents (kind, detail, occurred_at) VALUES (?, ?, ?)")
            .bind(kind)
            .bind(detail)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(q)?;
        Ok(())
    }

    // ========================================================================
    // CONTEXTS
    // ========================================================================

    /// Insert or update a context row.
    pub async fn upsert_context(&self, context: &Context) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO contexts
                (context_id, scope, goal, parent_id, compression_level,
                 token_budget, tokens_used, over_budget, archived,
                 created_at, last_active_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(context_id) DO UPDATE SET
                scope = excluded.scope,
                goal = excluded.goal,
                compression_level = excluded.compression_level,
                token_budget = excluded.token_budget,
                tokens_used = excluded.tokens_used,
                over_budget = excluded.over_budget,
                archived = excluded.archived,
                last_active_at = excluded.last_active_at
            "#,
        )
        .bind(context.context_id.to_string())
        .bind(context.scope.as_db_str())
        .bind(&context.goal)
        .bind(context.parent_id.map(|id| id.to_string()))
        .bind(context.compression_level.as_db_str())
        .bind(context.token_budget as i64)
        .bind(context.tokens_used as i64)
        .bind(context.over_budget as i64)
        .bind(context.archived as i64)
        .bind(context.created_at.to_rfc3339())
        .bind(context.last_active_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    /// Load one context.
    pub async fn get_context(&self, id: ContextId) -> BatonResult<Context> {
        let row: Option<ContextRow> =
            sqlx::query_as("SELECT * FROM contexts WHERE context_id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(q)?;
        let row = row.ok_or(StoreError::NotFound {
            entity: "context",
            id: id.to_string(),
        })?;
        Ok(row.into_entity()?)
    }

    /// List contexts matching the filter, most recently active first.
    pub async fn list_contexts(&self, filter: &ContextFilter) -> BatonResult<Vec<Context>> {
        let mut sql =
            String::from("SELECT * FROM contexts WHERE parent_id IS NULL");
        if !filter.include_archived {
            sql.push_str(" AND archived = 0");
        }
        if filter.scope.is_some() {
            sql.push_str(" AND scope = ?");
        }
        if filter.compression_level.is_some() {
            sql.push_str(" AND compression_level = ?");
        }
        sql.push_str(" ORDER BY last_active_at DESC");

        let mut query = sqlx::query_as::<_, ContextRow>(&sql);
        if let Some(scope) = filter.scope {
            query = query.bind(scope.as_db_str());
        }
        if let Some(level) = filter.compression_level {
            query = query.bind(level.as_db_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    /// Live (non-archived) tangents of a context, oldest first.
    pub async fn list_live_tangents(&self, parent: ContextId) -> BatonResult<Vec<Context>> {
        let rows: Vec<ContextRow> = sqlx::query_as(
            "SELECT * FROM contexts WHERE parent_id = ? AND archived = 0 ORDER BY created_at ASC",
        )
        .bind(parent.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Append an event; the per-context sequence is allocated inside the
    /// insert transaction, so sequences are strictly monotonic.
    pub async fn append_event(
        &self,
        context_id: ContextId,
        kind: EventKind,
        importance: u8,
        payload: serde_json::Value,
    ) -> BatonResult<ContextEvent> {
        let mut tx = self.pool.begin().await.map_err(q)?;

        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(seq), 0) FROM context_events WHERE context_id = ?",
        )
        .bind(context_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(q)?;

        let event = ContextEvent::new(context_id, row.0 + 1, kind, importance, payload)?;

        sqlx::query(
            r#"
            INSERT INTO context_events
                (event_id, context_id, seq, timestamp, kind, importance, payload, token_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_id.to_string())
        .bind(event.context_id.to_string())
        .bind(event.sequence)
        .bind(event.timestamp.to_rfc3339())
        .bind(event.kind.as_db_str())
        .bind(event.importance as i64)
        .bind(event.payload.to_string())
        .bind(event.token_count as i64)
        .execute(&mut *tx)
        .await
        .map_err(q)?;

        tx.commit().await.map_err(q)?;
        debug!(context = %context_id, seq = event.sequence, kind = %kind, "event appended");
        Ok(event)
    }

    /// Query events for a context in sequence order.
    pub async fn query_events(
        &self,
        context_id: ContextId,
        filter: &EventFilter,
    ) -> BatonResult<Vec<ContextEvent>> {
        let mut sql = String::from("SELECT * FROM context_events WHERE context_id = ?");
        if let Some(kinds) = &filter.kinds {
            if kinds.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(" AND kind IN (");
            sql.push_str(&vec!["?"; kinds.len()].join(", "));
            sql.push(')');
        }
        if filter.min_importance.is_some() {
            sql.push_str(" AND importance >= ?");
        }
        if filter.since_sequence.is_some() {
            sql.push_str(" AND seq > ?");
        }
        sql.push_str(" ORDER BY seq ASC");

        let mut query = sqlx::query_as::<_, EventRow>(&sql).bind(context_id.to_string());
        if let Some(kinds) = &filter.kinds {
            for kind in kinds {
                query = query.bind(kind.as_db_str());
            }
        }
        if let Some(min) = filter.min_importance {
            query = query.bind(min as i64);
        }
        if let Some(since) = filter.since_sequence {
            query = query.bind(since);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    /// Latest allocated sequence for a context (0 when none).
    pub async fn latest_sequence(&self, context_id: ContextId) -> BatonResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(seq), 0) FROM context_events WHERE context_id = ?",
        )
        .bind(context_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(q)?;
        Ok(row.0)
    }

    // ========================================================================
    // AGENTS
    // ========================================================================

    /// Insert or update an agent instance.
    pub async fn upsert_agent(&self, agent: &AgentInstance) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO agents
                (agent_id, role, workflow_id, context_id, state, progress,
                 current_step, step_index, result, error, config_snapshot,
                 branch, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(agent_id) DO UPDATE SET
                state = excluded.state,
                progress = excluded.progress,
                current_step = excluded.current_step,
                step_index = excluded.step_index,
                result = excluded.result,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(agent.agent_id.to_string())
        .bind(agent.role.as_db_str())
        .bind(agent.workflow_id.to_string())
        .bind(agent.context_id.to_string())
        .bind(agent.state.as_db_str())
        .bind(agent.progress as f64)
        .bind(&agent.current_step)
        .bind(agent.step_index as i64)
        .bind(agent.result.as_ref().map(|v| v.to_string()))
        .bind(
            agent
                .error
                .as_ref()
                .and_then(|e| serde_json::to_string(e).ok()),
        )
        .bind(agent.config_snapshot.to_string())
        .bind(&agent.branch)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    /// Load one agent instance.
    pub async fn get_agent(&self, id: AgentInstanceId) -> BatonResult<AgentInstance> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE agent_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(q)?;
        let row = row.ok_or(StoreError::NotFound {
            entity: "agent",
            id: id.to_string(),
        })?;
        Ok(row.into_entity()?)
    }

    /// All agents of a workflow session, creation order.
    pub async fn list_agents_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> BatonResult<Vec<AgentInstance>> {
        let rows: Vec<AgentRow> =
            sqlx::query_as("SELECT * FROM agents WHERE workflow_id = ? ORDER BY created_at ASC")
                .bind(workflow_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    // ========================================================================
    // WORKFLOWS
    // ========================================================================

    /// Insert or update a workflow session.
    pub async fn upsert_workflow(&self, session: &WorkflowSession) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (workflow_id, context_id, kind, status, started_at, ended_at,
                 agent_ids, handoff)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(workflow_id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                agent_ids = excluded.agent_ids,
                handoff = excluded.handoff
            "#,
        )
        .bind(session.workflow_id.to_string())
        .bind(session.context_id.to_string())
        .bind(session.kind.as_db_str())
        .bind(session.status.as_db_str())
        .bind(session.started_at.to_rfc3339())
        .bind(session.ended_at.map(|ts| ts.to_rfc3339()))
        .bind(serde_json::to_string(&session.agent_ids).unwrap_or_else(|_| "[]".into()))
        .bind(&session.handoff)
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    /// Load one workflow session.
    pub async fn get_workflow(&self, id: WorkflowId) -> BatonResult<WorkflowSession> {
        let row: Option<WorkflowRow> =
            sqlx::query_as("SELECT * FROM workflows WHERE workflow_id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(q)?;
        let row = row.ok_or(StoreError::NotFound {
            entity: "workflow",
            id: id.to_string(),
        })?;
        Ok(row.into_entity()?)
    }

    /// Workflow sessions for a context, newest first.
    pub async fn list_workflows_for_context(
        &self,
        context_id: ContextId,
    ) -> BatonResult<Vec<WorkflowSession>> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            "SELECT * FROM workflows WHERE context_id = ? ORDER BY started_at DESC",
        )
        .bind(context_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    /// Number of workflow sessions currently in the running state.
    pub async fn count_running_workflows(&self) -> BatonResult<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM workflows WHERE status = 'Running'")
                .fetch_one(&self.pool)
                .await
                .map_err(q)?;
        Ok(row.0)
    }

    /// Commit a workflow's terminal state and its final agent rows in one
    /// transaction.
    pub async fn commit_workflow_terminal(
        &self,
        session: &WorkflowSession,
        agents: &[AgentInstance],
    ) -> BatonResult<()> {
        let mut tx = self.pool.begin().await.map_err(q)?;
        sqlx::query(
            "UPDATE workflows SET status = ?, ended_at = ?, agent_ids = ?, handoff = ? WHERE workflow_id = ?",
        )
        .bind(session.status.as_db_str())
        .bind(session.ended_at.map(|ts| ts.to_rfc3339()))
        .bind(serde_json::to_string(&session.agent_ids).unwrap_or_else(|_| "[]".into()))
        .bind(&session.handoff)
        .bind(session.workflow_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(q)?;

        for agent in agents {
            sqlx::query(
                "UPDATE agents SET state = ?, progress = ?, result = ?, error = ?, updated_at = ? WHERE agent_id = ?",
            )
            .bind(agent.state.as_db_str())
            .bind(agent.progress as f64)
            .bind(agent.result.as_ref().map(|v| v.to_string()))
            .bind(
                agent
                    .error
                    .as_ref()
                    .and_then(|e| serde_json::to_string(e).ok()),
            )
            .bind(agent.updated_at.to_rfc3339())
            .bind(agent.agent_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(q)?;
        }

        tx.commit().await.map_err(q)?;
        info!(workflow = %session.workflow_id, status = %session.status, "workflow committed");
        Ok(())
    }

    // ========================================================================
    // RESOURCE LOCKS
    // ========================================================================

    /// Acquire (or re-acquire) a named advisory lock with a TTL.
    ///
    /// Expired locks are reclaimed; a live lock held by another holder
    /// fails with `LockHeld`.
    pub async fn acquire_resource_lock(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> BatonResult<()> {
        let now = Utc::now();
        let expires = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        let result = sqlx::query(
            r#"
            INSERT INTO locks (name, holder, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE locks.holder = excluded.holder
               OR locks.expires_at <= excluded.acquired_at
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(now.to_rfc3339())
        .bind(expires.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;

        if result.rows_affected() == 0 {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT holder FROM locks WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(q)?;
            return Err(StoreError::LockHeld {
                name: name.to_string(),
                holder: row.map(|(h,)| h).unwrap_or_default(),
            }
            .into());
        }
        Ok(())
    }

    /// Release a lock held by `holder`.
    pub async fn release_resource_lock(&self, name: &str, holder: &str) -> BatonResult<()> {
        let result = sqlx::query("DELETE FROM locks WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(q)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::LockNotHeld {
                name: name.to_string(),
                holder: holder.to_string(),
            }
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // LESSONS AND VERIFICATIONS
    // ========================================================================

    /// Record a lesson. Lessons are immutable once recorded.
    pub async fn record_lesson(&self, lesson: &Lesson) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lessons
                (lesson_id, kind, agent_context, description, prevention_rule,
                 verification_probe, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lesson.lesson_id.to_string())
        .bind(lesson.kind.as_db_str())
        .bind(&lesson.agent_context)
        .bind(&lesson.description)
        .bind(&lesson.prevention_rule)
        .bind(&lesson.verification_probe)
        .bind(lesson.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    /// Lessons tagged for the given agent context, oldest first.
    pub async fn list_lessons(&self, agent_context: &str) -> BatonResult<Vec<Lesson>> {
        let rows: Vec<LessonRow> = sqlx::query_as(
            "SELECT * FROM lessons WHERE agent_context = ? ORDER BY created_at ASC",
        )
        .bind(agent_context)
        .fetch_all(&self.pool)
        .await
        .map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    /// Total number of recorded lessons.
    pub async fn count_lessons(&self) -> BatonResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lessons")
            .fetch_one(&self.pool)
            .await
            .map_err(q)?;
        Ok(row.0)
    }

    /// Record one probe execution result.
    pub async fn record_verification(&self, record: &VerificationRecord) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verifications
                (verification_id, task_id, claimed, verified, probe_command,
                 probe_output, discrepancy, agent_id, workflow_id, verified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.verification_id.to_string())
        .bind(&record.task_id)
        .bind(record.claimed.as_db_str())
        .bind(record.verified.as_db_str())
        .bind(&record.probe_command)
        .bind(&record.probe_output)
        .bind(record.discrepancy as i64)
        .bind(record.agent.map(|id| id.to_string()))
        .bind(record.workflow.map(|id| id.to_string()))
        .bind(record.verified_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    /// Verification history for a task, oldest first.
    pub async fn list_verifications(&self, task_id: &str) -> BatonResult<Vec<VerificationRecord>> {
        let rows: Vec<VerificationRow> = sqlx::query_as(
            "SELECT * FROM verifications WHERE task_id = ? ORDER BY verified_at ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    // ========================================================================
    // EXTERNAL RESOURCES AND CONFLICTS
    // ========================================================================

    /// Record an external resource soft-owned by a context.
    pub async fn record_external_resource(&self, resource: &ExternalResource) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO external_resources
                (resource_id, context_id, system, kind, external_id, url, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(resource.resource_id.to_string())
        .bind(resource.context_id.to_string())
        .bind(resource.system.as_db_str())
        .bind(resource.kind.as_db_str())
        .bind(&resource.external_id)
        .bind(&resource.url)
        .bind(resource.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    /// Resources recorded for a context, creation order.
    pub async fn list_external_resources(
        &self,
        context_id: ContextId,
    ) -> BatonResult<Vec<ExternalResource>> {
        let rows: Vec<ResourceRow> = sqlx::query_as(
            "SELECT * FROM external_resources WHERE context_id = ? ORDER BY created_at ASC",
        )
        .bind(context_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    /// Record a detected cross-agent conflict.
    pub async fn record_conflict(&self, conflict: &ConflictRecord) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conflicts
                (conflict_id, workflow_id, kind, first_branch, second_branch,
                 subject, detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conflict.conflict_id.to_string())
        .bind(conflict.workflow_id.to_string())
        .bind(conflict.kind.as_db_str())
        .bind(&conflict.first_branch)
        .bind(&conflict.second_branch)
        .bind(&conflict.subject)
        .bind(conflict.detected_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    /// Conflicts recorded for a workflow session.
    pub async fn list_conflicts(&self, workflow_id: WorkflowId) -> BatonResult<Vec<ConflictRecord>> {
        let rows: Vec<ConflictRow> = sqlx::query_as(
            "SELECT * FROM conflicts WHERE workflow_id = ? ORDER BY detected_at ASC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(q)?;
        rows.into_iter()
            .map(|r| r.into_entity().map_err(Into::into))
            .collect()
    }

    // ========================================================================
    // IDENTITY DOCUMENT INDEX AND ARCHIVE INDEX
    // ========================================================================

    /// Record (or refresh) the identity-document index entry.
    pub async fn record_identity_doc(
        &self,
        context_id: ContextId,
        path: &Path,
        content_sha256: &str,
    ) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO identity_docs (context_id, path, content_sha256, written_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(context_id) DO UPDATE SET
                path = excluded.path,
                content_sha256 = excluded.content_sha256,
                written_at = excluded.written_at
            "#,
        )
        .bind(context_id.to_string())
        .bind(path.display().to_string())
        .bind(content_sha256)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    /// Identity-document index entry for a context, if any.
    pub async fn get_identity_doc(
        &self,
        context_id: ContextId,
    ) -> BatonResult<Option<IdentityDocRecord>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT path, content_sha256 FROM identity_docs WHERE context_id = ?",
        )
        .bind(context_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(q)?;
        Ok(row.map(|(path, content_sha256)| IdentityDocRecord {
            context_id,
            path: PathBuf::from(path),
            content_sha256,
        }))
    }

    /// Maintain the archive index for a context.
    pub async fn upsert_archive_index(
        &self,
        context_id: ContextId,
        level: CompressionLevel,
        last_active_at: Timestamp,
        summary_tokens: i32,
    ) -> BatonResult<()> {
        sqlx::query(
            r#"
            INSERT INTO archive_index
                (context_id, compression_level, last_active_at, summary_tokens, archived_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(context_id) DO UPDATE SET
                compression_level = excluded.compression_level,
                last_active_at = excluded.last_active_at,
                summary_tokens = excluded.summary_tokens,
                archived_at = excluded.archived_at
            "#,
        )
        .bind(context_id.to_string())
        .bind(level.as_db_str())
        .bind(last_active_at.to_rfc3339())
        .bind(summary_tokens as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }
}

// ============================================================================
// CORRUPTION RECOVERY HELPERS
// ============================================================================

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".backup");
    PathBuf::from(backup)
}

/// Run `PRAGMA integrity_check` over a standalone connection. An error
/// string or a failed WAL replay both count as corruption.
async fn integrity_check(path: &Path) -> Result<(), String> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal);
    let mut conn = match options.connect().await {
        Ok(conn) => conn,
        Err(e) => return Err(format!("open failed: {e}")),
    };
    let row: Result<(String,), _> = sqlx::query_as("PRAGMA integrity_check")
        .fetch_one(&mut conn)
        .await;
    match row {
        Ok((status,)) if status == "ok" => Ok(()),
        Ok((status,)) => Err(status),
        Err(e) => Err(e.to_string()),
    }
}

/// Replace the corrupt file with the backup, discarding stale WAL state.
fn restore_backup(path: &Path, backup: &Path) -> Result<(), StoreError> {
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(sidecar));
    }
    std::fs::copy(backup, path).map_err(|e| StoreError::Open {
        path: path.display().to_string(),
        reason: format!("backup restore failed: {e}"),
    })?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> Store {
        Store::open_in_memory().await.expect("in-memory store")
    }

    fn context() -> Context {
        Context::new(ContextScope::Session, "fix login bug", 8_000)
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let store = store().await;
        assert_eq!(store.schema_version().await.unwrap(), 1);
        assert!(store
            .list_contexts(&ContextFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_context_roundtrip() {
        let store = store().await;
        let mut context = context();
        store.upsert_context(&context).await.unwrap();

        let loaded = store.get_context(context.context_id).await.unwrap();
        assert_eq!(loaded.goal, "fix login bug");
        assert_eq!(loaded.scope, ContextScope::Session);

        context.tokens_used = 1234;
        context.over_budget = true;
        store.upsert_context(&context).await.unwrap();
        let loaded = store.get_context(context.context_id).await.unwrap();
        assert_eq!(loaded.tokens_used, 1234);
        assert!(loaded.over_budget);
    }

    #[tokio::test]
    async fn test_get_missing_context() {
        let store = store().await;
        let err = store.get_context(ContextId::now_v7()).await.unwrap_err();
        assert!(matches!(
            err,
            BatonError::Store(StoreError::NotFound { entity: "context", .. })
        ));
    }

    #[tokio::test]
    async fn test_event_sequences_are_monotonic() {
        let store = store().await;
        let context = context();
        store.upsert_context(&context).await.unwrap();

        for i in 0..10 {
            let event = store
                .append_event(
                    context.context_id,
                    EventKind::Message,
                    3,
                    json!({"n": i}),
                )
                .await
                .unwrap();
            assert_eq!(event.sequence, i + 1);
        }
        assert_eq!(store.latest_sequence(context.context_id).await.unwrap(), 10);

        let events = store
            .query_events(context.context_id, &EventFilter::default())
            .await
            .unwrap();
        for pair in events.windows(2) {
            assert!(pair[0].sequence < pair[1].sequence);
        }
    }

    #[tokio::test]
    async fn test_sequences_are_per_context() {
        let store = store().await;
        let a = context();
        let b = context();
        store.upsert_context(&a).await.unwrap();
        store.upsert_context(&b).await.unwrap();

        store
            .append_event(a.context_id, EventKind::Message, 1, json!({}))
            .await
            .unwrap();
        let first_b = store
            .append_event(b.context_id, EventKind::Message, 1, json!({}))
            .await
            .unwrap();
        assert_eq!(first_b.sequence, 1);
    }

    #[tokio::test]
    async fn test_event_filters() {
        let store = store().await;
        let context = context();
        store.upsert_context(&context).await.unwrap();

        store
            .append_event(context.context_id, EventKind::Message, 2, json!({}))
            .await
            .unwrap();
        store
            .append_event(context.context_id, EventKind::Milestone, 9, json!({}))
            .await
            .unwrap();
        store
            .append_event(context.context_id, EventKind::Error, 6, json!({}))
            .await
            .unwrap();

        let milestones = store
            .query_events(
                context.context_id,
                &EventFilter {
                    kinds: Some(vec![EventKind::Milestone]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(milestones.len(), 1);

        let important = store
            .query_events(
                context.context_id,
                &EventFilter {
                    min_importance: Some(6),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(important.len(), 2);

        let since = store
            .query_events(
                context.context_id,
                &EventFilter {
                    since_sequence: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].sequence, 3);
    }

    #[tokio::test]
    async fn test_importance_out_of_range_rejected() {
        let store = store().await;
        let context = context();
        store.upsert_context(&context).await.unwrap();
        let err = store
            .append_event(context.context_id, EventKind::Message, 11, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BatonError::Context(_)));
    }

    #[tokio::test]
    async fn test_agent_roundtrip() {
        let store = store().await;
        let context = context();
        store.upsert_context(&context).await.unwrap();

        let mut agent = AgentInstance::new(
            AgentRoleKind::Security,
            WorkflowId::now_v7(),
            context.context_id,
        );
        store.upsert_agent(&agent).await.unwrap();

        agent.signal(AgentSignal::Start).unwrap();
        agent.record_step("scan-secrets", 2, 33.0);
        store.upsert_agent(&agent).await.unwrap();

        let loaded = store.get_agent(agent.agent_id).await.unwrap();
        assert_eq!(loaded.state, AgentState::Running);
        assert_eq!(loaded.current_step.as_deref(), Some("scan-secrets"));
        assert_eq!(loaded.step_index, 2);
    }

    #[tokio::test]
    async fn test_workflow_roundtrip_and_terminal_commit() {
        let store = store().await;
        let context = context();
        store.upsert_context(&context).await.unwrap();

        let mut session = WorkflowSession::new(context.context_id, WorkflowKind::Release);
        let mut agent = AgentInstance::new(
            AgentRoleKind::Code,
            session.workflow_id,
            context.context_id,
        );
        session.push_agent(agent.agent_id).unwrap();
        store.upsert_workflow(&session).await.unwrap();
        store.upsert_agent(&agent).await.unwrap();

        agent.signal(AgentSignal::Start).unwrap();
        agent.signal(AgentSignal::Complete).unwrap();
        agent.finish(json!({"ok": true}));
        session.finish(WorkflowStatus::Completed);
        store
            .commit_workflow_terminal(&session, &[agent.clone()])
            .await
            .unwrap();

        let loaded = store.get_workflow(session.workflow_id).await.unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);
        assert_eq!(loaded.agent_ids, vec![agent.agent_id]);

        let agents = store
            .list_agents_for_workflow(session.workflow_id)
            .await
            .unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].state, AgentState::Completed);
    }

    #[tokio::test]
    async fn test_lock_contention_and_ttl() {
        let store = store().await;

        store
            .acquire_resource_lock("branch/main", "wf-1", Duration::from_secs(60))
            .await
            .unwrap();

        // Another holder is rejected while the lock is live
        let err = store
            .acquire_resource_lock("branch/main", "wf-2", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BatonError::Store(StoreError::LockHeld { .. })
        ));

        // Same holder re-acquires (TTL extension)
        store
            .acquire_resource_lock("branch/main", "wf-1", Duration::from_secs(120))
            .await
            .unwrap();

        // Expired locks are reclaimed by anyone
        store
            .acquire_resource_lock("branch/dev", "wf-1", Duration::from_secs(0))
            .await
            .unwrap();
        store
            .acquire_resource_lock("branch/dev", "wf-2", Duration::from_secs(60))
            .await
            .unwrap();

        store
            .release_resource_lock("branch/main", "wf-1")
            .await
            .unwrap();
        let err = store
            .release_resource_lock("branch/main", "wf-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BatonError::Store(StoreError::LockNotHeld { .. })
        ));
    }

    #[tokio::test]
    async fn test_lesson_and_verification_roundtrip() {
        let store = store().await;

        let lesson = Lesson::new(
            LessonKind::Mistake,
            "Security",
            "claimed scan finished before summarize step",
            "re-run probe before claiming completion",
        )
        .with_probe("exit 1");
        store.record_lesson(&lesson).await.unwrap();

        let lessons = store.list_lessons("Security").await.unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].verification_probe.as_deref(), Some("exit 1"));
        assert_eq!(store.count_lessons().await.unwrap(), 1);

        let record = VerificationRecord::new(
            "task-x",
            TaskStatus::Completed,
            TaskStatus::Failed,
            "exit 1",
            "",
        );
        store.record_verification(&record).await.unwrap();
        let records = store.list_verifications("task-x").await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].discrepancy);
    }

    #[tokio::test]
    async fn test_resources_and_conflicts() {
        let store = store().await;
        let context = context();
        store.upsert_context(&context).await.unwrap();

        let resource = ExternalResource::new(
            context.context_id,
            ExternalSystem::SourceControl,
            ResourceKind::Branch,
            "refs/heads/session-x",
            "https://example.test/branch",
        );
        store.record_external_resource(&resource).await.unwrap();
        assert_eq!(
            store
                .list_external_resources(context.context_id)
                .await
                .unwrap()
                .len(),
            1
        );

        let workflow_id = WorkflowId::now_v7();
        let conflict = ConflictRecord::new(
            workflow_id,
            ConflictKind::SameFile,
            "branch-a",
            "branch-b",
            "src/auth.rs",
        );
        store.record_conflict(&conflict).await.unwrap();
        let conflicts = store.list_conflicts(workflow_id).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].subject, "src/auth.rs");
    }

    #[tokio::test]
    async fn test_identity_doc_index() {
        let store = store().await;
        let context = context();
        store.upsert_context(&context).await.unwrap();

        store
            .record_identity_doc(context.context_id, Path::new("/tmp/p.md"), "abc123")
            .await
            .unwrap();
        let record = store
            .get_identity_doc(context.context_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.content_sha256, "abc123");
        assert!(store
            .get_identity_doc(ContextId::now_v7())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_on_disk_open_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("baton.db");

        let context = context();
        {
            let store = Store::open(&db).await.unwrap();
            store.upsert_context(&context).await.unwrap();
            store
                .append_event(context.context_id, EventKind::Milestone, 9, json!({}))
                .await
                .unwrap();
        }

        // Reopen: state survives, backup exists
        let store = Store::open(&db).await.unwrap();
        assert!(!store.is_degraded());
        let loaded = store.get_context(context.context_id).await.unwrap();
        assert_eq!(loaded.goal, context.goal);
        assert!(backup_path(&db).exists());
    }

    #[tokio::test]
    async fn test_corrupt_open_restores_backup() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("baton.db");

        let context = context();
        {
            let store = Store::open(&db).await.unwrap();
            store.upsert_context(&context).await.unwrap();
            store.checkpoint_backup().await;
        }
        // The backup holds the context; now clobber the live file
        std::fs::write(&db, b"definitely not a sqlite database").unwrap();

        let store = Store::open(&db).await.unwrap();
        assert!(store.is_degraded());
        let loaded = store.get_context(context.context_id).await.unwrap();
        assert_eq!(loaded.goal, context.goal);
    }
}
