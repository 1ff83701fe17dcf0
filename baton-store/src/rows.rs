//! Persistent row shapes and their conversions to core entities.
//!
//! Columns are plain TEXT/INTEGER/REAL; enums round-trip through their
//! `as_db_str`/`from_db_str` forms and timestamps through RFC 3339, so the
//! database stays inspectable with the sqlite3 shell.

use baton_core::*;
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// Map any conversion failure to a query-shaped store error.
pub(crate) fn bad_column(column: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Query {
        reason: format!("column {column}: {err}"),
    }
}

pub(crate) fn parse_ts(column: &str, value: &str) -> Result<Timestamp, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| bad_column(column, e))
}

pub(crate) fn parse_id<T: EntityIdType>(column: &str, value: &str) -> Result<T, StoreError> {
    T::from_str(value).map_err(|_| bad_column(column, format!("invalid uuid '{value}'")))
}

pub(crate) fn parse_json(column: &str, value: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(value).map_err(|e| bad_column(column, e))
}

// ============================================================================
// ROW STRUCTS
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ContextRow {
    pub context_id: String,
    pub scope: String,
    pub goal: String,
    pub parent_id: Option<String>,
    pub compression_level: String,
    pub token_budget: i64,
    pub tokens_used: i64,
    pub over_budget: i64,
    pub archived: i64,
    pub created_at: String,
    pub last_active_at: String,
}

impl ContextRow {
    pub fn into_entity(self) -> Result<Context, StoreError> {
        Ok(Context {
            context_id: parse_id("context_id", &self.context_id)?,
            scope: ContextScope::from_db_str(&self.scope)
                .map_err(|e| bad_column("scope", e))?,
            goal: self.goal,
            parent_id: self
                .parent_id
                .as_deref()
                .map(|id| parse_id("parent_id", id))
                .transpose()?,
            compression_level: CompressionLevel::from_db_str(&self.compression_level)
                .map_err(|e| bad_column("compression_level", e))?,
            token_budget: self.token_budget as i32,
            tokens_used: self.tokens_used as i32,
            over_budget: self.over_budget != 0,
            archived: self.archived != 0,
            created_at: parse_ts("created_at", &self.created_at)?,
            last_active_at: parse_ts("last_active_at", &self.last_active_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EventRow {
    pub event_id: String,
    pub context_id: String,
    pub seq: i64,
    pub timestamp: String,
    pub kind: String,
    pub importance: i64,
    pub payload: String,
    pub token_count: i64,
}

impl EventRow {
    pub fn into_entity(self) -> Result<ContextEvent, StoreError> {
        Ok(ContextEvent {
            event_id: parse_id("event_id", &self.event_id)?,
            context_id: parse_id("context_id", &self.context_id)?,
            sequence: self.seq,
            timestamp: parse_ts("timestamp", &self.timestamp)?,
            kind: EventKind::from_db_str(&self.kind).map_err(|e| bad_column("kind", e))?,
            importance: self.importance as u8,
            payload: parse_json("payload", &self.payload)?,
            token_count: self.token_count as i32,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AgentRow {
    pub agent_id: String,
    pub role: String,
    pub workflow_id: String,
    pub context_id: String,
    pub state: String,
    pub progress: f64,
    pub current_step: Option<String>,
    pub step_index: i64,
    pub result: Option<String>,
    pub error: Option<String>,
    pub config_snapshot: String,
    pub branch: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AgentRow {
    pub fn into_entity(self) -> Result<AgentInstance, StoreError> {
        Ok(AgentInstance {
            agent_id: parse_id("agent_id", &self.agent_id)?,
            role: AgentRoleKind::from_db_str(&self.role).map_err(|e| bad_column("role", e))?,
            workflow_id: parse_id("workflow_id", &self.workflow_id)?,
            context_id: parse_id("context_id", &self.context_id)?,
            state: AgentState::from_db_str(&self.state).map_err(|e| bad_column("state", e))?,
            progress: self.progress as f32,
            current_step: self.current_step,
            step_index: self.step_index as i32,
            result: self
                .result
                .as_deref()
                .map(|json| parse_json("result", json))
                .transpose()?,
            error: self
                .error
                .as_deref()
                .map(|json| {
                    serde_json::from_str::<AgentFailure>(json)
                        .map_err(|e| bad_column("error", e))
                })
                .transpose()?,
            config_snapshot: parse_json("config_snapshot", &self.config_snapshot)?,
            branch: self.branch,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct WorkflowRow {
    pub workflow_id: String,
    pub context_id: String,
    pub kind: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub agent_ids: String,
    pub handoff: String,
}

impl WorkflowRow {
    pub fn into_entity(self) -> Result<WorkflowSession, StoreError> {
        let agent_ids: Vec<AgentInstanceId> = serde_json::from_str(&self.agent_ids)
            .map_err(|e| bad_column("agent_ids", e))?;
        Ok(WorkflowSession {
            workflow_id: parse_id("workflow_id", &self.workflow_id)?,
            context_id: parse_id("context_id", &self.context_id)?,
            kind: WorkflowKind::from_db_str(&self.kind).map_err(|e| bad_column("kind", e))?,
            status: WorkflowStatus::from_db_str(&self.status)
                .map_err(|e| bad_column("status", e))?,
            started_at: parse_ts("started_at", &self.started_at)?,
            ended_at: self
                .ended_at
                .as_deref()
                .map(|ts| parse_ts("ended_at", ts))
                .transpose()?,
            agent_ids,
            handoff: self.handoff,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct LessonRow {
    pub lesson_id: String,
    pub kind: String,
    pub agent_context: String,
    pub description: String,
    pub prevention_rule: String,
    pub verification_probe: Option<String>,
    pub created_at: String,
}

impl LessonRow {
    pub fn into_entity(self) -> Result<Lesson, StoreError> {
        Ok(Lesson {
            lesson_id: parse_id("lesson_id", &self.lesson_id)?,
            kind: LessonKind::from_db_str(&self.kind).map_err(|e| bad_column("kind", e))?,
            agent_context: self.agent_context,
            description: self.description,
            prevention_rule: self.prevention_rule,
            verification_probe: self.verification_probe,
            created_at: parse_ts("created_at", &self.created_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct VerificationRow {
    pub verification_id: String,
    pub task_id: String,
    pub claimed: String,
    pub verified: String,
    pub probe_command: String,
    pub probe_output: String,
    pub discrepancy: i64,
    pub agent_id: Option<String>,
    pub workflow_id: Option<String>,
    pub verified_at: String,
}

impl VerificationRow {
    pub fn into_entity(self) -> Result<VerificationRecord, StoreError> {
        Ok(VerificationRecord {
            verification_id: parse_id("verification_id", &self.verification_id)?,
            task_id: self.task_id,
            claimed: TaskStatus::from_db_str(&self.claimed)
                .map_err(|e| bad_column("claimed", e))?,
            verified: TaskStatus::from_db_str(&self.verified)
                .map_err(|e| bad_column("verified", e))?,
            probe_command: self.probe_command,
            probe_output: self.probe_output,
            discrepancy: self.discrepancy != 0,
            agent: self
                .agent_id
                .as_deref()
                .map(|id| parse_id("agent_id", id))
                .transpose()?,
            workflow: self
                .workflow_id
                .as_deref()
                .map(|id| parse_id("workflow_id", id))
                .transpose()?,
            verified_at: parse_ts("verified_at", &self.verified_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ResourceRow {
    pub resource_id: String,
    pub context_id: String,
    pub system: String,
    pub kind: String,
    pub external_id: String,
    pub url: String,
    pub created_at: String,
}

impl ResourceRow {
    pub fn into_entity(self) -> Result<ExternalResource, StoreError> {
        Ok(ExternalResource {
            resource_id: parse_id("resource_id", &self.resource_id)?,
            context_id: parse_id("context_id", &self.context_id)?,
            system: ExternalSystem::from_db_str(&self.system)
                .map_err(|e| bad_column("system", e))?,
            kind: ResourceKind::from_db_str(&self.kind).map_err(|e| bad_column("kind", e))?,
            external_id: self.external_id,
            url: self.url,
            created_at: parse_ts("created_at", &self.created_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ConflictRow {
    pub conflict_id: String,
    pub workflow_id: String,
    pub kind: String,
    pub first_branch: String,
    pub second_branch: String,
    pub subject: String,
    pub detected_at: String,
}

impl ConflictRow {
    pub fn into_entity(self) -> Result<ConflictRecord, StoreError> {
        Ok(ConflictRecord {
            conflict_id: parse_id("conflict_id", &self.conflict_id)?,
            workflow_id: parse_id("workflow_id", &self.workflow_id)?,
            kind: ConflictKind::from_db_str(&self.kind).map_err(|e| bad_column("kind", e))?,
            first_branch: self.first_branch,
            second_branch: self.second_branch,
            subject: self.subject,
            detected_at: parse_ts("detected_at", &self.detected_at)?,
        })
    }
}
