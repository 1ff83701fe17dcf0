//! Core entity structures.
//!
//! Relationships between subsystems are expressed through entity IDs,
//! never through shared pointers; the store owns the persistent copy of
//! everything here.

use crate::{
    estimate_tokens, AgentFailure, AgentInstanceId, AgentRoleKind, AgentSignal, AgentState,
    CompressionLevel, ConflictId, ConflictKind, ContextError, ContextId, ContextScope,
    EntityIdType, EventId, EventKind, ExternalSystem, LessonId, LessonKind, ResourceId,
    ResourceKind, StateViolation, TaskStatus, Timestamp, VerificationId, WorkflowId, WorkflowKind,
    WorkflowStatus,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Events at or above this importance survive every compression verbatim.
pub const PRESERVE_IMPORTANCE: u8 = 8;

/// Hard cap on the number of steps any role may declare.
pub const MAX_STEPS: usize = 8;

/// Importance values live in 0..=10.
pub const MAX_IMPORTANCE: u8 = 10;

// ============================================================================
// CONTEXT
// ============================================================================

/// The primary unit of persistent work: a session or a project.
///
/// Contexts are created on demand, preserved on save, archived on age-out
/// and restored on resume. There is no hard destruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub context_id: ContextId,
    pub scope: ContextScope,
    /// Free-text goal or description
    pub goal: String,
    /// Parent context, set only for tangents
    pub parent_id: Option<ContextId>,
    pub compression_level: CompressionLevel,
    pub token_budget: i32,
    pub tokens_used: i32,
    /// Set when compression could not bring usage under budget
    pub over_budget: bool,
    /// Set when a tangent has been popped back into its parent
    pub archived: bool,
    pub created_at: Timestamp,
    pub last_active_at: Timestamp,
}

impl Context {
    /// Create a new root context.
    pub fn new(scope: ContextScope, goal: impl Into<String>, token_budget: i32) -> Self {
        let now = Utc::now();
        Self {
            context_id: ContextId::now_v7(),
            scope,
            goal: goal.into(),
            parent_id: None,
            compression_level: CompressionLevel::Active,
            token_budget,
            tokens_used: 0,
            over_budget: false,
            archived: false,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Create a tangent child of `parent`.
    pub fn tangent(parent: ContextId, goal: impl Into<String>, token_budget: i32) -> Self {
        let mut context = Self::new(ContextScope::Session, goal, token_budget);
        context.parent_id = Some(parent);
        context
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
        self.compression_level = CompressionLevel::Active;
    }

    /// Remaining token budget.
    pub fn remaining_tokens(&self) -> i32 {
        self.token_budget - self.tokens_used
    }

    /// Upgrade a session to a project. Irreversible; rejects everything
    /// except session -> project.
    pub fn upgrade(&mut self, to: ContextScope, new_budget: i32) -> Result<(), ContextError> {
        if !self.scope.can_upgrade_to(to) {
            return Err(ContextError::ScopeDowngrade {
                from: self.scope,
                to,
            });
        }
        self.scope = to;
        self.token_budget = new_budget;
        self.touch();
        Ok(())
    }
}

// ============================================================================
// CONTEXT EVENT
// ============================================================================

/// Append-only record attached to a context. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEvent {
    pub event_id: EventId,
    pub context_id: ContextId,
    /// Strictly increasing per context
    pub sequence: i64,
    pub timestamp: Timestamp,
    pub kind: EventKind,
    /// 0..=10; >= PRESERVE_IMPORTANCE is exempt from compression drop
    pub importance: u8,
    /// Opaque structured data
    pub payload: serde_json::Value,
    pub token_count: i32,
}

impl ContextEvent {
    /// Create a new event. The sequence is assigned by the store; callers
    /// building events ahead of persistence pass the allocated value.
    pub fn new(
        context_id: ContextId,
        sequence: i64,
        kind: EventKind,
        importance: u8,
        payload: serde_json::Value,
    ) -> Result<Self, ContextError> {
        if importance > MAX_IMPORTANCE {
            return Err(ContextError::ImportanceOutOfRange(importance));
        }
        let token_count = estimate_tokens(&payload.to_string());
        Ok(Self {
            event_id: EventId::now_v7(),
            context_id,
            sequence,
            timestamp: Utc::now(),
            kind,
            importance,
            payload,
            token_count,
        })
    }

    /// Whether this event is exempt from compression drop.
    pub fn is_preserved(&self) -> bool {
        self.importance >= PRESERVE_IMPORTANCE
    }
}

// ============================================================================
// AGENT INSTANCE
// ============================================================================

/// One execution of one role under a workflow session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub agent_id: AgentInstanceId,
    pub role: AgentRoleKind,
    pub workflow_id: WorkflowId,
    pub context_id: ContextId,
    pub state: AgentState,
    /// 0.0..=100.0, monotonically non-decreasing until terminal
    pub progress: f32,
    pub current_step: Option<String>,
    pub step_index: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<AgentFailure>,
    /// Configuration the agent was constructed with, for replay
    pub config_snapshot: serde_json::Value,
    /// Branch tag for branch-scoped parallel sets
    pub branch: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AgentInstance {
    /// Create a new idle instance.
    pub fn new(role: AgentRoleKind, workflow_id: WorkflowId, context_id: ContextId) -> Self {
        let now = Utc::now();
        Self {
            agent_id: AgentInstanceId::now_v7(),
            role,
            workflow_id,
            context_id,
            state: AgentState::Idle,
            progress: 0.0,
            current_step: None,
            step_index: 0,
            result: None,
            error: None,
            config_snapshot: serde_json::Value::Null,
            branch: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tag this instance with a branch name (parallel branch workflows).
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Snapshot the configuration used to build this instance.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config_snapshot = config;
        self
    }

    /// Drive the state machine. Rejections are state violations.
    pub fn signal(&mut self, signal: AgentSignal) -> Result<(), StateViolation> {
        self.state = self.state.apply(signal)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record entry into a step. Progress never decreases.
    pub fn record_step(&mut self, name: &str, index: i32, progress: f32) {
        self.current_step = Some(name.to_string());
        self.step_index = index;
        if progress > self.progress {
            self.progress = progress.min(100.0);
        }
        self.updated_at = Utc::now();
    }

    /// Store the final result payload.
    pub fn finish(&mut self, result: serde_json::Value) {
        self.result = Some(result);
        self.progress = 100.0;
        self.updated_at = Utc::now();
    }

    /// Store the failure payload.
    pub fn fail_with(&mut self, failure: AgentFailure) {
        self.error = Some(failure);
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// WORKFLOW SESSION
// ============================================================================

/// A named execution of a workflow type against a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub workflow_id: WorkflowId,
    pub context_id: ContextId,
    pub kind: WorkflowKind,
    pub status: WorkflowStatus,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    /// Ordered agent instances; frozen once the workflow is terminal
    pub agent_ids: Vec<AgentInstanceId>,
    /// Accumulated handoff context digest (XML-tagged)
    pub handoff: String,
}

impl WorkflowSession {
    /// Create a new pending session.
    pub fn new(context_id: ContextId, kind: WorkflowKind) -> Self {
        Self {
            workflow_id: WorkflowId::now_v7(),
            context_id,
            kind,
            status: WorkflowStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            agent_ids: Vec::new(),
            handoff: String::new(),
        }
    }

    /// Append an agent to the ordered list. A terminal workflow is frozen.
    pub fn push_agent(&mut self, agent_id: AgentInstanceId) -> Result<(), crate::WorkflowError> {
        if self.status.is_terminal() {
            return Err(crate::WorkflowError::Frozen(self.workflow_id));
        }
        self.agent_ids.push(agent_id);
        Ok(())
    }

    /// Commit the terminal status. `ended_at` never precedes `started_at`.
    pub fn finish(&mut self, status: WorkflowStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        let now = Utc::now();
        self.ended_at = Some(now.max(self.started_at));
    }
}

// ============================================================================
// LESSON
// ============================================================================

/// A durable learned rule. Immutable once recorded; loaded into memory
/// when the tagged agent starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_id: LessonId,
    pub kind: LessonKind,
    /// Role or agent-context tag this lesson applies to
    pub agent_context: String,
    pub description: String,
    pub prevention_rule: String,
    pub verification_probe: Option<String>,
    pub created_at: Timestamp,
}

impl Lesson {
    /// Create a new lesson.
    pub fn new(
        kind: LessonKind,
        agent_context: impl Into<String>,
        description: impl Into<String>,
        prevention_rule: impl Into<String>,
    ) -> Self {
        Self {
            lesson_id: LessonId::now_v7(),
            kind,
            agent_context: agent_context.into(),
            description: description.into(),
            prevention_rule: prevention_rule.into(),
            verification_probe: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the probe that backs this lesson.
    pub fn with_probe(mut self, probe: impl Into<String>) -> Self {
        self.verification_probe = Some(probe.into());
        self
    }
}

// ============================================================================
// VERIFICATION RECORD
// ============================================================================

/// Result of one probe execution against a claimed completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub verification_id: VerificationId,
    pub task_id: String,
    pub claimed: TaskStatus,
    pub verified: TaskStatus,
    pub probe_command: String,
    pub probe_output: String,
    pub discrepancy: bool,
    pub agent: Option<AgentInstanceId>,
    pub workflow: Option<WorkflowId>,
    pub verified_at: Timestamp,
}

impl VerificationRecord {
    /// Create a record; the discrepancy flag is derived, never set by hand.
    pub fn new(
        task_id: impl Into<String>,
        claimed: TaskStatus,
        verified: TaskStatus,
        probe_command: impl Into<String>,
        probe_output: impl Into<String>,
    ) -> Self {
        Self {
            verification_id: VerificationId::now_v7(),
            task_id: task_id.into(),
            claimed,
            verified,
            probe_command: probe_command.into(),
            probe_output: probe_output.into(),
            discrepancy: claimed != verified,
            agent: None,
            workflow: None,
            verified_at: Utc::now(),
        }
    }

    /// Tag the agent that claimed the completion.
    pub fn with_agent(mut self, agent: AgentInstanceId) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Tag the owning workflow session.
    pub fn with_workflow(mut self, workflow: WorkflowId) -> Self {
        self.workflow = Some(workflow);
        self
    }
}

// ============================================================================
// EXTERNAL RESOURCE
// ============================================================================

/// A branch, pull-request, channel or message soft-owned by a context.
/// Cleanup on context termination is advisory, not mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalResource {
    pub resource_id: ResourceId,
    pub context_id: ContextId,
    pub system: ExternalSystem,
    pub kind: ResourceKind,
    pub external_id: String,
    pub url: String,
    pub created_at: Timestamp,
}

impl ExternalResource {
    /// Create a new resource record.
    pub fn new(
        context_id: ContextId,
        system: ExternalSystem,
        kind: ResourceKind,
        external_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: ResourceId::now_v7(),
            context_id,
            system,
            kind,
            external_id: external_id.into(),
            url: url.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// CONFLICT RECORD
// ============================================================================

/// A detected cross-agent conflict between two parallel branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: ConflictId,
    pub workflow_id: WorkflowId,
    pub kind: ConflictKind,
    pub first_branch: String,
    pub second_branch: String,
    /// The colliding path, schema name, or endpoint
    pub subject: String,
    pub detected_at: Timestamp,
}

impl ConflictRecord {
    /// Create a new conflict record.
    pub fn new(
        workflow_id: WorkflowId,
        kind: ConflictKind,
        first_branch: impl Into<String>,
        second_branch: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            conflict_id: ConflictId::now_v7(),
            workflow_id,
            kind,
            first_branch: first_branch.into(),
            second_branch: second_branch.into(),
            subject: subject.into(),
            detected_at: Utc::now(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_upgrade_is_one_way() {
        let mut context = Context::new(ContextScope::Session, "fix login bug", 8_000);
        context.upgrade(ContextScope::Project, 32_000).unwrap();
        assert_eq!(context.scope, ContextScope::Project);
        assert_eq!(context.token_budget, 32_000);

        let err = context.upgrade(ContextScope::Session, 8_000).unwrap_err();
        assert!(matches!(err, ContextError::ScopeDowngrade { .. }));
    }

    #[test]
    fn test_tangent_links_parent() {
        let parent = Context::new(ContextScope::Session, "root", 8_000);
        let child = Context::tangent(parent.context_id, "investigate deps", 4_000);
        assert_eq!(child.parent_id, Some(parent.context_id));
        assert_eq!(child.scope, ContextScope::Session);
    }

    #[test]
    fn test_event_importance_bounds() {
        let id = ContextId::now_v7();
        assert!(ContextEvent::new(id, 1, EventKind::Message, 10, json!({})).is_ok());
        let err = ContextEvent::new(id, 1, EventKind::Message, 11, json!({})).unwrap_err();
        assert!(matches!(err, ContextError::ImportanceOutOfRange(11)));
    }

    #[test]
    fn test_event_preservation_threshold() {
        let id = ContextId::now_v7();
        let kept = ContextEvent::new(id, 1, EventKind::Decision, 8, json!({})).unwrap();
        let dropped = ContextEvent::new(id, 2, EventKind::Message, 7, json!({})).unwrap();
        assert!(kept.is_preserved());
        assert!(!dropped.is_preserved());
    }

    #[test]
    fn test_agent_progress_is_monotone() {
        let mut agent = AgentInstance::new(
            AgentRoleKind::Code,
            WorkflowId::now_v7(),
            ContextId::now_v7(),
        );
        agent.record_step("plan", 1, 25.0);
        assert_eq!(agent.progress, 25.0);
        agent.record_step("generate", 2, 10.0); // lower value is ignored
        assert_eq!(agent.progress, 25.0);
        agent.record_step("validate", 3, 75.0);
        assert_eq!(agent.progress, 75.0);
    }

    #[test]
    fn test_agent_signal_through_machine() {
        let mut agent = AgentInstance::new(
            AgentRoleKind::Deploy,
            WorkflowId::now_v7(),
            ContextId::now_v7(),
        );
        agent.signal(AgentSignal::Start).unwrap();
        assert_eq!(agent.state, AgentState::Running);
        assert!(agent.signal(AgentSignal::Start).is_err());
    }

    #[test]
    fn test_workflow_frozen_after_terminal() {
        let mut session = WorkflowSession::new(ContextId::now_v7(), WorkflowKind::Release);
        session.push_agent(AgentInstanceId::now_v7()).unwrap();
        session.finish(WorkflowStatus::Completed);
        assert!(session.ended_at.unwrap() >= session.started_at);
        assert!(matches!(
            session.push_agent(AgentInstanceId::now_v7()),
            Err(crate::WorkflowError::Frozen(_))
        ));
    }

    #[test]
    fn test_verification_discrepancy_is_derived() {
        let ok = VerificationRecord::new(
            "task-x",
            TaskStatus::Completed,
            TaskStatus::Completed,
            "exit 0",
            "",
        );
        assert!(!ok.discrepancy);
        let bad = VerificationRecord::new(
            "task-x",
            TaskStatus::Completed,
            TaskStatus::Failed,
            "exit 1",
            "",
        );
        assert!(bad.discrepancy);
    }
}
