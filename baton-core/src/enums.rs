//! Closed enumerations shared across the BATON workspace.
//!
//! Every enum that is persisted carries `as_db_str`/`from_db_str` plus
//! `Display`/`FromStr` so the store never round-trips through `Debug`
//! formatting. Parsing is lenient on case and underscores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares the shared parse-error boilerplate for a persisted enum.
macro_rules! enum_parse_error {
    ($error:ident, $label:literal) => {
        #[doc = concat!("Error when parsing an invalid ", $label, " string.")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $error(pub String);

        impl fmt::Display for $error {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!("Invalid ", $label, ": {}"), self.0)
            }
        }

        impl std::error::Error for $error {}
    };
}

// ============================================================================
// CONTEXT SCOPE
// ============================================================================

/// Scope of a context: a short-lived session or a long-lived project.
///
/// Scope only ever upgrades (session -> project), never downgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextScope {
    /// Short, task-scoped context
    Session,
    /// Long-lived, identity-bearing context
    Project,
}

impl ContextScope {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ContextScope::Session => "Session",
            ContextScope::Project => "Project",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ContextScopeParseError> {
        match s.to_lowercase().as_str() {
            "session" => Ok(ContextScope::Session),
            "project" => Ok(ContextScope::Project),
            _ => Err(ContextScopeParseError(s.to_string())),
        }
    }

    /// Check whether a scope change is a legal upgrade.
    pub fn can_upgrade_to(&self, target: ContextScope) -> bool {
        matches!(
            (self, target),
            (ContextScope::Session, ContextScope::Project)
        )
    }
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ContextScope {
    type Err = ContextScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(ContextScopeParseError, "context scope");

// ============================================================================
// COMPRESSION LEVEL
// ============================================================================

/// Archival tier of a context, from hot to months-dormant.
///
/// Deeper levels summarise older events more aggressively. Archival is a
/// compression level, not deletion; contexts are never destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompressionLevel {
    /// Context is in active use
    Active,
    /// Untouched for hours
    Dormant,
    /// Untouched for days
    Sleeping,
    /// Untouched for weeks to months
    DeepSleep,
}

impl CompressionLevel {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CompressionLevel::Active => "Active",
            CompressionLevel::Dormant => "Dormant",
            CompressionLevel::Sleeping => "Sleeping",
            CompressionLevel::DeepSleep => "DeepSleep",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, CompressionLevelParseError> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "active" => Ok(CompressionLevel::Active),
            "dormant" => Ok(CompressionLevel::Dormant),
            "sleeping" => Ok(CompressionLevel::Sleeping),
            "deepsleep" => Ok(CompressionLevel::DeepSleep),
            _ => Err(CompressionLevelParseError(s.to_string())),
        }
    }

    /// The next deeper archival tier, if any.
    pub fn deeper(&self) -> Option<CompressionLevel> {
        match self {
            CompressionLevel::Active => Some(CompressionLevel::Dormant),
            CompressionLevel::Dormant => Some(CompressionLevel::Sleeping),
            CompressionLevel::Sleeping => Some(CompressionLevel::DeepSleep),
            CompressionLevel::DeepSleep => None,
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for CompressionLevel {
    type Err = CompressionLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(CompressionLevelParseError, "compression level");

// ============================================================================
// EVENT KIND
// ============================================================================

/// Kind of a context event. The set is closed; payloads are opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Free-form message appended to the context
    Message,
    /// A decision taken during the work
    Decision,
    /// Lifecycle milestone (creation, upgrade, tangent summary)
    Milestone,
    /// An external resource was created or linked
    ExternalResource,
    /// One agent step completed (or was skipped)
    AgentStep,
    /// An error was recorded
    Error,
}

impl EventKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EventKind::Message => "Message",
            EventKind::Decision => "Decision",
            EventKind::Milestone => "Milestone",
            EventKind::ExternalResource => "ExternalResource",
            EventKind::AgentStep => "AgentStep",
            EventKind::Error => "Error",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EventKindParseError> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "message" => Ok(EventKind::Message),
            "decision" => Ok(EventKind::Decision),
            "milestone" => Ok(EventKind::Milestone),
            "externalresource" => Ok(EventKind::ExternalResource),
            "agentstep" => Ok(EventKind::AgentStep),
            "error" => Ok(EventKind::Error),
            _ => Err(EventKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for EventKind {
    type Err = EventKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(EventKindParseError, "event kind");

// ============================================================================
// AGENT STATE AND SIGNALS
// ============================================================================

/// State of an agent instance. Transitions are governed by the state
/// machine in `machine.rs`; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AgentState {
    /// Constructed, not yet started
    #[default]
    Idle,
    /// Executing steps
    Running,
    /// Paused by operator or engine
    Paused,
    /// Blocked on external input
    AwaitingInput,
    /// Finished successfully (terminal)
    Completed,
    /// Finished unsuccessfully (terminal)
    Failed,
}

impl AgentState {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "Idle",
            AgentState::Running => "Running",
            AgentState::Paused => "Paused",
            AgentState::AwaitingInput => "AwaitingInput",
            AgentState::Completed => "Completed",
            AgentState::Failed => "Failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, AgentStateParseError> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "idle" => Ok(AgentState::Idle),
            "running" => Ok(AgentState::Running),
            "paused" => Ok(AgentState::Paused),
            "awaitinginput" => Ok(AgentState::AwaitingInput),
            "completed" | "complete" => Ok(AgentState::Completed),
            "failed" => Ok(AgentState::Failed),
            _ => Err(AgentStateParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Failed)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentState {
    type Err = AgentStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(AgentStateParseError, "agent state");

/// Signal driving the agent state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentSignal {
    /// idle -> running
    Start,
    /// running -> paused
    Pause,
    /// paused | awaiting-input -> running
    Resume,
    /// running -> awaiting-input
    AwaitInput,
    /// running -> completed
    Complete,
    /// running -> failed
    Fail,
    /// any non-terminal -> failed
    Abort,
}

impl fmt::Display for AgentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentSignal::Start => "start",
            AgentSignal::Pause => "pause",
            AgentSignal::Resume => "resume",
            AgentSignal::AwaitInput => "await-input",
            AgentSignal::Complete => "complete",
            AgentSignal::Fail => "fail",
            AgentSignal::Abort => "abort",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// AGENT ROLES
// ============================================================================

/// The closed set of worker roles. Dispatch is by tag; there is no open
/// registration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRoleKind {
    /// Branch, pull-request and comment operations on the source-control host
    SourceControl,
    /// Filesystem security scanning
    Security,
    /// Structured code generation
    Code,
    /// Container build and deployment
    Deploy,
    /// Chat notifications
    Communication,
    /// Project identity document maintenance
    ProjectIdentity,
}

impl AgentRoleKind {
    /// All roles, in a stable order.
    pub const ALL: [AgentRoleKind; 6] = [
        AgentRoleKind::SourceControl,
        AgentRoleKind::Security,
        AgentRoleKind::Code,
        AgentRoleKind::Deploy,
        AgentRoleKind::Communication,
        AgentRoleKind::ProjectIdentity,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentRoleKind::SourceControl => "SourceControl",
            AgentRoleKind::Security => "Security",
            AgentRoleKind::Code => "Code",
            AgentRoleKind::Deploy => "Deploy",
            AgentRoleKind::Communication => "Communication",
            AgentRoleKind::ProjectIdentity => "ProjectIdentity",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, AgentRoleKindParseError> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "sourcecontrol" => Ok(AgentRoleKind::SourceControl),
            "security" => Ok(AgentRoleKind::Security),
            "code" => Ok(AgentRoleKind::Code),
            "deploy" => Ok(AgentRoleKind::Deploy),
            "communication" => Ok(AgentRoleKind::Communication),
            "projectidentity" => Ok(AgentRoleKind::ProjectIdentity),
            _ => Err(AgentRoleKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for AgentRoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentRoleKind {
    type Err = AgentRoleKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(AgentRoleKindParseError, "agent role");

// ============================================================================
// WORKFLOW TYPES AND STATUS
// ============================================================================

/// The closed set of named workflow types. Role lists and execution order
/// are resolved by the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowKind {
    /// source-control -> security -> code -> deploy
    FeatureDevelopment,
    /// source-control -> security -> communication
    SecurityAudit,
    /// code -> deploy -> communication
    Release,
    /// Parallel per-branch fan-out of source-control -> code
    BranchParallel,
}

impl WorkflowKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            WorkflowKind::FeatureDevelopment => "FeatureDevelopment",
            WorkflowKind::SecurityAudit => "SecurityAudit",
            WorkflowKind::Release => "Release",
            WorkflowKind::BranchParallel => "BranchParallel",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, WorkflowKindParseError> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "featuredevelopment" => Ok(WorkflowKind::FeatureDevelopment),
            "securityaudit" => Ok(WorkflowKind::SecurityAudit),
            "release" => Ok(WorkflowKind::Release),
            "branchparallel" => Ok(WorkflowKind::BranchParallel),
            _ => Err(WorkflowKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = WorkflowKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(WorkflowKindParseError, "workflow kind");

/// Status of a workflow session, identical in shape to agent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WorkflowStatus {
    /// Created, not yet running
    #[default]
    Pending,
    /// Agents are executing
    Running,
    /// All agents finished successfully (terminal)
    Completed,
    /// Terminated by failure, conflict, or cancellation (terminal)
    Failed,
}

impl WorkflowStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "Pending",
            WorkflowStatus::Running => "Running",
            WorkflowStatus::Completed => "Completed",
            WorkflowStatus::Failed => "Failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, WorkflowStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            _ => Err(WorkflowStatusParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = WorkflowStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(WorkflowStatusParseError, "workflow status");

/// Policy applied when a single role fails inside a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FailurePolicy {
    /// Record the error and proceed with remaining roles
    Continue,
    /// Terminate the workflow
    #[default]
    Stop,
    /// Re-execute the failed role with exponential backoff and jitter
    Retry,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailurePolicy::Continue => "continue",
            FailurePolicy::Stop => "stop",
            FailurePolicy::Retry => "retry",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// LESSONS AND VERIFICATION
// ============================================================================

/// Kind of a learned rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LessonKind {
    /// Learned from a discrepancy or failure
    Mistake,
    /// Learned from a confirmed success
    Success,
    /// A recurring pattern worth remembering
    Pattern,
}

impl LessonKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LessonKind::Mistake => "Mistake",
            LessonKind::Success => "Success",
            LessonKind::Pattern => "Pattern",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, LessonKindParseError> {
        match s.to_lowercase().as_str() {
            "mistake" => Ok(LessonKind::Mistake),
            "success" => Ok(LessonKind::Success),
            "pattern" => Ok(LessonKind::Pattern),
            _ => Err(LessonKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for LessonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for LessonKind {
    type Err = LessonKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(LessonKindParseError, "lesson kind");

/// Completion status of a task as claimed or as verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Task is done
    Completed,
    /// Task is not done
    Failed,
}

impl TaskStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TaskStatusParseError> {
        match s.to_lowercase().as_str() {
            "completed" | "complete" => Ok(TaskStatus::Completed),
            "failed" | "incomplete" => Ok(TaskStatus::Failed),
            _ => Err(TaskStatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(TaskStatusParseError, "task status");

// ============================================================================
// SECURITY SCANNING
// ============================================================================

/// Severity of a security finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, SeverityParseError> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(SeverityParseError(s.to_string())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Severity {
    type Err = SeverityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(SeverityParseError, "severity");

/// Category of a security scan pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternCategory {
    /// Leaked credentials and keys
    Secrets,
    /// Known-vulnerable code constructs
    Vulnerabilities,
    /// Insecure configuration
    Configurations,
    /// Supply-chain and emerging threat markers
    ModernThreats,
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatternCategory::Secrets => "secrets",
            PatternCategory::Vulnerabilities => "vulnerabilities",
            PatternCategory::Configurations => "configurations",
            PatternCategory::ModernThreats => "modern-threats",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// EXTERNAL SYSTEMS
// ============================================================================

/// External system a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalSystem {
    /// Source-control host
    SourceControl,
    /// Chat platform
    Chat,
}

impl ExternalSystem {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ExternalSystem::SourceControl => "SourceControl",
            ExternalSystem::Chat => "Chat",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ExternalSystemParseError> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "sourcecontrol" => Ok(ExternalSystem::SourceControl),
            "chat" => Ok(ExternalSystem::Chat),
            _ => Err(ExternalSystemParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ExternalSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ExternalSystem {
    type Err = ExternalSystemParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(ExternalSystemParseError, "external system");

/// Kind of an external resource soft-owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Branch,
    PullRequest,
    Channel,
    Message,
}

impl ResourceKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ResourceKind::Branch => "Branch",
            ResourceKind::PullRequest => "PullRequest",
            ResourceKind::Channel => "Channel",
            ResourceKind::Message => "Message",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ResourceKindParseError> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "branch" => Ok(ResourceKind::Branch),
            "pullrequest" => Ok(ResourceKind::PullRequest),
            "channel" => Ok(ResourceKind::Channel),
            "message" => Ok(ResourceKind::Message),
            _ => Err(ResourceKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ResourceKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(ResourceKindParseError, "resource kind");

/// Category of an outgoing chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCategory {
    Start,
    Progress,
    Complete,
    Error,
    Alert,
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageCategory::Start => "start",
            MessageCategory::Progress => "progress",
            MessageCategory::Complete => "complete",
            MessageCategory::Error => "error",
            MessageCategory::Alert => "alert",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// CONFLICTS
// ============================================================================

/// Kind of a cross-agent conflict between parallel branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Two branches modified the same file
    SameFile,
    /// Two branches declared colliding schemas
    SchemaCollision,
    /// Two branches declared colliding endpoints
    EndpointCollision,
}

impl ConflictKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ConflictKind::SameFile => "SameFile",
            ConflictKind::SchemaCollision => "SchemaCollision",
            ConflictKind::EndpointCollision => "EndpointCollision",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ConflictKindParseError> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "samefile" => Ok(ConflictKind::SameFile),
            "schemacollision" => Ok(ConflictKind::SchemaCollision),
            "endpointcollision" => Ok(ConflictKind::EndpointCollision),
            _ => Err(ConflictKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ConflictKind {
    type Err = ConflictKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

enum_parse_error!(ConflictKindParseError, "conflict kind");

// ============================================================================
// SHUTDOWN
// ============================================================================

/// Variants of the orchestrator shutdown verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShutdownMode {
    /// Stop immediately; skip external notifications
    Emergency,
    /// Save all contexts, skip external notifications
    Quick,
    /// Save all contexts and notify external systems
    Regular,
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownMode::Emergency => "emergency",
            ShutdownMode::Quick => "quick",
            ShutdownMode::Regular => "regular",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// TESTS
// ============================================================================
