//! Error types for BATON operations.
//!
//! Two layers coexist:
//! - the closed user-facing taxonomy (`ErrorKind`), carried inside the
//!   compact `AgentFailure` wrapper that agents produce and the store
//!   persists;
//! - per-subsystem `thiserror` enums rolled up into the master
//!   `BatonError`, for propagation with `?` inside the process.
//!
//! Nothing is swallowed: every caught error either becomes a persisted
//! event or is rethrown wrapped.

use crate::{
    AgentInstanceId, ConflictKind, ContextId, ContextScope, StateViolation, WorkflowId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// CLOSED ERROR TAXONOMY
// ============================================================================

/// The closed error taxonomy surfaced to users and the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A required credential is absent; fail fast and name it
    AuthMissing,
    /// Configuration rejected at validation; fail fast
    ConfigInvalid,
    /// An external call exceeded its deadline; retry per policy
    ExternalTimeout,
    /// An external system rejected the request; no retry
    ExternalRejected,
    /// Cross-agent conflict requires an operator decision
    ConflictDetected,
    /// Internal state machine bug; fail terminally
    StateViolation,
    /// Token usage exceeded the budget even after compression
    BudgetExceeded,
    /// Claimed and verified completion disagree
    VerificationDiscrepancy,
    /// Work was cancelled cooperatively
    Cancelled,
}

impl ErrorKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthMissing => "auth-missing",
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::ExternalTimeout => "external-timeout",
            ErrorKind::ExternalRejected => "external-rejected",
            ErrorKind::ConflictDetected => "conflict-detected",
            ErrorKind::StateViolation => "state-violation",
            ErrorKind::BudgetExceeded => "budget-exceeded",
            ErrorKind::VerificationDiscrepancy => "verification-discrepancy",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ErrorKindParseError> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "auth-missing" => Ok(ErrorKind::AuthMissing),
            "config-invalid" => Ok(ErrorKind::ConfigInvalid),
            "external-timeout" => Ok(ErrorKind::ExternalTimeout),
            "external-rejected" => Ok(ErrorKind::ExternalRejected),
            "conflict-detected" => Ok(ErrorKind::ConflictDetected),
            "state-violation" => Ok(ErrorKind::StateViolation),
            "budget-exceeded" => Ok(ErrorKind::BudgetExceeded),
            "verification-discrepancy" => Ok(ErrorKind::VerificationDiscrepancy),
            "cancelled" => Ok(ErrorKind::Cancelled),
            _ => Err(ErrorKindParseError(s.to_string())),
        }
    }

    /// Whether the workflow engine may retry work failing with this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ExternalTimeout)
    }

    /// Whether this kind indicates an internal bug (fatal visibility).
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::StateViolation)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ErrorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid error kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorKindParseError(pub String);

impl fmt::Display for ErrorKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid error kind: {}", self.0)
    }
}

impl std::error::Error for ErrorKindParseError {}

// ============================================================================
// AGENT FAILURE WRAPPER
// ============================================================================

/// Compact error wrapper agents produce on step failure.
///
/// The runtime persists this as an `error` event and transitions the agent
/// to `failed`. The `cause` chain is flattened to a string so the wrapper
/// stays serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub step: Option<String>,
    pub agent: Option<AgentInstanceId>,
    pub cause: Option<String>,
}

impl AgentFailure {
    /// Create a new failure with just a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step: None,
            agent: None,
            cause: None,
        }
    }

    /// Attach the failing step name.
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Attach the failing agent instance.
    pub fn with_agent(mut self, agent: AgentInstanceId) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Attach the underlying cause, flattened to a string.
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// A cancellation failure (terminal, never retried).
    pub fn cancelled(step: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, "work was cancelled").with_step(step)
    }

    /// A missing-credential failure naming the variable to set.
    pub fn auth_missing(variable: &str) -> Self {
        Self::new(
            ErrorKind::AuthMissing,
            format!("credential not found; set the {variable} environment variable"),
        )
    }
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(step) = &self.step {
            write!(f, " (step: {step})")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AgentFailure {}

impl From<StateViolation> for AgentFailure {
    fn from(violation: StateViolation) -> Self {
        AgentFailure::new(ErrorKind::StateViolation, violation.to_string())
    }
}

// ============================================================================
// SUBSYSTEM ERRORS
// ============================================================================

/// Store layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Store at {path} failed integrity check: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Migration to schema version {version} failed: {reason}")]
    Migration { version: i64, reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Resource lock '{name}' is held by {holder}")]
    LockHeld { name: String, holder: String },

    #[error("Resource lock '{name}' is not held by {holder}")]
    LockNotHeld { name: String, holder: String },
}

/// Context manager errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context not found: {0}")]
    NotFound(ContextId),

    #[error("Scope can only upgrade, never {from} -> {to}")]
    ScopeDowngrade {
        from: ContextScope,
        to: ContextScope,
    },

    #[error("Context {0} has no tangent to pop")]
    NoTangent(ContextId),

    #[error("Parent context {parent} of tangent {child} is not registered")]
    ParentMissing {
        parent: ContextId,
        child: ContextId,
    },

    #[error("Importance {0} outside the 0..=10 range")]
    ImportanceOutOfRange(u8),

    #[error("Token budget must be positive, got {0}")]
    InvalidBudget(i32),
}

/// Agent runtime errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    #[error("Step plan declares {got} steps, maximum is {max}")]
    PlanTooLong { got: usize, max: usize },

    #[error("Step index {index} exceeds budget of {max}")]
    StepBudgetExceeded { index: i32, max: i32 },

    #[error("{0}")]
    StateMachine(#[from] StateViolation),

    #[error("Agent step failed: {0}")]
    StepFailed(AgentFailure),

    #[error("Unknown role for registry: {0}")]
    UnknownRole(String),
}

/// Workflow engine errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("Workflow {workflow} blocked by {kind} conflict on '{subject}'")]
    Conflict {
        workflow: WorkflowId,
        kind: ConflictKind,
        subject: String,
    },

    #[error("Workflow was cancelled")]
    Cancelled,

    #[error("Role {role} failed terminally: {failure}")]
    RoleFailed { role: String, failure: AgentFailure },

    #[error("Completed workflow {0} is frozen; agent list cannot change")]
    Frozen(WorkflowId),
}

/// External collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    #[error("Missing credential; set the {variable} environment variable")]
    AuthMissing { variable: String },

    #[error("Call to {system} timed out after {seconds}s")]
    Timeout { system: String, seconds: u64 },

    #[error("{system} rejected the request (status {status}): {message}")]
    Rejected {
        system: String,
        status: u16,
        message: String,
    },

    #[error("{system} rate limit exhausted; resets at {resets_at}")]
    RateLimited { system: String, resets_at: String },

    #[error("Credential file error: {reason}")]
    CredentialFile { reason: String },
}

impl ExternalError {
    /// Map onto the closed taxonomy for event logging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExternalError::AuthMissing { .. } => ErrorKind::AuthMissing,
            ExternalError::Timeout { .. } => ErrorKind::ExternalTimeout,
            ExternalError::Rejected { .. } | ExternalError::RateLimited { .. } => {
                ErrorKind::ExternalRejected
            }
            ExternalError::CredentialFile { .. } => ErrorKind::ConfigInvalid,
        }
    }
}

/// Verification layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("No probe registered for task '{0}'")]
    ProbeMissing(String),

    #[error("Probe for task '{task}' timed out after {seconds}s")]
    ProbeTimeout { task: String, seconds: u64 },

    #[error("Probe for task '{task}' could not be spawned: {reason}")]
    SpawnFailed { task: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

// ============================================================================
// MASTER ERROR TYPE
// ============================================================================

/// Master error type for all BATON errors.
#[derive(Debug, Clone, Error)]
pub enum BatonError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("External error: {0}")]
    External(#[from] ExternalError),

    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for BATON operations.
pub type BatonResult<T> = Result<T, BatonError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    #[test]
    fn test_error_kind_roundtrip() {
        for kind in [
            ErrorKind::AuthMissing,
            ErrorKind::ConfigInvalid,
            ErrorKind::ExternalTimeout,
            ErrorKind::ExternalRejected,
            ErrorKind::ConflictDetected,
            ErrorKind::StateViolation,
            ErrorKind::BudgetExceeded,
            ErrorKind::VerificationDiscrepancy,
            ErrorKind::Cancelled,
        ] {
            assert_eq!(ErrorKind::from_db_str(kind.as_db_str()).unwrap(), kind);
        }
        // Snake case is accepted too
        assert_eq!(
            ErrorKind::from_db_str("external_timeout").unwrap(),
            ErrorKind::ExternalTimeout
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(ErrorKind::ExternalTimeout.is_retryable());
        assert!(!ErrorKind::ExternalRejected.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(ErrorKind::StateViolation.is_fatal());
    }

    #[test]
    fn test_agent_failure_display() {
        let failure = AgentFailure::new(ErrorKind::ExternalRejected, "branch exists")
            .with_step("execute-action")
            .with_agent(AgentInstanceId::now_v7())
            .with_cause("HTTP 422");
        let rendered = failure.to_string();
        assert!(rendered.contains("external-rejected"));
        assert!(rendered.contains("execute-action"));
        assert!(rendered.contains("HTTP 422"));
    }

    #[test]
    fn test_agent_failure_serde_roundtrip() {
        let failure = AgentFailure::cancelled("deploy");
        let json = serde_json::to_string(&failure).unwrap();
        let back: AgentFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(failure, back);
    }

    #[test]
    fn test_external_error_kind_mapping() {
        let err = ExternalError::Timeout {
            system: "source-control".into(),
            seconds: 30,
        };
        assert_eq!(err.kind(), ErrorKind::ExternalTimeout);
        let err = ExternalError::RateLimited {
            system: "source-control".into(),
            resets_at: "1700000000".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ExternalRejected);
    }
}
