//! BATON Workflow - Orchestration Engine
//!
//! Resolves a named workflow type to its role list, drives the agents
//! sequentially or as a bounded parallel fan-out, propagates handoff
//! context between roles, detects cross-agent conflicts, and commits the
//! terminal state atomically. The orchestrator facade on top exposes the
//! programmatic verbs the CLI adapts.

mod conflict;
mod engine;
mod orchestrator;
mod types;

pub use conflict::ConflictDetector;
pub use engine::WorkflowEngine;
pub use orchestrator::{HealthSnapshot, Orchestrator};
pub use types::{spec_for, WorkflowSpec};
