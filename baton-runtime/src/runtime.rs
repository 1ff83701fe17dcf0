//! The agent runtime: drives one instance through its step plan.

use crate::{ProgressSender, ProgressUpdate, StepPlan};
use async_trait::async_trait;
use baton_core::*;
use baton_store::Store;
use serde_json::json;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a role step can see while executing.
pub struct StepContext {
    pub agent_id: AgentInstanceId,
    pub workflow_id: WorkflowId,
    pub context_id: ContextId,
    /// Workflow input merged with the accumulated handoff digest
    pub input: serde_json::Value,
    /// Lessons tagged for this role, loaded at agent start
    pub lessons: Vec<Lesson>,
    /// Results of earlier steps, keyed by step name. Guards read this.
    pub working: serde_json::Value,
    /// Cooperative cancellation; observed between steps
    pub cancel: CancellationToken,
}

/// Uniform behavioural interface every role implements.
///
/// Roles are a closed set dispatched by tag; the runtime supplies the
/// lifecycle and the roles supply the steps.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// The role tag.
    fn role(&self) -> AgentRoleKind;

    /// The declared step plan (at most eight steps).
    fn plan(&self) -> &StepPlan;

    /// Execute one named step, producing its result payload.
    async fn execute_step(
        &self,
        step: &str,
        cx: &StepContext,
    ) -> Result<serde_json::Value, AgentFailure>;
}

/// Drives agent instances through their plans with persistence.
#[derive(Clone)]
pub struct AgentRuntime {
    store: Store,
}

impl AgentRuntime {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Execute the full step plan of one agent instance.
    ///
    /// Wraps every step with: cancellation check, state check, step-budget
    /// check, guard, timing, learning hooks, and per-step persistence.
    /// The terminal event is persisted before this function returns.
    pub async fn execute(
        &self,
        agent: &mut AgentInstance,
        behavior: &dyn AgentBehavior,
        input: serde_json::Value,
        progress: Option<&ProgressSender>,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, AgentFailure> {
        let lessons = self.load_lessons(behavior.role()).await;
        let cx = StepContext {
            agent_id: agent.agent_id,
            workflow_id: agent.workflow_id,
            context_id: agent.context_id,
            input,
            lessons,
            working: json!({}),
            cancel: cancel.clone(),
        };
        self.run_plan(agent, behavior, cx, progress).await
    }

    async fn run_plan(
        &self,
        agent: &mut AgentInstance,
        behavior: &dyn AgentBehavior,
        mut cx: StepContext,
        progress: Option<&ProgressSender>,
    ) -> Result<serde_json::Value, AgentFailure> {
        let plan = behavior.plan();
        let total = plan.len().max(1);

        self.transition(agent, AgentSignal::Start).await?;
        info!(agent = %agent.agent_id, role = %agent.role, steps = plan.len(), "agent started");

        for (idx, step) in plan.steps().iter().enumerate() {
            let index = (idx + 1) as i32;

            // 1. Cancellation is observed between steps.
            if cx.cancel.is_cancelled() {
                let failure = AgentFailure::cancelled(step.name).with_agent(agent.agent_id);
                self.fail(agent, failure.clone()).await;
                return Err(failure);
            }

            // 2. State check: only a running agent executes steps.
            if agent.state != AgentState::Running {
                let failure = AgentFailure::new(
                    ErrorKind::StateViolation,
                    format!("step '{}' attempted in state '{}'", step.name, agent.state),
                )
                .with_step(step.name)
                .with_agent(agent.agent_id);
                self.fail(agent, failure.clone()).await;
                return Err(failure);
            }

            // 3. Step-budget check. Plans are capped at construction, so
            // tripping this is an internal bug.
            if index as usize > MAX_STEPS {
                let failure = AgentFailure::new(
                    ErrorKind::StateViolation,
                    format!("step index {index} exceeds the budget of {MAX_STEPS}"),
                )
                .with_step(step.name)
                .with_agent(agent.agent_id);
                self.fail(agent, failure.clone()).await;
                return Err(failure);
            }

            // 4. Guard: an unmet precondition skips the step.
            if let Some(guard) = step.guard {
                if !guard(&cx.working) {
                    debug!(agent = %agent.agent_id, step = step.name, "guard unmet; step skipped");
                    self.persist_step(agent, step.name, index, total, None, 0, true)
                        .await;
                    continue;
                }
            }

            // 5. Timed execution.
            let started = Instant::now();
            let result = behavior.execute_step(step.name, &cx).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(payload) => {
                    // 6. Learning hook: never blocks the step on failure.
                    self.observe_step(behavior.role(), step.name, duration_ms, true)
                        .await;

                    cx.working[step.name] = payload.clone();
                    self.persist_step(
                        agent,
                        step.name,
                        index,
                        total,
                        Some(&payload),
                        duration_ms,
                        false,
                    )
                    .await;

                    if let Some(progress) = progress {
                        progress
                            .send(ProgressUpdate {
                                agent_id: agent.agent_id,
                                role: agent.role,
                                step: step.name.to_string(),
                                step_index: index,
                                percent: agent.progress,
                                importance: if index as usize == plan.len() { 7 } else { 3 },
                            })
                            .await;
                    }
                }
                Err(failure) => {
                    self.observe_step(behavior.role(), step.name, duration_ms, false)
                        .await;
                    let failure = failure.with_step(step.name).with_agent(agent.agent_id);
                    self.fail(agent, failure.clone()).await;
                    return Err(failure);
                }
            }
        }

        // Terminal transition and event are persisted before returning so
        // a sequential workflow can hand off safely.
        let result = cx.working;
        self.transition(agent, AgentSignal::Complete).await?;
        agent.finish(result.clone());
        self.persist_agent(agent).await;
        self.append_terminal_event(agent, "completed", None).await;
        info!(agent = %agent.agent_id, role = %agent.role, "agent completed");
        Ok(result)
    }

    /// Pause a running agent.
    pub async fn pause(&self, agent: &mut AgentInstance) -> Result<(), AgentFailure> {
        self.transition(agent, AgentSignal::Pause).await
    }

    /// Resume a paused or input-blocked agent.
    pub async fn resume(&self, agent: &mut AgentInstance) -> Result<(), AgentFailure> {
        self.transition(agent, AgentSignal::Resume).await
    }

    /// Park a running agent awaiting external input.
    pub async fn await_input(&self, agent: &mut AgentInstance) -> Result<(), AgentFailure> {
        self.transition(agent, AgentSignal::AwaitInput).await
    }

    /// Abort any non-terminal agent.
    pub async fn abort(&self, agent: &mut AgentInstance, reason: &str) -> Result<(), AgentFailure> {
        self.transition(agent, AgentSignal::Abort).await?;
        let failure = AgentFailure::new(ErrorKind::Cancelled, reason.to_string())
            .with_agent(agent.agent_id);
        agent.fail_with(failure);
        self.persist_agent(agent).await;
        self.append_terminal_event(agent, "failed", Some(reason)).await;
        Ok(())
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    async fn transition(
        &self,
        agent: &mut AgentInstance,
        signal: AgentSignal,
    ) -> Result<(), AgentFailure> {
        agent
            .signal(signal)
            .map_err(|violation| AgentFailure::from(violation).with_agent(agent.agent_id))?;
        self.persist_agent(agent).await;
        Ok(())
    }

    /// Lessons are memory: offered to every step, loaded once at start.
    /// A failing load degrades to an empty set.
    async fn load_lessons(&self, role: AgentRoleKind) -> Vec<Lesson> {
        match self.store.list_lessons(role.as_db_str()).await {
            Ok(lessons) => {
                if !lessons.is_empty() {
                    debug!(%role, count = lessons.len(), "lessons loaded for agent start");
                }
                lessons
            }
            Err(e) => {
                warn!(%role, error = %e, "lesson load failed; continuing without");
                Vec::new()
            }
        }
    }

    /// Pattern/learning hook. Failures are logged, never propagated.
    async fn observe_step(&self, role: AgentRoleKind, step: &str, duration_ms: u64, ok: bool) {
        debug!(%role, step, duration_ms, ok, "step observed");
    }

    async fn fail(&self, agent: &mut AgentInstance, failure: AgentFailure) {
        if let Err(violation) = agent.signal(AgentSignal::Fail) {
            // Already terminal; keep the original failure as the record.
            warn!(agent = %agent.agent_id, %violation, "fail transition rejected");
        }
        agent.fail_with(failure.clone());
        self.persist_agent(agent).await;
        self.append_error_event(agent, &failure).await;
        self.append_terminal_event(agent, "failed", Some(&failure.message))
            .await;
    }

    async fn persist_agent(&self, agent: &AgentInstance) {
        if let Err(e) = self.store.upsert_agent(agent).await {
            warn!(agent = %agent.agent_id, error = %e, "agent persistence failed");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_step(
        &self,
        agent: &mut AgentInstance,
        step: &str,
        index: i32,
        total: usize,
        result: Option<&serde_json::Value>,
        duration_ms: u64,
        skipped: bool,
    ) {
        let percent = (index as f32 / total as f32) * 100.0;
        agent.record_step(step, index, percent);
        self.persist_agent(agent).await;

        let mut payload = json!({
            "step": step,
            "index": index,
            "agent": agent.agent_id,
            "role": agent.role,
            "duration_ms": duration_ms,
            "skipped": skipped,
        });
        if let Some(branch) = &agent.branch {
            payload["branch"] = json!(branch);
        }
        // Declared touches feed the cross-agent conflict detector.
        if let Some(result) = result {
            for key in ["touched_files", "schemas", "endpoints"] {
                if let Some(declared) = result.get(key) {
                    payload[key] = declared.clone();
                }
            }
        }
        if let Err(e) = self
            .store
            .append_event(agent.context_id, EventKind::AgentStep, 4, payload)
            .await
        {
            warn!(agent = %agent.agent_id, error = %e, "step event append failed");
        }
    }

    async fn append_error_event(&self, agent: &AgentInstance, failure: &AgentFailure) {
        let payload = json!({
            "error": failure,
            "agent": agent.agent_id,
            "role": agent.role,
        });
        if let Err(e) = self
            .store
            .append_event(agent.context_id, EventKind::Error, 6, payload)
            .await
        {
            warn!(agent = %agent.agent_id, error = %e, "error event append failed");
        }
    }

    async fn append_terminal_event(
        &self,
        agent: &AgentInstance,
        terminal: &str,
        detail: Option<&str>,
    ) {
        let mut payload = json!({
            "terminal": terminal,
            "agent": agent.agent_id,
            "role": agent.role,
        });
        if let Some(branch) = &agent.branch {
            payload["branch"] = json!(branch);
        }
        if let Some(detail) = detail {
            payload["detail"] = json!(detail);
        }
        if let Err(e) = self
            .store
            .append_event(agent.context_id, EventKind::AgentStep, 6, payload)
            .await
        {
            warn!(agent = %agent.agent_id, error = %e, "terminal event append failed");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
