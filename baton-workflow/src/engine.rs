//! The workflow engine.

use crate::conflict::ConflictDetector;
use crate::types::{spec_for, WorkflowSpec};
use baton_agents::{build_role, RoleDeps};
use baton_core::*;
use baton_runtime::{AgentRuntime, ProgressSender};
use baton_store::Store;
use futures::StreamExt;
use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// TTL on the advisory branch lock; generous so slow external calls do
/// not lose the lock mid-branch.
const BRANCH_LOCK_TTL: std::time::Duration = std::time::Duration::from_secs(300);

/// One parallel branch: a name plus extra input merged for its role set.
#[derive(Debug, Clone)]
struct BranchSpec {
    name: String,
    extra: serde_json::Value,
}

/// What one branch produced.
struct BranchOutcome {
    agents: Vec<AgentInstance>,
    handoff: HandoffContext,
    failed: bool,
}

/// Orchestrates agents for a named workflow type against a context.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Store,
    runtime: AgentRuntime,
    detector: ConflictDetector,
    deps: RoleDeps,
    config: BatonConfig,
}

impl WorkflowEngine {
    pub fn new(store: Store, deps: RoleDeps, config: BatonConfig) -> Self {
        Self {
            runtime: AgentRuntime::new(store.clone()),
            detector: ConflictDetector::new(store.clone()),
            store,
            deps,
            config,
        }
    }

    /// Execute a workflow of the given type against a context.
    ///
    /// The final state is committed atomically after the last agent
    /// transitions terminally.
    pub async fn execute(
        &self,
        context_id: ContextId,
        kind: WorkflowKind,
        input: serde_json::Value,
        policy: FailurePolicy,
        progress: Option<&ProgressSender>,
        cancel: CancellationToken,
    ) -> BatonResult<WorkflowSession> {
        let spec = spec_for(kind);
        let mut session = WorkflowSession::new(context_id, kind);
        session.status = WorkflowStatus::Running;
        self.store.upsert_workflow(&session).await?;
        info!(workflow = %session.workflow_id, %kind, parallel = spec.parallel, "workflow started");

        if spec.parallel {
            self.run_parallel(session, spec, input, policy, progress, cancel)
                .await
        } else {
            self.run_sequential(
                session,
                spec.roles,
                HandoffContext::new(),
                input,
                policy,
                progress,
                cancel,
            )
            .await
        }
    }

    /// Continue a workflow from its last persisted step.
    ///
    /// Sequential workflows resume after the last completed role; a
    /// terminal workflow is returned unchanged. Parallel workflows re-run
    /// their fan-out (branch work is idempotent through branch-scoped
    /// naming).
    pub async fn continue_workflow(
        &self,
        workflow_id: WorkflowId,
        input: serde_json::Value,
        policy: FailurePolicy,
        progress: Option<&ProgressSender>,
        cancel: CancellationToken,
    ) -> BatonResult<WorkflowSession> {
        let session = self.store.get_workflow(workflow_id).await?;
        if session.status.is_terminal() {
            return Ok(session);
        }
        let spec = spec_for(session.kind);

        if spec.parallel {
            return self
                .run_parallel(session, spec, input, policy, progress, cancel)
                .await;
        }

        let agents = self.store.list_agents_for_workflow(workflow_id).await?;
        let done = agents
            .iter()
            .filter(|a| a.state == AgentState::Completed)
            .count()
            .min(spec.roles.len());
        let remaining = &spec.roles[done..];
        let handoff: HandoffContext =
            serde_json::from_str(&session.handoff).unwrap_or_default();

        info!(
            workflow = %workflow_id,
            completed = done,
            remaining = remaining.len(),
            "continuing workflow from last persisted step"
        );
        self.run_sequential(session, remaining, handoff, input, policy, progress, cancel)
            .await
    }

    // ========================================================================
    // SEQUENTIAL EXECUTION
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn run_sequential(
        &self,
        mut session: WorkflowSession,
        roles: &[AgentRoleKind],
        mut handoff: HandoffContext,
        input: serde_json::Value,
        policy: FailurePolicy,
        progress: Option<&ProgressSender>,
        cancel: CancellationToken,
    ) -> BatonResult<WorkflowSession> {
        let mut agents: Vec<AgentInstance> = Vec::new();
        let mut failed = false;

        for role in roles {
            if cancel.is_cancelled() {
                failed = true;
                break;
            }

            let mut attempts = Vec::new();
            let result = self
                .run_role_with_retry(
                    &mut session,
                    *role,
                    None,
                    &input,
                    &handoff,
                    policy,
                    progress,
                    &cancel,
                    &mut attempts,
                )
                .await?;
            let succeeded = result.is_some();

            if let Some(result) = result {
                let key_events = attempts
                    .last()
                    .and_then(|a| a.current_step.clone())
                    .into_iter()
                    .collect();
                handoff.record(*role, None, &result, key_events);
            }
            agents.extend(attempts);

            if !succeeded {
                match policy {
                    FailurePolicy::Continue => {
                        debug!(%role, "role failed; continuing per policy");
                    }
                    FailurePolicy::Stop | FailurePolicy::Retry => {
                        // Retry budget is spent inside run_role_with_retry;
                        // exhaustion terminates the workflow.
                        failed = true;
                        cancel.cancel();
                        break;
                    }
                }
            }
        }

        self.finalize(&mut session, agents, &handoff, failed || cancel.is_cancelled())
            .await?;
        Ok(session)
    }

    /// Run one role, re-instantiating per attempt under the retry policy.
    /// Every attempted agent instance is recorded on the session.
    #[allow(clippy::too_many_arguments)]
    async fn run_role_with_retry(
        &self,
        session: &mut WorkflowSession,
        role: AgentRoleKind,
        branch: Option<&BranchSpec>,
        input: &serde_json::Value,
        handoff: &HandoffContext,
        policy: FailurePolicy,
        progress: Option<&ProgressSender>,
        cancel: &CancellationToken,
        attempts_out: &mut Vec<AgentInstance>,
    ) -> BatonResult<Option<serde_json::Value>> {
        let attempts = match policy {
            FailurePolicy::Retry => self.config.retry.max_attempts.max(1),
            _ => 1,
        };

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.config.retry.delay_for_attempt(attempt - 1);
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                tokio::time::sleep(backoff + std::time::Duration::from_millis(jitter_ms)).await;
            }

            let mut agent = AgentInstance::new(role, session.workflow_id, session.context_id)
                .with_config(input.clone());
            if let Some(branch) = branch {
                agent = agent.with_branch(&branch.name);
            }
            session.push_agent(agent.agent_id)?;
            // Parallel branches work on a local session copy; the merged
            // agent list is committed once at finalization.
            if branch.is_none() {
                self.store.upsert_workflow(session).await?;
            }
            self.store.upsert_agent(&agent).await?;

            let behavior = build_role(role, &self.deps);
            let role_input = merge_role_input(input, branch, handoff);
            match self
                .runtime
                .execute(&mut agent, behavior.as_ref(), role_input, progress, cancel)
                .await
            {
                Ok(result) => {
                    attempts_out.push(agent);
                    return Ok(Some(result));
                }
                Err(failure) => {
                    warn!(%role, attempt, %failure, "role attempt failed");
                    let cancelled = failure.kind == ErrorKind::Cancelled;
                    attempts_out.push(agent);
                    if cancelled {
                        break;
                    }
                }
            }
        }
        Ok(None)
    }

    // ========================================================================
    // PARALLEL EXECUTION
    // ========================================================================

    async fn run_parallel(
        &self,
        mut session: WorkflowSession,
        spec: WorkflowSpec,
        input: serde_json::Value,
        policy: FailurePolicy,
        progress: Option<&ProgressSender>,
        cancel: CancellationToken,
    ) -> BatonResult<WorkflowSession> {
        let branches = parse_branches(&input)?;
        let max_concurrency = self.config.max_parallel_agents.max(1);

        let outcomes: Vec<BatonResult<BranchOutcome>> =
            futures::stream::iter(branches.into_iter().map(|branch| {
                let cancel = cancel.clone();
                let input = input.clone();
                let session_ref = &session;
                async move {
                    self.run_branch(session_ref, spec, branch, input, policy, progress, cancel)
                        .await
                }
            }))
            .buffer_unordered(max_concurrency)
            .collect()
            .await;

        let mut agents = Vec::new();
        let mut handoff = HandoffContext::new();
        let mut failed = false;
        for outcome in outcomes {
            let outcome = outcome?;
            for agent in &outcome.agents {
                session.push_agent(agent.agent_id)?;
            }
            for entry in outcome.handoff.entries() {
                handoff.record(
                    entry.role,
                    entry.branch.as_deref(),
                    &json!(entry.summary),
                    entry.key_events.clone(),
                );
            }
            agents.extend(outcome.agents);
            failed |= outcome.failed;
        }

        // Final sweep: conflicts between the last finishers.
        let conflicts = self
            .detector
            .detect(session.workflow_id, session.context_id)
            .await?;
        if !conflicts.is_empty() {
            self.record_conflict_event(&session, &conflicts).await?;
            if policy == FailurePolicy::Stop {
                failed = true;
            }
        }
        if cancel.is_cancelled() {
            failed = true;
        }

        self.finalize(&mut session, agents, &handoff, failed).await?;
        Ok(session)
    }

    /// One branch runs its role set sequentially; after every completed
    /// role the detector looks for collisions with other branches and, on
    /// a hit under the stop policy, cancels the whole fan-out.
    ///
    /// The branch name is guarded by an advisory store lock so two
    /// workflows cannot operate on the same branch concurrently; the lock
    /// is released when the branch chain reaches its terminal state.
    #[allow(clippy::too_many_arguments)]
    async fn run_branch(
        &self,
        session: &WorkflowSession,
        spec: WorkflowSpec,
        branch: BranchSpec,
        input: serde_json::Value,
        policy: FailurePolicy,
        progress: Option<&ProgressSender>,
        cancel: CancellationToken,
    ) -> BatonResult<BranchOutcome> {
        let lock_name = format!("branch/{}", branch.name);
        let holder = session.workflow_id.to_string();
        if let Err(e) = self
            .store
            .acquire_resource_lock(&lock_name, &holder, BRANCH_LOCK_TTL)
            .await
        {
            warn!(branch = %branch.name, error = %e, "branch is locked by another workflow");
            return Ok(BranchOutcome {
                agents: Vec::new(),
                handoff: HandoffContext::new(),
                failed: true,
            });
        }

        let outcome = self
            .run_branch_locked(session, spec, branch, input, policy, progress, cancel)
            .await;
        if let Err(e) = self.store.release_resource_lock(&lock_name, &holder).await {
            warn!(lock = %lock_name, error = %e, "branch lock release failed");
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_branch_locked(
        &self,
        session: &WorkflowSession,
        spec: WorkflowSpec,
        branch: BranchSpec,
        input: serde_json::Value,
        policy: FailurePolicy,
        progress: Option<&ProgressSender>,
        cancel: CancellationToken,
    ) -> BatonResult<BranchOutcome> {
        let mut local = WorkflowSession {
            agent_ids: Vec::new(),
            ..session.clone()
        };
        let mut handoff = HandoffContext::new();
        let mut agents = Vec::new();
        let mut failed = false;

        for role in spec.roles {
            if cancel.is_cancelled() {
                failed = true;
                break;
            }

            let mut attempts = Vec::new();
            let result = self
                .run_role_with_retry(
                    &mut local,
                    *role,
                    Some(&branch),
                    &input,
                    &handoff,
                    policy,
                    progress,
                    &cancel,
                    &mut attempts,
                )
                .await?;
            let succeeded = result.is_some();

            if let Some(result) = result {
                handoff.record(*role, Some(&branch.name), &result, Vec::new());
            }
            agents.extend(attempts);

            if succeeded {
                let conflicts = self
                    .detector
                    .detect(session.workflow_id, session.context_id)
                    .await?;
                if !conflicts.is_empty() {
                    self.record_conflict_event(session, &conflicts).await?;
                    if policy == FailurePolicy::Stop {
                        cancel.cancel();
                        failed = true;
                        break;
                    }
                }
            } else if policy != FailurePolicy::Continue {
                failed = true;
                if policy == FailurePolicy::Stop {
                    cancel.cancel();
                }
                break;
            }
        }

        Ok(BranchOutcome {
            agents,
            handoff,
            failed,
        })
    }

    // ========================================================================
    // FINALIZATION
    // ========================================================================

    async fn record_conflict_event(
        &self,
        session: &WorkflowSession,
        conflicts: &[ConflictRecord],
    ) -> BatonResult<()> {
        self.store
            .append_event(
                session.context_id,
                EventKind::Error,
                8,
                json!({
                    "error": ErrorKind::ConflictDetected.as_db_str(),
                    "workflow": session.workflow_id,
                    "conflicts": conflicts
                        .iter()
                        .map(|c| json!({
                            "kind": c.kind.as_db_str(),
                            "subject": c.subject,
                            "branches": [c.first_branch, c.second_branch],
                        }))
                        .collect::<Vec<_>>(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Commit the terminal workflow state and its agents in one
    /// transaction.
    async fn finalize(
        &self,
        session: &mut WorkflowSession,
        agents: Vec<AgentInstance>,
        handoff: &HandoffContext,
        failed: bool,
    ) -> BatonResult<()> {
        session.handoff =
            serde_json::to_string(handoff).unwrap_or_default();
        session.finish(if failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        });
        self.store.commit_workflow_terminal(session, &agents).await?;
        info!(
            workflow = %session.workflow_id,
            status = %session.status,
            agents = agents.len(),
            "workflow finalized"
        );
        Ok(())
    }
}

/// Merge workflow input, branch extras and the handoff digest into one
/// role input.
fn merge_role_input(
    input: &serde_json::Value,
    branch: Option<&BranchSpec>,
    handoff: &HandoffContext,
) -> serde_json::Value {
    let mut merged = input.clone();
    if !merged.is_object() {
        merged = json!({});
    }
    if let Some(branch) = branch {
        if let Some(extra) = branch.extra.as_object() {
            for (key, value) in extra {
                merged[key] = value.clone();
            }
        }
        merged["branch"] = json!(branch.name);
    }
    if !handoff.is_empty() {
        merged["handoff"] = json!(handoff.to_xml());
    }
    merged
}

/// Branch specs come from the workflow input's `branches` array.
fn parse_branches(input: &serde_json::Value) -> BatonResult<Vec<BranchSpec>> {
    let branches = input
        .get("branches")
        .and_then(|v| v.as_array())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| {
            BatonError::Config(ConfigError::MissingRequired {
                field: "branches".to_string(),
            })
        })?;

    branches
        .iter()
        .map(|branch| {
            let name = branch
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    BatonError::Config(ConfigError::MissingRequired {
                        field: "branches[].name".to_string(),
                    })
                })?;
            Ok(BranchSpec {
                name: name.to_string(),
                extra: branch.clone(),
            })
        })
        .collect()
}
