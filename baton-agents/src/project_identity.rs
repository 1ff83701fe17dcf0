//! Project-identity role: writes the human-readable identity document
//! (the durable face of a project) as distinct from the event log.

use crate::RoleDeps;
use async_trait::async_trait;
use baton_context::{identity_document_path, write_identity_document};
use baton_core::{
    AgentFailure, AgentRoleKind, Context, ContextScope, ErrorKind,
};
use baton_runtime::{AgentBehavior, StepContext, StepPlan};
use serde_json::json;

pub struct ProjectIdentityRole {
    deps: RoleDeps,
    plan: StepPlan,
}

impl ProjectIdentityRole {
    pub fn new(deps: RoleDeps) -> Self {
        let plan = StepPlan::from_names(&[
            "create-directory",
            "write-identity-document",
            "link-session",
            "preserve-context",
            "finalize",
        ])
        .expect("plan within step budget");
        Self { deps, plan }
    }

    /// The identity document is addressed by goal and context identity; the
    /// rest of the descriptor is only needed for initial rendering.
    fn descriptor(&self, cx: &StepContext) -> Result<Context, AgentFailure> {
        let goal = cx
            .input
            .get("goal")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AgentFailure::new(ErrorKind::ConfigInvalid, "identity input requires a 'goal'")
            })?;
        let mut context = Context::new(ContextScope::Project, goal, 0);
        context.context_id = cx.context_id;
        Ok(context)
    }
}

#[async_trait]
impl AgentBehavior for ProjectIdentityRole {
    fn role(&self) -> AgentRoleKind {
        AgentRoleKind::ProjectIdentity
    }

    fn plan(&self) -> &StepPlan {
        &self.plan
    }

    async fn execute_step(
        &self,
        step: &str,
        cx: &StepContext,
    ) -> Result<serde_json::Value, AgentFailure> {
        let descriptor = self.descriptor(cx)?;
        let path = identity_document_path(&self.deps.projects_dir, &descriptor);

        match step {
            "create-directory" => {
                let dir = path.parent().ok_or_else(|| {
                    AgentFailure::new(ErrorKind::ConfigInvalid, "identity path has no parent")
                })?;
                std::fs::create_dir_all(dir).map_err(|e| {
                    AgentFailure::new(
                        ErrorKind::ConfigInvalid,
                        format!("projects directory create failed: {e}"),
                    )
                })?;
                Ok(json!({"dir": dir.display().to_string()}))
            }
            "write-identity-document" => {
                let (written_path, sha256) =
                    write_identity_document(&self.deps.projects_dir, &descriptor)
                        .map_err(|e| AgentFailure::new(ErrorKind::ConfigInvalid, e.to_string()))?;
                Ok(json!({
                    "path": written_path.display().to_string(),
                    "sha256": sha256,
                }))
            }
            "link-session" => Ok(json!({
                "session": cx.context_id,
                "workflow": cx.workflow_id,
            })),
            "preserve-context" => {
                // Carry the handoff digest into the record so the document
                // work is traceable to what preceded it.
                let handoff = cx
                    .input
                    .get("handoff")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(json!({"preserved": true, "handoff_chars": handoff.len()}))
            }
            "finalize" => {
                let written = &cx.working["write-identity-document"];
                Ok(json!({
                    "path": written["path"],
                    "sha256": written["sha256"],
                    "touched_files": [written["path"]],
                }))
            }
            other => Err(AgentFailure::new(
                ErrorKind::StateViolation,
                format!("unknown step '{other}'"),
            )),
        }
    }
}
