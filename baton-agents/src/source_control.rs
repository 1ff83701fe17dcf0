//! Source-control role: branch, pull-request, comment and status-check
//! actions against the source-control host.

use crate::RoleDeps;
use async_trait::async_trait;
use baton_core::{AgentFailure, AgentRoleKind, ErrorKind};
use baton_external::SERVICE_SOURCE_CONTROL;
use baton_runtime::{AgentBehavior, StepContext, StepPlan};
use serde::Deserialize;
use serde_json::json;

/// Enumerated actions this role can execute.
const ACTIONS: &[&str] = &["create-branch", "create-pull-request", "comment", "status-check"];

/// Parsed action input.
#[derive(Debug, Clone, Deserialize)]
struct ActionInput {
    action: String,
    owner: String,
    repo: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default = "default_base")]
    base: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    number: Option<i64>,
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    touched_files: Vec<String>,
}

fn default_base() -> String {
    "main".to_string()
}

pub struct SourceControlRole {
    deps: RoleDeps,
    plan: StepPlan,
}

impl SourceControlRole {
    pub fn new(deps: RoleDeps) -> Self {
        let plan = StepPlan::from_names(&[
            "authenticate",
            "validate-repo",
            "execute-action",
            "update-progress",
        ])
        .expect("plan within step budget");
        Self { deps, plan }
    }

    fn parse_input(&self, input: &serde_json::Value) -> Result<ActionInput, AgentFailure> {
        let parsed: ActionInput = serde_json::from_value(input.clone()).map_err(|e| {
            AgentFailure::new(ErrorKind::ConfigInvalid, format!("validation-failed: {e}"))
        })?;
        if !ACTIONS.contains(&parsed.action.as_str()) {
            return Err(AgentFailure::new(
                ErrorKind::ConfigInvalid,
                format!("validation-failed: unknown action '{}'", parsed.action),
            ));
        }
        if parsed.owner.is_empty() || parsed.repo.is_empty() {
            return Err(AgentFailure::new(
                ErrorKind::ConfigInvalid,
                "validation-failed: owner and repo are required",
            ));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl AgentBehavior for SourceControlRole {
    fn role(&self) -> AgentRoleKind {
        AgentRoleKind::SourceControl
    }

    fn plan(&self) -> &StepPlan {
        &self.plan
    }

    async fn execute_step(
        &self,
        step: &str,
        cx: &StepContext,
    ) -> Result<serde_json::Value, AgentFailure> {
        let host = self.deps.source_control.as_ref().ok_or_else(|| {
            AgentFailure::new(
                ErrorKind::ConfigInvalid,
                "no source-control host configured",
            )
        })?;

        match step {
            "authenticate" => {
                self.deps
                    .credentials
                    .require(SERVICE_SOURCE_CONTROL)
                    .map_err(|e| {
                        AgentFailure::new(ErrorKind::AuthMissing, e.to_string())
                    })?;
                let user = host
                    .authenticated_user()
                    .await
                    .map_err(|e| AgentFailure::new(e.kind(), e.to_string()))?;
                Ok(json!({"user": user}))
            }
            "validate-repo" => {
                let input = self.parse_input(&cx.input)?;
                Ok(json!({
                    "action": input.action,
                    "owner": input.owner,
                    "repo": input.repo,
                }))
            }
            "execute-action" => {
                let input = self.parse_input(&cx.input)?;
                let result = match input.action.as_str() {
                    "create-branch" => {
                        let branch = input.branch.as_deref().ok_or_else(|| {
                            AgentFailure::new(
                                ErrorKind::ConfigInvalid,
                                "validation-failed: branch name is required",
                            )
                        })?;
                        host.create_branch(&input.owner, &input.repo, branch, &input.base)
                            .await
                    }
                    "create-pull-request" => {
                        let branch = input.branch.as_deref().ok_or_else(|| {
                            AgentFailure::new(
                                ErrorKind::ConfigInvalid,
                                "validation-failed: head branch is required",
                            )
                        })?;
                        host.create_pull_request(
                            &input.owner,
                            &input.repo,
                            branch,
                            &input.base,
                            input.title.as_deref().unwrap_or("Automated change"),
                            input.body.as_deref().unwrap_or(""),
                            &input.labels,
                        )
                        .await
                    }
                    "comment" => {
                        let number = input.number.ok_or_else(|| {
                            AgentFailure::new(
                                ErrorKind::ConfigInvalid,
                                "validation-failed: issue number is required",
                            )
                        })?;
                        host.post_comment(
                            &input.owner,
                            &input.repo,
                            number,
                            input.body.as_deref().unwrap_or(""),
                        )
                        .await
                    }
                    "status-check" => {
                        let sha = input.sha.as_deref().ok_or_else(|| {
                            AgentFailure::new(
                                ErrorKind::ConfigInvalid,
                                "validation-failed: commit sha is required",
                            )
                        })?;
                        host.status_check(
                            &input.owner,
                            &input.repo,
                            sha,
                            input.state.as_deref().unwrap_or("success"),
                            input.body.as_deref().unwrap_or("baton"),
                        )
                        .await
                        .map(|_| baton_external::ExternalRef {
                            external_id: sha.to_string(),
                            url: String::new(),
                        })
                    }
                    _ => unreachable!("validated above"),
                }
                .map_err(|e| AgentFailure::new(e.kind(), format!("remote-error: {e}")))?;

                Ok(json!({
                    "external_id": result.external_id,
                    "url": result.url,
                    "touched_files": input.touched_files,
                }))
            }
            "update-progress" => {
                let executed = &cx.working["execute-action"];
                Ok(json!({
                    "status": "done",
                    "url": executed.get("url").cloned().unwrap_or_default(),
                }))
            }
            other => Err(AgentFailure::new(
                ErrorKind::StateViolation,
                format!("unknown step '{other}'"),
            )),
        }
    }
}
