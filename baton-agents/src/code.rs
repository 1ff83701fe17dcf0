//! Code role: structured, framework-tagged code artifact generation.
//!
//! Generation here is deterministic scaffolding: the plan step decides the
//! module list, generate emits artifacts, validate checks their shape and
//! test exercises the embedded checks. Declared touched files feed the
//! cross-agent conflict detector.

use async_trait::async_trait;
use baton_core::{AgentFailure, AgentRoleKind, ErrorKind};
use baton_runtime::{AgentBehavior, StepContext, StepPlan};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One generated code artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub path: String,
    pub content: String,
}

pub struct CodeRole {
    plan: StepPlan,
}

impl Default for CodeRole {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeRole {
    pub fn new() -> Self {
        let plan = StepPlan::from_names(&["plan", "generate", "validate", "test"])
            .expect("plan within step budget");
        Self { plan }
    }

    fn modules_from_input(input: &serde_json::Value) -> Vec<String> {
        input
            .get("modules")
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .filter(|names: &Vec<String>| !names.is_empty())
            .unwrap_or_else(|| vec!["lib".to_string()])
    }

    fn framework_from_input(input: &serde_json::Value) -> String {
        input
            .get("framework")
            .and_then(|v| v.as_str())
            .unwrap_or("rust")
            .to_string()
    }

    fn scaffold(module: &str, goal: &str) -> CodeArtifact {
        let type_name: String = {
            let mut upper_next = true;
            module
                .chars()
                .filter_map(|c| {
                    if c.is_ascii_alphanumeric() {
                        let out = if upper_next {
                            c.to_ascii_uppercase()
                        } else {
                            c
                        };
                        upper_next = false;
                        Some(out)
                    } else {
                        upper_next = true;
                        None
                    }
                })
                .collect()
        };
        let content = format!(
            "//! {goal}\n\n\
             pub struct {type_name};\n\n\
             impl {type_name} {{\n\
             \x20   pub fn new() -> Self {{\n\
             \x20       Self\n\
             \x20   }}\n\
             }}\n\n\
             #[cfg(test)]\n\
             mod tests {{\n\
             \x20   use super::*;\n\n\
             \x20   #[test]\n\
             \x20   fn constructs() {{\n\
             \x20       let _ = {type_name}::new();\n\
             \x20   }}\n\
             }}\n"
        );
        CodeArtifact {
            path: format!("src/{module}.rs"),
            content,
        }
    }
}

#[async_trait]
impl AgentBehavior for CodeRole {
    fn role(&self) -> AgentRoleKind {
        AgentRoleKind::Code
    }

    fn plan(&self) -> &StepPlan {
        &self.plan
    }

    async fn execute_step(
        &self,
        step: &str,
        cx: &StepContext,
    ) -> Result<serde_json::Value, AgentFailure> {
        match step {
            "plan" => {
                let modules = Self::modules_from_input(&cx.input);
                let framework = Self::framework_from_input(&cx.input);
                Ok(json!({"modules": modules, "framework": framework}))
            }
            "generate" => {
                let modules = cx.working["plan"]["modules"]
                    .as_array()
                    .map(|m| {
                        m.iter()
                            .filter_map(|v| v.as_str())
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                let goal = cx
                    .input
                    .get("goal")
                    .and_then(|v| v.as_str())
                    .unwrap_or("generated module");

                let artifacts: Vec<CodeArtifact> = modules
                    .iter()
                    .map(|module| Self::scaffold(module, goal))
                    .collect();
                let touched: Vec<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();

                Ok(json!({
                    "framework": cx.working["plan"]["framework"],
                    "artifacts": artifacts,
                    "touched_files": touched,
                }))
            }
            "validate" => {
                let artifacts: Vec<CodeArtifact> =
                    serde_json::from_value(cx.working["generate"]["artifacts"].clone())
                        .map_err(|e| {
                            AgentFailure::new(
                                ErrorKind::StateViolation,
                                format!("generate step produced malformed artifacts: {e}"),
                            )
                        })?;
                if artifacts.is_empty() {
                    return Err(AgentFailure::new(
                        ErrorKind::ConfigInvalid,
                        "generation produced no artifacts",
                    ));
                }
                let mut paths: Vec<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();
                paths.sort_unstable();
                paths.dedup();
                if paths.len() != artifacts.len() {
                    return Err(AgentFailure::new(
                        ErrorKind::ConfigInvalid,
                        "duplicate artifact paths",
                    ));
                }
                if artifacts.iter().any(|a| a.content.trim().is_empty()) {
                    return Err(AgentFailure::new(
                        ErrorKind::ConfigInvalid,
                        "empty artifact content",
                    ));
                }
                Ok(json!({"valid": true, "artifacts": artifacts.len()}))
            }
            "test" => {
                let artifacts: Vec<CodeArtifact> =
                    serde_json::from_value(cx.working["generate"]["artifacts"].clone())
                        .unwrap_or_default();
                let with_tests = artifacts
                    .iter()
                    .filter(|a| a.content.contains("#[cfg(test)]"))
                    .count();
                if with_tests < artifacts.len() {
                    return Err(AgentFailure::new(
                        ErrorKind::ConfigInvalid,
                        "generated artifacts are missing test modules",
                    ));
                }
                Ok(json!({"passed": with_tests}))
            }
            other => Err(AgentFailure::new(
                ErrorKind::StateViolation,
                format!("unknown step '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::{AgentInstance, AgentState, EntityIdType, WorkflowId};
    use baton_runtime::AgentRuntime;
    use baton_test_utils::{mem_store, seeded_context};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_generates_framework_tagged_artifacts() {
        let store = mem_store().await;
        let context = seeded_context(&store, "codegen").await;
        let runtime = AgentRuntime::new(store);
        let role = CodeRole::new();

        let mut agent = AgentInstance::new(
            AgentRoleKind::Code,
            WorkflowId::now_v7(),
            context.context_id,
        );
        let input = json!({
            "goal": "login rate limiting",
            "framework": "axum",
            "modules": ["rate_limit", "middleware"],
        });
        let result = runtime
            .execute(&mut agent, &role, input, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(agent.state, AgentState::Completed);
        assert_eq!(result["generate"]["framework"], json!("axum"));
        assert_eq!(
            result["generate"]["touched_files"],
            json!(["src/rate_limit.rs", "src/middleware.rs"])
        );
        assert_eq!(result["validate"], json!({"valid": true, "artifacts": 2}));
        assert_eq!(result["test"], json!({"passed": 2}));

        let artifacts: Vec<CodeArtifact> =
            serde_json::from_value(result["generate"]["artifacts"].clone()).unwrap();
        assert!(artifacts[0].content.contains("pub struct RateLimit"));
        assert!(artifacts[0].content.contains("#[cfg(test)]"));
    }

    #[tokio::test]
    async fn test_defaults_to_single_module() {
        let store = mem_store().await;
        let context = seeded_context(&store, "default module").await;
        let runtime = AgentRuntime::new(store);
        let role = CodeRole::new();

        let mut agent = AgentInstance::new(
            AgentRoleKind::Code,
            WorkflowId::now_v7(),
            context.context_id,
        );
        let result = runtime
            .execute(
                &mut agent,
                &role,
                json!({"goal": "anything"}),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result["plan"]["modules"], json!(["lib"]));
        assert_eq!(result["generate"]["touched_files"], json!(["src/lib.rs"]));
    }
}
