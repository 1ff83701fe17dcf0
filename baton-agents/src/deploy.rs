//! Deploy role: container build, network setup, run and health check
//! through the container runtime contract.

use crate::RoleDeps;
use async_trait::async_trait;
use baton_core::{AgentFailure, AgentRoleKind, ErrorKind};
use baton_external::ContainerRuntime;
use baton_runtime::{AgentBehavior, StepContext, StepPlan, StepSpec};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
struct DeployInput {
    app_name: String,
    image_tag: String,
    #[serde(default = "default_context_dir")]
    context_dir: String,
    /// Create a dedicated network for the app
    #[serde(default)]
    network: bool,
    #[serde(default)]
    env: HashMap<String, String>,
    /// Stop the container again after a successful health check
    #[serde(default)]
    ephemeral: bool,
}

fn default_context_dir() -> String {
    ".".to_string()
}

pub struct DeployRole {
    deps: RoleDeps,
    plan: StepPlan,
}

impl DeployRole {
    pub fn new(deps: RoleDeps) -> Self {
        let plan = StepPlan::new(vec![
            StepSpec::new("validate-env"),
            StepSpec::new("build"),
            // Only runs when validate-env recorded a network request
            StepSpec::new("network-setup")
                .with_guard(|working| working["validate-env"]["network"] == serde_json::json!(true)),
            StepSpec::new("deploy"),
            StepSpec::new("health-check"),
            // Only runs for ephemeral smoke deployments
            StepSpec::new("cleanup")
                .with_guard(|working| working["validate-env"]["ephemeral"] == serde_json::json!(true)),
        ])
        .expect("plan within step budget");
        Self { deps, plan }
    }

    fn runtime(&self) -> Result<&Arc<dyn ContainerRuntime>, AgentFailure> {
        self.deps.containers.as_ref().ok_or_else(|| {
            AgentFailure::new(
                ErrorKind::AuthMissing,
                "container runtime not configured; set DOCKER_HOST or wire a runtime",
            )
        })
    }

    fn parse_input(input: &serde_json::Value) -> Result<DeployInput, AgentFailure> {
        let parsed: DeployInput = serde_json::from_value(input.clone())
            .map_err(|e| AgentFailure::new(ErrorKind::ConfigInvalid, format!("deploy input: {e}")))?;
        if parsed.app_name.is_empty() || parsed.image_tag.is_empty() {
            return Err(AgentFailure::new(
                ErrorKind::ConfigInvalid,
                "app_name and image_tag are required",
            ));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl AgentBehavior for DeployRole {
    fn role(&self) -> AgentRoleKind {
        AgentRoleKind::Deploy
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
            "validate-env" => {
                self.runtime()?;
                let input = Self::parse_input(&cx.input)?;
                Ok(json!({
                    "app_name": input.app_name,
                    "image_tag": input.image_tag,
                    "network": input.network,
                    "ephemeral": input.ephemeral,
                }))
            }
            "build" => {
                let input = Self::parse_input(&cx.input)?;
                let tag = self
                    .runtime()?
                    .build_image(&input.context_dir, &input.image_tag)
                    .await
                    .map_err(|e| AgentFailure::new(e.kind(), e.to_string()))?;
                Ok(json!({"image": tag}))
            }
            "network-setup" => {
                let input = Self::parse_input(&cx.input)?;
                let network_name = format!("{}-net", input.app_name);
                let id = self
                    .runtime()?
                    .create_network(&network_name)
                    .await
                    .map_err(|e| AgentFailure::new(e.kind(), e.to_string()))?;
                Ok(json!({"network": network_name, "id": id}))
            }
            "deploy" => {
                let input = Self::parse_input(&cx.input)?;
                let network = cx.working["network-setup"]["network"]
                    .as_str()
                    .map(str::to_string);
                let env: Vec<(String, String)> = input.env.clone().into_iter().collect();
                let container = self
                    .runtime()?
                    .run_container(
                        &input.image_tag,
                        &input.app_name,
                        network.as_deref(),
                        &env,
                    )
                    .await
                    .map_err(|e| AgentFailure::new(e.kind(), e.to_string()))?;
                Ok(json!({"container": container}))
            }
            "health-check" => {
                let container = cx.working["deploy"]["container"]
                    .as_str()
                    .ok_or_else(|| {
                        AgentFailure::new(ErrorKind::StateViolation, "deploy step left no container")
                    })?;
                let healthy = self
                    .runtime()?
                    .health_check(container)
                    .await
                    .map_err(|e| AgentFailure::new(e.kind(), e.to_string()))?;
                if !healthy {
                    return Err(AgentFailure::new(
                        ErrorKind::ExternalRejected,
                        format!("container {container} failed its health check"),
                    ));
                }
                Ok(json!({"healthy": true}))
            }
            "cleanup" => {
                let container = cx.working["deploy"]["container"]
                    .as_str()
                    .unwrap_or_default();
                if !container.is_empty() {
                    self.runtime()?
                        .stop_container(container)
                        .await
                        .map_err(|e| AgentFailure::new(e.kind(), e.to_string()))?;
                }
                Ok(json!({"stopped": container}))
            }
            other => Err(AgentFailure::new(
                ErrorKind::StateViolation,
                format!("unknown step '{other}'"),
            )),
        }
    }
}
