//! Container runtime client.
//!
//! The contract covers image build, network create, container run with a
//! health check, and container stop. `DockerCli` drives the local daemon
//! through the CLI in a subprocess with captured output and a hard
//! timeout per invocation.

use async_trait::async_trait;
use baton_core::ExternalError;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const SYSTEM: &str = "container-runtime";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// The narrow contract the core needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build an image from a build context directory; returns the tag.
    async fn build_image(&self, context_dir: &str, tag: &str) -> Result<String, ExternalError>;

    /// Create a network; returns its identity.
    async fn create_network(&self, name: &str) -> Result<String, ExternalError>;

    /// Run a detached container; returns its identity.
    async fn run_container(
        &self,
        image: &str,
        name: &str,
        network: Option<&str>,
        env: &[(String, String)],
    ) -> Result<String, ExternalError>;

    /// Whether a container reports healthy (or running, without a check).
    async fn health_check(&self, container: &str) -> Result<bool, ExternalError>;

    /// Stop a container.
    async fn stop_container(&self, container: &str) -> Result<(), ExternalError>;
}

// ============================================================================
// DOCKER CLI
// ============================================================================

/// CLI-backed Docker client.
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the binary (tests substitute a stub).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one CLI invocation, returning trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String, ExternalError> {
        debug!(binary = %self.binary, ?args, "container runtime invocation");
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let child = command.spawn().map_err(|e| ExternalError::Rejected {
            system: SYSTEM.to_string(),
            status: 0,
            message: format!("spawn {}: {e}", self.binary),
        })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExternalError::Timeout {
                system: SYSTEM.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| ExternalError::Rejected {
                system: SYSTEM.to_string(),
                status: 0,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ExternalError::Rejected {
                system: SYSTEM.to_string(),
                status: output.status.code().unwrap_or(-1).unsigned_abs() as u16,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build_image(&self, context_dir: &str, tag: &str) -> Result<String, ExternalError> {
        self.run(&["build", "--quiet", "--tag", tag, context_dir])
            .await?;
        Ok(tag.to_string())
    }

    async fn create_network(&self, name: &str) -> Result<String, ExternalError> {
        self.run(&["network", "create", name]).await
    }

    async fn run_container(
        &self,
        image: &str,
        name: &str,
        network: Option<&str>,
        env: &[(String, String)],
    ) -> Result<String, ExternalError> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            name.into(),
        ];
        if let Some(network) = network {
            args.push("--network".into());
            args.push(network.into());
        }
        for (key, value) in env {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }
        args.push(image.into());
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&refs).await
    }

    async fn health_check(&self, container: &str) -> Result<bool, ExternalError> {
        let status = self
            .run(&[
                "inspect",
                "--format",
                "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}",
                container,
            ])
            .await?;
        Ok(status == "healthy" || status == "running")
    }

    async fn stop_container(&self, container: &str) -> Result<(), ExternalError> {
        self.run(&["stop", container]).await?;
        Ok(())
    }
}
