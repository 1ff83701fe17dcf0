//! Verification probes.
//!
//! A probe is an executable check: a shell command spawned in a
//! subprocess with captured output, an HTTP health check, or an internal
//! predicate. The probe language is opaque to the core; only the
//! interpretation of its result is specified here.

use baton_core::{TaskStatus, VerifyError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Default negative sentinels: output containing any of these is not
/// accepted as success even on a zero exit.
pub(crate) const DEFAULT_SENTINELS: &[&str] = &["FAIL", "FAILED", "ERROR", "panicked"];

/// One registered probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Shell command run via `sh -c` with captured stdout+stderr
    Shell { command: String },
    /// HTTP GET; 2xx counts as success
    Http { url: String },
    /// Named internal predicate function
    Predicate { name: String },
}

impl Probe {
    /// Human-readable command string, recorded verbatim on verification
    /// records and lessons.
    pub fn command_string(&self) -> String {
        match self {
            Probe::Shell { command } => command.clone(),
            Probe::Http { url } => format!("GET {url}"),
            Probe::Predicate { name } => format!("predicate:{name}"),
        }
    }
}

/// Raw probe execution result, before discrepancy interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub verified: TaskStatus,
    pub output: String,
    pub command: String,
}

type PredicateFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Maps task identifiers to probes.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    probes: HashMap<String, Probe>,
    predicates: HashMap<String, PredicateFn>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe for a task.
    pub fn register(&mut self, task_id: impl Into<String>, probe: Probe) {
        self.probes.insert(task_id.into(), probe);
    }

    /// Register an internal predicate referenced by `Probe::Predicate`.
    pub fn register_predicate(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
    ) {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    /// Look up the probe for a task.
    pub fn get(&self, task_id: &str) -> Result<&Probe, VerifyError> {
        self.probes
            .get(task_id)
            .ok_or_else(|| VerifyError::ProbeMissing(task_id.to_string()))
    }

    pub(crate) fn predicate(&self, name: &str) -> Option<PredicateFn> {
        self.predicates.get(name).cloned()
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("probes", &self.probes.len())
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

/// Execute one probe under the hard timeout and interpret its result:
/// success with no negative sentinel verifies `completed`.
pub(crate) async fn execute(
    registry: &ProbeRegistry,
    task_id: &str,
    probe: &Probe,
    hard_timeout: Duration,
    sentinels: &[String],
) -> Result<ProbeOutcome, VerifyError> {
    let command = probe.command_string();
    debug!(task = task_id, %command, "executing verification probe");

    let (succeeded, output) = match probe {
        Probe::Shell { command } => run_shell(task_id, command, hard_timeout).await?,
        Probe::Http { url } => run_http(url, hard_timeout).await,
        Probe::Predicate { name } => {
            let predicate = registry
                .predicate(name)
                .ok_or_else(|| VerifyError::ProbeMissing(format!("predicate:{name}")))?;
            let ok = predicate();
            (ok, format!("predicate {name} returned {ok}"))
        }
    };

    let clean = !sentinels.iter().any(|s| output.contains(s.as_str()));
    let verified = if succeeded && clean {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };

    Ok(ProbeOutcome {
        verified,
        output,
        command,
    })
}

async fn run_shell(
    task_id: &str,
    command: &str,
    hard_timeout: Duration,
) -> Result<(bool, String), VerifyError> {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| VerifyError::SpawnFailed {
        task: task_id.to_string(),
        reason: e.to_string(),
    })?;

    match timeout(hard_timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok((output.status.success(), combined))
        }
        Ok(Err(e)) => Ok((false, format!("probe execution failed: {e}"))),
        Err(_) => Ok((
            false,
            format!("probe timed out after {}s", hard_timeout.as_secs()),
        )),
    }
}

async fn run_http(url: &str, hard_timeout: Duration) -> (bool, String) {
    let client = reqwest::Client::builder()
        .timeout(hard_timeout)
        .build()
        .unwrap_or_default();
    match client.get(url).send().await {
        Ok(response) => {
            let ok = response.status().is_success();
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            (ok, format!("HTTP {status}: {body}"))
        }
        Err(e) => (false, format!("HTTP probe failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinels() -> Vec<String> {
        DEFAULT_SENTINELS.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_shell_success() {
        let registry = ProbeRegistry::new();
        let probe = Probe::Shell {
            command: "true".to_string(),
        };
        let outcome = execute(&registry, "t", &probe, Duration::from_secs(5), &sentinels())
            .await
            .unwrap();
        assert_eq!(outcome.verified, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_shell_nonzero_exit_fails() {
        let registry = ProbeRegistry::new();
        let probe = Probe::Shell {
            command: "exit 1".to_string(),
        };
        let outcome = execute(&registry, "t", &probe, Duration::from_secs(5), &sentinels())
            .await
            .unwrap();
        assert_eq!(outcome.verified, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_negative_sentinel_overrides_exit_code() {
        let registry = ProbeRegistry::new();
        let probe = Probe::Shell {
            command: "echo '3 tests FAILED'; exit 0".to_string(),
        };
        let outcome = execute(&registry, "t", &probe, Duration::from_secs(5), &sentinels())
            .await
            .unwrap();
        assert_eq!(outcome.verified, TaskStatus::Failed);
        assert!(outcome.output.contains("FAILED"));
    }

    #[tokio::test]
    async fn test_timeout_fails_closed() {
        let registry = ProbeRegistry::new();
        let probe = Probe::Shell {
            command: "sleep 5".to_string(),
        };
        let outcome = execute(
            &registry,
            "t",
            &probe,
            Duration::from_millis(100),
            &sentinels(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.verified, TaskStatus::Failed);
        assert!(outcome.output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_predicate_probe() {
        let mut registry = ProbeRegistry::new();
        registry.register_predicate("always-green", || true);
        let probe = Probe::Predicate {
            name: "always-green".to_string(),
        };
        let outcome = execute(&registry, "t", &probe, Duration::from_secs(5), &sentinels())
            .await
            .unwrap();
        assert_eq!(outcome.verified, TaskStatus::Completed);

        let missing = Probe::Predicate {
            name: "unregistered".to_string(),
        };
        assert!(matches!(
            execute(&registry, "t", &missing, Duration::from_secs(5), &sentinels()).await,
            Err(VerifyError::ProbeMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_output_capture_includes_stderr() {
        let registry = ProbeRegistry::new();
        let probe = Probe::Shell {
            command: "echo out; echo err >&2".to_string(),
        };
        let outcome = execute(&registry, "t", &probe, Duration::from_secs(5), &sentinels())
            .await
            .unwrap();
        assert!(outcome.output.contains("out"));
        assert!(outcome.output.contains("err"));
    }
}
