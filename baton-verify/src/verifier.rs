//! The verifier: claimed status against probe evidence.

use crate::probe::{self, Probe, ProbeRegistry, DEFAULT_SENTINELS};
use baton_core::{
    AgentInstanceId, BatonResult, Lesson, LessonKind, TaskStatus, VerificationRecord,
};
use baton_store::Store;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{info, warn};

/// `- [x] task` lines in a progress document.
static COMPLETED_TASK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*]\s*\[[xX]\]\s+(.+?)\s*$").expect("task regex compiles"));

/// Aggregate result of a batch verification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub accurate: usize,
    pub discrepancies: Vec<String>,
    /// Fraction of claims that verified, 1.0 when nothing was claimed
    pub accuracy: f64,
}

/// Compares claimed completions against configured probes and records the
/// outcome. A discrepancy inserts exactly one `mistake` lesson.
pub struct Verifier {
    store: Store,
    registry: ProbeRegistry,
    timeout: Duration,
    sentinels: Vec<String>,
}

impl Verifier {
    pub fn new(store: Store, registry: ProbeRegistry) -> Self {
        Self {
            store,
            registry,
            timeout: Duration::from_secs(30),
            sentinels: DEFAULT_SENTINELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Override the hard probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the negative output sentinels.
    pub fn with_sentinels(mut self, sentinels: Vec<String>) -> Self {
        self.sentinels = sentinels;
        self
    }

    /// Verify one claimed task status.
    ///
    /// Looks up the probe, executes it under the hard timeout, interprets
    /// the result, and records the verification. When claimed and
    /// verified disagree, a `mistake` lesson with the probe as its
    /// prevention rule is recorded alongside.
    pub async fn verify_task(
        &self,
        task_id: &str,
        claimed: TaskStatus,
        agent: Option<AgentInstanceId>,
    ) -> BatonResult<VerificationRecord> {
        let registered = self.registry.get(task_id)?.clone();
        let outcome = probe::execute(
            &self.registry,
            task_id,
            &registered,
            self.timeout,
            &self.sentinels,
        )
        .await?;

        let mut record = VerificationRecord::new(
            task_id,
            claimed,
            outcome.verified,
            outcome.command,
            outcome.output,
        );
        if let Some(agent) = agent {
            record = record.with_agent(agent);
        }
        self.store.record_verification(&record).await?;

        if record.discrepancy {
            warn!(
                task = task_id,
                %claimed,
                verified = %record.verified,
                "verification discrepancy"
            );
            let lesson = self.lesson_for(&record, agent).await;
            self.store.record_lesson(&lesson).await?;
        } else {
            info!(task = task_id, verified = %record.verified, "verification agreed");
        }

        Ok(record)
    }

    /// Scan a progress document, verify every task marked complete, and
    /// report aggregate accuracy.
    pub async fn verify_progress_document(&self, document: &str) -> BatonResult<BatchReport> {
        let tasks: Vec<String> = COMPLETED_TASK
            .captures_iter(document)
            .map(|c| c[1].trim().to_string())
            .collect();

        let mut accurate = 0;
        let mut discrepancies = Vec::new();
        for task in &tasks {
            match self.verify_task(task, TaskStatus::Completed, None).await {
                Ok(record) if !record.discrepancy => accurate += 1,
                Ok(_) => discrepancies.push(task.clone()),
                Err(e) => {
                    // A missing probe cannot confirm the claim.
                    warn!(task = %task, error = %e, "batch verification skipped task");
                    discrepancies.push(task.clone());
                }
            }
        }

        let total = tasks.len();
        Ok(BatchReport {
            total,
            accurate,
            discrepancies,
            accuracy: if total == 0 {
                1.0
            } else {
                accurate as f64 / total as f64
            },
        })
    }

    /// Build the auto-recorded lesson for a discrepancy. The agent's role
    /// tags the lesson so it is loaded at that agent's next start.
    async fn lesson_for(
        &self,
        record: &VerificationRecord,
        agent: Option<AgentInstanceId>,
    ) -> Lesson {
        let agent_context = match agent {
            Some(id) => self
                .store
                .get_agent(id)
                .await
                .map(|a| a.role.as_db_str().to_string())
                .unwrap_or_else(|_| "verifier".to_string()),
            None => "verifier".to_string(),
        };
        Lesson::new(
            LessonKind::Mistake,
            agent_context,
            format!(
                "task '{}' was claimed {} but verified {}",
                record.task_id, record.claimed, record.verified
            ),
            format!("run `{}` before claiming completion", record.probe_command),
        )
        .with_probe(record.probe_command.clone())
    }

    /// Register or replace a probe after construction.
    pub fn register_probe(&mut self, task_id: impl Into<String>, probe: Probe) {
        self.registry.register(task_id, probe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_task_extraction() {
        let document = "\
# Progress

- [x] migrate database
- [ ] update docs
* [X] wire health endpoint
  - [x] indented subtask
plain text line
";
        let tasks: Vec<&str> = COMPLETED_TASK
            .captures_iter(document)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(
            tasks,
            vec!["migrate database", "wire health endpoint", "indented subtask"]
        );
    }
}
