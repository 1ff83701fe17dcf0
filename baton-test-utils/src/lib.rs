//! Shared fixtures and fakes for the BATON test suites.
//!
//! The fakes implement the external collaborator traits with an in-memory
//! call log and optional scripted failures, so workflow and role tests
//! run fully offline.

use async_trait::async_trait;
use baton_core::*;
use baton_external::{ChannelInfo, ChatPlatform, ContainerRuntime, ExternalRef, SourceControlHost};
use baton_store::Store;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

// ============================================================================
// FIXTURES
// ============================================================================

/// A config rooted in a fresh temp directory. The directory handle must be
/// kept alive for the duration of the test.
pub fn temp_config() -> (BatonConfig, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = BatonConfig::rooted_at(dir.path().join("baton.db"), dir.path().join("projects"));
    (config, dir)
}

/// An in-memory store.
pub async fn mem_store() -> Store {
    Store::open_in_memory().await.expect("in-memory store")
}

/// A persisted session context ready to receive events.
pub async fn seeded_context(store: &Store, goal: &str) -> Context {
    let context = Context::new(ContextScope::Session, goal, 8_000);
    store.upsert_context(&context).await.expect("context upsert");
    context
}

// ============================================================================
// CALL LOG
// ============================================================================

/// Thread-safe call log shared by the fakes.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c.contains(needle))
    }
}

/// Scripted failure budget: the first `n` calls fail.
#[derive(Debug, Default)]
pub struct FailureBudget(AtomicU32);

impl FailureBudget {
    pub fn set(&self, n: u32) {
        self.0.store(n, Ordering::SeqCst);
    }

    /// Consume one failure if any remain.
    pub fn take(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then(|| n - 1))
            .is_ok()
    }
}

// ============================================================================
// SOURCE-CONTROL FAKE
// ============================================================================

/// Recording `SourceControlHost` with scripted failures.
#[derive(Debug, Default)]
pub struct RecordingSourceControl {
    pub log: CallLog,
    pub failures: FailureBudget,
}

impl RecordingSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn maybe_fail(&self) -> Result<(), ExternalError> {
        if self.failures.take() {
            Err(ExternalError::Timeout {
                system: "source-control".to_string(),
                seconds: 30,
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SourceControlHost for RecordingSourceControl {
    async fn authenticated_user(&self) -> Result<String, ExternalError> {
        self.maybe_fail()?;
        self.log.record("user");
        Ok("baton-bot".to_string())
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        base: &str,
    ) -> Result<ExternalRef, ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!("branch:{owner}/{repo}:{branch}<-{base}"));
        Ok(ExternalRef {
            external_id: format!("refs/heads/{branch}"),
            url: format!("https://git.example.test/{owner}/{repo}/tree/{branch}"),
        })
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        _body: &str,
        labels: &[String],
    ) -> Result<ExternalRef, ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!(
            "pr:{owner}/{repo}:{head}->{base}:{title}:[{}]",
            labels.join(",")
        ));
        Ok(ExternalRef {
            external_id: "42".to_string(),
            url: format!("https://git.example.test/{owner}/{repo}/pull/42"),
        })
    }

    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        _body: &str,
    ) -> Result<ExternalRef, ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!("comment:{owner}/{repo}#{number}"));
        Ok(ExternalRef {
            external_id: "c-1".to_string(),
            url: format!("https://git.example.test/{owner}/{repo}/pull/{number}#c-1"),
        })
    }

    async fn status_check(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: &str,
        _description: &str,
    ) -> Result<(), ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!("status:{owner}/{repo}@{sha}:{state}"));
        Ok(())
    }
}

// ============================================================================
// CHAT FAKE
// ============================================================================

/// Recording `ChatPlatform` with a fixed channel list.
#[derive(Debug)]
pub struct RecordingChat {
    pub log: CallLog,
    pub failures: FailureBudget,
    channels: Vec<ChannelInfo>,
    counter: AtomicU32,
}

impl Default for RecordingChat {
    fn default() -> Self {
        Self {
            log: CallLog::default(),
            failures: FailureBudget::default(),
            channels: vec![ChannelInfo {
                id: "C001".to_string(),
                name: "eng".to_string(),
            }],
            counter: AtomicU32::new(0),
        }
    }
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, id: &str, name: &str) -> Self {
        self.channels.push(ChannelInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    fn maybe_fail(&self) -> Result<(), ExternalError> {
        if self.failures.take() {
            Err(ExternalError::Rejected {
                system: "chat".to_string(),
                status: 200,
                message: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn next_ts(&self) -> String {
        format!("1711.{:04}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ExternalError> {
        self.maybe_fail()?;
        Ok(self.channels.clone())
    }

    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        _blocks: Option<serde_json::Value>,
    ) -> Result<ExternalRef, ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!("message:{channel}:{text}"));
        let ts = self.next_ts();
        Ok(ExternalRef {
            url: format!("https://chat.example.test/{channel}/{ts}"),
            external_id: ts,
        })
    }

    async fn send_threaded(
        &self,
        channel: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<ExternalRef, ExternalError> {
        self.maybe_fail()?;
        self.log
            .record(format!("thread:{channel}:{thread_id}:{text}"));
        let ts = self.next_ts();
        Ok(ExternalRef {
            url: format!("https://chat.example.test/{channel}/{ts}"),
            external_id: ts,
        })
    }
}

// ============================================================================
// CONTAINER FAKE
// ============================================================================

/// Recording `ContainerRuntime`; containers report healthy unless the
/// failure budget says otherwise.
#[derive(Debug, Default)]
pub struct RecordingContainers {
    pub log: CallLog,
    pub failures: FailureBudget,
}

impl RecordingContainers {
    pub fn new() -> Self {
        Self::default()
    }

    fn maybe_fail(&self) -> Result<(), ExternalError> {
        if self.failures.take() {
            Err(ExternalError::Rejected {
                system: "container-runtime".to_string(),
                status: 1,
                message: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerRuntime for RecordingContainers {
    async fn build_image(&self, context_dir: &str, tag: &str) -> Result<String, ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!("build:{context_dir}:{tag}"));
        Ok(tag.to_string())
    }

    async fn create_network(&self, name: &str) -> Result<String, ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!("network:{name}"));
        Ok(format!("net-{name}"))
    }

    async fn run_container(
        &self,
        image: &str,
        name: &str,
        network: Option<&str>,
        _env: &[(String, String)],
    ) -> Result<String, ExternalError> {
        self.maybe_fail()?;
        self.log
            .record(format!("run:{image}:{name}:{}", network.unwrap_or("-")));
        Ok(format!("container-{name}"))
    }

    async fn health_check(&self, container: &str) -> Result<bool, ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!("health:{container}"));
        Ok(true)
    }

    async fn stop_container(&self, container: &str) -> Result<(), ExternalError> {
        self.maybe_fail()?;
        self.log.record(format!("stop:{container}"));
        Ok(())
    }
}
