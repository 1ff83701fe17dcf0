//! The programmatic orchestrator facade.
//!
//! Exposes the verbs the CLI adapts (`start`, `save`, `resume`, `list`,
//! `pause`, the shutdown variants, workflow triggers) as library calls
//! wiring together the store, context manager, workflow engine and
//! external coordinator. The CLI itself is a thin adapter elsewhere.

use crate::WorkflowEngine;
use baton_agents::RoleDeps;
use baton_context::ContextManager;
use baton_core::*;
use baton_external::ExternalCoordinator;
use baton_runtime::ProgressSender;
use baton_store::{ContextFilter, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Point-in-time operational summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub schema_version: i64,
    pub live_contexts: usize,
    pub running_workflows: i64,
    pub store_degraded: bool,
}

/// Wires the core together behind the programmatic API.
pub struct Orchestrator {
    store: Store,
    contexts: Arc<ContextManager>,
    engine: WorkflowEngine,
    coordinator: Option<ExternalCoordinator>,
}

impl Orchestrator {
    /// Build an orchestrator over an opened store.
    pub fn new(store: Store, config: BatonConfig, deps: RoleDeps) -> BatonResult<Self> {
        let contexts = Arc::new(ContextManager::new(store.clone(), config.clone())?);
        let engine = WorkflowEngine::new(store.clone(), deps, config);
        Ok(Self {
            store,
            contexts,
            engine,
            coordinator: None,
        })
    }

    /// Attach the external coordinator for lifecycle fan-out.
    pub fn with_coordinator(mut self, coordinator: ExternalCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Access the context manager.
    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.contexts
    }

    /// Access the workflow engine.
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    // ========================================================================
    // VERBS
    // ========================================================================

    /// `start`: create a context and fan out creation notifications.
    pub async fn start(&self, scope: ContextScope, goal: &str) -> BatonResult<ContextId> {
        let id = self.contexts.create(scope, goal).await?;
        if let Some(coordinator) = &self.coordinator {
            let context = self.contexts.root_snapshot(id).await?;
            coordinator.on_context_created(&context).await?;
        }
        Ok(id)
    }

    /// `save`: persist a context's current state.
    pub async fn save(&self, context: ContextId) -> BatonResult<()> {
        self.contexts.save(context).await
    }

    /// `resume`: restore a context from the store.
    pub async fn resume(&self, context: ContextId) -> BatonResult<ContextId> {
        self.contexts.resume(context).await
    }

    /// `list`: stored root contexts, most recently active first.
    pub async fn list(&self) -> BatonResult<Vec<Context>> {
        self.store.list_contexts(&ContextFilter::default()).await
    }

    /// `pause`: persist and park a context; it stays resumable.
    pub async fn pause(&self, context: ContextId) -> BatonResult<()> {
        self.contexts.save(context).await?;
        info!(%context, "context paused");
        Ok(())
    }

    /// Trigger a workflow against a context's current view. On
    /// completion the coordinator posts a summary notification.
    pub async fn run_workflow(
        &self,
        context: ContextId,
        kind: WorkflowKind,
        input: serde_json::Value,
        policy: FailurePolicy,
        progress: Option<&ProgressSender>,
        cancel: CancellationToken,
    ) -> BatonResult<WorkflowSession> {
        let current = self.contexts.current(context).await?;
        let session = self
            .engine
            .execute(current, kind, input, policy, progress, cancel)
            .await?;

        if let Some(coordinator) = &self.coordinator {
            let snapshot = self.contexts.root_snapshot(context).await?;
            let summary = format!(
                "workflow {} finished as {} with {} agent(s)",
                session.kind,
                session.status,
                session.agent_ids.len()
            );
            if let Err(e) = coordinator.on_context_completed(&snapshot, &summary).await {
                warn!(error = %e, "completion fan-out failed");
            }
        }
        Ok(session)
    }

    /// Shutdown variants: `emergency` drops everything on the floor after
    /// a WAL checkpoint, `quick` saves all live contexts, `regular`
    /// additionally notifies external systems.
    pub async fn shutdown(&self, mode: ShutdownMode) -> BatonResult<()> {
        info!(%mode, "orchestrator shutting down");
        match mode {
            ShutdownMode::Emergency => {}
            ShutdownMode::Quick => {
                self.contexts.save_all().await?;
            }
            ShutdownMode::Regular => {
                self.contexts.save_all().await?;
                if let Some(coordinator) = &self.coordinator {
                    for root in self.contexts.live_roots().await {
                        if let Ok(snapshot) = self.contexts.root_snapshot(root).await {
                            let _ = coordinator.on_shutdown(&snapshot).await;
                        }
                    }
                }
            }
        }
        self.store.checkpoint_backup().await;
        Ok(())
    }

    /// Operational summary.
    pub async fn health(&self) -> BatonResult<HealthSnapshot> {
        Ok(HealthSnapshot {
            schema_version: self.store.schema_version().await?,
            live_contexts: self.contexts.live_count().await,
            running_workflows: self.store.count_running_workflows().await?,
            store_degraded: self.store.is_degraded(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_external::{CredentialStore, SERVICE_CHAT};
    use baton_test_utils::{mem_store, RecordingChat, RecordingContainers};
    use serde_json::json;

    async fn orchestrator() -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = mem_store().await;
        let config = BatonConfig::rooted_at(":memory:", dir.path().join("projects"));
        let deps = RoleDeps {
            credentials: Arc::new(
                CredentialStore::empty().with_token(SERVICE_CHAT, "xoxb-test"),
            ),
            source_control: None,
            chat: Some(Arc::new(RecordingChat::new())),
            containers: Some(Arc::new(RecordingContainers::new())),
            projects_dir: dir.path().join("projects"),
        };
        (Orchestrator::new(store, config, deps).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_start_list_pause_shutdown() {
        let (orchestrator, _dir) = orchestrator().await;

        let id = orchestrator
            .start(ContextScope::Session, "facade test")
            .await
            .unwrap();
        assert!(orchestrator.contexts().is_live(id).await);

        let listed = orchestrator.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].context_id, id);

        orchestrator.pause(id).await.unwrap();

        let health = orchestrator.health().await.unwrap();
        assert_eq!(health.schema_version, 1);
        assert_eq!(health.live_contexts, 1);
        assert_eq!(health.running_workflows, 0);
        assert!(!health.store_degraded);

        orchestrator.shutdown(ShutdownMode::Quick).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_workflow_through_facade() {
        let (orchestrator, _dir) = orchestrator().await;
        let id = orchestrator
            .start(ContextScope::Session, "release 1.2.3")
            .await
            .unwrap();

        let session = orchestrator
            .run_workflow(
                id,
                WorkflowKind::Release,
                json!({
                    "goal": "release 1.2.3",
                    "modules": ["release"],
                    "app_name": "api",
                    "image_tag": "api:1.2.3",
                    "channel": "#eng",
                    "category": "complete",
                    "subject": "release 1.2.3",
                }),
                FailurePolicy::Stop,
                None,
                tokio_util::sync::CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(session.status, WorkflowStatus::Completed);
        assert_eq!(session.agent_ids.len(), 3);

        // `resume` of a live context is a no-op returning the same root
        assert_eq!(orchestrator.resume(id).await.unwrap(), id);
    }
}
