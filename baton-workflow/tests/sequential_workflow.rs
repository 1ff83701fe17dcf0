//! Sequential feature-development workflow end to end.

use baton_agents::RoleDeps;
use baton_core::*;
use baton_store::{EventFilter, Store};
use baton_test_utils::{RecordingContainers, RecordingSourceControl};
use baton_external::{CredentialStore, SERVICE_SOURCE_CONTROL};
use baton_workflow::WorkflowEngine;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn wired_deps(
    host: Arc<RecordingSourceControl>,
    containers: Arc<RecordingContainers>,
    projects: &std::path::Path,
) -> RoleDeps {
    RoleDeps {
        credentials: Arc::new(
            CredentialStore::empty().with_token(SERVICE_SOURCE_CONTROL, "ghp_test"),
        ),
        source_control: Some(host),
        chat: None,
        containers: Some(containers),
        projects_dir: projects.to_path_buf(),
    }
}

#[tokio::test]
async fn feature_development_runs_roles_in_declared_order() {
    let dir = tempfile::tempdir().unwrap();
    let scan_dir = dir.path().join("worktree");
    std::fs::create_dir_all(&scan_dir).unwrap();
    std::fs::write(scan_dir.join("main.rs"), "fn main() {}\n").unwrap();

    let store = Store::open_in_memory().await.unwrap();
    let context = Context::new(ContextScope::Session, "feature work", 64_000);
    store.upsert_context(&context).await.unwrap();

    let host = Arc::new(RecordingSourceControl::new());
    let containers = Arc::new(RecordingContainers::new());
    let deps = wired_deps(host.clone(), containers.clone(), dir.path());
    let config = BatonConfig::rooted_at(":memory:", dir.path().join("projects"));
    let engine = WorkflowEngine::new(store.clone(), deps, config);

    let input = json!({
        // source-control
        "action": "create-branch",
        "owner": "acme",
        "repo": "api",
        "branch": "session/feature-work",
        // security
        "path": scan_dir.display().to_string(),
        // code
        "goal": "feature work",
        "modules": ["feature"],
        // deploy
        "app_name": "api",
        "image_tag": "api:test",
    });

    let session = engine
        .execute(
            context.context_id,
            WorkflowKind::FeatureDevelopment,
            input,
            FailurePolicy::Stop,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(session.status, WorkflowStatus::Completed);
    assert_eq!(session.agent_ids.len(), 4);
    assert!(session.ended_at.unwrap() >= session.started_at);

    // Every collaborator was exercised
    assert!(host.log.contains("branch:acme/api:session/feature-work"));
    assert!(containers.log.contains("run:api:test:api"));

    // Exactly four terminal completed events, in declared role order
    let events = store
        .query_events(
            context.context_id,
            &EventFilter {
                kinds: Some(vec![EventKind::AgentStep]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let terminal_roles: Vec<String> = events
        .iter()
        .filter(|e| e.payload.get("terminal") == Some(&json!("completed")))
        .filter_map(|e| e.payload.get("role").and_then(|r| r.as_str()))
        .map(str::to_string)
        .collect();
    assert_eq!(
        terminal_roles,
        vec!["SourceControl", "Security", "Code", "Deploy"]
    );

    // Handoff context accumulated one entry per role, in order
    let handoff: HandoffContext = serde_json::from_str(&session.handoff).unwrap();
    let handoff_roles: Vec<AgentRoleKind> = handoff.entries().iter().map(|e| e.role).collect();
    assert_eq!(
        handoff_roles,
        vec![
            AgentRoleKind::SourceControl,
            AgentRoleKind::Security,
            AgentRoleKind::Code,
            AgentRoleKind::Deploy,
        ]
    );
    // Each entry carries the prior result summary for the next agent
    assert!(handoff
        .entries()
        .iter()
        .all(|entry| !entry.summary.is_empty()));
    assert!(handoff.to_xml().contains("<handoff agent=\"SourceControl\">"));

    // Agents are persisted terminally
    let agents = store
        .list_agents_for_workflow(session.workflow_id)
        .await
        .unwrap();
    assert_eq!(agents.len(), 4);
    assert!(agents.iter().all(|a| a.state == AgentState::Completed));
    assert!(agents.iter().all(|a| a.progress == 100.0));
}

#[tokio::test]
async fn stop_policy_terminates_after_failed_role() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory().await.unwrap();
    let context = Context::new(ContextScope::Session, "doomed", 64_000);
    store.upsert_context(&context).await.unwrap();

    // No credentials: the first role fails at authenticate
    let deps = RoleDeps {
        credentials: Arc::new(CredentialStore::empty()),
        source_control: Some(Arc::new(RecordingSourceControl::new())),
        chat: None,
        containers: None,
        projects_dir: dir.path().to_path_buf(),
    };
    let config = BatonConfig::rooted_at(":memory:", dir.path().join("projects"));
    let engine = WorkflowEngine::new(store.clone(), deps, config);

    let session = engine
        .execute(
            context.context_id,
            WorkflowKind::FeatureDevelopment,
            json!({"action": "create-branch", "owner": "a", "repo": "b", "branch": "x"}),
            FailurePolicy::Stop,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(session.status, WorkflowStatus::Failed);
    // Only the first role ran
    assert_eq!(session.agent_ids.len(), 1);
    let agents = store
        .list_agents_for_workflow(session.workflow_id)
        .await
        .unwrap();
    assert_eq!(agents[0].state, AgentState::Failed);
    assert_eq!(
        agents[0].error.as_ref().unwrap().kind,
        ErrorKind::AuthMissing
    );
}

#[tokio::test]
async fn continue_policy_records_error_and_proceeds() {
    let dir = tempfile::tempdir().unwrap();
    let scan_dir = dir.path().join("worktree");
    std::fs::create_dir_all(&scan_dir).unwrap();

    let store = Store::open_in_memory().await.unwrap();
    let context = Context::new(ContextScope::Session, "stubborn", 64_000);
    store.upsert_context(&context).await.unwrap();

    // Credentials missing: source-control fails, but the policy carries on
    let deps = RoleDeps {
        credentials: Arc::new(CredentialStore::empty()),
        source_control: Some(Arc::new(RecordingSourceControl::new())),
        chat: None,
        containers: Some(Arc::new(RecordingContainers::new())),
        projects_dir: dir.path().to_path_buf(),
    };
    let config = BatonConfig::rooted_at(":memory:", dir.path().join("projects"));
    let engine = WorkflowEngine::new(store.clone(), deps, config);

    let session = engine
        .execute(
            context.context_id,
            WorkflowKind::FeatureDevelopment,
            json!({
                "action": "create-branch", "owner": "a", "repo": "b", "branch": "x",
                "path": scan_dir.display().to_string(),
                "goal": "stubborn",
                "app_name": "api", "image_tag": "api:test",
            }),
            FailurePolicy::Continue,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // The remaining three roles all completed
    assert_eq!(session.status, WorkflowStatus::Completed);
    assert_eq!(session.agent_ids.len(), 4);
    let agents = store
        .list_agents_for_workflow(session.workflow_id)
        .await
        .unwrap();
    let states: Vec<AgentState> = agents.iter().map(|a| a.state).collect();
    assert_eq!(
        states,
        vec![
            AgentState::Failed,
            AgentState::Completed,
            AgentState::Completed,
            AgentState::Completed,
        ]
    );
}
