//! Cold-restart resumption: re-open the store, resume the context, and
//! continue the workflow from the last persisted step.

use baton_agents::{build_role, RoleDeps};
use baton_context::ContextManager;
use baton_core::*;
use baton_external::{CredentialStore, SERVICE_SOURCE_CONTROL};
use baton_runtime::AgentRuntime;
use baton_store::{EventFilter, Store};
use baton_test_utils::{RecordingContainers, RecordingSourceControl};
use baton_workflow::WorkflowEngine;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn wired_deps(dir: &std::path::Path) -> RoleDeps {
    RoleDeps {
        credentials: Arc::new(
            CredentialStore::empty().with_token(SERVICE_SOURCE_CONTROL, "ghp_test"),
        ),
        source_control: Some(Arc::new(RecordingSourceControl::new())),
        chat: None,
        containers: Some(Arc::new(RecordingContainers::new())),
        projects_dir: dir.to_path_buf(),
    }
}

#[tokio::test]
async fn workflow_continues_after_cold_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("baton.db");
    let scan_dir = dir.path().join("worktree");
    std::fs::create_dir_all(&scan_dir).unwrap();
    std::fs::write(scan_dir.join("main.rs"), "fn main() {}\n").unwrap();
    let config = BatonConfig::rooted_at(&db, dir.path().join("projects"));

    let input = json!({
        "action": "create-branch",
        "owner": "acme",
        "repo": "api",
        "branch": "session/restart",
        "path": scan_dir.display().to_string(),
        "goal": "restart survivor",
        "app_name": "api",
        "image_tag": "api:test",
    });

    // Phase 1: a session with events and two completed agents, then the
    // process dies before the workflow finishes.
    let (root, workflow_id, saved_sequence) = {
        let store = Store::open(&db).await.unwrap();
        let manager = ContextManager::new(store.clone(), config.clone()).unwrap();
        let root = manager
            .create(ContextScope::Session, "restart survivor")
            .await
            .unwrap();
        for i in 0..30 {
            manager
                .append(root, EventKind::Message, 3, json!({"n": i}))
                .await
                .unwrap();
        }

        // Drive the first two roles exactly as the engine would, leaving
        // the workflow session non-terminal in the store.
        let deps = wired_deps(dir.path());
        let runtime = AgentRuntime::new(store.clone());
        let mut session = WorkflowSession::new(root, WorkflowKind::FeatureDevelopment);
        session.status = WorkflowStatus::Running;
        let mut handoff = HandoffContext::new();

        for role in [AgentRoleKind::SourceControl, AgentRoleKind::Security] {
            let mut agent = AgentInstance::new(role, session.workflow_id, root);
            session.push_agent(agent.agent_id).unwrap();
            store.upsert_agent(&agent).await.unwrap();

            let mut role_input = input.clone();
            if !handoff.is_empty() {
                role_input["handoff"] = json!(handoff.to_xml());
            }
            let behavior = build_role(role, &deps);
            let result = runtime
                .execute(
                    &mut agent,
                    behavior.as_ref(),
                    role_input,
                    None,
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
            handoff.record(role, None, &result, vec![]);
        }
        session.handoff = serde_json::to_string(&handoff).unwrap();
        store.upsert_workflow(&session).await.unwrap();
        manager.save(root).await.unwrap();

        let saved_sequence = store.latest_sequence(root).await.unwrap();
        (root, session.workflow_id, saved_sequence)
        // Process killed here: store and manager drop mid-workflow
    };

    // Phase 2: re-open the store, resume, and continue.
    let store = Store::open(&db).await.unwrap();
    let manager = ContextManager::new(store.clone(), config.clone()).unwrap();

    let resumed = manager.resume(root).await.unwrap();
    assert_eq!(resumed, root);

    // Current state equals the last persisted state
    assert_eq!(store.latest_sequence(root).await.unwrap(), saved_sequence);
    let stored_agents = store.list_agents_for_workflow(workflow_id).await.unwrap();
    assert_eq!(stored_agents.len(), 2);
    assert!(stored_agents
        .iter()
        .all(|a| a.state == AgentState::Completed));
    let session = store.get_workflow(workflow_id).await.unwrap();
    assert_eq!(session.status, WorkflowStatus::Running);

    // The workflow continues with the next role
    let engine = WorkflowEngine::new(store.clone(), wired_deps(dir.path()), config);
    let finished = engine
        .continue_workflow(
            workflow_id,
            input,
            FailurePolicy::Stop,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(finished.status, WorkflowStatus::Completed);
    assert_eq!(finished.agent_ids.len(), 4);

    let agents = store.list_agents_for_workflow(workflow_id).await.unwrap();
    let roles: Vec<AgentRoleKind> = agents.iter().map(|a| a.role).collect();
    assert_eq!(
        roles,
        vec![
            AgentRoleKind::SourceControl,
            AgentRoleKind::Security,
            AgentRoleKind::Code,
            AgentRoleKind::Deploy,
        ]
    );
    assert!(agents.iter().all(|a| a.state == AgentState::Completed));

    // Terminal events across both phases stay in declared role order
    let events = store
        .query_events(
            root,
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
}

#[tokio::test]
async fn continuing_a_terminal_workflow_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory().await.unwrap();
    let context = Context::new(ContextScope::Session, "already done", 64_000);
    store.upsert_context(&context).await.unwrap();

    let config = BatonConfig::rooted_at(":memory:", dir.path().join("projects"));
    let engine = WorkflowEngine::new(store.clone(), wired_deps(dir.path()), config);

    let scan_dir = dir.path().join("worktree");
    std::fs::create_dir_all(&scan_dir).unwrap();
    let input = json!({
        "action": "create-branch",
        "owner": "acme",
        "repo": "api",
        "branch": "x",
        "path": scan_dir.display().to_string(),
        "goal": "done",
        "app_name": "api",
        "image_tag": "api:test",
    });

    let session = engine
        .execute(
            context.context_id,
            WorkflowKind::FeatureDevelopment,
            input.clone(),
            FailurePolicy::Stop,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(session.status, WorkflowStatus::Completed);
    let agents_before = store
        .list_agents_for_workflow(session.workflow_id)
        .await
        .unwrap()
        .len();

    let again = engine
        .continue_workflow(
            session.workflow_id,
            input,
            FailurePolicy::Stop,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(again.status, WorkflowStatus::Completed);
    assert_eq!(
        store
            .list_agents_for_workflow(session.workflow_id)
            .await
            .unwrap()
            .len(),
        agents_before
    );
}
