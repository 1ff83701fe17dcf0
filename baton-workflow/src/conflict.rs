//! Cross-agent conflict detection.
//!
//! Parallel branches declare what they touch (files, schemas, endpoints)
//! in their step events. The detector queries the store for those
//! declarations and reports subjects claimed by more than one branch.
//! Already-recorded conflicts are not reported twice.

use baton_core::{
    AgentInstanceId, BatonResult, ConflictKind, ConflictRecord, ContextId, EventKind, WorkflowId,
};
use baton_store::{EventFilter, Store};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::warn;

/// Declaration keys and the conflict kind each maps to.
const DECLARATIONS: &[(&str, ConflictKind)] = &[
    ("touched_files", ConflictKind::SameFile),
    ("schemas", ConflictKind::SchemaCollision),
    ("endpoints", ConflictKind::EndpointCollision),
];

/// Store-backed conflict detector.
///
/// Detection passes serialize on an internal mutex so concurrent branches
/// cannot double-record the same conflict.
#[derive(Clone)]
pub struct ConflictDetector {
    store: Store,
    gate: std::sync::Arc<tokio::sync::Mutex<()>>,
}

impl ConflictDetector {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            gate: std::sync::Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Detect and record new conflicts between the workflow's branches.
    ///
    /// Returns only conflicts recorded by this call; re-running against an
    /// unchanged log yields nothing.
    pub async fn detect(
        &self,
        workflow_id: WorkflowId,
        context_id: ContextId,
    ) -> BatonResult<Vec<ConflictRecord>> {
        let _serialized = self.gate.lock().await;
        let workflow_agents: HashSet<AgentInstanceId> = self
            .store
            .list_agents_for_workflow(workflow_id)
            .await?
            .into_iter()
            .map(|a| a.agent_id)
            .collect();

        let events = self
            .store
            .query_events(
                context_id,
                &EventFilter {
                    kinds: Some(vec![EventKind::AgentStep]),
                    ..Default::default()
                },
            )
            .await?;

        // subject -> branches that declared it, per declaration kind
        let mut claims: HashMap<(ConflictKind, String), Vec<String>> = HashMap::new();
        for event in &events {
            let Some(branch) = event.payload.get("branch").and_then(|v| v.as_str()) else {
                continue;
            };
            // Only this workflow's agents count.
            let declared_by_this_workflow = event
                .payload
                .get("agent")
                .and_then(|v| v.as_str())
                .and_then(|s| AgentInstanceId::from_str(s).ok())
                .map(|id| workflow_agents.contains(&id))
                .unwrap_or(false);
            if !declared_by_this_workflow {
                continue;
            }

            for (key, kind) in DECLARATIONS {
                let Some(subjects) = event.payload.get(*key).and_then(|v| v.as_array()) else {
                    continue;
                };
                for subject in subjects.iter().filter_map(|v| v.as_str()) {
                    let entry = claims
                        .entry((*kind, subject.to_string()))
                        .or_default();
                    if !entry.iter().any(|b| b == branch) {
                        entry.push(branch.to_string());
                    }
                }
            }
        }

        let existing: HashSet<(ConflictKind, String)> = self
            .store
            .list_conflicts(workflow_id)
            .await?
            .into_iter()
            .map(|c| (c.kind, c.subject))
            .collect();

        let mut recorded = Vec::new();
        for ((kind, subject), mut branches) in claims {
            if branches.len() < 2 || existing.contains(&(kind, subject.clone())) {
                continue;
            }
            branches.sort();
            let conflict = ConflictRecord::new(
                workflow_id,
                kind,
                branches[0].clone(),
                branches[1].clone(),
                subject,
            );
            warn!(
                workflow = %workflow_id,
                kind = %conflict.kind,
                subject = %conflict.subject,
                "cross-agent conflict detected"
            );
            self.store.record_conflict(&conflict).await?;
            recorded.push(conflict);
        }
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::*;
    use serde_json::json;

    async fn seeded() -> (Store, Context, WorkflowId) {
        let store = Store::open_in_memory().await.unwrap();
        let context = Context::new(ContextScope::Session, "parallel work", 8_000);
        store.upsert_context(&context).await.unwrap();
        (store, context, WorkflowId::now_v7())
    }

    async fn declare(
        store: &Store,
        context: &Context,
        workflow: WorkflowId,
        branch: &str,
        files: &[&str],
    ) -> AgentInstanceId {
        let agent = AgentInstance::new(AgentRoleKind::Code, workflow, context.context_id)
            .with_branch(branch);
        store.upsert_agent(&agent).await.unwrap();
        store
            .append_event(
                context.context_id,
                EventKind::AgentStep,
                4,
                json!({
                    "step": "generate",
                    "agent": agent.agent_id,
                    "branch": branch,
                    "touched_files": files,
                }),
            )
            .await
            .unwrap();
        agent.agent_id
    }

    #[tokio::test]
    async fn test_same_file_conflict_detected_once() {
        let (store, context, workflow) = seeded().await;
        declare(&store, &context, workflow, "branch-a", &["src/auth.rs"]).await;
        declare(&store, &context, workflow, "branch-b", &["src/auth.rs", "src/b.rs"]).await;

        let detector = ConflictDetector::new(store.clone());
        let conflicts = detector.detect(workflow, context.context_id).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::SameFile);
        assert_eq!(conflicts[0].subject, "src/auth.rs");
        assert_eq!(conflicts[0].first_branch, "branch-a");
        assert_eq!(conflicts[0].second_branch, "branch-b");

        // Idempotent: the second pass reports nothing new
        let again = detector.detect(workflow, context.context_id).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(store.list_conflicts(workflow).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_branches_do_not_conflict() {
        let (store, context, workflow) = seeded().await;
        declare(&store, &context, workflow, "branch-a", &["src/a.rs"]).await;
        declare(&store, &context, workflow, "branch-b", &["src/b.rs"]).await;

        let detector = ConflictDetector::new(store);
        let conflicts = detector.detect(workflow, context.context_id).await.unwrap();
        assert!(conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_other_workflows_are_ignored() {
        let (store, context, workflow) = seeded().await;
        declare(&store, &context, workflow, "branch-a", &["src/x.rs"]).await;
        // Same file declared by a different workflow's agent
        let other = WorkflowId::now_v7();
        declare(&store, &context, other, "branch-b", &["src/x.rs"]).await;

        let detector = ConflictDetector::new(store);
        let conflicts = detector.detect(workflow, context.context_id).await.unwrap();
        assert!(conflicts.is_empty());
    }
}
