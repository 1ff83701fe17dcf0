//! End-to-end context lifecycle: tangents, scope upgrade, save/resume.

use baton_context::{identity_document_path, ContextManager};
use baton_core::*;
use baton_store::Store;
use serde_json::json;

async fn manager_with_dirs() -> (ContextManager, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory().await.unwrap();
    let config = BatonConfig::rooted_at(":memory:", dir.path().join("projects"));
    (ContextManager::new(store, config).unwrap(), dir)
}

fn is_tangent_summary(event: &ContextEvent) -> bool {
    event.payload.get("tangent_summary").is_some()
}

#[tokio::test]
async fn session_with_tangent() {
    let (manager, _dir) = manager_with_dirs().await;

    let s1 = manager
        .create(ContextScope::Session, "fix login bug")
        .await
        .unwrap();

    for i in 0..12 {
        manager
            .append(s1, EventKind::Message, 3, json!({"note": i}))
            .await
            .unwrap();
    }
    let tokens_before_tangent = manager.snapshot(s1).await.unwrap().tokens_used;
    let events_before_tangent = manager.view_events(s1).await.unwrap().len();

    // Push a tangent; it becomes the current focus
    let t1 = manager
        .push_tangent(s1, "investigate deps")
        .await
        .unwrap();
    assert_eq!(manager.current(s1).await.unwrap(), t1);
    assert_eq!(manager.tangent_depth(s1).await.unwrap(), 1);

    for i in 0..5 {
        manager
            .append(s1, EventKind::Decision, 4, json!({"dep": i}))
            .await
            .unwrap();
    }
    // Tangent events accrue to the tangent, not the parent
    assert_eq!(
        manager.snapshot(s1).await.unwrap().context_id,
        t1,
        "tangent should be the current view"
    );

    // Pop: the parent regains focus and sees exactly one summary event
    let current = manager.pop_tangent(s1).await.unwrap();
    assert_eq!(current, s1);
    assert_eq!(manager.tangent_depth(s1).await.unwrap(), 0);

    let events = manager.view_events(s1).await.unwrap();
    let summaries: Vec<_> = events.iter().filter(|e| is_tangent_summary(e)).collect();
    assert_eq!(summaries.len(), 1, "exactly one tangent summary");
    assert_eq!(events.len(), events_before_tangent + 1);

    // Parent token count includes the summary only, not the tangent's events
    let snapshot = manager.snapshot(s1).await.unwrap();
    assert_eq!(
        snapshot.tokens_used,
        tokens_before_tangent + summaries[0].token_count
    );

    // Popping again with no tangent is an error
    assert!(matches!(
        manager.pop_tangent(s1).await.unwrap_err(),
        BatonError::Context(ContextError::NoTangent(_))
    ));
}

#[tokio::test]
async fn scope_upgrade_writes_identity_and_rejects_downgrade() {
    let (manager, _dir) = manager_with_dirs().await;

    let s2 = manager
        .create(ContextScope::Session, "harden the build")
        .await
        .unwrap();
    for i in 0..6 {
        manager
            .append(s2, EventKind::Message, 2, json!({"n": i}))
            .await
            .unwrap();
    }

    manager.upgrade(s2).await.unwrap();

    let snapshot = manager.snapshot(s2).await.unwrap();
    assert_eq!(snapshot.scope, ContextScope::Project);
    assert_eq!(
        snapshot.token_budget,
        manager.config().project_token_budget
    );

    // Identity document written and indexed
    let path = identity_document_path(&manager.config().projects_dir, &snapshot);
    assert!(path.exists());
    let record = manager
        .store()
        .get_identity_doc(s2)
        .await
        .unwrap()
        .expect("identity index entry");
    assert_eq!(record.path, path);

    // Downgrade attempts are rejected (upgrade is not re-entrant either)
    assert!(matches!(
        manager.upgrade(s2).await.unwrap_err(),
        BatonError::Context(ContextError::ScopeDowngrade { .. })
    ));
}

#[tokio::test]
async fn compression_uses_project_thresholds_after_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory().await.unwrap();
    let mut config = BatonConfig::rooted_at(":memory:", dir.path().join("projects"));
    config.keep_window = 4;
    let manager = ContextManager::new(store, config).unwrap();

    let id = manager
        .create(ContextScope::Session, "compression probe")
        .await
        .unwrap();
    manager.upgrade(id).await.unwrap();

    for i in 0..40 {
        manager
            .append(
                id,
                EventKind::Message,
                2,
                json!({"filler": "x".repeat(64), "n": i}),
            )
            .await
            .unwrap();
    }
    manager.compress(id).await.unwrap();

    let events = manager.view_events(id).await.unwrap();
    assert!(
        events.len() <= 6,
        "view should be summary + keep window, got {}",
        events.len()
    );
    let snapshot = manager.snapshot(id).await.unwrap();
    assert!(snapshot.tokens_used <= snapshot.token_budget);
}

#[tokio::test]
async fn preserved_events_survive_compression() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory().await.unwrap();
    let mut config = BatonConfig::rooted_at(":memory:", dir.path().join("projects"));
    config.keep_window = 3;
    let manager = ContextManager::new(store, config).unwrap();

    let id = manager
        .create(ContextScope::Session, "preservation probe")
        .await
        .unwrap();

    let decision = manager
        .append(id, EventKind::Decision, 9, json!({"decision": "use sqlite"}))
        .await
        .unwrap();
    for i in 0..30 {
        manager
            .append(id, EventKind::Message, 1, json!({"n": i}))
            .await
            .unwrap();
    }
    manager.compress(id).await.unwrap();

    let preserved = manager.preserved_events(id).await.unwrap();
    assert!(
        preserved.iter().any(|e| e == &decision),
        "importance-9 decision must be retrievable verbatim after compression"
    );

    // A second, deeper pass must not lose it either
    for i in 0..30 {
        manager
            .append(id, EventKind::Message, 1, json!({"again": i}))
            .await
            .unwrap();
    }
    manager.compress(id).await.unwrap();
    let preserved = manager.preserved_events(id).await.unwrap();
    assert!(preserved.iter().any(|e| e == &decision));
}

#[tokio::test]
async fn save_resume_roundtrip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("baton.db");
    let config = BatonConfig::rooted_at(&db, dir.path().join("projects"));

    let (root, saved_events) = {
        let store = Store::open(&db).await.unwrap();
        let manager = ContextManager::new(store, config.clone()).unwrap();
        let root = manager
            .create(ContextScope::Session, "survive a restart")
            .await
            .unwrap();
        for i in 0..30 {
            manager
                .append(root, EventKind::Message, 3, json!({"n": i}))
                .await
                .unwrap();
        }
        manager.save(root).await.unwrap();
        // Saving twice with no intervening events appends nothing
        let sequence_after_save = manager.store().latest_sequence(root).await.unwrap();
        manager.save(root).await.unwrap();
        assert_eq!(
            manager.store().latest_sequence(root).await.unwrap(),
            sequence_after_save
        );
        let events = manager.view_events(root).await.unwrap();
        (root, events)
        // Store and manager dropped here: simulated process death
    };

    let store = Store::open(&db).await.unwrap();
    let manager = ContextManager::new(store, config).unwrap();
    assert!(!manager.is_live(root).await);

    let resumed = manager.resume(root).await.unwrap();
    assert_eq!(resumed, root);

    let restored = manager.view_events(root).await.unwrap();
    assert_eq!(
        restored, saved_events,
        "restored event stream equals the saved stream up to the save point"
    );

    // Resume of a live context is a no-op
    let again = manager.resume(root).await.unwrap();
    assert_eq!(again, root);
    assert_eq!(manager.view_events(root).await.unwrap(), restored);
}

#[tokio::test]
async fn resume_restores_tangent_chain() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("baton.db");
    let config = BatonConfig::rooted_at(&db, dir.path().join("projects"));

    let (root, tangent) = {
        let store = Store::open(&db).await.unwrap();
        let manager = ContextManager::new(store, config.clone()).unwrap();
        let root = manager
            .create(ContextScope::Session, "root work")
            .await
            .unwrap();
        let tangent = manager.push_tangent(root, "side quest").await.unwrap();
        manager
            .append(root, EventKind::Message, 3, json!({"in": "tangent"}))
            .await
            .unwrap();
        manager.save(root).await.unwrap();
        (root, tangent)
    };

    let store = Store::open(&db).await.unwrap();
    let manager = ContextManager::new(store, config).unwrap();
    // Resuming by tangent identity resolves to the root
    let resumed = manager.resume(tangent).await.unwrap();
    assert_eq!(resumed, root);
    assert_eq!(manager.current(root).await.unwrap(), tangent);
    assert_eq!(manager.tangent_depth(root).await.unwrap(), 1);
}

#[tokio::test]
async fn archive_tick_deepens_dormant_contexts() {
    let (manager, _dir) = manager_with_dirs().await;

    let id = manager
        .create(ContextScope::Session, "goes quiet")
        .await
        .unwrap();
    manager
        .append(id, EventKind::Message, 3, json!({"last": "touch"}))
        .await
        .unwrap();

    // Nothing is old enough yet
    assert!(manager.archive_tick().await.unwrap().is_empty());

    // Backdate the stored row past the dormant threshold
    let mut stored = manager.store().get_context(id).await.unwrap();
    stored.last_active_at = chrono::Utc::now() - chrono::Duration::hours(5);
    manager.store().upsert_context(&stored).await.unwrap();

    let transitions = manager.archive_tick().await.unwrap();
    assert_eq!(transitions, vec![(id, CompressionLevel::Dormant)]);
}
