//! The context manager: registry of live contexts and their tangent stacks.

use crate::compression::{self, expand_preserved, is_summary_event};
use crate::identity_doc;
use baton_core::*;
use baton_store::{ContextFilter, EventFilter, Store};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One context with its current event view.
#[derive(Debug, Clone)]
struct LiveView {
    context: Context,
    events: Vec<ContextEvent>,
}

/// A registered root: the root view plus any pushed tangents. The last
/// view is the *current* focus; everything before it is parked.
#[derive(Debug, Clone)]
struct FocusState {
    views: Vec<LiveView>,
}

impl FocusState {
    fn current(&mut self) -> &mut LiveView {
        self.views.last_mut().expect("focus state holds at least the root view")
    }
}

/// Maintains the global registry mapping root context identity to live
/// state. All mutation goes through the single registry mutex; the store
/// receives every state change.
pub struct ContextManager {
    store: Store,
    config: BatonConfig,
    registry: Mutex<HashMap<ContextId, FocusState>>,
}

impl ContextManager {
    /// Create a manager over an opened store. The configuration is
    /// validated up front; invalid configuration fails fast.
    pub fn new(store: Store, config: BatonConfig) -> BatonResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            registry: Mutex::new(HashMap::new()),
        })
    }

    /// Access the underlying store handle.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Access the configuration.
    pub fn config(&self) -> &BatonConfig {
        &self.config
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Create a new context and register it as live.
    ///
    /// Emits a creation milestone (importance 9). Projects additionally get
    /// an identity document on disk and an entry in the identity index.
    pub async fn create(&self, scope: ContextScope, goal: &str) -> BatonResult<ContextId> {
        let context = Context::new(scope, goal, self.config.budget_for(scope));
        let id = context.context_id;
        self.store.upsert_context(&context).await?;

        {
            let mut registry = self.registry.lock().await;
            registry.insert(
                id,
                FocusState {
                    views: vec![LiveView {
                        context,
                        events: Vec::new(),
                    }],
                },
            );
        }

        self.append(
            id,
            EventKind::Milestone,
            9,
            json!({"milestone": "context-created", "scope": scope, "goal": goal}),
        )
        .await?;

        if scope == ContextScope::Project {
            self.write_identity(id).await?;
        }

        info!(context = %id, %scope, "context created");
        Ok(id)
    }

    /// Upgrade a session to a project. Irreversible; recomputes the budget
    /// and compression thresholds and writes the identity document.
    pub async fn upgrade(&self, root: ContextId) -> BatonResult<()> {
        {
            let mut registry = self.registry.lock().await;
            let focus = registry
                .get_mut(&root)
                .ok_or(ContextError::NotFound(root))?;
            let view = &mut focus.views[0];
            view.context
                .upgrade(ContextScope::Project, self.config.project_token_budget)?;
            self.store.upsert_context(&view.context).await?;
        }

        self.append_to_root(
            root,
            EventKind::Milestone,
            9,
            json!({"milestone": "scope-upgraded", "to": ContextScope::Project}),
        )
        .await?;
        self.write_identity(root).await?;
        info!(context = %root, "context upgraded to project");
        Ok(())
    }

    /// Append an event to the current view (root or tangent).
    ///
    /// Token usage grows by the event's count; crossing the scope-specific
    /// threshold triggers compression.
    pub async fn append(
        &self,
        root: ContextId,
        kind: EventKind,
        importance: u8,
        payload: serde_json::Value,
    ) -> BatonResult<ContextEvent> {
        let mut registry = self.registry.lock().await;
        let focus = registry
            .get_mut(&root)
            .ok_or(ContextError::NotFound(root))?;
        let view = focus.current();

        let event = self
            .store
            .append_event(view.context.context_id, kind, importance, payload)
            .await?;
        view.events.push(event.clone());
        view.context.tokens_used += event.token_count;
        view.context.touch();

        let threshold =
            (view.context.token_budget as f32 * self.config.compress_at) as i32;
        if view.context.tokens_used > threshold {
            self.compress_view(view).await?;
        }
        self.store.upsert_context(&view.context).await?;
        Ok(event)
    }

    /// Append to the root view even while a tangent is current.
    async fn append_to_root(
        &self,
        root: ContextId,
        kind: EventKind,
        importance: u8,
        payload: serde_json::Value,
    ) -> BatonResult<ContextEvent> {
        let mut registry = self.registry.lock().await;
        let focus = registry
            .get_mut(&root)
            .ok_or(ContextError::NotFound(root))?;
        let view = &mut focus.views[0];

        let event = self
            .store
            .append_event(view.context.context_id, kind, importance, payload)
            .await?;
        view.events.push(event.clone());
        view.context.tokens_used += event.token_count;
        view.context.touch();
        self.store.upsert_context(&view.context).await?;
        Ok(event)
    }

    // ========================================================================
    // TANGENTS
    // ========================================================================

    /// Park the current focus and open a tangent child context.
    pub async fn push_tangent(&self, root: ContextId, goal: &str) -> BatonResult<ContextId> {
        let mut registry = self.registry.lock().await;
        let focus = registry
            .get_mut(&root)
            .ok_or(ContextError::NotFound(root))?;
        let parent_id = focus.current().context.context_id;

        let child = Context::tangent(parent_id, goal, self.config.session_token_budget);
        let child_id = child.context_id;
        self.store.upsert_context(&child).await?;

        let event = self
            .store
            .append_event(
                child_id,
                EventKind::Milestone,
                9,
                json!({"milestone": "tangent-pushed", "goal": goal, "parent": parent_id}),
            )
            .await?;

        let mut view = LiveView {
            context: child,
            events: vec![event.clone()],
        };
        view.context.tokens_used = event.token_count;
        self.store.upsert_context(&view.context).await?;
        focus.views.push(view);

        debug!(context = %root, tangent = %child_id, "tangent pushed");
        Ok(child_id)
    }

    /// Close the current tangent, merging exactly one summary event into
    /// its parent. Returns the context that is current afterwards.
    pub async fn pop_tangent(&self, root: ContextId) -> BatonResult<ContextId> {
        let mut registry = self.registry.lock().await;
        let focus = registry
            .get_mut(&root)
            .ok_or(ContextError::NotFound(root))?;
        if focus.views.len() < 2 {
            return Err(ContextError::NoTangent(root).into());
        }

        let mut child = focus.views.pop().expect("len checked above");
        child.context.archived = true;
        child.context.touch();
        self.store.upsert_context(&child.context).await?;
        self.store
            .upsert_archive_index(
                child.context.context_id,
                child.context.compression_level,
                child.context.last_active_at,
                child.context.tokens_used,
            )
            .await?;

        let preserved: Vec<&ContextEvent> =
            child.events.iter().filter(|e| e.is_preserved()).collect();
        let summary_payload = json!({
            "tangent_summary": {
                "tangent": child.context.context_id,
                "goal": child.context.goal,
                "events": child.events.len(),
                "preserved": preserved,
            }
        });

        let parent = focus.current();
        let event = self
            .store
            .append_event(
                parent.context.context_id,
                EventKind::Milestone,
                9,
                summary_payload,
            )
            .await?;
        parent.events.push(event.clone());
        parent.context.tokens_used += event.token_count;
        parent.context.touch();
        self.store.upsert_context(&parent.context).await?;

        let current = parent.context.context_id;
        debug!(context = %root, tangent = %child.context.context_id, "tangent popped");
        Ok(current)
    }

    // ========================================================================
    // COMPRESSION
    // ========================================================================

    /// Force a compression pass on the current view.
    pub async fn compress(&self, root: ContextId) -> BatonResult<()> {
        let mut registry = self.registry.lock().await;
        let focus = registry
            .get_mut(&root)
            .ok_or(ContextError::NotFound(root))?;
        let view = focus.current();
        self.compress_view(view).await?;
        self.store.upsert_context(&view.context).await?;
        Ok(())
    }

    /// Compress one view in place: fold everything older than the keep
    /// window into a summary event appended to the log.
    async fn compress_view(&self, view: &mut LiveView) -> BatonResult<()> {
        let window = effective_keep_window(
            self.config.keep_window,
            view.context.compression_level,
        );
        let Some(outcome) = compression::plan(&view.events, window) else {
            return Ok(());
        };

        let summary = self
            .store
            .append_event(
                view.context.context_id,
                EventKind::Milestone,
                PRESERVE_IMPORTANCE,
                outcome.summary_payload.clone(),
            )
            .await?;

        let mut events = vec![summary];
        events.extend(outcome.kept.clone());
        view.events = events;
        view.context.tokens_used = compression::view_tokens(&view.events);

        let target = self.config.target_reduction_for(view.context.scope);
        let ceiling = (outcome.tokens_before as f32 * (1.0 - target)) as i32;
        let missed_target = view.context.tokens_used > ceiling;
        let over_budget = view.context.tokens_used > view.context.token_budget;

        if missed_target || over_budget {
            view.context.over_budget = true;
            warn!(
                context = %view.context.context_id,
                before = outcome.tokens_before,
                after = view.context.tokens_used,
                "compression missed its target; continuing over budget"
            );
            let warning = self
                .store
                .append_event(
                    view.context.context_id,
                    EventKind::Error,
                    5,
                    json!({
                        "warning": "compression-target-missed",
                        "tokens_before": outcome.tokens_before,
                        "tokens_after": view.context.tokens_used,
                    }),
                )
                .await?;
            view.context.tokens_used += warning.token_count;
            view.events.push(warning);
        } else {
            view.context.over_budget = false;
        }

        debug!(
            context = %view.context.context_id,
            folded = outcome.folded,
            preserved = outcome.preserved,
            "view compressed"
        );
        Ok(())
    }

    // ========================================================================
    // SAVE / RESUME
    // ========================================================================

    /// Persist the current state of all views of a root. Events are
    /// already durable on append, so saving twice with no intervening
    /// events writes no new events.
    pub async fn save(&self, root: ContextId) -> BatonResult<()> {
        let registry = self.registry.lock().await;
        let focus = registry.get(&root).ok_or(ContextError::NotFound(root))?;
        for view in &focus.views {
            self.store.upsert_context(&view.context).await?;
        }
        Ok(())
    }

    /// Persist every registered context.
    pub async fn save_all(&self) -> BatonResult<()> {
        let roots: Vec<ContextId> = {
            let registry = self.registry.lock().await;
            registry.keys().copied().collect()
        };
        for root in roots {
            self.save(root).await?;
        }
        Ok(())
    }

    /// Restore a context from the store and register it as live.
    ///
    /// Resuming an already-live context is a no-op returning its root.
    /// Tangent identities resolve to their root, which is resumed with its
    /// full tangent chain.
    pub async fn resume(&self, id: ContextId) -> BatonResult<ContextId> {
        // Resolve tangents up to their root first.
        let mut context = self.store.get_context(id).await?;
        while let Some(parent) = context.parent_id {
            context = self.store.get_context(parent).await?;
        }
        let root = context.context_id;

        {
            let registry = self.registry.lock().await;
            if registry.contains_key(&root) {
                return Ok(root);
            }
        }

        let mut views = vec![self.load_view(context).await?];
        // Rebuild the tangent chain from live (unpopped) children.
        loop {
            let current_id = views.last().expect("at least root").context.context_id;
            let mut tangents = self.store.list_live_tangents(current_id).await?;
            match tangents.pop() {
                Some(child) => views.push(self.load_view(child).await?),
                None => break,
            }
        }

        if views[0].context.scope == ContextScope::Project {
            self.reconcile_identity(&mut views[0]).await?;
        }

        let mut registry = self.registry.lock().await;
        registry.insert(root, FocusState { views });
        info!(context = %root, "context resumed");
        Ok(root)
    }

    /// Reconstruct a context's current view from its event stream.
    ///
    /// The last compression summary marks the fold point: the view is that
    /// summary followed by every later event.
    async fn load_view(&self, mut context: Context) -> BatonResult<LiveView> {
        let events = self
            .store
            .query_events(context.context_id, &EventFilter::default())
            .await?;

        let view_events = match events.iter().rposition(is_summary_event) {
            Some(pos) => {
                let summary = events[pos].clone();
                let fold_end = summary
                    .payload
                    .get("compression_summary")
                    .and_then(|s| s.get("to_seq"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(summary.sequence);
                let mut view = vec![summary.clone()];
                view.extend(
                    events
                        .iter()
                        .filter(|e| e.sequence > fold_end && e.sequence != summary.sequence)
                        .cloned(),
                );
                view
            }
            None => events,
        };

        context.tokens_used = compression::view_tokens(&view_events);
        Ok(LiveView {
            context,
            events: view_events,
        })
    }

    /// Check the on-disk identity document against the store's index.
    /// Drift produces a warning event; the document is never auto-healed.
    async fn reconcile_identity(&self, view: &mut LiveView) -> BatonResult<()> {
        let Some(record) = self
            .store
            .get_identity_doc(view.context.context_id)
            .await?
        else {
            return Ok(());
        };

        let on_disk = identity_doc::hash_on_disk(&record.path);
        if on_disk.as_deref() == Some(record.content_sha256.as_str()) {
            return Ok(());
        }

        warn!(
            context = %view.context.context_id,
            path = %record.path.display(),
            "identity document drifted from index"
        );
        let event = self
            .store
            .append_event(
                view.context.context_id,
                EventKind::Error,
                4,
                json!({
                    "warning": "identity-document-drift",
                    "path": record.path.display().to_string(),
                    "present": on_disk.is_some(),
                }),
            )
            .await?;
        view.context.tokens_used += event.token_count;
        view.events.push(event);
        Ok(())
    }

    async fn write_identity(&self, root: ContextId) -> BatonResult<()> {
        let context = {
            let registry = self.registry.lock().await;
            let focus = registry.get(&root).ok_or(ContextError::NotFound(root))?;
            focus.views[0].context.clone()
        };
        let (path, hash) =
            identity_doc::write_identity_document(&self.config.projects_dir, &context)?;
        self.store
            .record_identity_doc(root, &path, &hash)
            .await?;
        Ok(())
    }

    // ========================================================================
    // ARCHIVAL
    // ========================================================================

    /// Background maintenance: walk stored contexts and deepen their
    /// compression level by last-active age. Each transition triggers a
    /// deeper compression pass. Returns the transitions applied.
    pub async fn archive_tick(&self) -> BatonResult<Vec<(ContextId, CompressionLevel)>> {
        let now = Utc::now();
        let contexts = self
            .store
            .list_contexts(&ContextFilter::default())
            .await?;
        let mut transitions = Vec::new();

        for stored in contexts {
            let age = (now - stored.last_active_at)
                .to_std()
                .unwrap_or_default();
            let ages = &self.config.archive_ages;
            let desired = if age >= ages.deep_sleep_after {
                CompressionLevel::DeepSleep
            } else if age >= ages.sleeping_after {
                CompressionLevel::Sleeping
            } else if age >= ages.dormant_after {
                CompressionLevel::Dormant
            } else {
                CompressionLevel::Active
            };
            if desired <= stored.compression_level {
                continue;
            }

            let id = stored.context_id;
            let mut registry = self.registry.lock().await;
            if let Some(focus) = registry.get_mut(&id) {
                let view = &mut focus.views[0];
                view.context.compression_level = desired;
                self.compress_view(view).await?;
                self.store.upsert_context(&view.context).await?;
                self.store
                    .upsert_archive_index(
                        id,
                        desired,
                        view.context.last_active_at,
                        view.context.tokens_used,
                    )
                    .await?;
            } else {
                drop(registry);
                let mut view = self.load_view(stored).await?;
                view.context.compression_level = desired;
                self.compress_view(&mut view).await?;
                self.store.upsert_context(&view.context).await?;
                self.store
                    .upsert_archive_index(
                        id,
                        desired,
                        view.context.last_active_at,
                        view.context.tokens_used,
                    )
                    .await?;
            }

            info!(context = %id, level = %desired, "context archived deeper");
            transitions.push((id, desired));
        }
        Ok(transitions)
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Whether a root context is registered as live.
    pub async fn is_live(&self, root: ContextId) -> bool {
        self.registry.lock().await.contains_key(&root)
    }

    /// Number of registered live roots.
    pub async fn live_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Root identities of all registered live contexts.
    pub async fn live_roots(&self) -> Vec<ContextId> {
        self.registry.lock().await.keys().copied().collect()
    }

    /// Identity of the current view (root or tangent).
    pub async fn current(&self, root: ContextId) -> BatonResult<ContextId> {
        let mut registry = self.registry.lock().await;
        let focus = registry
            .get_mut(&root)
            .ok_or(ContextError::NotFound(root))?;
        Ok(focus.current().context.context_id)
    }

    /// Snapshot of the current view's context.
    pub async fn snapshot(&self, root: ContextId) -> BatonResult<Context> {
        let mut registry = self.registry.lock().await;
        let focus = registry
            .get_mut(&root)
            .ok_or(ContextError::NotFound(root))?;
        Ok(focus.current().context.clone())
    }

    /// Snapshot of the root context regardless of focus.
    pub async fn root_snapshot(&self, root: ContextId) -> BatonResult<Context> {
        let registry = self.registry.lock().await;
        let focus = registry.get(&root).ok_or(ContextError::NotFound(root))?;
        Ok(focus.views[0].context.clone())
    }

    /// Clone of the current view's events.
    pub async fn view_events(&self, root: ContextId) -> BatonResult<Vec<ContextEvent>> {
        let mut registry = self.registry.lock().await;
        let focus = registry
            .get_mut(&root)
            .ok_or(ContextError::NotFound(root))?;
        Ok(focus.current().events.clone())
    }

    /// Every losslessly preserved event reachable from the current view.
    pub async fn preserved_events(&self, root: ContextId) -> BatonResult<Vec<ContextEvent>> {
        Ok(expand_preserved(&self.view_events(root).await?))
    }

    /// Number of parked parents under the current view.
    pub async fn tangent_depth(&self, root: ContextId) -> BatonResult<usize> {
        let registry = self.registry.lock().await;
        let focus = registry.get(&root).ok_or(ContextError::NotFound(root))?;
        Ok(focus.views.len() - 1)
    }
}

/// Deeper archival tiers keep smaller verbatim windows.
fn effective_keep_window(base: usize, level: CompressionLevel) -> usize {
    match level {
        CompressionLevel::Active => base,
        CompressionLevel::Dormant => (base / 2).max(1),
        CompressionLevel::Sleeping => (base / 4).max(1),
        CompressionLevel::DeepSleep => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_keep_window_shrinks() {
        assert_eq!(effective_keep_window(20, CompressionLevel::Active), 20);
        assert_eq!(effective_keep_window(20, CompressionLevel::Dormant), 10);
        assert_eq!(effective_keep_window(20, CompressionLevel::Sleeping), 5);
        assert_eq!(effective_keep_window(20, CompressionLevel::DeepSleep), 1);
        assert_eq!(effective_keep_window(1, CompressionLevel::Sleeping), 1);
    }
}
