//! External coordinator: fan-out on context lifecycle events.
//!
//! On creation the coordinator can cut a branch (optionally opening a
//! pull request) and announce the context in chat; on completion it posts
//! a summary, threaded when configured. Failures are retried per policy,
//! then recorded as low-importance error events. They never block the
//! context lifecycle.

use baton_core::{
    BatonResult, Context, ExternalResource, ExternalSystem, EventKind, FailurePolicy,
    MessageCategory, ResourceKind,
};
use baton_store::Store;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{ChatPlatform, ExternalRef, SourceControlHost};

/// Source-control fan-out target.
#[derive(Debug, Clone)]
pub struct SourceControlTarget {
    pub owner: String,
    pub repo: String,
    pub base_branch: String,
    pub open_pull_request: bool,
}

/// Chat fan-out target.
#[derive(Debug, Clone)]
pub struct ChatTarget {
    pub channel: String,
    /// Keep all notifications for one context in a single thread
    pub thread_per_context: bool,
}

/// Coordinator configuration. Both systems default to disabled; missing
/// channels are an error, never auto-created.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub source_control: Option<SourceControlTarget>,
    pub chat: Option<ChatTarget>,
    pub parallel: bool,
    pub failure: FailurePolicy,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Cross-reference created resources in later notifications
    pub link_resources: bool,
    pub auto_create_channels: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            source_control: None,
            chat: None,
            parallel: true,
            failure: FailurePolicy::Continue,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            link_resources: true,
            auto_create_channels: false,
        }
    }
}

/// Fans out context lifecycle events to the configured external systems.
pub struct ExternalCoordinator {
    store: Store,
    config: CoordinatorConfig,
    source_control: Option<Arc<dyn SourceControlHost>>,
    chat: Option<Arc<dyn ChatPlatform>>,
}

impl ExternalCoordinator {
    pub fn new(store: Store, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            source_control: None,
            chat: None,
        }
    }

    pub fn with_source_control(mut self, host: Arc<dyn SourceControlHost>) -> Self {
        self.source_control = Some(host);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatPlatform>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Branch name pattern, parameterised by scope and identity.
    pub fn branch_name(context: &Context) -> String {
        let scope = context.scope.as_db_str().to_lowercase();
        let short = &context.context_id.to_string()[..8];
        let slug: String = context
            .goal
            .chars()
            .take(32)
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        format!("{scope}/{slug}-{short}")
    }

    /// Fan out on context creation. Never fails the caller.
    pub async fn on_context_created(&self, context: &Context) -> BatonResult<()> {
        if self.config.parallel {
            let (sc, chat) = tokio::join!(
                self.announce_source_control(context),
                self.announce_chat(context, MessageCategory::Start, None),
            );
            // A 'stop' policy only orders fan-out in sequential mode; in
            // parallel mode both legs have already run.
            let _ = (sc, chat);
        } else {
            let proceed = self.announce_source_control(context).await;
            if proceed || self.config.failure != FailurePolicy::Stop {
                self.announce_chat(context, MessageCategory::Start, None)
                    .await;
            }
        }
        Ok(())
    }

    /// Fan out on context completion with a summary notification.
    pub async fn on_context_completed(&self, context: &Context, summary: &str) -> BatonResult<()> {
        self.announce_chat(context, MessageCategory::Complete, Some(summary))
            .await;
        Ok(())
    }

    /// Alert configured chat channels that a context was parked by an
    /// orderly shutdown.
    pub async fn on_shutdown(&self, context: &Context) -> BatonResult<()> {
        self.announce_chat(
            context,
            MessageCategory::Alert,
            Some("orchestrator shutting down; context saved and resumable"),
        )
        .await;
        Ok(())
    }

    /// Source-control leg: branch, then optional pull request.
    /// Returns false when the leg failed terminally.
    async fn announce_source_control(&self, context: &Context) -> bool {
        let (Some(target), Some(host)) = (&self.config.source_control, &self.source_control)
        else {
            return true;
        };

        let branch = Self::branch_name(context);
        let created = self
            .with_retry("create-branch", context, || {
                host.create_branch(&target.owner, &target.repo, &branch, &target.base_branch)
            })
            .await;

        let Some(branch_ref) = created else {
            return false;
        };
        self.record_resource(context, ExternalSystem::SourceControl, ResourceKind::Branch, &branch_ref)
            .await;
        info!(context = %context.context_id, branch, "branch created for context");

        if target.open_pull_request {
            let title = format!("[baton] {}", context.goal);
            let body = format!(
                "Automated working branch for context `{}`.\n\nGoal: {}",
                context.context_id, context.goal
            );
            let labels = ["baton".to_string()];
            let pull = self
                .with_retry("create-pull-request", context, || {
                    host.create_pull_request(
                        &target.owner,
                        &target.repo,
                        &branch,
                        &target.base_branch,
                        &title,
                        &body,
                        &labels,
                    )
                })
                .await;
            if let Some(pull_ref) = pull {
                self.record_resource(
                    context,
                    ExternalSystem::SourceControl,
                    ResourceKind::PullRequest,
                    &pull_ref,
                )
                .await;
            }
        }
        true
    }

    /// Chat leg: creation or completion notification, threaded when the
    /// context already has an anchor message.
    async fn announce_chat(
        &self,
        context: &Context,
        category: MessageCategory,
        summary: Option<&str>,
    ) {
        let (Some(target), Some(chat)) = (&self.config.chat, &self.chat) else {
            return;
        };

        let links = if self.config.link_resources {
            self.resource_links(context).await
        } else {
            Vec::new()
        };
        let (text, blocks) = render_notification(context, category, summary, &links);

        let thread_anchor = if target.thread_per_context && category != MessageCategory::Start {
            self.find_thread_anchor(context).await
        } else {
            None
        };

        let sent = match thread_anchor {
            Some(anchor) => {
                self.with_retry("send-threaded", context, || {
                    chat.send_threaded(&target.channel, &anchor, &text)
                })
                .await
            }
            None => {
                self.with_retry("send-message", context, || {
                    chat.send_message(&target.channel, &text, Some(blocks.clone()))
                })
                .await
            }
        };

        if let Some(message_ref) = sent {
            self.record_resource(context, ExternalSystem::Chat, ResourceKind::Message, &message_ref)
                .await;
        }
    }

    /// The first chat message recorded for this context anchors its thread.
    async fn find_thread_anchor(&self, context: &Context) -> Option<String> {
        let resources = self
            .store
            .list_external_resources(context.context_id)
            .await
            .ok()?;
        resources
            .into_iter()
            .find(|r| r.system == ExternalSystem::Chat && r.kind == ResourceKind::Message)
            .map(|r| r.external_id)
    }

    async fn resource_links(&self, context: &Context) -> Vec<String> {
        self.store
            .list_external_resources(context.context_id)
            .await
            .map(|resources| resources.into_iter().map(|r| r.url).collect())
            .unwrap_or_default()
    }

    async fn record_resource(
        &self,
        context: &Context,
        system: ExternalSystem,
        kind: ResourceKind,
        external: &ExternalRef,
    ) {
        let resource = ExternalResource::new(
            context.context_id,
            system,
            kind,
            &external.external_id,
            &external.url,
        );
        if let Err(e) = self.store.record_external_resource(&resource).await {
            warn!(context = %context.context_id, error = %e, "resource record failed");
            return;
        }
        let _ = self
            .store
            .append_event(
                context.context_id,
                EventKind::ExternalResource,
                5,
                json!({"system": system, "kind": kind, "url": external.url}),
            )
            .await;
    }

    /// Run one external call under the configured failure policy.
    /// Exhausted retries record an error event and yield `None`.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        context: &Context,
        mut call: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, baton_core::ExternalError>>,
    {
        let attempts = match self.config.failure {
            FailurePolicy::Retry => self.config.retry_attempts.max(1),
            _ => 1,
        };

        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            match call().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    debug!(operation, attempt, error = %e, "external call failed");
                    last_error = Some(e);
                }
            }
        }

        if let Some(error) = last_error {
            warn!(operation, error = %error, "external fan-out leg failed");
            let _ = self
                .store
                .append_event(
                    context.context_id,
                    EventKind::Error,
                    5,
                    json!({
                        "kind": error.kind().as_db_str(),
                        "operation": operation,
                        "message": error.to_string(),
                    }),
                )
                .await;
        }
        None
    }
}

/// Render a rich-formatted notification for a lifecycle category.
fn render_notification(
    context: &Context,
    category: MessageCategory,
    summary: Option<&str>,
    links: &[String],
) -> (String, serde_json::Value) {
    let headline = match category {
        MessageCategory::Start => format!(":rocket: Context started: *{}*", context.goal),
        MessageCategory::Progress => format!(":hourglass: Progress on *{}*", context.goal),
        MessageCategory::Complete => format!(":white_check_mark: Completed: *{}*", context.goal),
        MessageCategory::Error => format!(":x: Error in *{}*", context.goal),
        MessageCategory::Alert => format!(":rotating_light: Alert for *{}*", context.goal),
    };

    let mut lines = vec![headline];
    if let Some(summary) = summary {
        lines.push(summary.to_string());
    }
    if !links.is_empty() {
        lines.push(format!("Resources: {}", links.join(" | ")));
    }
    lines.push(format!("`{}` ({})", context.context_id, context.scope));
    let text = lines.join("\n");

    let blocks = json!([
        {"type": "section", "text": {"type": "mrkdwn", "text": text}},
    ]);
    (text, blocks)
}
