//! Communication role: typed chat notifications per message category.

use crate::RoleDeps;
use async_trait::async_trait;
use baton_core::{AgentFailure, AgentRoleKind, ErrorKind, MessageCategory};
use baton_external::SERVICE_CHAT;
use baton_runtime::{AgentBehavior, StepContext, StepPlan};
use serde_json::json;

pub struct CommunicationRole {
    deps: RoleDeps,
    plan: StepPlan,
}

impl CommunicationRole {
    pub fn new(deps: RoleDeps) -> Self {
        let plan = StepPlan::from_names(&[
            "authenticate",
            "resolve-channel",
            "template",
            "send",
            "confirm",
        ])
        .expect("plan within step budget");
        Self { deps, plan }
    }

    fn category(input: &serde_json::Value) -> Result<MessageCategory, AgentFailure> {
        match input.get("category").and_then(|v| v.as_str()) {
            Some("start") => Ok(MessageCategory::Start),
            Some("progress") => Ok(MessageCategory::Progress),
            Some("complete") => Ok(MessageCategory::Complete),
            Some("error") => Ok(MessageCategory::Error),
            Some("alert") => Ok(MessageCategory::Alert),
            Some(other) => Err(AgentFailure::new(
                ErrorKind::ConfigInvalid,
                format!("unknown message category '{other}'"),
            )),
            None => Err(AgentFailure::new(
                ErrorKind::ConfigInvalid,
                "message category is required",
            )),
        }
    }

    /// Typed template per category: headline, body, and block layout.
    fn render(
        category: MessageCategory,
        subject: &str,
        detail: Option<&str>,
    ) -> (String, serde_json::Value) {
        let headline = match category {
            MessageCategory::Start => format!(":rocket: Starting: {subject}"),
            MessageCategory::Progress => format!(":hourglass_flowing_sand: {subject}"),
            MessageCategory::Complete => format!(":white_check_mark: Done: {subject}"),
            MessageCategory::Error => format!(":x: Failed: {subject}"),
            MessageCategory::Alert => format!(":rotating_light: {subject}"),
        };
        let text = match detail {
            Some(detail) => format!("{headline}\n{detail}"),
            None => headline.clone(),
        };
        let blocks = json!([
            {"type": "header", "text": {"type": "plain_text", "text": headline}},
            {"type": "section", "text": {"type": "mrkdwn", "text": text}},
        ]);
        (text, blocks)
    }
}

#[async_trait]
impl AgentBehavior for CommunicationRole {
    fn role(&self) -> AgentRoleKind {
        AgentRoleKind::Communication
    }

    fn plan(&self) -> &StepPlan {
        &self.plan
    }

    async fn execute_step(
        &self,
        step: &str,
        cx: &StepContext,
    ) -> Result<serde_json::Value, AgentFailure> {
        let chat = self.deps.chat.as_ref().ok_or_else(|| {
            AgentFailure::new(ErrorKind::ConfigInvalid, "no chat platform configured")
        })?;

        match step {
            "authenticate" => {
                self.deps
                    .credentials
                    .require(SERVICE_CHAT)
                    .map_err(|e| AgentFailure::new(ErrorKind::AuthMissing, e.to_string()))?;
                Ok(json!({"authenticated": true}))
            }
            "resolve-channel" => {
                let requested = cx
                    .input
                    .get("channel")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        AgentFailure::new(ErrorKind::ConfigInvalid, "channel is required")
                    })?;
                let wanted = requested.trim_start_matches('#');

                let channels = chat
                    .list_channels()
                    .await
                    .map_err(|e| AgentFailure::new(e.kind(), e.to_string()))?;
                // Channels are resolved, never auto-created.
                let found = channels
                    .iter()
                    .find(|c| c.id == wanted || c.name == wanted)
                    .ok_or_else(|| {
                        AgentFailure::new(
                            ErrorKind::ExternalRejected,
                            format!("channel '{requested}' not found"),
                        )
                    })?;
                Ok(json!({"channel_id": found.id, "channel_name": found.name}))
            }
            "template" => {
                let category = Self::category(&cx.input)?;
                let subject = cx
                    .input
                    .get("subject")
                    .and_then(|v| v.as_str())
                    .unwrap_or("workflow update");
                let detail = cx.input.get("detail").and_then(|v| v.as_str());
                let (text, blocks) = Self::render(category, subject, detail);
                Ok(json!({"text": text, "blocks": blocks}))
            }
            "send" => {
                let channel = cx.working["resolve-channel"]["channel_id"]
                    .as_str()
                    .ok_or_else(|| {
                        AgentFailure::new(ErrorKind::StateViolation, "channel was not resolved")
                    })?;
                let text = cx.working["template"]["text"].as_str().unwrap_or_default();
                let blocks = cx.working["template"]["blocks"].clone();

                let sent = match cx.input.get("thread_id").and_then(|v| v.as_str()) {
                    Some(thread) => chat.send_threaded(channel, thread, text).await,
                    None => chat.send_message(channel, text, Some(blocks)).await,
                }
                .map_err(|e| AgentFailure::new(e.kind(), e.to_string()))?;

                Ok(json!({"ts": sent.external_id, "url": sent.url}))
            }
            "confirm" => {
                let ts = cx.working["send"]["ts"].as_str().unwrap_or_default();
                if ts.is_empty() {
                    return Err(AgentFailure::new(
                        ErrorKind::ExternalRejected,
                        "send produced no message identity",
                    ));
                }
                Ok(json!({"delivered": true, "ts": ts}))
            }
            other => Err(AgentFailure::new(
                ErrorKind::StateViolation,
                format!("unknown step '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::{AgentInstance, AgentState, EntityIdType, WorkflowId};
    use baton_external::CredentialStore;
    use baton_runtime::AgentRuntime;
    use baton_test_utils::{mem_store, seeded_context, RecordingChat};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn deps_with_chat(chat: Arc<RecordingChat>) -> RoleDeps {
        RoleDeps {
            credentials: Arc::new(CredentialStore::empty().with_token(SERVICE_CHAT, "xoxb-test")),
            source_control: None,
            chat: Some(chat),
            containers: None,
            projects_dir: "/tmp/baton-projects".into(),
        }
    }

    #[tokio::test]
    async fn test_complete_notification_flow() {
        let store = mem_store().await;
        let context = seeded_context(&store, "notify").await;
        let chat = Arc::new(RecordingChat::new());
        let role = CommunicationRole::new(deps_with_chat(chat.clone()));
        let runtime = AgentRuntime::new(store);

        let mut agent = AgentInstance::new(
            AgentRoleKind::Communication,
            WorkflowId::now_v7(),
            context.context_id,
        );
        let input = json!({
            "channel": "#eng",
            "category": "complete",
            "subject": "feature-development",
            "detail": "all four agents completed",
        });
        let result = runtime
            .execute(&mut agent, &role, input, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(agent.state, AgentState::Completed);
        assert_eq!(result["resolve-channel"]["channel_id"], json!("C001"));
        assert_eq!(result["confirm"]["delivered"], json!(true));
        assert!(chat.log.contains(":white_check_mark: Done: feature-development"));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_rejected_not_created() {
        let store = mem_store().await;
        let context = seeded_context(&store, "bad channel").await;
        let chat = Arc::new(RecordingChat::new());
        let role = CommunicationRole::new(deps_with_chat(chat.clone()));
        let runtime = AgentRuntime::new(store);

        let mut agent = AgentInstance::new(
            AgentRoleKind::Communication,
            WorkflowId::now_v7(),
            context.context_id,
        );
        let err = runtime
            .execute(
                &mut agent,
                &role,
                json!({"channel": "#nonexistent", "category": "start"}),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExternalRejected);
        // Nothing was sent
        assert!(chat.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_threaded_reply_goes_to_thread() {
        let store = mem_store().await;
        let context = seeded_context(&store, "threaded").await;
        let chat = Arc::new(RecordingChat::new());
        let role = CommunicationRole::new(deps_with_chat(chat.clone()));
        let runtime = AgentRuntime::new(store);

        let mut agent = AgentInstance::new(
            AgentRoleKind::Communication,
            WorkflowId::now_v7(),
            context.context_id,
        );
        runtime
            .execute(
                &mut agent,
                &role,
                json!({
                    "channel": "eng",
                    "category": "progress",
                    "subject": "halfway there",
                    "thread_id": "1711.0000",
                }),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(chat.log.contains("thread:C001:1711.0000"));
    }

    #[tokio::test]
    async fn test_bad_category_is_config_invalid() {
        let err = CommunicationRole::category(&json!({"category": "party"})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigInvalid);
    }
}
