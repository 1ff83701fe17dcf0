//! Handoff context digests.
//!
//! After each agent completes, the workflow engine folds a compact digest
//! of its result and key events into the handoff context, which seeds the
//! next agent's input. The rendered form is XML-tagged so downstream
//! agents can address individual sections.

use crate::{estimate_tokens, truncate_to_token_budget, AgentRoleKind};
use serde::{Deserialize, Serialize};

/// Token allowance for a single entry's result summary.
const SUMMARY_TOKEN_BUDGET: i32 = 160;

/// Digest of one completed agent's contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffEntry {
    pub role: AgentRoleKind,
    /// Branch tag for branch-scoped parallel sets
    pub branch: Option<String>,
    /// Compact summary of the result payload
    pub summary: String,
    /// Rendered key events worth carrying forward
    pub key_events: Vec<String>,
}

/// Accumulated handoff context for a workflow session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HandoffContext {
    entries: Vec<HandoffEntry>,
}

impl HandoffContext {
    /// Create an empty handoff context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any agent has contributed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of contributing agents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All entries in contribution order.
    pub fn entries(&self) -> &[HandoffEntry] {
        &self.entries
    }

    /// The most recent contribution.
    pub fn latest(&self) -> Option<&HandoffEntry> {
        self.entries.last()
    }

    /// Fold one completed agent's result into the digest.
    ///
    /// The result payload is summarised under a fixed token allowance so
    /// handoff size stays bounded regardless of agent output.
    pub fn record(
        &mut self,
        role: AgentRoleKind,
        branch: Option<&str>,
        result: &serde_json::Value,
        key_events: Vec<String>,
    ) {
        let raw = match result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.entries.push(HandoffEntry {
            role,
            branch: branch.map(str::to_string),
            summary: truncate_to_token_budget(&raw, SUMMARY_TOKEN_BUDGET),
            key_events,
        });
    }

    /// Render the digest as XML-tagged text for the next agent's input.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            match &entry.branch {
                Some(branch) => out.push_str(&format!(
                    "<handoff agent=\"{}\" branch=\"{}\">\n",
                    entry.role,
                    escape_xml(branch)
                )),
                None => out.push_str(&format!("<handoff agent=\"{}\">\n", entry.role)),
            }
            out.push_str(&format!(
                "  <result>{}</result>\n",
                escape_xml(&entry.summary)
            ));
            if !entry.key_events.is_empty() {
                out.push_str("  <events>\n");
                for event in &entry.key_events {
                    out.push_str(&format!("    <event>{}</event>\n", escape_xml(event)));
                }
                out.push_str("  </events>\n");
            }
            out.push_str("</handoff>\n");
        }
        out
    }

    /// Token cost of the rendered digest.
    pub fn token_count(&self) -> i32 {
        estimate_tokens(&self.to_xml())
    }
}

/// Minimal XML escaping for digest content.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_handoff_renders_nothing() {
        let handoff = HandoffContext::new();
        assert!(handoff.is_empty());
        assert_eq!(handoff.to_xml(), "");
    }

    #[test]
    fn test_record_and_render() {
        let mut handoff = HandoffContext::new();
        handoff.record(
            AgentRoleKind::SourceControl,
            None,
            &json!({"branch": "session/fix-login", "url": "https://example.test/b/1"}),
            vec!["branch created".to_string()],
        );
        let xml = handoff.to_xml();
        assert!(xml.contains("<handoff agent=\"SourceControl\">"));
        assert!(xml.contains("<result>"));
        assert!(xml.contains("<event>branch created</event>"));
        assert_eq!(handoff.len(), 1);
    }

    #[test]
    fn test_entries_preserve_order() {
        let mut handoff = HandoffContext::new();
        handoff.record(AgentRoleKind::SourceControl, None, &json!("a"), vec![]);
        handoff.record(AgentRoleKind::Security, None, &json!("b"), vec![]);
        handoff.record(AgentRoleKind::Code, None, &json!("c"), vec![]);
        let roles: Vec<_> = handoff.entries().iter().map(|e| e.role).collect();
        assert_eq!(
            roles,
            vec![
                AgentRoleKind::SourceControl,
                AgentRoleKind::Security,
                AgentRoleKind::Code
            ]
        );
        assert_eq!(handoff.latest().unwrap().role, AgentRoleKind::Code);
    }

    #[test]
    fn test_summary_is_bounded() {
        let mut handoff = HandoffContext::new();
        let huge = "x".repeat(100_000);
        handoff.record(AgentRoleKind::Code, None, &json!(huge), vec![]);
        let entry = handoff.latest().unwrap();
        assert!(estimate_tokens(&entry.summary) <= 160);
    }

    #[test]
    fn test_xml_content_is_escaped() {
        let mut handoff = HandoffContext::new();
        handoff.record(
            AgentRoleKind::Code,
            Some("feature/<weird>&name"),
            &json!("<script>"),
            vec![],
        );
        let xml = handoff.to_xml();
        assert!(!xml.contains("<script>"));
        assert!(xml.contains("&lt;script&gt;"));
        assert!(xml.contains("feature/&lt;weird&gt;&amp;name"));
    }

    #[test]
    fn test_branch_attribute_rendered() {
        let mut handoff = HandoffContext::new();
        handoff.record(
            AgentRoleKind::SourceControl,
            Some("branch-a"),
            &json!("ok"),
            vec![],
        );
        assert!(handoff.to_xml().contains("branch=\"branch-a\""));
    }
}
