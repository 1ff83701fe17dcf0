//! Token-aware compression of a context's event view.
//!
//! Compression keeps the most recent `keep_window` events verbatim and
//! folds everything older into a single summary event. Events at or above
//! the preservation threshold are embedded in the summary payload
//! losslessly, so the preserved portion of the log is reconstructable to
//! an informationally equivalent state after any number of compressions.
//! Data integrity is non-negotiable; hitting the ratio target is
//! best-effort.

use baton_core::{truncate_to_token_budget, ContextEvent, EventKind, PRESERVE_IMPORTANCE};
use serde_json::json;

/// Marker key identifying summary events inside milestone payloads.
const SUMMARY_KEY: &str = "compression_summary";

/// Result of planning one compression pass.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// Payload for the summary event to append
    pub summary_payload: serde_json::Value,
    /// Events kept verbatim (the recent tail)
    pub kept: Vec<ContextEvent>,
    /// Number of events folded into the summary
    pub folded: usize,
    /// Number of folded events embedded losslessly
    pub preserved: usize,
    /// Token count of the view before compression
    pub tokens_before: i32,
}

/// Plan a compression pass over the view.
///
/// Returns `None` when the view is already within the keep window and
/// there is nothing to fold.
pub(crate) fn plan(events: &[ContextEvent], keep_window: usize) -> Option<CompressionOutcome> {
    if events.len() <= keep_window {
        return None;
    }
    let split = events.len() - keep_window;
    let (older, tail) = events.split_at(split);

    let preserved: Vec<&ContextEvent> = older.iter().filter(|e| e.is_preserved()).collect();
    let tokens_before: i32 = events.iter().map(|e| e.token_count).sum();

    let summary_text = summarize(older);
    let summary_payload = json!({
        SUMMARY_KEY: {
            "summary": summary_text,
            "from_seq": older.first().map(|e| e.sequence),
            "to_seq": older.last().map(|e| e.sequence),
            "folded": older.len(),
            "preserved": preserved,
        }
    });

    Some(CompressionOutcome {
        summary_payload,
        kept: tail.to_vec(),
        folded: older.len(),
        preserved: preserved.len(),
        tokens_before,
    })
}

/// Build a counted digest of the folded events: kinds, importance spread,
/// and the first line of the highest-importance payloads.
fn summarize(older: &[ContextEvent]) -> String {
    let mut counts: Vec<(EventKind, usize)> = Vec::new();
    for event in older {
        match counts.iter_mut().find(|(k, _)| *k == event.kind) {
            Some((_, n)) => *n += 1,
            None => counts.push((event.kind, 1)),
        }
    }
    let breakdown = counts
        .iter()
        .map(|(kind, n)| format!("{n} {kind}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut highlights: Vec<&ContextEvent> = older.iter().collect();
    highlights.sort_by(|a, b| b.importance.cmp(&a.importance).then(a.sequence.cmp(&b.sequence)));
    let highlights = highlights
        .iter()
        .take(3)
        .map(|e| {
            let line = e.payload.to_string();
            truncate_to_token_budget(&line, 24)
        })
        .collect::<Vec<_>>()
        .join(" | ");

    format!("{} events folded ({breakdown}). Highlights: {highlights}", older.len())
}

/// Whether an event is a compression summary.
pub fn is_summary_event(event: &ContextEvent) -> bool {
    event.kind == EventKind::Milestone && event.payload.get(SUMMARY_KEY).is_some()
}

/// Recover every losslessly preserved event reachable from the view:
/// summaries are expanded recursively, and verbatim events at or above the
/// preservation threshold are returned as they are.
pub fn expand_preserved(events: &[ContextEvent]) -> Vec<ContextEvent> {
    let mut out = Vec::new();
    for event in events {
        if let Some(summary) = event.payload.get(SUMMARY_KEY) {
            if let Some(embedded) = summary.get("preserved") {
                if let Ok(embedded) =
                    serde_json::from_value::<Vec<ContextEvent>>(embedded.clone())
                {
                    out.extend(expand_preserved(&embedded));
                }
            }
        } else if event.importance >= PRESERVE_IMPORTANCE {
            out.push(event.clone());
        }
    }
    out.sort_by_key(|e| e.sequence);
    out
}

/// Token count of a view.
pub(crate) fn view_tokens(events: &[ContextEvent]) -> i32 {
    events.iter().map(|e| e.token_count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::{ContextId, EntityIdType};
    use serde_json::json;

    fn event(seq: i64, importance: u8) -> ContextEvent {
        ContextEvent::new(
            ContextId::nil(),
            seq,
            EventKind::Message,
            importance,
            json!({"seq": seq, "text": "some recorded activity in this context"}),
        )
        .unwrap()
    }

    #[test]
    fn test_no_plan_within_window() {
        let events: Vec<_> = (1..=5).map(|i| event(i, 3)).collect();
        assert!(plan(&events, 5).is_none());
        assert!(plan(&events, 10).is_none());
    }

    #[test]
    fn test_plan_keeps_recent_tail() {
        let events: Vec<_> = (1..=30).map(|i| event(i, 3)).collect();
        let outcome = plan(&events, 10).unwrap();
        assert_eq!(outcome.kept.len(), 10);
        assert_eq!(outcome.folded, 20);
        assert_eq!(outcome.kept.first().unwrap().sequence, 21);
    }

    #[test]
    fn test_high_importance_events_embedded() {
        let mut events: Vec<_> = (1..=30).map(|i| event(i, 3)).collect();
        events[4] = event(5, 9);
        events[7] = event(8, 8);
        let outcome = plan(&events, 10).unwrap();
        assert_eq!(outcome.preserved, 2);

        let preserved = outcome.summary_payload["compression_summary"]["preserved"]
            .as_array()
            .unwrap();
        assert_eq!(preserved.len(), 2);
    }

    #[test]
    fn test_expand_preserved_roundtrip() {
        let mut events: Vec<_> = (1..=30).map(|i| event(i, 3)).collect();
        events[2] = event(3, 9);
        let originals = vec![events[2].clone()];

        let outcome = plan(&events, 10).unwrap();
        // Simulate the compressed view: summary event + kept tail
        let summary = ContextEvent::new(
            ContextId::nil(),
            31,
            EventKind::Milestone,
            baton_core::PRESERVE_IMPORTANCE,
            outcome.summary_payload.clone(),
        )
        .unwrap();
        let mut view = vec![summary];
        view.extend(outcome.kept.clone());

        let recovered = expand_preserved(&view);
        assert_eq!(recovered, originals);
    }

    #[test]
    fn test_expand_preserved_survives_recompression() {
        // First compression embeds the important event; the summary itself
        // is preserved through the second compression.
        let mut events: Vec<_> = (1..=30).map(|i| event(i, 3)).collect();
        events[0] = event(1, 10);
        let original = events[0].clone();

        let first = plan(&events, 10).unwrap();
        let summary = ContextEvent::new(
            ContextId::nil(),
            31,
            EventKind::Milestone,
            baton_core::PRESERVE_IMPORTANCE,
            first.summary_payload.clone(),
        )
        .unwrap();
        let mut view = vec![summary];
        view.extend(first.kept.clone());
        view.extend((32..=60).map(|i| event(i, 2)));

        let second = plan(&view, 5).unwrap();
        let summary2 = ContextEvent::new(
            ContextId::nil(),
            61,
            EventKind::Milestone,
            baton_core::PRESERVE_IMPORTANCE,
            second.summary_payload.clone(),
        )
        .unwrap();
        let mut view2 = vec![summary2];
        view2.extend(second.kept.clone());

        let recovered = expand_preserved(&view2);
        assert!(recovered.contains(&original));
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(100))]

        /// Every event at or above the preservation threshold in the
        /// folded region is retrievable verbatim after compression.
        #[test]
        fn prop_preserved_events_survive_any_plan(
            importances in proptest::collection::vec(0u8..=10, 2..80),
            keep_window in 1usize..20,
        ) {
            let events: Vec<ContextEvent> = importances
                .iter()
                .enumerate()
                .map(|(i, importance)| event(i as i64 + 1, *importance))
                .collect();

            if let Some(outcome) = plan(&events, keep_window) {
                let folded = &events[..events.len() - keep_window];
                let expected: Vec<&ContextEvent> =
                    folded.iter().filter(|e| e.is_preserved()).collect();

                let summary = ContextEvent::new(
                    ContextId::nil(),
                    events.len() as i64 + 1,
                    EventKind::Milestone,
                    PRESERVE_IMPORTANCE,
                    outcome.summary_payload.clone(),
                )
                .unwrap();
                let mut view = vec![summary];
                view.extend(outcome.kept.clone());

                let recovered = expand_preserved(&view);
                for original in expected {
                    proptest::prop_assert!(
                        recovered.contains(original),
                        "event seq {} importance {} lost by compression",
                        original.sequence,
                        original.importance
                    );
                }
            }
        }
    }

    #[test]
    fn test_summary_marker() {
        let events: Vec<_> = (1..=30).map(|i| event(i, 3)).collect();
        let outcome = plan(&events, 10).unwrap();
        let summary = ContextEvent::new(
            ContextId::nil(),
            31,
            EventKind::Milestone,
            8,
            outcome.summary_payload,
        )
        .unwrap();
        assert!(is_summary_event(&summary));
        assert!(!is_summary_event(&events[0]));
    }
}
