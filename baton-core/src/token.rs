//! Token accounting utilities.
//!
//! The exact tokenizer is deliberately unspecified by the system; what
//! matters is determinism, so that compression thresholds and tests agree.
//! We use the ~4-characters-per-token heuristic everywhere.

/// Estimate token count for text.
///
/// Deterministic heuristic: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> i32 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f32 * 0.25).ceil() as i32
}

/// Truncate text to fit within a token budget.
/// Prefers sentence boundaries, falls back to word boundaries.
pub fn truncate_to_token_budget(text: &str, budget: i32) -> String {
    if budget <= 0 {
        return String::new();
    }

    // Convert token budget to an approximate character limit (4 chars/token)
    let max_chars = (budget as usize).saturating_mul(4);

    if text.len() <= max_chars {
        return text.to_string();
    }

    // Get the truncated portion (respecting UTF-8 boundaries)
    let truncated = safe_truncate(text, max_chars);

    // Try to find a sentence boundary (., ?, !)
    let last_sentence = [
        truncated.rfind('.'),
        truncated.rfind('?'),
        truncated.rfind('!'),
    ]
    .into_iter()
    .flatten()
    .max();

    // If we found a sentence boundary in the latter half, use it
    if let Some(pos) = last_sentence {
        if pos > max_chars / 2 {
            return truncated[..=pos].to_string();
        }
    }

    // Fall back to a word boundary in the latter 80% of the text
    if let Some(pos) = truncated.rfind(' ') {
        if pos > max_chars * 4 / 5 {
            return truncated[..pos].to_string();
        }
    }

    truncated.to_string()
}

/// Safely truncate a string at a UTF-8 boundary.
fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }

    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        // "hello" = 5 chars * 0.25 = 1.25, ceil = 2
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn test_estimate_tokens_longer() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn test_truncate_empty_budget() {
        assert_eq!(truncate_to_token_budget("hello world", 0), "");
    }

    #[test]
    fn test_truncate_fits() {
        let text = "hello";
        assert_eq!(truncate_to_token_budget(text, 100), text);
    }

    #[test]
    fn test_truncate_sentence_boundary() {
        let text = "First sentence is long enough. Second sentence. Third sentence goes on.";
        let result = truncate_to_token_budget(text, 12);
        assert!(result.ends_with('.'));
        assert!(result.len() < text.len());
    }

    #[test]
    fn test_truncate_utf8_safety() {
        let text = "héllo wörld ünd mörê téxt hêrè wïth áccents everywhere in it";
        // Must not panic on multi-byte boundaries
        for budget in 1..16 {
            let _ = truncate_to_token_budget(text, budget);
        }
    }
}
