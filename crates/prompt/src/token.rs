//! Token counting and truncation.
//!
//! A token is a maximal run of non-whitespace characters plus the
//! whitespace that follows it. This is a word-level approximation, not a
//! provider subword unit, so counts are stable across models and need no
//! vocabulary files.

/// Marker appended to truncated text.
pub const ELLIPSIS: char = '…';

/// Byte spans `(start, end)` of each token, trailing whitespace included.
fn spans(text: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut cursor = 0;
    std::iter::from_fn(move || {
        let rest = &text[cursor..];
        let start = cursor + (rest.len() - rest.trim_start().len());
        if start >= text.len() {
            return None;
        }
        let body = &text[start..];
        let word = body.find(char::is_whitespace).unwrap_or(body.len());
        let tail = &body[word..];
        let end = start + word + (tail.len() - tail.trim_start().len());
        cursor = end;
        Some((start, end))
    })
}

/// Split text into tokens. Leading whitespace belongs to no token.
pub fn tokenize(text: &str) -> Vec<&str> {
    spans(text).map(|(s, e)| &text[s..e]).collect()
}

/// Count tokens in a string.
pub fn count_tokens(text: &str) -> usize {
    spans(text).count()
}

/// Cut `text` down to at most `max_tokens` tokens.
///
/// Text that already fits comes back trimmed. Otherwise the first
/// `max_tokens` tokens are kept, trimmed, and [`ELLIPSIS`] is glued onto the
/// last word so the marker never costs an extra token.
pub fn truncate(text: &str, max_tokens: usize) -> String {
    if max_tokens == 0 || text.is_empty() {
        return String::new();
    }

    let Some((_, cut)) = spans(text).nth(max_tokens - 1) else {
        return text.trim().to_string();
    };
    if spans(&text[cut..]).next().is_none() {
        return text.trim().to_string();
    }

    let mut kept = text[..cut].trim().to_string();
    if !kept.is_empty() && !kept.ends_with(ELLIPSIS) {
        kept.push(ELLIPSIS);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("   \n\t"), 0);
    }

    #[test]
    fn words_and_trailing_whitespace_form_tokens() {
        assert_eq!(tokenize("  alpha beta\n\ngamma "), vec!["alpha ", "beta\n\n", "gamma "]);
        assert_eq!(count_tokens("one two three"), 3);
    }

    #[test]
    fn punctuation_stays_with_its_word() {
        assert_eq!(tokenize("Hello, world."), vec!["Hello, ", "world."]);
        assert_eq!(count_tokens("Rates (again) rose!"), 3);
    }

    #[test]
    fn fitting_text_is_trimmed_only() {
        assert_eq!(truncate("  hello world \n", 5), "hello world");
        assert_eq!(truncate("a b c", 3), "a b c");
    }

    #[test]
    fn zero_budget_is_empty() {
        assert_eq!(truncate("anything at all", 0), "");
        assert_eq!(truncate("", 10), "");
    }

    #[test]
    fn overflow_keeps_prefix_and_appends_marker() {
        let out = truncate("word1 word2 word3 word4 word5", 3);
        assert_eq!(out, "word1 word2 word3…");
        assert!(!out.contains("word4"));
        assert_eq!(count_tokens(&out), 3);
    }

    #[test]
    fn existing_marker_is_not_doubled() {
        let out = truncate("one two… three four", 2);
        assert_eq!(out, "one two…");
    }

    #[test]
    fn truncation_is_idempotent() {
        let samples = [
            "",
            "single",
            "  leading and trailing  ",
            "Line A\nLine B\n\nLine C with more words",
            "one two… three four five",
        ];
        for text in samples {
            for budget in 0..8 {
                let once = truncate(text, budget);
                assert_eq!(truncate(&once, budget), once, "text={text:?} budget={budget}");
            }
        }
    }

    #[test]
    fn budget_is_never_exceeded() {
        let text = "The quick brown fox jumps over the lazy dog near the river bank";
        for budget in 0..20 {
            let out = truncate(text, budget);
            assert!(count_tokens(&out) <= budget, "budget={budget} out={out:?}");
        }
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let out = truncate("héllo wörld ünïcode tèxt", 2);
        assert_eq!(out, "héllo wörld…");
    }
}
