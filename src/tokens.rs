//! Deterministic token accounting.
//!
//! One fixed scheme backs every budget decision in the system (history
//! reduction, summary sizing). Exact parity with any model's tokenizer is
//! not required; consistency within a run is.

use crate::models::ChatMessage;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Count tokens for a piece of text. Rounds up, so any non-empty text costs
/// at least one token.
pub fn count_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Total token count across a transcript's message contents.
pub fn transcript_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| count_tokens(&m.content)).sum()
}
