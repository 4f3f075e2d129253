//! Size estimation utilities.
//!
//! Sizes are measured in characters. Token counts are only ever derived from
//! them through a configurable chars-per-token multiplier (4.0 by default),
//! which is an approximation, not a bound.

use twin_core::message::Message;

/// Total character count of `messages`.
pub fn estimate_size(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

/// Character budget for a context window of `tokens` tokens.
pub fn budget_chars(tokens: u32, chars_per_token: f64) -> usize {
    (f64::from(tokens) * chars_per_token).max(0.0) as usize
}

/// Estimate the token count of `chars` characters. Rounds up.
pub fn estimate_tokens(chars: usize, chars_per_token: f64) -> usize {
    if chars == 0 || chars_per_token <= 0.0 {
        return 0;
    }
    (chars as f64 / chars_per_token).ceil() as usize
}
