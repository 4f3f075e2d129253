//! Conversation context: the message buffer, its size estimate, and the
//! summarizer used to compact it.

pub mod buffer;
pub mod summarize;
pub mod token;

pub use buffer::{CompactionPolicy, CompactionReport, MessageBuffer};
pub use summarize::summarize;
pub use token::{budget_chars, estimate_size, estimate_tokens};
