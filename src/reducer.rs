//! Token-budgeted history reduction.
//!
//! Keeps a multi-turn transcript within the completion model's context
//! window. When the transcript exceeds `max_tokens`, the newest messages are
//! kept verbatim, an older band is summarized by a cheaper model, and
//! anything beyond both budgets is excluded from this turn's context (it
//! stays in the persisted transcript).
//!
//! The computation re-runs from the full persisted transcript on every
//! over-budget turn. Summaries are never cached or extended incrementally;
//! that is a recognized performance cost, not a bug.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::ChatMessage;
use crate::tokens::{count_tokens, transcript_tokens};

/// Non-streaming summarization provider.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce a single free-text summary of the given messages, following
    /// the instruction text.
    async fn summarize(&self, messages: &[ChatMessage], instruction: &str) -> Result<String>;
}

/// Result of partitioning a transcript under the two budgets.
#[derive(Debug)]
pub struct Partition {
    /// Newest messages, kept verbatim, original order.
    pub recent: Vec<ChatMessage>,
    /// Older band to be summarized, original order.
    pub to_summarize: Vec<ChatMessage>,
    /// Messages that fit neither budget — absent from this turn's context.
    pub dropped: usize,
}

pub struct HistoryReducer {
    max_tokens: usize,
    max_tokens_summary_model: usize,
    buffer: usize,
    instruction: String,
}

impl HistoryReducer {
    pub fn new(
        max_tokens: usize,
        max_tokens_summary_model: usize,
        buffer: usize,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            max_tokens,
            max_tokens_summary_model,
            buffer,
            instruction: instruction.into(),
        }
    }

    /// Reduce a transcript to fit the completion budget.
    ///
    /// Pass-through when the total already fits: same messages, same order.
    /// Otherwise the output is `[system summary message] + recent`, where the
    /// summary covers the older band (one summarizer call) and `recent` keeps
    /// its original order.
    pub async fn reduce(
        &self,
        transcript: Vec<ChatMessage>,
        summarizer: &dyn Summarizer,
    ) -> Result<Vec<ChatMessage>> {
        let total_tokens = transcript_tokens(&transcript);
        if total_tokens <= self.max_tokens {
            return Ok(transcript);
        }

        info!(
            "Transcript over budget ({} > {} tokens), reducing",
            total_tokens, self.max_tokens
        );

        let partition = self.partition(&transcript);

        let mut reduced = Vec::with_capacity(partition.recent.len() + 1);
        if !partition.to_summarize.is_empty() {
            let summary = summarizer
                .summarize(&partition.to_summarize, &self.instruction)
                .await?;
            if !summary.is_empty() {
                reduced.push(ChatMessage::system(format!(
                    "Conversation so far (summary): {}",
                    summary
                )));
            }
        }
        reduced.extend(partition.recent);

        Ok(reduced)
    }

    /// Partition a transcript into recent / to-summarize / dropped groups.
    ///
    /// Scans newest→oldest. A message joins `recent` while that group's
    /// running sum stays strictly below `max_tokens - buffer`; failing that,
    /// it joins `to_summarize` while that sum stays strictly below
    /// `max_tokens_summary_model - (max_tokens - buffer)`. Messages older
    /// than both thresholds are dropped from this turn's view — a data-loss
    /// valve that is logged loudly rather than patched silently.
    pub fn partition(&self, transcript: &[ChatMessage]) -> Partition {
        let allowed_history = self.max_tokens.saturating_sub(self.buffer);
        let allowed_summary = self.max_tokens_summary_model.saturating_sub(allowed_history);

        let mut recent: Vec<ChatMessage> = Vec::new();
        let mut to_summarize: Vec<ChatMessage> = Vec::new();
        let mut running_tokens = 0usize;
        let mut running_summary_tokens = 0usize;
        let mut dropped = 0usize;

        for msg in transcript.iter().rev() {
            let msg_tokens = count_tokens(&msg.content);

            if running_tokens + msg_tokens < allowed_history {
                recent.insert(0, msg.clone());
                running_tokens += msg_tokens;
            } else if running_summary_tokens + msg_tokens < allowed_summary {
                to_summarize.insert(0, msg.clone());
                running_summary_tokens += msg_tokens;
            } else {
                dropped += 1;
            }
        }

        if dropped > 0 {
            warn!(
                "{} transcript message(s) fit neither the recent nor the summary \
                 budget and are excluded from this turn's context",
                dropped
            );
        }

        Partition {
            recent,
            to_summarize,
            dropped,
        }
    }
}
