//! Context compressor.
//!
//! Watches token pressure before each LLM call and, past the trigger,
//! rewrites the transcript: a structured summary replaces the oldest
//! span while the task statement, the latest message, and the most
//! recent paired tool steps survive verbatim. Dropped messages are
//! tagged, never destroyed. A strictly more aggressive retry and an
//! emergency fallback sit behind the standard pass.

pub mod errors;
pub mod llm;
pub mod transcript;

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::state::WorkflowStateMachine;

use llm::response_text;

pub use errors::CondenseError;
pub use llm::{LlmClient, LlmError, MessageChunk, MockLlmClient};
pub use transcript::{ContentBlock, MessageContent, Role, TranscriptMessage};

/// Required sections of a condensation summary, in order.
pub const SUMMARY_SECTIONS: [&str; 8] = [
    "USER_CONTEXT",
    "CONSTRAINTS",
    "TASK_TRACKING",
    "CODE_STATE",
    "TESTS",
    "CHANGES",
    "ERRORS",
    "NEXT_STEPS",
];

const TRUNCATION_MARKER: &str = "\n[... truncated ...]\n";

/// Tunables for the compressor. Defaults are the production constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressorConfig {
    pub context_window: u32,
    pub max_completion_tokens: u32,
    /// Fraction of the window held back as safety margin.
    pub token_buffer_pct: f64,
    /// Utilisation of the usable window that triggers condensation.
    pub condense_threshold: f64,
    pub keep_tool_results: usize,
    pub aggressive_keep_tool_results: usize,
    pub max_tool_result_length: usize,
    pub aggressive_max_tool_result_length: usize,
    pub max_tool_use_input_length: usize,
    pub min_summary_tokens: u32,
    pub max_summary_enhancement_attempts: u32,
    pub min_messages_between_summaries: usize,
    pub post_condense_target_utilization: f64,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            context_window: 200_000,
            max_completion_tokens: 8_192,
            token_buffer_pct: 0.10,
            condense_threshold: 0.70,
            keep_tool_results: 4,
            aggressive_keep_tool_results: 2,
            max_tool_result_length: 8_000,
            aggressive_max_tool_result_length: 4_000,
            max_tool_use_input_length: 2_000,
            min_summary_tokens: 2_000,
            max_summary_enhancement_attempts: 3,
            min_messages_between_summaries: 20,
            post_condense_target_utilization: 0.40,
        }
    }
}

/// Result of a committed condensation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CondenseReport {
    pub condense_id: String,
    pub original_tokens: u32,
    pub condensed_tokens: u32,
    pub messages_dropped: usize,
    /// Whether the aggressive keep limits were used.
    pub aggressive: bool,
}

/// Outcome of a condensation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CondenseOutcome {
    /// Standard (or aggressive-retry) condensation committed.
    Condensed(CondenseReport),
    /// The emergency fallback strategy committed.
    FallbackUsed(CondenseReport),
    /// The transcript was returned unchanged.
    NotCondensed { error: CondenseError },
}

impl CondenseOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::NotCondensed { .. })
    }
}

/// A fully computed condensation, applied only after every guard passes.
struct CondensePlan {
    condense_id: String,
    summary_message: TranscriptMessage,
    dropped: Vec<usize>,
    truncated: Vec<(usize, TranscriptMessage)>,
    insert_at: usize,
    original_tokens: u32,
    condensed_tokens: u32,
}

/// The per-task context compressor. Holds the state machine weakly:
/// statistics enrich the summary prompt, but compression works without
/// them.
pub struct ContextCompressor {
    config: CompressorConfig,
    client: Box<dyn LlmClient>,
    state: Weak<RefCell<WorkflowStateMachine>>,
    clock: Rc<dyn Clock>,
}

impl ContextCompressor {
    pub fn new(config: CompressorConfig, client: Box<dyn LlmClient>, clock: Rc<dyn Clock>) -> Self {
        Self {
            config,
            client,
            state: Weak::new(),
            clock,
        }
    }

    /// Attach the task's state machine for summary statistics.
    pub fn set_state_machine(&mut self, state: Weak<RefCell<WorkflowStateMachine>>) {
        self.state = state;
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Tokens actually available for the conversation.
    pub fn usable_tokens(&self) -> f64 {
        let window = self.config.context_window as f64;
        (window * (1.0 - self.config.token_buffer_pct) - self.config.max_completion_tokens as f64)
            .max(0.0)
    }

    /// Whether the next call would cross the condensation threshold.
    pub fn should_condense(&self, total_tokens: u32, last_message_tokens: u32) -> bool {
        let usable = self.usable_tokens();
        if usable <= 0.0 {
            return true;
        }
        (total_tokens as f64 + last_message_tokens as f64) / usable >= self.config.condense_threshold
    }

    /// Token count of one message through the client.
    pub fn message_tokens(&self, message: &TranscriptMessage) -> Result<u32, CondenseError> {
        self.client
            .count_tokens(&message.content.as_blocks())
            .map_err(|e| CondenseError::TokenCount {
                detail: e.to_string(),
            })
    }

    /// Token count of the visible transcript plus the system prompt.
    /// Messages hidden by earlier condensations are ignored, which is
    /// what makes repeated runs idempotent.
    pub fn transcript_tokens(
        &self,
        messages: &[TranscriptMessage],
        system_prompt: &str,
    ) -> Result<u32, CondenseError> {
        let mut total = self.text_tokens(system_prompt)?;
        for message in messages.iter().filter(|m| !m.is_condensed_away()) {
            total += self.message_tokens(message)?;
        }
        Ok(total)
    }

    /// Condense the transcript in place.
    pub fn condense(
        &self,
        messages: &mut Vec<TranscriptMessage>,
        system_prompt: &str,
    ) -> CondenseOutcome {
        let active = active_indices(messages);
        if active.len() < 3 {
            return CondenseOutcome::NotCondensed {
                error: CondenseError::NothingToCondense {
                    detail: "fewer than three visible messages".to_string(),
                },
            };
        }

        // No stacking summaries: reject when one sits in the recent window.
        let window = self.config.min_messages_between_summaries;
        let recent_start = active.len().saturating_sub(window);
        if active[recent_start..]
            .iter()
            .any(|&idx| messages[idx].is_summary)
        {
            return CondenseOutcome::NotCondensed {
                error: CondenseError::RecentSummary { window },
            };
        }

        let original_tokens = match self.transcript_tokens(messages, system_prompt) {
            Ok(tokens) => tokens,
            Err(error) => return CondenseOutcome::NotCondensed { error },
        };

        // Standard pass.
        let standard = self.plan_condense(
            messages,
            &active,
            system_prompt,
            original_tokens,
            self.config.keep_tool_results,
            self.config.max_tool_result_length,
        );
        let usable = self.usable_tokens();
        let target = usable * self.config.post_condense_target_utilization;

        match standard {
            Ok(plan) if (plan.condensed_tokens as f64) <= target => {
                let report = self.commit(messages, plan, false);
                return CondenseOutcome::Condensed(report);
            }
            Ok(_) | Err(CondenseError::WouldGrow { .. }) | Err(CondenseError::SummarizationFailed { .. }) => {
                // Aggressive retry with tightened keep limits.
                let aggressive = self.plan_condense(
                    messages,
                    &active,
                    system_prompt,
                    original_tokens,
                    self.config.aggressive_keep_tool_results,
                    self.config.aggressive_max_tool_result_length,
                );
                match aggressive {
                    Ok(plan) if (plan.condensed_tokens as f64) <= usable => {
                        let report = self.commit(messages, plan, true);
                        return CondenseOutcome::Condensed(report);
                    }
                    _ => {}
                }
                // Emergency fallback.
                match self.plan_fallback(messages, &active, system_prompt, original_tokens) {
                    Ok(plan) => {
                        let report = self.commit(messages, plan, true);
                        CondenseOutcome::FallbackUsed(report)
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "both condensation strategies failed");
                        CondenseOutcome::NotCondensed { error }
                    }
                }
            }
            Err(error) => CondenseOutcome::NotCondensed { error },
        }
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn plan_condense(
        &self,
        messages: &[TranscriptMessage],
        active: &[usize],
        system_prompt: &str,
        original_tokens: u32,
        keep_tool_results: usize,
        max_tool_result_length: usize,
    ) -> Result<CondensePlan, CondenseError> {
        let keep = self.keep_set(messages, active, keep_tool_results);
        let dropped: Vec<usize> = active
            .iter()
            .copied()
            .filter(|idx| !keep.contains(idx))
            .collect();
        if dropped.is_empty() {
            return Err(CondenseError::NothingToCondense {
                detail: "keep-set covers the whole transcript".to_string(),
            });
        }

        let dropped_messages: Vec<TranscriptMessage> =
            dropped.iter().map(|&idx| messages[idx].clone()).collect();
        let summary_text = self.summarize(&dropped_messages)?;

        let condense_id = Uuid::new_v4().to_string();
        let summary_message = TranscriptMessage {
            role: Role::User,
            content: MessageContent::Text(summary_text),
            ts: self.clock.now(),
            is_summary: true,
            condense_id: Some(condense_id.clone()),
            condense_parent: None,
        };

        let first = *active.first().expect("active set checked non-empty");
        let last = *active.last().expect("active set checked non-empty");
        let mut truncated = Vec::new();
        for &idx in keep.iter() {
            // The task statement and the latest message survive
            // byte-for-byte; only the kept middle steps are truncated.
            if idx == first || idx == last {
                continue;
            }
            let shortened = self.truncate_message(
                &messages[idx],
                max_tool_result_length,
                self.config.max_tool_use_input_length,
            );
            if shortened != messages[idx] {
                truncated.push((idx, shortened));
            }
        }

        let mut condensed_tokens = self.text_tokens(system_prompt)?;
        condensed_tokens += self.message_tokens(&summary_message)?;
        for &idx in keep.iter() {
            let replaced = truncated.iter().find(|(t_idx, _)| *t_idx == idx);
            condensed_tokens += match replaced {
                Some((_, message)) => self.message_tokens(message)?,
                None => self.message_tokens(&messages[idx])?,
            };
        }

        if condensed_tokens >= original_tokens {
            return Err(CondenseError::WouldGrow {
                condensed: condensed_tokens,
                original: original_tokens,
            });
        }

        Ok(CondensePlan {
            condense_id,
            summary_message,
            dropped: dropped.clone(),
            truncated,
            insert_at: dropped[0],
            original_tokens,
            condensed_tokens,
        })
    }

    /// Emergency strategy: keep only the task statement and the last
    /// two messages, truncate their tool results hard, and declare the
    /// fallback in a synthetic summary.
    fn plan_fallback(
        &self,
        messages: &[TranscriptMessage],
        active: &[usize],
        system_prompt: &str,
        original_tokens: u32,
    ) -> Result<CondensePlan, CondenseError> {
        let mut keep: BTreeSet<usize> = BTreeSet::new();
        keep.insert(active[0]);
        for &idx in active.iter().rev().take(2) {
            keep.insert(idx);
        }
        let dropped: Vec<usize> = active
            .iter()
            .copied()
            .filter(|idx| !keep.contains(idx))
            .collect();
        if dropped.is_empty() {
            return Err(CondenseError::NothingToCondense {
                detail: "transcript already minimal".to_string(),
            });
        }

        let condense_id = Uuid::new_v4().to_string();
        let summary_message = TranscriptMessage {
            role: Role::User,
            content: MessageContent::Text(format!(
                "[context fallback] {} earlier messages were dropped by the emergency \
                 fallback strategy because standard condensation could not reach the \
                 size target. Re-derive any missing context from the task statement \
                 and the latest tool results.",
                dropped.len()
            )),
            ts: self.clock.now(),
            is_summary: true,
            condense_id: Some(condense_id.clone()),
            condense_parent: None,
        };

        let limit = self.config.aggressive_max_tool_result_length;
        let mut truncated = Vec::new();
        for &idx in keep.iter() {
            let shortened =
                self.truncate_message(&messages[idx], limit, self.config.max_tool_use_input_length);
            if shortened != messages[idx] {
                truncated.push((idx, shortened));
            }
        }

        let mut condensed_tokens = self.text_tokens(system_prompt)?;
        condensed_tokens += self.message_tokens(&summary_message)?;
        for &idx in keep.iter() {
            let replaced = truncated.iter().find(|(t_idx, _)| *t_idx == idx);
            condensed_tokens += match replaced {
                Some((_, message)) => self.message_tokens(message)?,
                None => self.message_tokens(&messages[idx])?,
            };
        }

        Ok(CondensePlan {
            condense_id,
            summary_message,
            dropped: dropped.clone(),
            truncated,
            insert_at: dropped[0],
            original_tokens,
            condensed_tokens,
        })
    }

    /// Keep the first and last visible messages plus the most recent
    /// `keep_n` paired tool steps. A tool_result only survives when its
    /// matching tool_use is found by ID; orphans get summarised.
    fn keep_set(
        &self,
        messages: &[TranscriptMessage],
        active: &[usize],
        keep_n: usize,
    ) -> BTreeSet<usize> {
        let mut keep = BTreeSet::new();
        let first = *active.first().expect("caller checked non-empty");
        let last = *active.last().expect("caller checked non-empty");
        keep.insert(first);
        keep.insert(last);

        let mut use_index: HashMap<&str, usize> = HashMap::new();
        for &idx in active {
            for id in messages[idx].tool_use_ids() {
                use_index.insert(id, idx);
            }
        }

        let mut pairs = 0;
        for &idx in active.iter().rev() {
            if pairs >= keep_n {
                break;
            }
            if idx == first || idx == last {
                continue;
            }
            let message = &messages[idx];
            let result_ids = message.tool_result_ids();
            if result_ids.is_empty() {
                continue;
            }
            let mut matched_use: Option<usize> = None;
            if result_ids
                .iter()
                .all(|id| match use_index.get(id) {
                    Some(&use_idx) => {
                        matched_use = Some(use_idx);
                        true
                    }
                    None => false,
                })
            {
                if let Some(use_idx) = matched_use {
                    keep.insert(use_idx);
                    keep.insert(idx);
                    pairs += 1;
                }
            }
        }
        keep
    }

    // ------------------------------------------------------------------
    // Summarisation
    // ------------------------------------------------------------------

    fn summarize(&self, dropped: &[TranscriptMessage]) -> Result<String, CondenseError> {
        let base_prompt = self.summary_system_prompt();
        let mut prompt = base_prompt.clone();
        let mut best: Option<(String, u32)> = None;

        for attempt in 0..=self.config.max_summary_enhancement_attempts {
            let chunks = self
                .client
                .create_message(&prompt, dropped)
                .map_err(|e| CondenseError::SummarizationFailed {
                    detail: e.to_string(),
                })?;
            let text = response_text(&chunks);
            let tokens = self.text_tokens(&text)?;
            if tokens >= self.config.min_summary_tokens {
                return Ok(text);
            }
            if best.as_ref().map(|(_, t)| tokens > *t).unwrap_or(true) {
                best = Some((text, tokens));
            }
            tracing::debug!(
                attempt,
                tokens,
                minimum = self.config.min_summary_tokens,
                "summary below minimum size, re-requesting"
            );
            prompt = format!(
                "{}\n\nThe previous summary was too short ({} tokens). Expand every \
                 section with concrete detail; do not omit test names or commands.",
                base_prompt, tokens
            );
        }

        let (text, tokens) = best.expect("at least one summarisation attempt ran");
        tracing::warn!(
            tokens,
            minimum = self.config.min_summary_tokens,
            "accepting undersized summary after exhausting enhancement attempts"
        );
        Ok(text)
    }

    fn summary_system_prompt(&self) -> String {
        let mut prompt = format!(
            "Condense the following agent conversation into a structured summary with \
             exactly these sections, in this order: {}.\n\
             Preserve test names and test commands verbatim. Never include raw diffs; \
             describe changes in prose. The summary replaces the original messages, so \
             record everything a continuation would need.",
            SUMMARY_SECTIONS.join(", ")
        );
        if let Some(state) = self.state.upgrade() {
            prompt.push_str("\n\nProgress assessment:\n");
            prompt.push_str(&state.borrow().progress_summary());
        }
        prompt
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    fn commit(
        &self,
        messages: &mut Vec<TranscriptMessage>,
        plan: CondensePlan,
        aggressive: bool,
    ) -> CondenseReport {
        for (idx, replacement) in &plan.truncated {
            messages[*idx] = replacement.clone();
        }
        for &idx in &plan.dropped {
            messages[idx].condense_parent = Some(plan.condense_id.clone());
        }
        let report = CondenseReport {
            condense_id: plan.condense_id,
            original_tokens: plan.original_tokens,
            condensed_tokens: plan.condensed_tokens,
            messages_dropped: plan.dropped.len(),
            aggressive,
        };
        messages.insert(plan.insert_at, plan.summary_message);
        tracing::info!(
            condense_id = %report.condense_id,
            dropped = report.messages_dropped,
            condensed_tokens = report.condensed_tokens,
            aggressive,
            "transcript condensed"
        );
        report
    }

    fn truncate_message(
        &self,
        message: &TranscriptMessage,
        max_result_len: usize,
        max_input_len: usize,
    ) -> TranscriptMessage {
        let content = match &message.content {
            MessageContent::Text(text) => MessageContent::Text(text.clone()),
            MessageContent::Blocks(blocks) => MessageContent::Blocks(
                blocks
                    .iter()
                    .map(|block| match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                        } => ContentBlock::ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            content: truncate_middle(content, max_result_len),
                        },
                        ContentBlock::ToolUse { id, name, input } => {
                            let mut shortened = input.clone();
                            for key in ["diff", "content", "file_text", "patch"] {
                                if let Some(value) = input.get(key) {
                                    shortened.insert(
                                        key.to_string(),
                                        truncate_middle(value, max_input_len),
                                    );
                                }
                            }
                            ContentBlock::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                input: shortened,
                            }
                        }
                        ContentBlock::Text { text } => ContentBlock::Text { text: text.clone() },
                    })
                    .collect(),
            ),
        };
        TranscriptMessage {
            role: message.role,
            content,
            ts: message.ts,
            is_summary: message.is_summary,
            condense_id: message.condense_id.clone(),
            condense_parent: message.condense_parent.clone(),
        }
    }

    fn text_tokens(&self, text: &str) -> Result<u32, CondenseError> {
        self.client
            .count_tokens(&[ContentBlock::Text {
                text: text.to_string(),
            }])
            .map_err(|e| CondenseError::TokenCount {
                detail: e.to_string(),
            })
    }
}

fn active_indices(messages: &[TranscriptMessage]) -> Vec<usize> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.is_condensed_away())
        .map(|(idx, _)| idx)
        .collect()
}

/// Prefix + marker + suffix truncation; the marker counts toward the
/// budget so the result never exceeds `max_chars`.
pub fn truncate_middle(s: &str, max_chars: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_chars {
        return s.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_len {
        return chars[..max_chars].iter().collect();
    }
    let budget = max_chars - marker_len;
    let front = budget / 2;
    let back = budget - front;
    let mut out: String = chars[..front].iter().collect();
    out.push_str(TRUNCATION_MARKER);
    out.extend(chars[chars.len() - back..].iter());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::DateTime;
    use chrono::Utc;

    fn ts() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn compressor_with(client: MockLlmClient, config: CompressorConfig) -> ContextCompressor {
        ContextCompressor::new(config, Box::new(client), Rc::new(ManualClock::at_epoch()))
    }

    /// A summary small enough that standard condensation shrinks the
    /// small fixtures used here.
    fn short_summary_client() -> MockLlmClient {
        MockLlmClient::with_summary(
            "## USER_CONTEXT\ntask\n## CONSTRAINTS\nno test edits\n## TASK_TRACKING\nongoing\n\
             ## CODE_STATE\npatched\n## TESTS\npytest x.py\n## CHANGES\nf.py\n## ERRORS\nnone\n\
             ## NEXT_STEPS\nverify",
        )
    }

    fn small_config() -> CompressorConfig {
        CompressorConfig {
            context_window: 10_000,
            max_completion_tokens: 1_000,
            min_summary_tokens: 10,
            max_tool_result_length: 200,
            aggressive_max_tool_result_length: 100,
            max_tool_use_input_length: 100,
            min_messages_between_summaries: 20,
            ..CompressorConfig::default()
        }
    }

    /// task + n paired steps + closing message.
    fn paired_transcript(pairs: usize, result_len: usize) -> Vec<TranscriptMessage> {
        let mut messages = vec![TranscriptMessage::user_text("task statement", ts())];
        for i in 0..pairs {
            let id = format!("toolu_{}", i + 1);
            let mut input = std::collections::BTreeMap::new();
            input.insert("path".to_string(), format!("f{}.py", i));
            messages.push(TranscriptMessage::assistant_tool_use(
                &id,
                "read_file",
                input,
                ts(),
            ));
            messages.push(TranscriptMessage::user_tool_result(
                &id,
                &"x".repeat(result_len),
                ts(),
            ));
        }
        messages.push(TranscriptMessage::assistant_text("done exploring", ts()));
        messages
    }

    #[test]
    fn test_usable_tokens() {
        let compressor = compressor_with(MockLlmClient::new(), CompressorConfig {
            context_window: 100_000,
            max_completion_tokens: 4_000,
            ..CompressorConfig::default()
        });
        assert!((compressor.usable_tokens() - 86_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_should_condense_threshold() {
        let compressor = compressor_with(MockLlmClient::new(), CompressorConfig {
            context_window: 100_000,
            max_completion_tokens: 4_000,
            ..CompressorConfig::default()
        });
        // 70% of 86k = 60.2k
        assert!(!compressor.should_condense(50_000, 10_000));
        assert!(compressor.should_condense(60_000, 1_000));
        assert!(compressor.should_condense(72_000, 0));
    }

    #[test]
    fn test_keep_set_pairs_latest_four() {
        let compressor = compressor_with(MockLlmClient::new(), small_config());
        let messages = paired_transcript(8, 40);
        let active = active_indices(&messages);
        let keep = compressor.keep_set(&messages, &active, 4);

        // task, a5..t8 (indices 9..=16), last (17).
        let expected: BTreeSet<usize> =
            [0usize, 9, 10, 11, 12, 13, 14, 15, 16, 17].into_iter().collect();
        assert_eq!(keep, expected);
    }

    #[test]
    fn test_orphan_tool_result_not_kept() {
        let compressor = compressor_with(MockLlmClient::new(), small_config());
        let mut messages = paired_transcript(5, 40);
        // Corrupt the fifth pair: result references an unknown id.
        let last_result_idx = messages.len() - 2;
        messages[last_result_idx] =
            TranscriptMessage::user_tool_result("toolu_unknown", "orphan", ts());
        let active = active_indices(&messages);
        let keep = compressor.keep_set(&messages, &active, 4);
        assert!(!keep.contains(&last_result_idx));
    }

    #[test]
    fn test_condense_preserves_first_and_last() {
        let compressor = compressor_with(short_summary_client(), small_config());
        let mut messages = paired_transcript(8, 400);
        let first = messages[0].clone();
        let last = messages[messages.len() - 1].clone();

        let outcome = compressor.condense(&mut messages, "system");
        assert!(outcome.succeeded(), "outcome: {:?}", outcome);

        let visible: Vec<&TranscriptMessage> =
            messages.iter().filter(|m| !m.is_condensed_away()).collect();
        assert_eq!(visible.first().copied().unwrap(), &first);
        assert_eq!(visible.last().copied().unwrap(), &last);
    }

    #[test]
    fn test_condense_tags_dropped_and_inserts_summary() {
        let compressor = compressor_with(short_summary_client(), small_config());
        let mut messages = paired_transcript(8, 400);
        let original_len = messages.len();

        let outcome = compressor.condense(&mut messages, "system");
        let report = match outcome {
            CondenseOutcome::Condensed(report) => report,
            other => panic!("expected condensed, got {:?}", other),
        };

        assert_eq!(messages.len(), original_len + 1);
        let summary_idx = messages.iter().position(|m| m.is_summary).unwrap();
        // Spliced at the first dropped index: right after the task.
        assert_eq!(summary_idx, 1);
        assert_eq!(
            messages[summary_idx].condense_id.as_deref(),
            Some(report.condense_id.as_str())
        );

        let tagged: Vec<&TranscriptMessage> =
            messages.iter().filter(|m| m.is_condensed_away()).collect();
        assert_eq!(tagged.len(), report.messages_dropped);
        for message in tagged {
            assert_eq!(
                message.condense_parent.as_deref(),
                Some(report.condense_id.as_str())
            );
        }
    }

    #[test]
    fn test_pairing_invariant_after_condense() {
        let compressor = compressor_with(short_summary_client(), small_config());
        let mut messages = paired_transcript(8, 400);
        compressor.condense(&mut messages, "system");

        let visible: Vec<&TranscriptMessage> =
            messages.iter().filter(|m| !m.is_condensed_away()).collect();
        let use_ids: Vec<&str> = visible.iter().flat_map(|m| m.tool_use_ids()).collect();
        for message in &visible {
            for id in message.tool_result_ids() {
                assert!(use_ids.contains(&id), "orphan tool_result {}", id);
            }
        }
    }

    #[test]
    fn test_kept_results_truncated() {
        let mut config = small_config();
        config.max_tool_result_length = 120;
        let compressor = compressor_with(short_summary_client(), config);
        let mut messages = paired_transcript(8, 1_000);
        compressor.condense(&mut messages, "system");

        for message in messages.iter().filter(|m| !m.is_condensed_away()) {
            if let MessageContent::Blocks(blocks) = &message.content {
                for block in blocks {
                    if let ContentBlock::ToolResult { content, .. } = block {
                        assert!(
                            content.chars().count() <= 120,
                            "kept result exceeds cap: {}",
                            content.chars().count()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_never_grow_guard() {
        // Tiny transcript, huge summary: the plan must be rejected and
        // the fallback must also fail to shrink, leaving the transcript
        // untouched.
        let client = MockLlmClient::with_summary(&"s".repeat(100_000));
        let mut config = small_config();
        config.min_summary_tokens = 1;
        let compressor = compressor_with(client, config);
        let mut messages = paired_transcript(8, 4);
        let before = messages.clone();

        let outcome = compressor.condense(&mut messages, "system");
        match outcome {
            CondenseOutcome::FallbackUsed(_) => {
                // Fallback with a small synthetic summary is fine.
            }
            CondenseOutcome::NotCondensed { .. } => {
                assert_eq!(messages, before, "transcript must be unchanged");
            }
            CondenseOutcome::Condensed(report) => {
                panic!("oversized summary accepted: {:?}", report);
            }
        }
    }

    #[test]
    fn test_recent_summary_guard() {
        let compressor = compressor_with(short_summary_client(), small_config());
        let mut messages = paired_transcript(8, 400);
        let outcome = compressor.condense(&mut messages, "system");
        assert!(outcome.succeeded());

        // A second run immediately after must refuse: the summary sits
        // inside the recent window.
        let outcome = compressor.condense(&mut messages, "system");
        match outcome {
            CondenseOutcome::NotCondensed {
                error: CondenseError::RecentSummary { .. },
            } => {}
            other => panic!("expected recent-summary rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_client_failure_rejects_condensation() {
        let client = MockLlmClient::failing();
        let compressor = compressor_with(client, small_config());
        let mut messages = paired_transcript(8, 400);
        let outcome = compressor.condense(&mut messages, "system");
        // count_tokens also fails, so even the fallback cannot complete.
        match outcome {
            CondenseOutcome::NotCondensed { error } => {
                assert!(error.is_retryable());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_truncate_middle() {
        assert_eq!(truncate_middle("short", 100), "short");

        let long = "a".repeat(50) + &"b".repeat(50);
        let cut = truncate_middle(&long, 60);
        assert_eq!(cut.chars().count(), 60);
        assert!(cut.contains("[... truncated ...]"));
        assert!(cut.starts_with('a'));
        assert!(cut.ends_with('b'));
    }

    #[test]
    fn test_idempotence_ignores_condensed_messages() {
        let compressor = compressor_with(short_summary_client(), small_config());
        let mut messages = paired_transcript(8, 400);
        compressor.condense(&mut messages, "system");

        let visible_tokens = compressor.transcript_tokens(&messages, "system").unwrap();
        let all_tokens: u32 = messages
            .iter()
            .map(|m| compressor.message_tokens(m).unwrap())
            .sum();
        // Hidden messages are excluded from the visible count.
        assert!(visible_tokens < all_tokens);
    }
}
