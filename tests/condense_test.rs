//! Condensation correctness scenarios.

use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use swe_policy::{
    CompressorConfig, CondenseOutcome, ContentBlock, ContextCompressor, ManualClock,
    MessageContent, MockLlmClient, TranscriptMessage,
};

fn ts() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn compressor(client: MockLlmClient, config: CompressorConfig) -> ContextCompressor {
    ContextCompressor::new(config, Box::new(client), Rc::new(ManualClock::at_epoch()))
}

/// `[task, a1, t1, ..., a8, t8, last]` with paired tool steps.
fn eight_pair_transcript(result_len: usize) -> Vec<TranscriptMessage> {
    let mut messages = vec![TranscriptMessage::user_text("task: fix the resolver bug", ts())];
    for i in 1..=8 {
        let id = format!("toolu_{}", i);
        let mut input = BTreeMap::new();
        input.insert("path".to_string(), format!("src/f{}.py", i));
        messages.push(TranscriptMessage::assistant_tool_use(
            &id,
            "read_file",
            input,
            ts(),
        ));
        messages.push(TranscriptMessage::user_tool_result(
            &id,
            &format!("contents of f{}: {}", i, "x".repeat(result_len)),
            ts(),
        ));
    }
    messages.push(TranscriptMessage::assistant_text(
        "analysis complete, moving to the fix",
        ts(),
    ));
    messages
}

#[test]
fn condensation_keeps_exactly_the_last_four_pairs() {
    // Large results so the default minimum-summary contract still shrinks
    // the transcript.
    let mut messages = eight_pair_transcript(12_000);
    let compressor = compressor(MockLlmClient::new(), CompressorConfig::default());

    let report = match compressor.condense(&mut messages, "system prompt") {
        CondenseOutcome::Condensed(report) => report,
        other => panic!("expected standard condensation, got {:?}", other),
    };

    // A fresh summary sits immediately after the task statement.
    assert!(messages[1].is_summary);
    assert_eq!(
        messages[1].condense_id.as_deref(),
        Some(report.condense_id.as_str())
    );

    // Retained set is exactly {task, a5..t8, last}.
    let visible: Vec<&TranscriptMessage> = messages
        .iter()
        .filter(|m| !m.is_condensed_away() && !m.is_summary)
        .collect();
    assert_eq!(visible.len(), 10);
    assert_eq!(
        visible[0].content,
        MessageContent::Text("task: fix the resolver bug".to_string())
    );
    let kept_ids: Vec<String> = visible
        .iter()
        .flat_map(|m| m.tool_use_ids())
        .map(String::from)
        .collect();
    assert_eq!(kept_ids, ["toolu_5", "toolu_6", "toolu_7", "toolu_8"]);

    // Every message of the dropped prefix carries the parent tag.
    let dropped: Vec<&TranscriptMessage> =
        messages.iter().filter(|m| m.is_condensed_away()).collect();
    assert_eq!(dropped.len(), 8);
    for message in dropped {
        assert_eq!(
            message.condense_parent.as_deref(),
            Some(report.condense_id.as_str())
        );
    }
}

#[test]
fn condensation_never_grows_and_preserves_ends() {
    let mut messages = eight_pair_transcript(12_000);
    let first = messages[0].clone();
    let last = messages[messages.len() - 1].clone();
    let compressor = compressor(MockLlmClient::new(), CompressorConfig::default());

    let report = match compressor.condense(&mut messages, "system prompt") {
        CondenseOutcome::Condensed(report) => report,
        other => panic!("expected standard condensation, got {:?}", other),
    };

    assert!(report.condensed_tokens < report.original_tokens);

    let visible: Vec<&TranscriptMessage> = messages
        .iter()
        .filter(|m| !m.is_condensed_away() && !m.is_summary)
        .collect();
    assert_eq!(visible.first().copied().unwrap(), &first);
    assert_eq!(visible.last().copied().unwrap(), &last);
}

#[test]
fn retained_tool_results_respect_the_length_cap() {
    let mut messages = eight_pair_transcript(20_000);
    let config = CompressorConfig::default();
    let cap = config.max_tool_result_length;
    let compressor = compressor(MockLlmClient::new(), config);

    match compressor.condense(&mut messages, "system prompt") {
        CondenseOutcome::Condensed(_) => {}
        other => panic!("expected standard condensation, got {:?}", other),
    }

    for message in messages.iter().filter(|m| !m.is_condensed_away()) {
        if let MessageContent::Blocks(blocks) = &message.content {
            for block in blocks {
                if let ContentBlock::ToolResult { content, .. } = block {
                    assert!(
                        content.chars().count() <= cap,
                        "retained result of {} chars exceeds cap {}",
                        content.chars().count(),
                        cap
                    );
                }
            }
        }
    }
}

#[test]
fn every_retained_result_has_a_retained_use() {
    let mut messages = eight_pair_transcript(12_000);
    let compressor = compressor(MockLlmClient::new(), CompressorConfig::default());
    assert!(compressor.condense(&mut messages, "system prompt").succeeded());

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
fn trigger_fires_at_seventy_percent_of_usable() {
    let config = CompressorConfig {
        context_window: 100_000,
        max_completion_tokens: 4_000,
        ..CompressorConfig::default()
    };
    let compressor = compressor(MockLlmClient::new(), config);

    // usable = 100k * 0.9 - 4k = 86k; the trigger sits at 60.2k.
    assert!(!compressor.should_condense(40_000, 2_000));
    assert!(compressor.should_condense(72_000, 0));
}

#[test]
fn fallback_keeps_task_and_last_two() {
    // An absurdly large summary defeats both the standard and the
    // aggressive pass; the emergency fallback must still shrink.
    let client = MockLlmClient::with_summary(&"s".repeat(400_000));
    let config = CompressorConfig {
        context_window: 100_000,
        max_completion_tokens: 4_000,
        min_summary_tokens: 1,
        ..CompressorConfig::default()
    };
    let mut messages = eight_pair_transcript(12_000);
    let compressor = compressor(client, config);

    let report = match compressor.condense(&mut messages, "system prompt") {
        CondenseOutcome::FallbackUsed(report) => report,
        other => panic!("expected fallback, got {:?}", other),
    };
    assert!(report.aggressive);

    let visible: Vec<&TranscriptMessage> =
        messages.iter().filter(|m| !m.is_condensed_away()).collect();
    // task + synthetic summary + last two.
    assert_eq!(visible.len(), 4);
    assert!(visible[1].is_summary);
    match &visible[1].content {
        MessageContent::Text(text) => assert!(text.contains("[context fallback]")),
        other => panic!("unexpected summary content {:?}", other),
    }
}

#[test]
fn second_run_respects_recent_summary_window() {
    let mut messages = eight_pair_transcript(12_000);
    let compressor = compressor(MockLlmClient::new(), CompressorConfig::default());
    assert!(compressor.condense(&mut messages, "system prompt").succeeded());

    match compressor.condense(&mut messages, "system prompt") {
        CondenseOutcome::NotCondensed { error } => {
            assert!(error.to_string().contains("summary already exists"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn failed_condensation_leaves_transcript_untouched() {
    let mut messages = eight_pair_transcript(500);
    let before = messages.clone();
    let compressor = compressor(MockLlmClient::failing(), CompressorConfig::default());

    match compressor.condense(&mut messages, "system prompt") {
        CondenseOutcome::NotCondensed { .. } => {}
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(messages, before);
}
