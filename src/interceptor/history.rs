//! Bounded execution and output histories.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::{ToolName, ToolParams};

/// Maximum retained tool-execution records.
pub const MAX_HISTORY_SIZE: usize = 50;
/// Maximum retained output signatures.
pub const MAX_OUTPUT_HISTORY_SIZE: usize = 20;

/// One executed tool call as the interceptor saw it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub tool: ToolName,
    pub params: ToolParams,
    pub normalized_output: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    /// Parsed from `Exit code: <int>` for execute_command outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Whitespace-collapsed command for execute_command records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_command: Option<String>,
}

impl ToolExecutionRecord {
    /// Comparison key for the repeated-identical-failure detector.
    pub fn repeat_key(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}",
            self.tool,
            self.params.signature(),
            self.normalized_output
        )
    }

    /// Comparison key for the repeated-identical-command detector.
    pub fn command_repeat_key(&self) -> Option<String> {
        let command = self.normalized_command.as_deref()?;
        Some(format!(
            "{}\u{1f}{:?}\u{1f}{}",
            command, self.exit_code, self.normalized_output
        ))
    }
}

/// One recorded output signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

/// FIFO-bounded record store.
#[derive(Debug, Default)]
pub struct ExecutionHistory {
    records: VecDeque<ToolExecutionRecord>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ToolExecutionRecord) {
        if self.records.len() >= MAX_HISTORY_SIZE {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&ToolExecutionRecord> {
        self.records.back()
    }

    /// The most recent `n` records, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<&ToolExecutionRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).collect()
    }

    /// Trailing run of execute_command records, oldest first.
    pub fn trailing_commands(&self) -> Vec<&ToolExecutionRecord> {
        let mut run: Vec<&ToolExecutionRecord> = self
            .records
            .iter()
            .rev()
            .take_while(|r| r.tool == ToolName::ExecuteCommand)
            .collect();
        run.reverse();
        run
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// FIFO-bounded output-signature store.
#[derive(Debug, Default)]
pub struct OutputHistory {
    records: VecDeque<OutputRecord>,
}

impl OutputHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: OutputRecord) {
        if self.records.len() >= MAX_OUTPUT_HISTORY_SIZE {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// The most recent `n` signatures, oldest first.
    pub fn last_signatures(&self, n: usize) -> Vec<&str> {
        let skip = self.records.len().saturating_sub(n);
        self.records
            .iter()
            .skip(skip)
            .map(|r| r.signature.as_str())
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::keys;

    fn record(tool: ToolName, output: &str) -> ToolExecutionRecord {
        ToolExecutionRecord {
            tool,
            params: ToolParams::new().with(keys::PATH, "a.py"),
            normalized_output: output.to_string(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            success: true,
            guidance: None,
            exit_code: None,
            normalized_command: None,
        }
    }

    #[test]
    fn test_execution_history_evicts_oldest() {
        let mut history = ExecutionHistory::new();
        for i in 0..(MAX_HISTORY_SIZE + 5) {
            history.push(record(ToolName::ReadFile, &format!("out {}", i)));
        }
        assert_eq!(history.len(), MAX_HISTORY_SIZE);
        assert_eq!(history.last().unwrap().normalized_output, "out 54");
        // Oldest five were evicted.
        assert_eq!(history.last_n(MAX_HISTORY_SIZE)[0].normalized_output, "out 5");
    }

    #[test]
    fn test_output_history_evicts_oldest() {
        let mut history = OutputHistory::new();
        for i in 0..(MAX_OUTPUT_HISTORY_SIZE + 3) {
            history.push(OutputRecord {
                signature: format!("sig {}", i),
                timestamp: DateTime::<Utc>::UNIX_EPOCH,
            });
        }
        assert_eq!(history.len(), MAX_OUTPUT_HISTORY_SIZE);
        assert_eq!(history.last_signatures(1), ["sig 22"]);
    }

    #[test]
    fn test_trailing_commands() {
        let mut history = ExecutionHistory::new();
        history.push(record(ToolName::ExecuteCommand, "1"));
        history.push(record(ToolName::ReadFile, "2"));
        history.push(record(ToolName::ExecuteCommand, "3"));
        history.push(record(ToolName::ExecuteCommand, "4"));
        let trailing = history.trailing_commands();
        assert_eq!(trailing.len(), 2);
        assert_eq!(trailing[0].normalized_output, "3");
        assert_eq!(trailing[1].normalized_output, "4");
    }

    #[test]
    fn test_repeat_keys() {
        let a = record(ToolName::ApplyDiff, "conflict");
        let b = record(ToolName::ApplyDiff, "conflict");
        assert_eq!(a.repeat_key(), b.repeat_key());
        assert!(a.command_repeat_key().is_none());

        let mut c = record(ToolName::ExecuteCommand, "boom");
        c.normalized_command = Some("pytest a.py".to_string());
        c.exit_code = Some(1);
        assert!(c.command_repeat_key().unwrap().contains("pytest a.py"));
    }
}
