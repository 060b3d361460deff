//! Transcript message model.
//!
//! Mirrors the wire shape the LLM client consumes: ordered messages
//! whose content is either plain text or a list of tagged blocks.
//! Condensation never destroys messages; dropped ones are tagged with
//! `condense_parent` so the transcript carrier can hide them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One content block inside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: BTreeMap<String, String>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentBlock {
    /// Characters carried by this block, used for size accounting.
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text { text } => text.chars().count(),
            Self::ToolUse { input, .. } => {
                input.values().map(|v| v.chars().count()).sum::<usize>() + 32
            }
            Self::ToolResult { content, .. } => content.chars().count(),
        }
    }
}

/// Message content: plain text or tagged blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::Blocks(blocks) => blocks.iter().map(ContentBlock::char_len).sum(),
        }
    }

    pub fn as_blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }
}

/// One transcript message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: MessageContent,
    pub ts: DateTime<Utc>,
    /// True for condensation summary messages.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_summary: bool,
    /// Set on summary messages: the condensation run that produced them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condense_id: Option<String>,
    /// Set on dropped originals: the summary that replaced them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condense_parent: Option<String>,
}

impl TranscriptMessage {
    pub fn user_text(text: &str, ts: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.to_string()),
            ts,
            is_summary: false,
            condense_id: None,
            condense_parent: None,
        }
    }

    pub fn assistant_text(text: &str, ts: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.to_string()),
            ts,
            is_summary: false,
            condense_id: None,
            condense_parent: None,
        }
    }

    pub fn assistant_tool_use(
        id: &str,
        name: &str,
        input: BTreeMap<String, String>,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }]),
            ts,
            is_summary: false,
            condense_id: None,
            condense_parent: None,
        }
    }

    pub fn user_tool_result(tool_use_id: &str, content: &str, ts: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                content: content.to_string(),
            }]),
            ts,
            is_summary: false,
            condense_id: None,
            condense_parent: None,
        }
    }

    /// Whether this message was hidden by an earlier condensation.
    pub fn is_condensed_away(&self) -> bool {
        self.condense_parent.is_some()
    }

    /// IDs of tool_use blocks in this message.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }

    /// IDs referenced by tool_result blocks in this message.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }

    pub fn has_tool_use(&self) -> bool {
        !self.tool_use_ids().is_empty()
    }

    pub fn has_tool_result(&self) -> bool {
        !self.tool_result_ids().is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.content.char_len()
    }
}
