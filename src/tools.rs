//! Tool surface shared with the external editor/runner.
//!
//! The agent acts through a fixed vocabulary of named tools. Legacy
//! camel-case aliases (`readFile`, `applyDiff`, ...) are normalised to
//! snake_case at parse time so the rest of the crate only ever sees the
//! canonical names.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameter keys with semantic meaning to the policy engine.
///
/// Everything else in a parameter map is passed through untouched.
pub mod keys {
    pub const PATH: &str = "path";
    pub const FILE_PATH: &str = "file_path";
    /// Opaque XML-like payload; only `<path>...</path>` spans are rewritten.
    pub const ARGS: &str = "args";
    pub const COMMAND: &str = "command";
    pub const CWD: &str = "cwd";
    pub const REGEX: &str = "regex";
    pub const QUERY: &str = "query";
    pub const DIFF: &str = "diff";
    pub const CONTENT: &str = "content";
    pub const FILE_TEXT: &str = "file_text";
    pub const PATCH: &str = "patch";
    pub const SERVER_NAME: &str = "server_name";
    pub const TOOL_NAME: &str = "tool_name";
}

/// The fixed set of tool names the policy engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ReadFile,
    ListFiles,
    SearchFiles,
    ExecuteCommand,
    ApplyDiff,
    WriteToFile,
    SearchAndReplace,
    SearchReplace,
    UseMcpTool,
    AccessMcpResource,
    AttemptCompletion,
}

impl ToolName {
    /// Parse a tool name, accepting both snake_case and the legacy
    /// camel-case aliases emitted by older runner builds.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "read_file" | "readFile" => Some(Self::ReadFile),
            "list_files" | "listFiles" => Some(Self::ListFiles),
            "search_files" | "searchFiles" => Some(Self::SearchFiles),
            "execute_command" | "executeCommand" => Some(Self::ExecuteCommand),
            "apply_diff" | "applyDiff" => Some(Self::ApplyDiff),
            "write_to_file" | "writeToFile" => Some(Self::WriteToFile),
            "search_and_replace" | "searchAndReplace" => Some(Self::SearchAndReplace),
            "search_replace" | "searchReplace" => Some(Self::SearchReplace),
            "use_mcp_tool" | "useMcpTool" => Some(Self::UseMcpTool),
            "access_mcp_resource" | "accessMcpResource" => Some(Self::AccessMcpResource),
            "attempt_completion" | "attemptCompletion" => Some(Self::AttemptCompletion),
            _ => None,
        }
    }

    /// Canonical snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::ListFiles => "list_files",
            Self::SearchFiles => "search_files",
            Self::ExecuteCommand => "execute_command",
            Self::ApplyDiff => "apply_diff",
            Self::WriteToFile => "write_to_file",
            Self::SearchAndReplace => "search_and_replace",
            Self::SearchReplace => "search_replace",
            Self::UseMcpTool => "use_mcp_tool",
            Self::AccessMcpResource => "access_mcp_resource",
            Self::AttemptCompletion => "attempt_completion",
        }
    }

    /// Read-only exploration tools.
    pub fn is_read_tool(self) -> bool {
        matches!(self, Self::ReadFile | Self::ListFiles | Self::SearchFiles)
    }

    /// Tools that mutate the repository under repair.
    pub fn is_modification_tool(self) -> bool {
        matches!(
            self,
            Self::ApplyDiff | Self::WriteToFile | Self::SearchAndReplace | Self::SearchReplace
        )
    }

    /// MCP passthrough tools.
    pub fn is_mcp_tool(self) -> bool {
        matches!(self, Self::UseMcpTool | Self::AccessMcpResource)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String-keyed tool parameters.
///
/// Each tool has a fixed schema, but the wire form is a flat map; the
/// typed accessors below are the seam the rest of the crate uses so the
/// key-aliasing rules (`path` vs `file_path`) live in exactly one place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParams(BTreeMap<String, String>);

impl ToolParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Target path of the call, whichever alias the runner used.
    pub fn path(&self) -> Option<&str> {
        self.get(keys::PATH).or_else(|| self.get(keys::FILE_PATH))
    }

    pub fn command(&self) -> Option<&str> {
        self.get(keys::COMMAND)
    }

    pub fn args(&self) -> Option<&str> {
        self.get(keys::ARGS)
    }

    pub fn cwd(&self) -> Option<&str> {
        self.get(keys::CWD)
    }

    pub fn diff(&self) -> Option<&str> {
        self.get(keys::DIFF)
    }

    /// MCP tool name for `use_mcp_tool` calls.
    pub fn mcp_tool_name(&self) -> Option<&str> {
        self.get(keys::TOOL_NAME)
    }

    pub fn mcp_server_name(&self) -> Option<&str> {
        self.get(keys::SERVER_NAME)
    }

    /// Stable signature of the parameter map for loop detection.
    pub fn signature(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(self.0.len());
        for (k, v) in &self.0 {
            parts.push(format!("{}={}", k, v));
        }
        parts.join("\u{1f}")
    }
}
