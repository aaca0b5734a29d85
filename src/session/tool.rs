//! Tool categories and the live "tool in flight" record
//!
//! The remote agent reports which tool it is running by free-text name.
//! The name is folded into a closed set of categories so the UI can pick
//! a label, caption and animation without knowing every tool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of tool the remote agent is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Search,
    Code,
    Api,
    File,
    Compute,
    Memory,
    Network,
    Vision,
    Write,
    Connecting,
    Analyzing,
    Researching,
    Synthesizing,
    Summarizing,
}

/// Substring rules checked in order; the first hit decides the kind.
const RULES: &[(&[&str], ToolKind)] = &[
    (&["search", "grep", "glob"], ToolKind::Search),
    (&["read", "file"], ToolKind::File),
    (&["write", "edit"], ToolKind::Write),
    (&["bash", "code"], ToolKind::Code),
    (&["web", "fetch", "api"], ToolKind::Api),
    (&["task", "agent"], ToolKind::Researching),
];

impl ToolKind {
    /// Classify a tool name, falling back to `Compute`
    pub fn from_tool_name(name: &str) -> Self {
        let name = name.to_lowercase();
        RULES
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| name.contains(n)))
            .map(|(_, kind)| *kind)
            .unwrap_or(ToolKind::Compute)
    }

    /// Short display label
    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Search => "Search",
            ToolKind::Code => "Code",
            ToolKind::Api => "API",
            ToolKind::File => "File",
            ToolKind::Compute => "Compute",
            ToolKind::Memory => "Memory",
            ToolKind::Network => "Network",
            ToolKind::Vision => "Vision",
            ToolKind::Write => "Write",
            ToolKind::Connecting => "Connect",
            ToolKind::Analyzing => "Analyze",
            ToolKind::Researching => "Research",
            ToolKind::Synthesizing => "Synthesize",
            ToolKind::Summarizing => "Summarize",
        }
    }

    /// Status line shown while the tool runs
    pub fn caption(&self) -> &'static str {
        match self {
            ToolKind::Search => "Searching...",
            ToolKind::Code => "Running code...",
            ToolKind::Api => "Calling API...",
            ToolKind::File => "Reading files...",
            ToolKind::Compute => "Computing...",
            ToolKind::Memory => "Remembering...",
            ToolKind::Network => "Fetching...",
            ToolKind::Vision => "Looking...",
            ToolKind::Write => "Writing...",
            ToolKind::Connecting => "Connecting...",
            ToolKind::Analyzing => "Analyzing...",
            ToolKind::Researching => "Researching...",
            ToolKind::Synthesizing => "Synthesizing...",
            ToolKind::Summarizing => "Summarizing...",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The tool currently running on the remote side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub tool_name: String,
    pub input: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolStatus {
    pub fn new(tool_name: impl Into<String>, input: Option<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            timestamp: Utc::now(),
        }
    }

    /// Parse a `tool_status` data-channel payload: `{"tool": "...", "input": ...}`
    ///
    /// Returns `None` when the payload is not JSON or `tool` is missing,
    /// empty or not a string. A non-string `input` is kept in its JSON form.
    pub fn from_payload(payload: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(payload).ok()?;
        let tool = value.get("tool")?.as_str()?.trim();
        if tool.is_empty() {
            return None;
        }

        let input = match value.get("input") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) if s.is_empty() => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Some(Self::new(tool, input))
    }

    pub fn kind(&self) -> ToolKind {
        ToolKind::from_tool_name(&self.tool_name)
    }

    /// One-line summary for the transcript, e.g. `Code: ls -la`
    pub fn summary(&self) -> String {
        match &self.input {
            Some(input) => format!("{}: {}", self.kind().label(), input),
            None => self.kind().label().to_string(),
        }
    }
}
