//! Core data types for the agent relay
//!
//! Messages are the unit of the session ledger. They are created once by the
//! ledger and never mutated afterwards; observers receive them verbatim as
//! `message_update` payloads, so the serialized form uses camelCase keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a ledger entry
///
/// Assigned in strictly increasing order for the lifetime of the process and
/// never reused, including after the ledger drops old entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Raw numeric value
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Who produced a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human operating the session
    User,
    /// Prose from the agent
    Assistant,
    /// Tool invocation announced by the agent
    Agent,
    /// Outcome of a tool invocation
    ToolResult,
}

/// Marks assistant entries that wait on a human decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Normal,
    Question,
    Plan,
}

/// Outcome recorded on `tool_result` entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Agent run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Idle, ready for the next user message
    #[default]
    Stable,
    /// Processing a user message
    Running,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Stable => write!(f, "stable"),
            RunStatus::Running => write!(f, "running"),
        }
    }
}

/// Optional correlation fields attached at append time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageExtra {
    pub tool_use_id: Option<String>,
    pub parent_tool_use_id: Option<String>,
    pub status: Option<ToolStatus>,
    pub error: Option<String>,
}

impl MessageExtra {
    /// Extra fields for an `agent` entry announcing a tool call
    pub fn tool_use(tool_use_id: impl Into<String>) -> Self {
        Self {
            tool_use_id: Some(tool_use_id.into()),
            ..Default::default()
        }
    }

    /// Extra fields for a `tool_result` entry
    pub fn tool_result(parent_tool_use_id: impl Into<String>, error: Option<String>) -> Self {
        let status = if error.is_some() {
            ToolStatus::Error
        } else {
            ToolStatus::Success
        };
        Self {
            parent_tool_use_id: Some(parent_tool_use_id.into()),
            status: Some(status),
            error,
            ..Default::default()
        }
    }
}

/// One entry of the session ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
