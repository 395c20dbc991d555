//! Typed agent events
//!
//! The agent speaks newline-delimited JSON. Each line is decoded once, here,
//! into [`AgentEvent`]; nothing past this module looks at raw JSON.

use crate::error::Result;
use serde::Deserialize;
use serde_json::{json, Value};

/// Tool the agent calls to ask the human a question
pub const QUESTION_TOOL: &str = "AskUserQuestion";

/// Tool the agent calls to leave plan mode with a plan for approval
pub const PLAN_TOOL: &str = "ExitPlanMode";

/// One event from the agent's output stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant turn: prose and/or tool invocations
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },
    /// Tool results flowing back into the conversation
    User { message: UserMessage },
    /// Session bookkeeping (init, compaction, ...)
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    /// Run completion
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Event kinds this relay does not track
    #[serde(other)]
    Unknown,
}

impl AgentEvent {
    /// Decode a raw JSON event
    pub fn decode(raw: &Value) -> Result<Self> {
        Ok(Self::deserialize(raw)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Assistant { .. } => "assistant",
            AgentEvent::User { .. } => "user",
            AgentEvent::System { .. } => "system",
            AgentEvent::Result { .. } => "result",
            AgentEvent::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl AssistantMessage {
    /// Text blocks joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool invocations in order of appearance
    pub fn tool_uses(&self) -> impl Iterator<Item = ToolUse<'_>> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolUse { id, name, input }),
            _ => None,
        })
    }
}

/// Borrowed view of a `tool_use` block
#[derive(Debug, Clone, Copy)]
pub struct ToolUse<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub input: &'a Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: UserContent,
}

impl UserMessage {
    /// Tool results carried by this message
    pub fn tool_results(&self) -> Vec<ToolResult> {
        match &self.content {
            UserContent::Text(_) => Vec::new(),
            UserContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => Some(ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        text: tool_result_text(content),
                        is_error: is_error.unwrap_or(false),
                    }),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// User content is either plain text or a list of blocks
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for UserContent {
    fn default() -> Self {
        UserContent::Blocks(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    /// thinking, images and anything newer
    #[serde(other)]
    Other,
}

/// Flattened tool result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub text: String,
    pub is_error: bool,
}

/// Render tool result content as text
///
/// Strings pass through, block lists contribute their text blocks, and any
/// other value is JSON-encoded.
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Input pushed into the agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentInput {
    /// A human turn
    UserText(String),
    /// A synthetic tool result answering a pending tool call
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl AgentInput {
    /// Stream-JSON encoding understood by the agent CLI
    pub fn to_wire(&self) -> Value {
        let content = match self {
            AgentInput::UserText(text) => json!([{ "type": "text", "text": text }]),
            AgentInput::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => json!([{
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            }]),
        };

        json!({
            "type": "user",
            "message": { "role": "user", "content": content },
        })
    }
}
