//! Agent collaborator boundary
//!
//! The relay treats the conversational agent as an opaque stream/sink pair:
//! it starts an event stream, pushes user turns and tool results in, and can
//! interrupt the stream. [`process::ProcessAgent`] drives a CLI agent over
//! stdio; tests plug in scripted fakes.

pub mod events;
pub mod process;

pub use events::{
    AgentEvent, AgentInput, AssistantMessage, ContentBlock, ToolResult, ToolUse, UserMessage,
    PLAN_TOOL, QUESTION_TOOL,
};
pub use process::ProcessAgent;

use crate::error::Result;
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// Raw events produced by the agent, one JSON value per event
pub type AgentEventStream = Pin<Box<dyn Stream<Item = serde_json::Value> + Send>>;

/// The agent as seen by the session
#[async_trait]
pub trait AgentCollaborator: Send + Sync {
    /// Open the agent's event stream
    ///
    /// `resume` carries the agent-side session id reported by a previous
    /// stream, so a restarted agent continues the same conversation.
    async fn start(&self, resume: Option<String>) -> Result<AgentEventStream>;

    /// Push a user turn or tool result into the agent
    async fn send(&self, input: AgentInput) -> Result<()>;

    /// Ask the agent to stop; the current event stream must end afterwards
    async fn interrupt(&self) -> Result<()>;
}
