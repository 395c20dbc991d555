//! Agent Relay - one long-lived agent session, many observers
//!
//! Exposes a single conversational agent session over HTTP and Server-Sent
//! Events. Any number of observers can watch the conversation live, page
//! through its history, and steer the agent by sending messages, answering
//! its questions, or approving its plans.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Ledger**: bounded, append-only message history with pagination
//! - **Session**: run-state machine driving the agent and the ledger
//! - **Agent**: the collaborator boundary (typed events, child process)
//! - **API**: subscriber broadcaster and the axum HTTP/SSE server
//!
//! # Example
//!
//! ```ignore
//! use agent_relay::{ApiServer, ProcessAgent, RelayConfig, Session};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RelayConfig::load(None)?;
//!     let agent = Arc::new(ProcessAgent::new(config.agent.clone()));
//!     let session = Session::from_config(&config, agent);
//!
//!     ApiServer::new(config.server, session, config.broadcaster.channel_capacity)
//!         .serve()
//!         .await
//! }
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use agent::{AgentCollaborator, AgentEvent, AgentEventStream, AgentInput, ProcessAgent};
pub use api::{ApiServer, Broadcaster, ChannelSink, SessionEvent, SubscriberSink};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use ledger::{Direction, HistoryQuery, Ledger, QueryResult};
pub use session::{RunSnapshot, Session};
pub use types::{Message, MessageId, MessageType, Role, RunStatus, ToolStatus};
