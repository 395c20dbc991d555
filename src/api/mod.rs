//! HTTP API for the relayed session
//!
//! Provides:
//! - Server-Sent Events (SSE) with an `init` snapshot followed by live updates
//! - Conversation endpoints (messages, answers, plan decisions, stop)
//! - Run state and health endpoints

pub mod events;
pub mod server;

pub use events::{Broadcaster, ChannelSink, SessionEvent, SubscriberId, SubscriberSink};
pub use server::{ApiError, ApiServer};
