//! Run-state bookkeeping
//!
//! Tracks whether the agent is busy, which question or plan waits on the
//! human, and which tool calls are still in flight. Pure state: the session
//! wraps it in its core lock together with the ledger.

use crate::api::events::StatusPayload;
use crate::error::{RelayError, Result};
use crate::types::{Message, RunStatus};
use serde::Serialize;

/// Point-in-time copy of the run state, as served by `/status` and `init`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub pending_question_tool_use_id: Option<String>,
    pub pending_plan_tool_use_id: Option<String>,
    pub active_tool_executions: Vec<Message>,
}

#[derive(Debug, Default)]
pub struct RunState {
    status: RunStatus,
    /// Incremented by every `begin_run`
    generation: u64,
    pending_question: Option<String>,
    pending_plan: Option<String>,
    // insertion-ordered, keyed by tool_use_id
    active_tools: Vec<Message>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Identifies the current (or last) run
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Move to `running`; fails with `Busy` if a run is already in progress
    pub fn begin_run(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(RelayError::Busy);
        }
        self.status = RunStatus::Running;
        self.generation += 1;
        Ok(())
    }

    /// Move to `stable` after the agent reported completion
    ///
    /// Pending interactions are dropped since nothing can answer them once
    /// the run is over. In-flight tools stay until their results arrive.
    /// Returns whether the status changed.
    pub fn finish_run(&mut self) -> bool {
        let changed = self.is_running();
        self.status = RunStatus::Stable;
        self.pending_question = None;
        self.pending_plan = None;
        changed
    }

    /// Move to `stable` after the agent was interrupted
    ///
    /// Like [`finish_run`](Self::finish_run), but also forgets in-flight
    /// tools: an interrupted agent never reports their results.
    pub fn abort_run(&mut self) -> bool {
        self.active_tools.clear();
        self.finish_run()
    }

    /// Record an `agent` message as an in-flight tool call
    pub fn track_tool(&mut self, message: Message) {
        let Some(id) = message.tool_use_id.clone() else {
            return;
        };
        match self
            .active_tools
            .iter_mut()
            .find(|m| m.tool_use_id.as_deref() == Some(id.as_str()))
        {
            Some(existing) => *existing = message,
            None => self.active_tools.push(message),
        }
    }

    /// Remove the in-flight entry for `tool_use_id`, if any
    pub fn complete_tool(&mut self, tool_use_id: &str) -> Option<Message> {
        let index = self
            .active_tools
            .iter()
            .position(|m| m.tool_use_id.as_deref() == Some(tool_use_id))?;
        Some(self.active_tools.remove(index))
    }

    pub fn active_tools(&self) -> &[Message] {
        &self.active_tools
    }

    pub fn ask_question(&mut self, tool_use_id: impl Into<String>) {
        self.pending_question = Some(tool_use_id.into());
    }

    pub fn propose_plan(&mut self, tool_use_id: impl Into<String>) {
        self.pending_plan = Some(tool_use_id.into());
    }

    pub fn pending_question(&self) -> Option<&str> {
        self.pending_question.as_deref()
    }

    pub fn pending_plan(&self) -> Option<&str> {
        self.pending_plan.as_deref()
    }

    /// The question an answer would resolve; requires a running run
    pub fn active_question(&self) -> Result<&str> {
        if !self.is_running() {
            return Err(RelayError::NoActiveQuestion);
        }
        self.pending_question().ok_or(RelayError::NoActiveQuestion)
    }

    /// The plan a decision would resolve; requires a running run
    pub fn active_plan(&self) -> Result<&str> {
        if !self.is_running() {
            return Err(RelayError::NoActivePlan);
        }
        self.pending_plan().ok_or(RelayError::NoActivePlan)
    }

    pub fn clear_pending_question(&mut self) {
        self.pending_question = None;
    }

    pub fn clear_pending_plan(&mut self) {
        self.pending_plan = None;
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            status: self.status,
            pending_question_tool_use_id: self.pending_question.clone(),
            pending_plan_tool_use_id: self.pending_plan.clone(),
            active_tool_executions: self.active_tools.clone(),
        }
    }

    pub fn status_payload(&self) -> StatusPayload {
        StatusPayload {
            status: self.status,
            pending_question_tool_use_id: self.pending_question.clone(),
            pending_plan_tool_use_id: self.pending_plan.clone(),
        }
    }
}
