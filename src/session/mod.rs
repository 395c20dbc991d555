//! The relayed agent session
//!
//! A [`Session`] owns the ledger and run state behind one lock, drives the
//! agent collaborator, and publishes every change through the broadcaster.
//! Every precondition check happens under the same guard as the mutation it
//! protects, and every append is broadcast before that guard is released, so
//! observers see messages in id order and a fresh subscriber's snapshot is
//! never overtaken by a later append.
//!
//! Lock order is core -> broadcaster registry, intake -> core, and
//! core -> agent while a tool result is forwarded.

pub mod format;
pub mod state;

pub use state::{RunSnapshot, RunState};

use crate::agent::{
    AgentCollaborator, AgentEvent, AgentEventStream, AgentInput, PLAN_TOOL, QUESTION_TOOL,
};
use crate::api::events::{
    Broadcaster, InitPayload, SessionEvent, StatusPayload, SubscriberId, SubscriberSink,
};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::ledger::{HistoryQuery, Ledger, QueryResult};
use crate::types::{Message, MessageExtra, MessageType, Role};
use crate::utils::string::preview;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// State guarded by the session lock
struct SessionCore {
    ledger: Ledger,
    run: RunState,
    /// Agent-side session id, used to resume when the stream restarts
    agent_session_id: Option<String>,
}

pub struct Session {
    core: Mutex<SessionCore>,
    broadcaster: Broadcaster,
    agent: Arc<dyn AgentCollaborator>,
    intake: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        ledger: Ledger,
        broadcaster: Broadcaster,
        agent: Arc<dyn AgentCollaborator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: Mutex::new(SessionCore {
                ledger,
                run: RunState::new(),
                agent_session_id: None,
            }),
            broadcaster,
            agent,
            intake: Mutex::new(None),
        })
    }

    pub fn from_config(config: &RelayConfig, agent: Arc<dyn AgentCollaborator>) -> Arc<Self> {
        Self::new(
            Ledger::new(config.ledger.max_history),
            Broadcaster::new(&config.broadcaster),
            agent,
        )
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Register an observer; it receives `init` before any live event
    pub async fn connect(&self, sink: Arc<dyn SubscriberSink>) -> Result<SubscriberId> {
        let core = self.core.lock().await;
        let init = SessionEvent::Init(InitPayload {
            messages: core.ledger.snapshot(),
            state: core.run.snapshot(),
        });
        self.broadcaster.subscribe_with_init(sink, init).await
    }

    pub async fn disconnect(&self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id).await
    }

    /// Paginated read of the ledger
    pub async fn query(&self, query: &HistoryQuery) -> Result<QueryResult> {
        let mode = query.mode()?;
        Ok(self.core.lock().await.ledger.query_mode(mode))
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.core.lock().await.ledger.snapshot()
    }

    pub async fn status(&self) -> RunSnapshot {
        self.core.lock().await.run.snapshot()
    }

    /// Tool calls announced by the agent whose result has not arrived
    pub async fn active_tool_executions(&self) -> Vec<Message> {
        self.core.lock().await.run.active_tools().to_vec()
    }

    pub async fn agent_session_id(&self) -> Option<String> {
        self.core.lock().await.agent_session_id.clone()
    }

    /// Start a run with a user message
    ///
    /// Fails with `Busy` while a run is in progress. The agent's event stream
    /// is started on first use and restarted (resuming the agent session) if
    /// it has ended since.
    pub async fn send_message(self: &Arc<Self>, content: impl Into<String>) -> Result<Message> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "message content must not be empty".to_string(),
            ));
        }

        let (message, resume) = {
            let mut core = self.core.lock().await;
            core.run.begin_run()?;
            self.publish_status(core.run.status_payload()).await;

            let message = core.ledger.append(
                Role::User,
                content.clone(),
                MessageType::Normal,
                MessageExtra::default(),
            );
            self.publish(message.clone()).await;
            (message, core.agent_session_id.clone())
        };
        info!("Run started by message {}", message.id);

        let forwarded = match self.ensure_intake(resume).await {
            Ok(()) => self.agent.send(AgentInput::UserText(content)).await,
            Err(e) => Err(e),
        };

        if let Err(e) = forwarded {
            error!("Failed to forward message {} to agent: {}", message.id, e);
            self.revert_run().await;
            return Err(internal(e));
        }
        Ok(message)
    }

    /// Answer the pending question
    ///
    /// The question stays pending until the agent has accepted the answer,
    /// so a failed forward can be retried and a concurrent answer is refused.
    pub async fn send_action(&self, answers: BTreeMap<String, String>) -> Result<()> {
        let mut core = self.core.lock().await;
        let tool_use_id = core.run.active_question()?.to_string();

        debug!("Answering question {}", tool_use_id);
        let content = serde_json::to_string(&json!({ "answers": answers }))?;
        self.forward_tool_result(tool_use_id, content).await?;

        core.run.clear_pending_question();
        let message = core.ledger.append(
            Role::User,
            format::summarize_answers(&answers),
            MessageType::Normal,
            MessageExtra::default(),
        );
        self.publish(message).await;
        self.publish_status(core.run.status_payload()).await;
        Ok(())
    }

    /// Approve or reject the pending plan
    pub async fn approve_plan(&self, approved: bool) -> Result<()> {
        let mut core = self.core.lock().await;
        let tool_use_id = core.run.active_plan()?.to_string();

        info!(
            "Plan {} {}",
            tool_use_id,
            if approved { "approved" } else { "rejected" }
        );
        let content = serde_json::to_string(&json!({ "approved": approved }))?;
        self.forward_tool_result(tool_use_id, content).await?;

        core.run.clear_pending_plan();
        self.publish_status(core.run.status_payload()).await;
        Ok(())
    }

    /// Interrupt the agent and force the session back to `stable`
    ///
    /// Only the run that was current when the stop began is ended. A run
    /// started while the interrupt was in progress keeps going.
    pub async fn stop_agent(&self) -> Result<()> {
        let mut intake = self.intake.lock().await;
        let live = intake.as_ref().is_some_and(|handle| !handle.is_finished());
        let (running, generation) = {
            let core = self.core.lock().await;
            (core.run.is_running(), core.run.generation())
        };

        if !live && !running {
            debug!("Stop requested with nothing running");
            *intake = None;
            return Ok(());
        }

        if let Err(e) = self.agent.interrupt().await {
            error!("Agent interrupt failed, aborting intake: {}", e);
            if let Some(handle) = intake.as_ref() {
                handle.abort();
            }
        }

        if let Some(handle) = intake.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Intake task ended abnormally: {}", e);
                }
            }
        }
        drop(intake);

        let mut core = self.core.lock().await;
        if core.run.generation() != generation {
            debug!("A new run started during stop, leaving it running");
            return Ok(());
        }
        if core.run.abort_run() {
            info!("Run stopped");
            self.publish_status(core.run.status_payload()).await;
        }
        Ok(())
    }

    /// Decode and apply one raw agent event; malformed events are skipped
    pub async fn ingest(&self, raw: Value) {
        match AgentEvent::decode(&raw) {
            Ok(event) => self.handle_agent_event(event).await,
            Err(e) => warn!(
                "Skipping malformed agent event ({}): {}",
                e,
                preview(&raw.to_string(), 120)
            ),
        }
    }

    /// Apply one agent event to the ledger and run state
    pub async fn handle_agent_event(&self, event: AgentEvent) {
        let mut core = self.core.lock().await;
        let core = &mut *core;

        match event {
            AgentEvent::Assistant { message, .. } => {
                let text = message.text();
                if !text.trim().is_empty() {
                    let appended = core.ledger.append(
                        Role::Assistant,
                        text,
                        MessageType::Normal,
                        MessageExtra::default(),
                    );
                    self.publish(appended).await;
                }

                for tool in message.tool_uses() {
                    let announcement =
                        json!({ "tool": tool.name, "id": tool.id, "input": tool.input });
                    let appended = core.ledger.append(
                        Role::Agent,
                        announcement.to_string(),
                        MessageType::Normal,
                        MessageExtra::tool_use(tool.id),
                    );
                    debug!("Tool call {} ({}) started", tool.id, tool.name);
                    core.run.track_tool(appended.clone());
                    self.publish(appended).await;

                    let prompt = match tool.name {
                        QUESTION_TOOL => {
                            Some((MessageType::Question, format::format_question(tool.input)))
                        }
                        PLAN_TOOL => Some((MessageType::Plan, format::format_plan(tool.input))),
                        _ => None,
                    };
                    let Some((message_type, content)) = prompt else {
                        continue;
                    };

                    let appended = core.ledger.append(
                        Role::Assistant,
                        content,
                        message_type,
                        MessageExtra::tool_use(tool.id),
                    );
                    self.publish(appended).await;
                    if message_type == MessageType::Question {
                        core.run.ask_question(tool.id);
                    } else {
                        core.run.propose_plan(tool.id);
                    }
                    info!("Agent is waiting on a {:?} ({})", message_type, tool.id);
                    self.publish_status(core.run.status_payload()).await;
                }
            }
            AgentEvent::User { message } => {
                for result in message.tool_results() {
                    let error = result.is_error.then(|| result.text.clone());
                    let appended = core.ledger.append(
                        Role::ToolResult,
                        result.text,
                        MessageType::Normal,
                        MessageExtra::tool_result(result.tool_use_id.clone(), error),
                    );
                    if core.run.complete_tool(&result.tool_use_id).is_none() {
                        debug!("Tool result for untracked call {}", result.tool_use_id);
                    }
                    self.publish(appended).await;
                }
            }
            AgentEvent::System {
                subtype,
                session_id,
                model,
            } => match subtype.as_deref() {
                Some("init") => {
                    info!(
                        "Agent session initialized: {} (model: {})",
                        session_id.as_deref().unwrap_or("unknown"),
                        model.as_deref().unwrap_or("unknown")
                    );
                    if session_id.is_some() {
                        core.agent_session_id = session_id;
                    }
                }
                other => debug!("Agent system event: {}", other.unwrap_or("none")),
            },
            AgentEvent::Result {
                subtype,
                is_error,
                num_turns,
                total_cost_usd,
                session_id,
            } => {
                if session_id.is_some() {
                    core.agent_session_id = session_id;
                }
                if is_error {
                    warn!(
                        "Agent run ended with error ({})",
                        subtype.as_deref().unwrap_or("unknown")
                    );
                } else {
                    info!(
                        "Agent run finished: {} turns, ${:.4}",
                        num_turns.unwrap_or(0),
                        total_cost_usd.unwrap_or(0.0)
                    );
                }
                core.run.finish_run();
                self.publish_status(core.run.status_payload()).await;
            }
            AgentEvent::Unknown => debug!("Ignoring unrecognized agent event"),
        }
    }

    async fn ensure_intake(self: &Arc<Self>, resume: Option<String>) -> Result<()> {
        let mut intake = self.intake.lock().await;
        if intake.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let stream = self.agent.start(resume).await?;
        let session = Arc::clone(self);
        *intake = Some(tokio::spawn(async move {
            session.run_intake(stream).await;
        }));
        Ok(())
    }

    async fn run_intake(&self, mut stream: AgentEventStream) {
        debug!("Agent event intake started");
        while let Some(raw) = stream.next().await {
            self.ingest(raw).await;
        }

        if self.core.lock().await.run.is_running() {
            warn!("Agent event stream ended during a run");
        } else {
            debug!("Agent event stream ended");
        }
    }

    async fn forward_tool_result(&self, tool_use_id: String, content: String) -> Result<()> {
        self.agent
            .send(AgentInput::ToolResult {
                tool_use_id,
                content,
                is_error: false,
            })
            .await
            .map_err(|e| {
                error!("Failed to forward tool result to agent: {}", e);
                internal(e)
            })
    }

    async fn revert_run(&self) {
        let mut core = self.core.lock().await;
        if core.run.abort_run() {
            self.publish_status(core.run.status_payload()).await;
        }
    }

    async fn publish(&self, message: Message) {
        self.broadcaster
            .broadcast(SessionEvent::MessageUpdate(message))
            .await;
    }

    async fn publish_status(&self, payload: StatusPayload) {
        self.broadcaster
            .broadcast(SessionEvent::StatusChange(payload))
            .await;
    }
}

fn internal(err: RelayError) -> RelayError {
    match err {
        RelayError::Internal(_) => err,
        other => RelayError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::events::ChannelSink;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    /// Collaborator whose stream never yields; records what it is sent
    #[derive(Default)]
    struct SilentAgent {
        sent: StdMutex<Vec<AgentInput>>,
        fail_send: bool,
    }

    #[async_trait]
    impl AgentCollaborator for SilentAgent {
        async fn start(&self, _resume: Option<String>) -> Result<AgentEventStream> {
            Ok(Box::pin(tokio_stream::pending::<Value>()))
        }

        async fn send(&self, input: AgentInput) -> Result<()> {
            if self.fail_send {
                return Err(RelayError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "agent stdin closed",
                )));
            }
            self.sent.lock().unwrap().push(input);
            Ok(())
        }

        async fn interrupt(&self) -> Result<()> {
            Ok(())
        }
    }

    fn session_with(agent: Arc<SilentAgent>) -> Arc<Session> {
        Session::new(Ledger::default(), Broadcaster::default(), agent)
    }

    fn assistant_tool_use(id: &str, name: &str, input: Value) -> AgentEvent {
        AgentEvent::decode(&json!({
            "type": "assistant",
            "message": { "content": [{ "type": "tool_use", "id": id, "name": name, "input": input }] }
        }))
        .unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let session = session_with(Arc::new(SilentAgent::default()));
        let err = session.send_message("  \n").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
        assert!(session.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_message_emits_status_then_message() {
        let agent = Arc::new(SilentAgent::default());
        let session = session_with(agent.clone());
        let (sink, mut rx) = ChannelSink::new(16);
        session.connect(Arc::new(sink)).await.unwrap();

        session.send_message("hello").await.unwrap();

        let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["init", "status_change", "message_update"]);
        assert_eq!(
            *agent.sent.lock().unwrap(),
            vec![AgentInput::UserText("hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_forward_reverts_to_stable() {
        let agent = Arc::new(SilentAgent {
            fail_send: true,
            ..Default::default()
        });
        let session = session_with(agent);

        let err = session.send_message("hello").await.unwrap_err();
        assert!(matches!(err, RelayError::Internal(_)));
        assert_eq!(session.status().await.status, crate::types::RunStatus::Stable);
        assert_eq!(session.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_question_flow() {
        let agent = Arc::new(SilentAgent::default());
        let session = session_with(agent.clone());
        session.send_message("pick one").await.unwrap();

        session
            .handle_agent_event(assistant_tool_use(
                "q1",
                QUESTION_TOOL,
                json!({ "questions": [{ "question": "Color?", "options": [{ "label": "red" }] }] }),
            ))
            .await;

        let messages = session.messages().await;
        let roles: Vec<_> = messages.iter().map(|m| (m.role, m.message_type)).collect();
        assert_eq!(
            roles,
            vec![
                (Role::User, MessageType::Normal),
                (Role::Agent, MessageType::Normal),
                (Role::Assistant, MessageType::Question),
            ]
        );
        assert_eq!(messages[2].content, "Color?\n  1. red");
        assert_eq!(messages[2].tool_use_id.as_deref(), Some("q1"));

        assert!(matches!(
            session.approve_plan(true).await,
            Err(RelayError::NoActivePlan)
        ));

        let mut answers = BTreeMap::new();
        answers.insert("Color?".to_string(), "red".to_string());
        session.send_action(answers).await.unwrap();

        assert!(session.status().await.pending_question_tool_use_id.is_none());
        let sent = agent.sent.lock().unwrap().clone();
        let AgentInput::ToolResult {
            tool_use_id,
            content,
            is_error,
        } = &sent[1]
        else {
            panic!("expected tool result");
        };
        assert_eq!(tool_use_id, "q1");
        assert!(!is_error);
        let content: Value = serde_json::from_str(content).unwrap();
        assert_eq!(content, json!({ "answers": { "Color?": "red" } }));
        assert_eq!(session.messages().await.last().unwrap().content, "Color?: red");
    }

    #[tokio::test]
    async fn test_plan_approval() {
        let agent = Arc::new(SilentAgent::default());
        let session = session_with(agent.clone());
        session.send_message("plan it").await.unwrap();

        session
            .handle_agent_event(assistant_tool_use(
                "p1",
                PLAN_TOOL,
                json!({ "plan": "1. write tests" }),
            ))
            .await;

        assert_eq!(
            session.status().await.pending_plan_tool_use_id.as_deref(),
            Some("p1")
        );
        assert!(matches!(
            session.send_action(BTreeMap::new()).await,
            Err(RelayError::NoActiveQuestion)
        ));

        session.approve_plan(false).await.unwrap();
        let sent = agent.sent.lock().unwrap().clone();
        assert_eq!(
            sent[1],
            AgentInput::ToolResult {
                tool_use_id: "p1".to_string(),
                content: r#"{"approved":false}"#.to_string(),
                is_error: false,
            }
        );
        assert!(matches!(
            session.approve_plan(true).await,
            Err(RelayError::NoActivePlan)
        ));
    }

    #[tokio::test]
    async fn test_result_event_resets_run() {
        let session = session_with(Arc::new(SilentAgent::default()));
        session.send_message("go").await.unwrap();
        session
            .handle_agent_event(assistant_tool_use("t1", "Bash", json!({ "command": "ls" })))
            .await;
        assert_eq!(session.active_tool_executions().await.len(), 1);

        session
            .ingest(json!({ "type": "result", "subtype": "success", "session_id": "abc" }))
            .await;

        let snapshot = session.status().await;
        assert_eq!(snapshot.status, crate::types::RunStatus::Stable);
        // the tool result may still arrive after the run completes
        assert_eq!(snapshot.active_tool_executions.len(), 1);
        assert_eq!(session.agent_session_id().await.as_deref(), Some("abc"));
        assert!(session.send_message("again").await.is_ok());

        session
            .ingest(json!({
                "type": "user",
                "message": { "content": [{ "type": "tool_result", "tool_use_id": "t1", "content": "ok" }] }
            }))
            .await;
        assert!(session.active_tool_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_clears_in_flight_tools() {
        let session = session_with(Arc::new(SilentAgent::default()));
        session.send_message("go").await.unwrap();
        session
            .handle_agent_event(assistant_tool_use("t1", "Bash", json!({ "command": "ls" })))
            .await;

        session.stop_agent().await.unwrap();

        assert_eq!(session.status().await, RunSnapshot::default());
    }

    #[tokio::test]
    async fn test_malformed_events_are_skipped() {
        let session = session_with(Arc::new(SilentAgent::default()));
        session.ingest(json!({ "type": "assistant" })).await;
        session.ingest(json!(42)).await;
        session.ingest(json!({ "type": "rate_limit_event" })).await;
        assert!(session.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let session = session_with(Arc::new(SilentAgent::default()));
        let (sink, mut rx) = ChannelSink::new(16);
        session.connect(Arc::new(sink)).await.unwrap();

        session.stop_agent().await.unwrap();

        let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["init"]);
    }
}
