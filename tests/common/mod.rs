//! Common test utilities and helpers

#![allow(dead_code)]

use agent_relay::{
    AgentCollaborator, AgentEventStream, AgentInput, Broadcaster, Ledger, RelayError, Result,
    SessionEvent, Session,
};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Scripted agent: tests push events into the live stream and inspect what
/// the session forwarded
#[derive(Default)]
pub struct FakeAgent {
    events: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    sent: Mutex<Vec<AgentInput>>,
    starts: Mutex<Vec<Option<String>>>,
    fail_interrupt: AtomicBool,
    fail_next_send: AtomicBool,
    interrupt_delay: Mutex<Option<Duration>>,
}

impl FakeAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Push one raw event into the current stream
    pub fn emit(&self, event: Value) {
        let events = self.events.lock().unwrap();
        events
            .as_ref()
            .expect("agent stream not started")
            .send(event)
            .expect("intake dropped the stream");
    }

    /// End the current stream as if the agent exited on its own
    pub fn end_stream(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn fail_interrupts(&self) {
        self.fail_interrupt.store(true, Ordering::SeqCst);
    }

    /// Make the next `send` fail as if the agent's stdin had closed
    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Make `interrupt` take `delay` before the stream ends
    pub fn slow_interrupts(&self, delay: Duration) {
        *self.interrupt_delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<AgentInput> {
        self.sent.lock().unwrap().clone()
    }

    /// `resume` argument of every `start` call so far
    pub fn starts(&self) -> Vec<Option<String>> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentCollaborator for FakeAgent {
    async fn start(&self, resume: Option<String>) -> Result<AgentEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        self.starts.lock().unwrap().push(resume);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn send(&self, input: AgentInput) -> Result<()> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "agent stdin closed",
            )));
        }
        self.sent.lock().unwrap().push(input);
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        if self.fail_interrupt.load(Ordering::SeqCst) {
            return Err(RelayError::Internal("interrupt refused".to_string()));
        }
        let delay = *self.interrupt_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.end_stream();
        Ok(())
    }
}

/// Session over a fake agent with default limits
pub fn create_test_session(agent: Arc<FakeAgent>) -> Arc<Session> {
    Session::new(Ledger::default(), Broadcaster::default(), agent)
}

/// Poll `check` until it holds, failing the test after two seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Everything buffered in a subscriber channel
pub fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn event_names(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(|event| event.name()).collect()
}
