//! Agent collaborator backed by a child process
//!
//! Launches the agent CLI in stream-JSON mode: events arrive as JSON lines on
//! stdout, user turns and tool results are written as JSON lines to stdin.
//! Interrupting kills the child, which closes stdout and ends the stream.

use super::{AgentCollaborator, AgentEventStream, AgentInput};
use crate::config::AgentConfig;
use crate::error::{RelayError, Result};
use crate::utils::string::preview;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Line codec that drops lines over the length cap instead of failing
///
/// `FramedRead` stops for good after a decode error, so an oversize line
/// from the agent would otherwise end the whole event stream.
struct AgentLineCodec {
    inner: LinesCodec,
}

impl AgentLineCodec {
    fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
        }
    }
}

impl Decoder for AgentLineCodec {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<String>, Self::Error> {
        loop {
            match self.inner.decode(buf) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(
                        "Skipping agent output line longer than {} bytes",
                        self.inner.max_length()
                    );
                }
                other => return other,
            }
        }
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<String>, Self::Error> {
        loop {
            match self.inner.decode_eof(buf) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(
                        "Skipping agent output line longer than {} bytes",
                        self.inner.max_length()
                    );
                }
                other => return other,
            }
        }
    }
}

/// A running agent process
struct RunningAgent {
    child: Child,
    stdin: ChildStdin,
}

/// Agent CLI driven over stdio
pub struct ProcessAgent {
    config: AgentConfig,
    running: Mutex<Option<RunningAgent>>,
}

impl ProcessAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    fn command(&self, resume: Option<&str>) -> Command {
        let mut command = Command::new(&self.config.command);
        command.args(&self.config.args);
        if let Some(session_id) = resume {
            command.arg("--resume").arg(session_id);
        }
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl AgentCollaborator for ProcessAgent {
    async fn start(&self, resume: Option<String>) -> Result<AgentEventStream> {
        let mut running = self.running.lock().await;

        if let Some(mut previous) = running.take() {
            warn!("Replacing agent process that was still running");
            if let Err(e) = previous.child.start_kill() {
                debug!("Previous agent process already gone: {}", e);
            }
        }

        let mut child = self.command(resume.as_deref()).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::Internal("agent stdout not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelayError::Internal("agent stdin not captured".to_string()))?;

        info!(
            "Agent process started: {} (pid {:?}, resume: {})",
            self.config.command,
            child.id(),
            resume.as_deref().unwrap_or("none")
        );
        *running = Some(RunningAgent { child, stdin });

        let codec = AgentLineCodec::new(self.config.max_line_bytes);
        let events = FramedRead::new(stdout, codec).filter_map(|line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Skipping non-JSON agent output ({}): {}", e, preview(&line, 80));
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read agent output: {}", e);
                None
            }
        });

        Ok(Box::pin(events))
    }

    async fn send(&self, input: AgentInput) -> Result<()> {
        let mut running = self.running.lock().await;
        let agent = running
            .as_mut()
            .ok_or_else(|| RelayError::Internal("agent process is not running".to_string()))?;

        let mut line = serde_json::to_string(&input.to_wire())?;
        line.push('\n');
        agent.stdin.write_all(line.as_bytes()).await?;
        agent.stdin.flush().await?;

        debug!("Sent input to agent: {}", preview(&line, 120));
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        let Some(mut agent) = self.running.lock().await.take() else {
            debug!("Interrupt requested with no agent process");
            return Ok(());
        };

        drop(agent.stdin);
        agent.child.start_kill()?;
        let status = agent.child.wait().await?;
        info!("Agent process stopped ({})", status);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell_agent(script: &str) -> ProcessAgent {
        ProcessAgent::new(AgentConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_stream_decodes_json_lines() {
        let agent = shell_agent(
            r#"echo '{"type":"system","subtype":"init","session_id":"s1"}'; echo 'noise'; echo ''; echo '{"type":"result"}'"#,
        );

        let events: Vec<_> = agent.start(None).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["session_id"], "s1");
        assert_eq!(events[1]["type"], "result");
    }

    #[tokio::test]
    async fn test_oversize_line_is_skipped() {
        let agent = ProcessAgent::new(AgentConfig {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"head -c 5000 /dev/zero | tr '\0' x; echo; echo '{"type":"result"}'"#.to_string(),
            ],
            max_line_bytes: 1024,
            ..Default::default()
        });

        let events: Vec<_> = agent.start(None).await.unwrap().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "result");
    }

    #[test]
    fn test_line_codec_recovers_after_oversize_line() {
        let mut codec = AgentLineCodec::new(8);
        let mut buf = BytesMut::from("0123456789abcdef\nshort\ntail");

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("short"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("tail"));
    }

    #[tokio::test]
    async fn test_send_round_trips_through_stdin() {
        // echo each stdin line back as an event
        let agent = shell_agent("while read line; do echo \"$line\"; done");
        let mut events = agent.start(None).await.unwrap();

        agent
            .send(AgentInput::UserText("ping".to_string()))
            .await
            .unwrap();
        let echoed = events.next().await.unwrap();
        assert_eq!(echoed["message"]["content"][0]["text"], "ping");

        agent.interrupt().await.unwrap();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_without_process_fails() {
        let agent = shell_agent("true");
        let err = agent
            .send(AgentInput::UserText("hi".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Internal(_)));
        assert!(agent.interrupt().await.is_ok());
    }
}
