//! The "agent" session kind: an external coding-agent CLI.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use serde_json::{Value, json};
use tether_core::{
    AGENT_SESSION_KEY, AdapterError, EventChannel, EventSink, ProcessHandle, Session,
    SessionAdapter, SessionUpdate, SpawnRequest,
};
use tether_pty::resolve_executable;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::ChildStdin,
    sync::{mpsc, oneshot},
};

use crate::command::AgentCommand;

/// Kind string this adapter registers under.
pub const KIND: &str = "agent";

/// Session type adapter for an external coding-agent CLI.
///
/// The agent process speaks newline-delimited JSON on stdout; the first
/// message carrying a `session_id` is the agent-issued id needed for
/// resume. Input is structured (a user message envelope), so there is no
/// terminal and no resize capability.
pub struct AgentAdapter {
    command: AgentCommand,
}

impl AgentAdapter {
    #[must_use]
    pub const fn new(command: AgentCommand) -> Self {
        Self { command }
    }

    async fn spawn(
        &self,
        req: &SpawnRequest,
        resume_session: Option<&str>,
    ) -> Result<Box<dyn ProcessHandle>, AdapterError> {
        let program = resolve_executable(&self.command.program)
            .await
            .ok_or_else(|| AdapterError::ExecutableNotFound(self.command.program.clone()))?;

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(self.command.invocation_args(resume_session))
            .current_dir(&req.workspace)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .group_spawn()
            .map_err(|e| AdapterError::SpawnFailed(format!("failed to spawn agent: {e}")))?;

        let stdin = child
            .inner()
            .stdin
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("agent stdin unavailable".to_string()))?;
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("agent stdout unavailable".to_string()))?;
        let stderr = child
            .inner()
            .stderr
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("agent stderr unavailable".to_string()))?;

        let stderr_sink = req.sink.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_sink.push_stderr(line.as_bytes());
            }
        });

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let sink = req.sink.clone();
        let updates = req.updates.clone();
        let session_id = req.session_id;
        tokio::spawn(async move {
            read_loop(child, stdout, kill_rx, &sink, &updates).await;
            tracing::debug!(session_id = %session_id, "agent read loop finished");
        });

        if resume_session.is_some() {
            req.sink.push_system("resumed", json!({}));
        }

        tracing::info!(
            session_id = %req.session_id,
            agent = %program.display(),
            resumed = resume_session.is_some(),
            "spawned agent process"
        );

        Ok(Box::new(AgentHandle {
            stdin: tokio::sync::Mutex::new(stdin),
            kill_tx: Mutex::new(Some(kill_tx)),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl SessionAdapter for AgentAdapter {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn create(&self, req: SpawnRequest) -> Result<Box<dyn ProcessHandle>, AdapterError> {
        self.spawn(&req, None).await
    }

    async fn resume(
        &self,
        session: &Session,
        req: SpawnRequest,
    ) -> Result<Box<dyn ProcessHandle>, AdapterError> {
        let agent_session = session
            .metadata
            .get(AGENT_SESSION_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::InvalidOptions(
                    "session has no recorded agent session id to resume".to_string(),
                )
            })?
            .to_string();
        self.spawn(&req, Some(&agent_session)).await
    }
}

/// Reads agent stdout until EOF or a kill request, recording every
/// message and surfacing the agent-issued session id once.
async fn read_loop(
    mut child: command_group::AsyncGroupChild,
    stdout: tokio::process::ChildStdout,
    mut kill_rx: oneshot::Receiver<()>,
    sink: &EventSink,
    updates: &mpsc::UnboundedSender<SessionUpdate>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut announced_session = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(line) {
                            Ok(message) => {
                                if !announced_session {
                                    if let Some(id) =
                                        message.get("session_id").and_then(Value::as_str)
                                    {
                                        announced_session = true;
                                        sink.push_system(
                                            "agent_session",
                                            json!({ "id": id }),
                                        );
                                        let _ = updates.send(SessionUpdate::AgentSession {
                                            id: id.to_string(),
                                        });
                                    }
                                }
                                sink.record(EventChannel::Stdout, "message", message);
                            }
                            Err(_) => {
                                sink.push_stdout(line.as_bytes());
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("error reading agent stdout: {e}");
                        break;
                    }
                }
            }
            _ = &mut kill_rx => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!("agent kill after exit: {e}");
                }
                break;
            }
        }
    }

    let code = child.wait().await.ok().and_then(|status| status.code());
    sink.push_system("exited", json!({ "code": code }));
    let _ = updates.send(SessionUpdate::Exited { code });
}

struct AgentHandle {
    stdin: tokio::sync::Mutex<ChildStdin>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    closed: AtomicBool,
}

impl AgentHandle {
    /// Raw JSON input passes through; plain text is wrapped in a user
    /// message envelope.
    fn input_line(data: &[u8]) -> String {
        let text = String::from_utf8_lossy(data);
        let trimmed = text.trim();
        if serde_json::from_str::<Value>(trimmed)
            .map(|v| v.is_object())
            .unwrap_or(false)
        {
            trimmed.to_string()
        } else {
            json!({
                "type": "user",
                "message": {
                    "role": "user",
                    "content": [{ "type": "text", "text": trimmed }],
                },
            })
            .to_string()
        }
    }
}

#[async_trait]
impl ProcessHandle for AgentHandle {
    async fn input(&self, data: &[u8]) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        let line = Self::input_line(data);
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(tx) = self.kill_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}
