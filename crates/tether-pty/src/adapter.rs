//! The "process" session kind: an interactive shell in a PTY.

use std::{
    io::{Read, Write},
    path::PathBuf,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use serde_json::{Value, json};
use tether_core::{
    AdapterError, ProcessHandle, Session, SessionAdapter, SessionId, SessionUpdate, SpawnRequest,
};

use crate::shell::{UnixShell, expand_workspace, resolve_executable};

/// Kind string this adapter registers under.
pub const KIND: &str = "process";

const READ_BUF_BYTES: usize = 4096;

/// Session type adapter for interactive shells in a pseudo-terminal.
///
/// Output is pumped from a dedicated OS thread because PTY readers
/// block. Resume cannot reattach to a PTY that died with the daemon, so
/// it spawns a fresh shell in the session workspace and records a
/// `system/resumed` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessAdapter;

impl ProcessAdapter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn spawn_shell(
        &self,
        req: &SpawnRequest,
        resumed: bool,
    ) -> Result<Box<dyn ProcessHandle>, AdapterError> {
        let (program, login) = match req.options.get("shell").and_then(Value::as_str) {
            Some(shell) => {
                let path = resolve_executable(shell)
                    .await
                    .ok_or_else(|| AdapterError::ExecutableNotFound(shell.to_string()))?;
                let login = UnixShell::from_path(&path).is_some_and(|s| s.login());
                (path, login)
            }
            None => {
                let shell = UnixShell::current_shell();
                (shell.path().to_path_buf(), shell.login())
            }
        };

        let workspace = expand_workspace(&req.workspace);
        if !workspace.is_dir() {
            return Err(AdapterError::InvalidOptions(format!(
                "workspace is not a directory: {}",
                workspace.display()
            )));
        }

        let size = PtySize {
            rows: req.rows.max(1),
            cols: req.cols.max(1),
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| AdapterError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&program);
        if login {
            cmd.arg("-l");
        }
        cmd.cwd(&workspace);
        cmd.env("TERM", "xterm-256color");

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            AdapterError::SpawnFailed(format!("failed to spawn {}: {e}", program.display()))
        })?;
        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| AdapterError::SpawnFailed(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| AdapterError::SpawnFailed(format!("failed to acquire PTY writer: {e}")))?;

        let sink = req.sink.clone();
        let updates = req.updates.clone();
        let session_id = req.session_id;
        std::thread::Builder::new()
            .name(format!("tether-pty-{session_id}"))
            .spawn(move || {
                let mut buf = [0u8; READ_BUF_BYTES];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            sink.push_stdout(&buf[..n]);
                        }
                        Err(_) => break,
                    }
                }
                let code = child.wait().ok().map(|status| status.exit_code() as i32);
                sink.push_system("exited", json!({ "code": code }));
                let _ = updates.send(SessionUpdate::Exited { code });
                tracing::debug!(session_id = %session_id, ?code, "PTY child exited");
            })
            .map_err(|e| {
                AdapterError::SpawnFailed(format!("failed to spawn PTY reader thread: {e}"))
            })?;

        if resumed {
            req.sink
                .push_system("resumed", json!({ "shell": program.display().to_string() }));
        }

        tracing::info!(
            session_id = %session_id,
            shell = %program.display(),
            workspace = %workspace.display(),
            resumed,
            "spawned PTY shell"
        );

        Ok(Box::new(PtyHandle {
            session_id,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl SessionAdapter for ProcessAdapter {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn supports_resize(&self) -> bool {
        true
    }

    async fn create(&self, req: SpawnRequest) -> Result<Box<dyn ProcessHandle>, AdapterError> {
        self.spawn_shell(&req, false).await
    }

    async fn resume(
        &self,
        _session: &Session,
        req: SpawnRequest,
    ) -> Result<Box<dyn ProcessHandle>, AdapterError> {
        self.spawn_shell(&req, true).await
    }
}

struct PtyHandle {
    session_id: SessionId,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    closed: AtomicBool,
}

#[async_trait]
impl ProcessHandle for PtyHandle {
    async fn input(&self, data: &[u8]) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        self.master
            .lock()
            .unwrap()
            .resize(PtySize {
                rows: rows.max(1),
                cols: cols.max(1),
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AdapterError::Io(std::io::Error::other(e.to_string())))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.killer.lock().unwrap().kill() {
            // The child may already have exited; nothing left to do.
            tracing::debug!(session_id = %self.session_id, "PTY kill after exit: {e}");
        }
        Ok(())
    }
}
