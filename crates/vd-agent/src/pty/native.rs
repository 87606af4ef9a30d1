//! Local shell on a native pseudo-terminal
//!
//! Uses the portable-pty crate. PTY handles are blocking, so the output
//! reader and the child wait each run on a blocking thread; the async side
//! only forwards input and watches for cancellation.

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use portable_pty::{native_pty_system, CommandBuilder, PtyPair, PtySize};
use tokio::task::JoinHandle;

use vd_protocol::SessionId;

use super::runner::{SessionIo, SessionRunner};
use crate::queue::QueueSender;
use crate::session::CloseSignal;

/// Size of each read from the PTY master
const READ_BUFFER_SIZE: usize = 4096;

/// How long to wait for the shell to exit after it has been killed
const EXIT_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for the reader thread once the master is dropped
const READER_TIMEOUT: Duration = Duration::from_millis(500);

const DEFAULT_SIZE: PtySize = PtySize {
    rows: 24,
    cols: 80,
    pixel_width: 0,
    pixel_height: 0,
};

/// Spawns the host's shell for every session
#[derive(Debug, Clone)]
pub struct PtyRunner {
    /// Shell to spawn instead of the resolved default
    default_shell: Option<String>,
    /// Environment variables for every shell
    default_env: Vec<(String, String)>,
}

impl PtyRunner {
    /// Create a runner with custom defaults
    pub fn new(default_shell: Option<String>, default_env: Vec<(String, String)>) -> Self {
        Self {
            default_shell,
            default_env,
        }
    }

    /// Shell to spawn: configured shell, then `$SHELL`, then bash on the
    /// `PATH`, then the platform fallback.
    pub fn resolve_shell(&self) -> String {
        self.default_shell
            .clone()
            .filter(|shell| !shell.trim().is_empty())
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .or_else(|| find_on_path("bash"))
            .unwrap_or_else(|| {
                if cfg!(windows) {
                    "cmd.exe".to_string()
                } else {
                    "/bin/sh".to_string()
                }
            })
    }
}

impl Default for PtyRunner {
    fn default() -> Self {
        Self::new(
            None,
            vec![("TERM".to_string(), "xterm-256color".to_string())],
        )
    }
}

#[async_trait]
impl SessionRunner for PtyRunner {
    async fn run(&self, io: SessionIo) -> Result<()> {
        let SessionIo {
            session_id,
            mut input,
            output,
            cancel,
            close,
        } = io;

        let PtyPair { master, slave } = native_pty_system()
            .openpty(DEFAULT_SIZE)
            .with_context(|| "Failed to open PTY")?;

        let shell = self.resolve_shell();
        let mut cmd = CommandBuilder::new(&shell);
        for (key, value) in &self.default_env {
            cmd.env(key, value);
        }

        let mut child = slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn shell: {}", shell))?;
        drop(slave);

        tracing::info!(
            session_id = %session_id,
            "Spawned {} with PID: {:?}",
            shell,
            child.process_id()
        );

        let mut killer = child.clone_killer();
        let reader = master
            .try_clone_reader()
            .with_context(|| "Failed to clone PTY reader")?;
        let mut writer = master
            .take_writer()
            .with_context(|| "Failed to take PTY writer")?;

        let reader_task = spawn_output_reader(session_id.clone(), reader, output, close.clone());

        let exited = close.clone();
        let wait_task = tokio::task::spawn_blocking(move || {
            let status = child.wait();
            exited.close();
            status
        });

        loop {
            tokio::select! {
                _ = close.closed() => break,
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id = %session_id, "Session cancelled");
                    break;
                }
                chunk = input.recv() => match chunk {
                    Some(chunk) => {
                        let written = writer.write_all(&chunk).and_then(|_| writer.flush());
                        if let Err(e) = written {
                            tracing::warn!(
                                session_id = %session_id,
                                "Failed to write to PTY: {}",
                                e
                            );
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        close.close();
        if let Err(e) = killer.kill() {
            tracing::trace!(session_id = %session_id, "Kill after exit: {}", e);
        }
        drop(writer);

        match tokio::time::timeout(EXIT_TIMEOUT, wait_task).await {
            Ok(Ok(Ok(status))) => {
                tracing::info!(
                    session_id = %session_id,
                    "Shell exited with code {}",
                    status.exit_code()
                );
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(session_id = %session_id, "Failed to wait for shell: {}", e);
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, "Wait task failed: {}", e);
            }
            Err(_) => {
                tracing::debug!(session_id = %session_id, "Shell did not exit in time");
            }
        }

        // Dropping the master unblocks the reader thread
        drop(master);
        if tokio::time::timeout(READER_TIMEOUT, reader_task).await.is_err() {
            // Something outside the shell still holds the terminal open
            tracing::warn!(
                session_id = %session_id,
                "PTY reader still blocked after the shell exited"
            );
        }
        Ok(())
    }
}

/// Spawn a blocking task that copies PTY output into the session's output
/// queue until EOF, a read error, or the queue's consumer going away.
fn spawn_output_reader(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    output: QueueSender<Bytes>,
    close: CloseSignal,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!(session_id = %session_id, "PTY EOF");
                    break;
                }
                Ok(n) => {
                    if output.blocking_push(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        tracing::debug!(session_id = %session_id, "Output consumer gone");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO once the shell is gone on Linux
                    tracing::debug!(session_id = %session_id, "PTY read ended: {}", e);
                    break;
                }
            }
        }
        close.close();
    })
}

fn find_on_path(program: &str) -> Option<String> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .map(|candidate| candidate.to_string_lossy().into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::queue;
    use tokio_util::sync::CancellationToken;

    fn io(session: &str) -> (SessionIo, queue::QueueSender<Bytes>, queue::QueueReceiver<Bytes>) {
        let (input_tx, input_rx) = queue::channel(16);
        let (output_tx, output_rx) = queue::channel(64);
        let io = SessionIo {
            session_id: SessionId::from(session),
            input: input_rx,
            output: output_tx,
            cancel: CancellationToken::new(),
            close: CloseSignal::new(),
        };
        (io, input_tx, output_rx)
    }

    async fn collect_until(rx: &mut queue::QueueReceiver<Bytes>, needle: &str) -> String {
        let mut seen = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !seen.contains(needle) {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(chunk)) => seen.push_str(&String::from_utf8_lossy(&chunk)),
                _ => break,
            }
        }
        seen
    }

    #[test]
    fn test_configured_shell_wins() {
        let runner = PtyRunner::new(Some("/bin/sh".to_string()), vec![]);
        assert_eq!(runner.resolve_shell(), "/bin/sh");
    }

    #[test]
    fn test_blank_configured_shell_is_ignored() {
        let runner = PtyRunner::new(Some("  ".to_string()), vec![]);
        assert!(!runner.resolve_shell().trim().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_echo_round_trip() {
        let runner = PtyRunner::new(Some("/bin/sh".to_string()), vec![]);
        let (io, input, mut output) = io("echo");
        let close = io.close.clone();
        let task = tokio::spawn(async move { runner.run(io).await });

        input
            .push(Bytes::from_static(b"echo vd-$((40 + 2))\n"))
            .await
            .unwrap();
        let seen = collect_until(&mut output, "vd-42").await;
        assert!(seen.contains("vd-42"), "output was {:?}", seen);

        input.push(Bytes::from_static(b"exit\n")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should end when the shell exits")
            .unwrap()
            .unwrap();
        assert!(close.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_kills_shell() {
        let runner = PtyRunner::new(Some("/bin/sh".to_string()), vec![]);
        let (io, _input, _output) = io("cancel");
        let cancel = io.cancel.clone();
        let task = tokio::spawn(async move { runner.run(io).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should stop on cancel")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_job_does_not_hold_runner() {
        let runner = PtyRunner::new(Some("/bin/sh".to_string()), vec![]);
        let (io, input, _output) = io("background");
        let cancel = io.cancel.clone();
        let task = tokio::spawn(async move { runner.run(io).await });

        input.push(Bytes::from_static(b"sleep 3 &\n")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(2500), task)
            .await
            .expect("runner should not wait on the background job")
            .unwrap()
            .unwrap();
    }
}
