//! The shared shell process
//!
//! One shell is spawned at startup and lives for the whole server lifetime.
//! Its stdout and stderr are each drained by a pump task that publishes
//! every chunk on a broadcast channel, so every attached session sees every
//! byte produced after it attached. Output produced while no session is
//! attached is discarded. Its stdin is shared behind a mutex and written
//! one whole line at a time.

use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use ks_core::error::SetupError;

/// Maximum number of bytes read from a shell stream at once
pub const OUTPUT_CHUNK_SIZE: usize = 4096;

/// How long shutdown waits for the shell to exit after killing it
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// One of the shell's output streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellStream {
    Stdout,
    Stderr,
}

impl ShellStream {
    /// Stream name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            ShellStream::Stdout => "stdout",
            ShellStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for ShellStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Events published by the output pumps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// A chunk of output
    Output { stream: ShellStream, data: Bytes },
    /// The stream reached end of file
    Closed { stream: ShellStream },
    /// Reading the stream failed; no more output will come from it
    Failed { stream: ShellStream },
}

/// A running shell whose pipes are shared by every session
pub struct ShellProcess {
    /// Process ID of the shell
    pid: Option<u32>,
    /// Write side of the shell's stdin
    stdin: Mutex<ChildStdin>,
    /// Output fan-out
    events: broadcast::Sender<ShellEvent>,
    /// Set once either output stream reaches end of file
    closed: Arc<AtomicBool>,
    /// Child handle, kept for shutdown
    child: Mutex<Child>,
    /// Output pump tasks
    pumps: Vec<JoinHandle<()>>,
}

impl ShellProcess {
    /// Spawn the shell and start its output pumps.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        program: &str,
        args: &[String],
        output_buffer: usize,
    ) -> Result<Self, SetupError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SetupError::ShellSpawn {
                shell: program.to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(SetupError::ShellPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(SetupError::ShellPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SetupError::ShellPipe("stderr"))?;

        let pid = child.id();

        let (events, _) = broadcast::channel(output_buffer.max(1));
        let closed = Arc::new(AtomicBool::new(false));

        let pumps = vec![
            tokio::spawn(pump(
                stdout,
                ShellStream::Stdout,
                events.clone(),
                Arc::clone(&closed),
            )),
            tokio::spawn(pump(
                stderr,
                ShellStream::Stderr,
                events.clone(),
                Arc::clone(&closed),
            )),
        ];

        Ok(Self {
            pid,
            stdin: Mutex::new(stdin),
            events,
            closed,
            child: Mutex::new(child),
            pumps,
        })
    }

    /// Process ID of the shell, if it is still known
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write one line of input followed by a newline.
    ///
    /// The whole line is written under the stdin lock so lines from
    /// concurrent sessions never interleave.
    pub async fn write_line(&self, line: &[u8]) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&buf).await?;
        stdin.flush().await
    }

    /// Subscribe to output produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ShellEvent> {
        self.events.subscribe()
    }

    /// Whether an output stream has already reached end of file
    pub fn has_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Inject an event as if a pump had produced it
    #[cfg(test)]
    pub(crate) fn publish(&self, event: ShellEvent) {
        let _ = self.events.send(event);
    }

    /// Kill the shell and wait for it to exit
    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;

        if let Err(e) = child.start_kill() {
            tracing::debug!("Shell already exited: {}", e);
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => tracing::info!("Shell exited with {}", status),
            Ok(Err(e)) => tracing::warn!("Failed to reap shell: {}", e),
            Err(_) => tracing::warn!("Shell did not exit within {:?}", SHUTDOWN_TIMEOUT),
        }

        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Copy one shell stream into the broadcast channel until it ends
async fn pump<R>(
    mut reader: R,
    stream: ShellStream,
    events: broadcast::Sender<ShellEvent>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::info!("Shell {} reached end of stream", stream);
                closed.store(true, Ordering::SeqCst);
                let _ = events.send(ShellEvent::Closed { stream });
                break;
            }
            Ok(n) => {
                tracing::trace!("Shell {} produced {} bytes", stream, n);
                // No receivers just means no session is attached
                let _ = events.send(ShellEvent::Output {
                    stream,
                    data: Bytes::copy_from_slice(&buf[..n]),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("Failed to read shell {}: {}", stream, e);
                let _ = events.send(ShellEvent::Failed { stream });
                break;
            }
        }
    }
}
