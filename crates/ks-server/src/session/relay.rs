//! Relay between one client socket and the shared shell
//!
//! A single task owns both halves of the client connection. It forwards
//! each input line to the shell's stdin and each chunk of shell output to
//! the client, so writes to the socket never race each other.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use ks_core::error::SessionError;
use ks_protocol::message::connected_banner;
use ks_protocol::{InputCodec, ServerFrame};

use crate::session::BoundConnection;
use crate::shell::{ShellEvent, ShellProcess, ShellStream};

/// Moves bytes between one session and the shell
pub struct StreamRelay {
    shell: Arc<ShellProcess>,
    cancel: CancellationToken,
}

/// Which shell streams this session still relays
#[derive(Debug, Clone, Copy)]
struct LiveStreams {
    stdout: bool,
    stderr: bool,
}

impl LiveStreams {
    fn is_live(&self, stream: ShellStream) -> bool {
        match stream {
            ShellStream::Stdout => self.stdout,
            ShellStream::Stderr => self.stderr,
        }
    }

    fn stop(&mut self, stream: ShellStream) {
        match stream {
            ShellStream::Stdout => self.stdout = false,
            ShellStream::Stderr => self.stderr = false,
        }
    }

    fn any(&self) -> bool {
        self.stdout || self.stderr
    }
}

impl StreamRelay {
    /// Create a relay for the given shell
    pub fn new(shell: Arc<ShellProcess>, cancel: CancellationToken) -> Self {
        Self { shell, cancel }
    }

    /// Relay until the client leaves, the shell closes, or the server stops.
    ///
    /// The client socket is closed when this returns.
    pub async fn run(self, conn: BoundConnection) -> Result<(), SessionError> {
        let BoundConnection {
            username,
            local_addr,
            reader,
            mut writer,
            ..
        } = conn;

        // Subscribe before checking for closure so a close can't slip between
        let mut events = self.shell.subscribe();
        if self.shell.has_closed() {
            let _ = writer.close().await;
            return Err(SessionError::ShellClosed("output"));
        }

        let mut input = reader.map_decoder(|_| InputCodec::new());
        let mut live = LiveStreams {
            stdout: true,
            stderr: true,
        };

        writer
            .send(ServerFrame::text(connected_banner(&local_addr.to_string())))
            .await?;
        writer.send(ServerFrame::Prompt).await?;

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Session for user {} cancelled", username);
                    break Ok(());
                }

                line = input.next() => match line {
                    Some(Ok(line)) => {
                        tracing::trace!("User {} sent {} bytes", username, line.len());
                        if let Err(e) = self.shell.write_line(&line).await {
                            break Err(SessionError::ShellInput(e));
                        }
                        if let Err(e) = writer.send(ServerFrame::Prompt).await {
                            break Err(e.into());
                        }
                    }
                    Some(Err(e)) => break Err(e.into()),
                    None => break Err(SessionError::ClientDisconnected),
                },

                event = events.recv(), if live.any() => match event {
                    Ok(ShellEvent::Output { stream, data }) => {
                        if !live.is_live(stream) {
                            continue;
                        }
                        if let Err(e) = writer.send(ServerFrame::Output(data)).await {
                            break Err(e.into());
                        }
                    }
                    Ok(ShellEvent::Closed { stream }) => {
                        break Err(SessionError::ShellClosed(stream.name()));
                    }
                    Ok(ShellEvent::Failed { stream }) => {
                        tracing::warn!("No longer relaying shell {} to user {}", stream, username);
                        live.stop(stream);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Session for user {} lagged by {} output chunks", username, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break Err(SessionError::ShellClosed("output"));
                    }
                },
            }
        };

        let _ = writer.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use ks_core::Username;
    use ks_protocol::{AuthCodec, OutputCodec};

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Session {
        client: TcpStream,
        buffer: Vec<u8>,
        cancel: CancellationToken,
        handle: JoinHandle<Result<(), SessionError>>,
    }

    impl Session {
        /// Attach a relay to `shell` and wait for its first prompt
        async fn attach(shell: Arc<ShellProcess>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let client = TcpStream::connect(listener.local_addr().unwrap())
                .await
                .unwrap();
            let (socket, peer_addr) = listener.accept().await.unwrap();
            let local_addr = socket.local_addr().unwrap();
            let (read_half, write_half) = socket.into_split();

            let conn = BoundConnection {
                username: Username::new("7"),
                peer_addr,
                local_addr,
                reader: FramedRead::new(read_half, AuthCodec::new()),
                writer: FramedWrite::new(write_half, OutputCodec::new(">")),
            };
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(StreamRelay::new(shell, cancel.clone()).run(conn));

            let mut session = Self {
                client,
                buffer: Vec::new(),
                cancel,
                handle,
            };
            session.expect(">").await;
            session
        }

        async fn send(&mut self, text: &str) {
            self.client.write_all(text.as_bytes()).await.unwrap();
        }

        /// Read until `pattern` arrives; return everything up to and including it
        async fn expect(&mut self, pattern: &str) -> Vec<u8> {
            let pattern = pattern.as_bytes();
            timeout(TIMEOUT, async {
                loop {
                    if let Some(pos) = self
                        .buffer
                        .windows(pattern.len())
                        .position(|w| w == pattern)
                    {
                        return self.buffer.drain(..pos + pattern.len()).collect::<Vec<u8>>();
                    }

                    let mut chunk = [0u8; 4096];
                    let n = self.client.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "relay closed; got {:?}", String::from_utf8_lossy(&self.buffer));
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
            })
            .await
            .expect("timed out waiting for pattern")
        }

        async fn stop(self) {
            self.cancel.cancel();
            let result = timeout(TIMEOUT, self.handle).await.unwrap().unwrap();
            assert!(result.is_ok());
        }
    }

    #[tokio::test]
    async fn test_lagged_session_keeps_relaying() {
        let shell = Arc::new(ShellProcess::start("cat", &[], 1).unwrap());
        let mut session = Session::attach(Arc::clone(&shell)).await;

        // The relay can't run between these sends, so it misses the first two
        for data in ["a", "b", "c"] {
            shell.publish(ShellEvent::Output {
                stream: ShellStream::Stdout,
                data: Bytes::from(data),
            });
        }
        assert_eq!(session.expect("\rc>").await, b"\rc>");

        session.send("later\n").await;
        assert_eq!(session.expect("\rlater\n>").await, b">\rlater\n>");

        session.stop().await;
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_flooded_session_keeps_relaying() {
        let shell = Arc::new(ShellProcess::start("sh", &[], 1).unwrap());
        let mut session = Session::attach(Arc::clone(&shell)).await;

        session
            .send("i=0; while [ $i -lt 500 ]; do echo flood $i; i=$((i+1)); done\n")
            .await;
        session.expect(">").await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        session.send("echo after\n").await;
        session.expect("\rafter\n>").await;

        session.stop().await;
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_stream_stops_only_that_stream() {
        let shell = Arc::new(ShellProcess::start("sh", &[], 16).unwrap());
        let mut session = Session::attach(Arc::clone(&shell)).await;

        shell.publish(ShellEvent::Failed {
            stream: ShellStream::Stdout,
        });

        session.send("echo out; echo err 1>&2\n").await;
        assert_eq!(session.expect("\rerr\n>").await, b">\rerr\n>");

        session.send("echo out; echo again 1>&2\n").await;
        assert_eq!(session.expect("\ragain\n>").await, b">\ragain\n>");

        session.stop().await;
        shell.shutdown().await;
    }

    #[test]
    fn test_live_streams() {
        let mut live = LiveStreams {
            stdout: true,
            stderr: true,
        };
        assert!(live.is_live(ShellStream::Stderr));

        live.stop(ShellStream::Stderr);
        assert!(!live.is_live(ShellStream::Stderr));
        assert!(live.is_live(ShellStream::Stdout));
        assert!(live.any());

        live.stop(ShellStream::Stdout);
        assert!(!live.any());
    }
}
