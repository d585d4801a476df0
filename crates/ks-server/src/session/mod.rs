//! Authenticated sessions attached to the shared shell

mod relay;

pub use relay::StreamRelay;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use ks_core::Username;
use ks_protocol::{AuthCodec, OutputCodec};

use crate::state::ServerState;

/// A connection that named a registered user and is ready to attach.
///
/// The framed halves carry any input the client sent past the username
/// line, so nothing typed ahead is lost.
pub struct BoundConnection {
    /// User the connection is bound to
    pub username: Username,
    /// Address of the client
    pub peer_addr: SocketAddr,
    /// Local address the client connected to
    pub local_addr: SocketAddr,
    /// Client input, still framed for authentication
    pub reader: FramedRead<OwnedReadHalf, AuthCodec>,
    /// Client output
    pub writer: FramedWrite<OwnedWriteHalf, OutputCodec>,
}

/// Start a relay for every bound connection received on `sessions`.
///
/// Runs until every sender is dropped.
pub async fn run_dispatcher(
    mut sessions: mpsc::Receiver<BoundConnection>,
    state: Arc<ServerState>,
) {
    while let Some(conn) = sessions.recv().await {
        tracing::info!(
            "Starting session for user {} at {}",
            conn.username,
            conn.peer_addr
        );

        let relay = StreamRelay::new(
            Arc::clone(&state.shell),
            state.cancel_token().child_token(),
        );

        tokio::spawn(async move {
            let username = conn.username.clone();
            let peer_addr = conn.peer_addr;

            match relay.run(conn).await {
                Ok(()) => {
                    tracing::info!("Session for user {} at {} closed", username, peer_addr);
                }
                Err(e) => {
                    tracing::info!(
                        "Session for user {} at {} ended: {}",
                        username,
                        peer_addr,
                        e
                    );
                }
            }
        });
    }

    tracing::debug!("Session dispatcher stopped");
}
