//! Authentication exchange for a single connection
//!
//! ```text
//! AwaitingChoice ──key block──▶ VerifyingKey ──ok──▶ Registered (closed)
//!       │                            └──fail──▶ Rejected (closed)
//!       └──any line──▶ EnteringUsername ──known──▶ Bound (session starts)
//!                                └──unknown or key block──▶ Rejected (closed)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use ks_core::Username;
use ks_protocol::message::{
    username_announcement, GREETING, INVALID_USERNAME, REGISTRATION_OK, USERNAME_PROMPT,
};
use ks_protocol::{AuthCodec, ClientMessage, OutputCodec, ProtocolError, ServerFrame};

use crate::session::BoundConnection;
use crate::state::ServerState;

type Reader = FramedRead<OwnedReadHalf, AuthCodec>;
type Writer = FramedWrite<OwnedWriteHalf, OutputCodec>;

/// How an authentication exchange ended
pub enum AuthOutcome {
    /// A username was issued and the connection closed
    Registered(Username),
    /// The client named a known user and is ready for a session
    Bound(BoundConnection),
    /// The connection was refused and closed
    Rejected(Rejection),
}

/// Why a connection was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The key block did not prove possession of the private key
    #[error("key block failed the possession check")]
    InvalidKey,

    /// The named user was never issued
    #[error("unknown username '{0}'")]
    UnknownUsername(String),

    /// A key block arrived where a username was expected
    #[error("key block sent as a username")]
    KeyBlockAsUsername,

    /// The client closed the connection mid-exchange
    #[error("client disconnected during authentication")]
    Disconnected,
}

/// Runs the authentication exchange for one accepted socket
pub struct ConnectionHandler {
    state: Arc<ServerState>,
    peer_addr: SocketAddr,
}

impl ConnectionHandler {
    /// Create a handler for a connection from `peer_addr`
    pub fn new(state: Arc<ServerState>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Authenticate the client on `socket`.
    ///
    /// Every outcome other than [`AuthOutcome::Bound`] leaves the socket closed.
    pub async fn authenticate(&self, socket: TcpStream) -> Result<AuthOutcome, ProtocolError> {
        let local_addr = socket.local_addr()?;
        let (read_half, write_half) = socket.into_split();
        let mut reader = FramedRead::new(read_half, AuthCodec::new());
        let mut writer = FramedWrite::new(
            write_half,
            OutputCodec::new(self.state.config.delimiter.clone()),
        );

        writer.send(ServerFrame::text(GREETING)).await?;

        let choice = match reader.next().await {
            Some(message) => message?,
            None => return Ok(AuthOutcome::Rejected(Rejection::Disconnected)),
        };

        match choice {
            ClientMessage::KeyBlock(block) => self.register(block, writer).await,
            ClientMessage::Line(_) => {
                tracing::debug!("{} chose the username path", self.peer_addr);
                self.bind(reader, writer, local_addr).await
            }
        }
    }

    async fn register(&self, block: Bytes, mut writer: Writer) -> Result<AuthOutcome, ProtocolError> {
        tracing::debug!(
            "{} sent a {}-byte key block",
            self.peer_addr,
            block.len()
        );

        // PEM parsing and RSA decryption are CPU bound
        let state = Arc::clone(&self.state);
        let verified = match tokio::task::spawn_blocking(move || state.verifier.verify(&block)).await
        {
            Ok(verified) => verified,
            Err(e) => {
                tracing::warn!("Key check for {} did not complete: {}", self.peer_addr, e);
                false
            }
        };

        if !verified {
            tracing::warn!("Rejected key from {}", self.peer_addr);
            writer.close().await?;
            return Ok(AuthOutcome::Rejected(Rejection::InvalidKey));
        }

        let username = self.state.issue_username();
        tracing::info!("Registered user {} for {}", username, self.peer_addr);

        writer.send(ServerFrame::text(REGISTRATION_OK)).await?;
        writer
            .send(ServerFrame::text(username_announcement(username.as_str())))
            .await?;
        writer.close().await?;

        Ok(AuthOutcome::Registered(username))
    }

    async fn bind(
        &self,
        mut reader: Reader,
        mut writer: Writer,
        local_addr: SocketAddr,
    ) -> Result<AuthOutcome, ProtocolError> {
        writer.send(ServerFrame::text(USERNAME_PROMPT)).await?;

        let claimed = match reader.next().await {
            Some(Ok(ClientMessage::Line(name))) => name,
            Some(Ok(ClientMessage::KeyBlock(block))) => {
                tracing::warn!(
                    "{} sent a {}-byte key block as a username",
                    self.peer_addr,
                    block.len()
                );
                writer.send(ServerFrame::text(INVALID_USERNAME)).await?;
                writer.close().await?;
                return Ok(AuthOutcome::Rejected(Rejection::KeyBlockAsUsername));
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(AuthOutcome::Rejected(Rejection::Disconnected)),
        };

        tracing::debug!("{} entered username '{}'", self.peer_addr, claimed);

        if !self.state.registry.exists(&claimed) {
            tracing::warn!("Unknown username '{}' from {}", claimed, self.peer_addr);
            writer.send(ServerFrame::text(INVALID_USERNAME)).await?;
            writer.close().await?;
            return Ok(AuthOutcome::Rejected(Rejection::UnknownUsername(claimed)));
        }

        Ok(AuthOutcome::Bound(BoundConnection {
            username: Username::new(claimed),
            peer_addr: self.peer_addr,
            local_addr,
            reader,
            writer,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            Rejection::UnknownUsername("7".to_string()).to_string(),
            "unknown username '7'"
        );
        assert_eq!(
            Rejection::InvalidKey.to_string(),
            "key block failed the possession check"
        );
        assert_eq!(
            Rejection::KeyBlockAsUsername.to_string(),
            "key block sent as a username"
        );
    }
}
