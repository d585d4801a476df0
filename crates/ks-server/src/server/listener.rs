//! TCP listener
//!
//! Accepts incoming connections, authenticates each one on its own task and
//! queues bound connections for the session dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use ks_core::error::SetupError;

use crate::server::handler::{AuthOutcome, ConnectionHandler};
use crate::session::{run_dispatcher, BoundConnection};
use crate::state::ServerState;

/// Depth of the queue between authentication and session start
const SESSION_QUEUE_DEPTH: usize = 64;

/// Listener that authenticates clients and hands them to the shell
pub struct KeyShellServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl KeyShellServer {
    /// Bind the configured listen address
    pub async fn bind(state: Arc<ServerState>) -> Result<Self, SetupError> {
        let address = state.config.listen_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| SetupError::Bind { address, source })?;

        Ok(Self { listener, state })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the state's cancellation token fires
    pub async fn run(self) {
        let cancel = self.state.cancel_token();
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("keyshell listening on {}", addr);
        }

        let (session_tx, session_rx) = mpsc::channel::<BoundConnection>(SESSION_QUEUE_DEPTH);
        let dispatcher = tokio::spawn(run_dispatcher(session_rx, Arc::clone(&self.state)));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Listener shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr, session_tx.clone());
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        drop(session_tx);
        if let Err(e) = dispatcher.await {
            tracing::warn!("Session dispatcher failed: {}", e);
        }
    }

    /// Authenticate a new connection on its own task
    fn handle_connection(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
        session_tx: mpsc::Sender<BoundConnection>,
    ) {
        tracing::info!("New connection from {}", peer_addr);

        let handler = ConnectionHandler::new(Arc::clone(&self.state), peer_addr);
        let cancel = self.state.cancel_token();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Authentication cancelled for {}", peer_addr);
                    return;
                }
                result = handler.authenticate(socket) => result
            };

            match result {
                Ok(AuthOutcome::Registered(username)) => {
                    tracing::info!("Issued username {} to {}", username, peer_addr);
                }
                Ok(AuthOutcome::Bound(conn)) => {
                    tracing::info!("{} bound to user {}", peer_addr, conn.username);
                    if session_tx.send(conn).await.is_err() {
                        tracing::warn!("Session queue closed; dropping {}", peer_addr);
                    }
                }
                Ok(AuthOutcome::Rejected(reason)) => {
                    tracing::info!("Rejected {}: {}", peer_addr, reason);
                }
                Err(e) => {
                    tracing::warn!("Connection from {} failed: {}", peer_addr, e);
                }
            }
        });
    }
}
