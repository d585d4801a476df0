//! ks-server: Key-gated remote shell over a raw TCP socket
//!
//! The server spawns one shell process at startup and relays it to every
//! client that authenticates. A client either proves possession of the
//! private key matching the configured public key (and is issued a
//! username), or names a previously issued username to attach to the shell.

pub mod auth;
pub mod registry;
pub mod server;
pub mod session;
pub mod shell;
pub mod state;

pub use registry::SessionRegistry;
pub use server::KeyShellServer;
pub use state::ServerState;
