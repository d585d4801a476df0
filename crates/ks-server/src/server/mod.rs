//! TCP listener and per-connection authentication

mod handler;
mod listener;

pub use handler::{AuthOutcome, ConnectionHandler, Rejection};
pub use listener::KeyShellServer;
