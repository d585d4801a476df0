//! Error taxonomy for keyshell
//!
//! Setup errors are fatal, protocol errors end one connection, session
//! errors end one session.

use ks_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised before the server can accept its first connection.
///
/// These are fatal: the process logs them and exits.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Listener could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// No public key was configured
    #[error("No public key configured")]
    MissingPublicKey,

    /// Public key could not be read or parsed
    #[error("Invalid public key {path:?}: {reason}")]
    PublicKey { path: PathBuf, reason: String },

    /// Shell program could not be launched
    #[error("Failed to spawn shell '{shell}': {source}")]
    ShellSpawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// A pipe of the spawned shell was not available
    #[error("Shell {0} pipe unavailable")]
    ShellPipe(&'static str),
}

/// Errors that end a single session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Writing to the shell's stdin failed
    #[error("Shell input closed: {0}")]
    ShellInput(#[source] std::io::Error),

    /// The shell closed one of its output streams
    #[error("Shell {0} reached end of stream")]
    ShellClosed(&'static str),

    /// The client went away
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Reading from or writing to the client failed
    #[error("Client transport error: {0}")]
    Transport(#[from] ProtocolError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
