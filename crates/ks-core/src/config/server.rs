//! Server configuration

use serde::Deserialize;
use std::path::PathBuf;

/// Port the listener binds when none is configured
pub const DEFAULT_PORT: u16 = 6060;

/// Prompt delimiter written after output and before each input read
pub const DEFAULT_DELIMITER: &str = ">";

/// Shell program launched at startup
pub const DEFAULT_SHELL: &str = "sh";

/// Configuration for the keyshell server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind the listener to
    pub bind_address: String,

    /// Port to bind the listener to
    pub port: u16,

    /// Prompt delimiter
    pub delimiter: String,

    /// Shell program to run
    pub shell: String,

    /// Extra arguments passed to the shell
    pub shell_args: Vec<String>,

    /// PEM file holding the public key clients must prove possession of
    pub public_key_path: Option<PathBuf>,

    /// Number of output chunks a session may fall behind before it lags
    pub output_buffer: usize,

    /// Seed for username generation; drawn from the OS when unset
    pub username_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            delimiter: DEFAULT_DELIMITER.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            shell_args: Vec::new(),
            public_key_path: None,
            output_buffer: 256,
            username_seed: None,
        }
    }
}

impl ServerConfig {
    /// Get the listen address (host:port)
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Apply a `host:port` override, keeping the configured port when none is given
    pub fn set_listen_address(&mut self, address: &str) {
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse() {
                Ok(port) => {
                    self.bind_address = host.to_string();
                    self.port = port;
                }
                Err(_) => self.bind_address = address.to_string(),
            },
            Some((_, port)) => {
                if let Ok(port) = port.parse() {
                    self.port = port;
                }
            }
            None => self.bind_address = address.to_string(),
        }
    }
}
