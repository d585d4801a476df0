//! Server lifecycle state

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use ks_core::config::ServerConfig;
use ks_core::error::SetupError;
use ks_core::Username;

use crate::auth::KeyVerifier;
use crate::registry::SessionRegistry;
use crate::shell::ShellProcess;

/// Everything the server owns between startup and shutdown
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Possession check against the configured public key
    pub verifier: KeyVerifier,
    /// Issued usernames
    pub registry: Arc<SessionRegistry>,
    /// The shared shell
    pub shell: Arc<ShellProcess>,
    /// Source of usernames
    rng: Mutex<StdRng>,
    /// Cancelled on shutdown
    cancel: CancellationToken,
}

impl ServerState {
    /// Load the public key and spawn the shell.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: ServerConfig) -> Result<Self, SetupError> {
        let key_path = config
            .public_key_path
            .as_ref()
            .ok_or(SetupError::MissingPublicKey)?;
        let verifier = KeyVerifier::from_file(key_path)?;
        tracing::info!(
            "Loaded {}-bit public key from {:?} ({})",
            verifier.modulus_bytes() * 8,
            key_path,
            verifier.fingerprint()
        );

        let shell = ShellProcess::start(&config.shell, &config.shell_args, config.output_buffer)?;
        match shell.pid() {
            Some(pid) => tracing::info!("Shell '{}' running as process {}", config.shell, pid),
            None => tracing::warn!("Shell '{}' exited before startup finished", config.shell),
        }

        Ok(Self::with_parts(config, verifier, shell))
    }

    /// Assemble state from an already loaded key and a running shell
    pub fn with_parts(config: ServerConfig, verifier: KeyVerifier, shell: ShellProcess) -> Self {
        let rng = match config.username_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            verifier,
            registry: Arc::new(SessionRegistry::new()),
            shell: Arc::new(shell),
            rng: Mutex::new(rng),
            cancel: CancellationToken::new(),
        }
    }

    /// Draw a username and record it in the registry
    pub fn issue_username(&self) -> Username {
        let username = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            Username::generate(&mut *rng, self.verifier.modulus_bytes())
        };

        if !self.registry.register(username.clone()) {
            tracing::warn!(
                "Username {} was already issued; {} of {} usernames in use",
                username,
                self.registry.len(),
                self.verifier.modulus_bytes()
            );
        }

        username
    }

    /// Token cancelled when the server shuts down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting, end every session and terminate the shell
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.shell.shutdown().await;
        tracing::info!(
            "Released registry with {} usernames",
            self.registry.len()
        );
        tracing::debug!("Issued usernames: {:?}", self.registry.list());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::parse_public_key;

    const SERVER_PUB: &str = include_str!("../tests/fixtures/server_key.pub");

    fn test_state(seed: u64) -> ServerState {
        let config = ServerConfig {
            username_seed: Some(seed),
            ..ServerConfig::default()
        };
        let verifier = KeyVerifier::new(parse_public_key(SERVER_PUB).unwrap());
        let shell = ShellProcess::start("cat", &[], 16).unwrap();
        ServerState::with_parts(config, verifier, shell)
    }

    #[tokio::test]
    async fn test_issue_username_registers() {
        let state = test_state(1);
        let username = state.issue_username();

        assert!(state.registry.exists(username.as_str()));
        let value: usize = username.as_str().parse().unwrap();
        assert!(value < 128);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_seed_reproduces_usernames() {
        let a = test_state(99);
        let b = test_state(99);

        assert_eq!(a.issue_username(), b.issue_username());
        assert_eq!(a.issue_username(), b.issue_username());

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let key_path = dir.path().join("server.pub");
        std::fs::write(&key_path, SERVER_PUB).unwrap();

        let config = ServerConfig {
            shell: "cat".to_string(),
            public_key_path: Some(key_path),
            ..ServerConfig::default()
        };
        let state = ServerState::start(config).unwrap();
        assert!(state.shell.pid().is_some());
        assert_eq!(state.verifier.modulus_bytes(), 128);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_without_key() {
        let result = ServerState::start(ServerConfig::default());
        assert!(matches!(result, Err(SetupError::MissingPublicKey)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let state = test_state(3);
        let token = state.cancel_token();
        assert!(!token.is_cancelled());

        state.shutdown().await;
        assert!(token.is_cancelled());
    }
}
