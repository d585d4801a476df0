//! ks-core: Core types, errors and configuration for keyshell
//!
//! This crate provides the configuration structures, the username type and
//! the error taxonomy shared by the server library and binary.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ConfigError, SessionError, SetupError};
pub use types::Username;
