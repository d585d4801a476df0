//! Core domain types

use rand::Rng;
use std::fmt;

/// Identifier issued to a client after a successful proof of possession.
///
/// Usernames are chosen by the server, never by the client. They are the
/// decimal rendering of a draw from `0..modulus_bytes`, so the space is
/// small (128 values for a 1024-bit key) and collisions are expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Username(pub String);

impl Username {
    /// Create a username from a raw string
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Draw a fresh username for a key whose modulus is `modulus_bytes` long
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, modulus_bytes: usize) -> Self {
        let draw = rng.gen_range(0..modulus_bytes.max(1));
        Self(draw.to_string())
    }

    /// Get the raw username string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Username {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Username {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
