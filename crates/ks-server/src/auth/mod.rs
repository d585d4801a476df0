//! Authentication for incoming connections
//!
//! Clients register by proving possession of the private key that matches
//! the server's public key. The proof is an OAEP encrypt/decrypt round trip.

mod verifier;

pub use verifier::{parse_private_key, parse_public_key, KeyVerifier};
