//! ks-protocol: Line protocol for the keyshell remote shell
//!
//! This crate defines what travels over the raw TCP socket between a
//! keyshell client and the server: the prompt and response literals, the
//! decoders for client input during authentication and during a session,
//! and the encoder for the server's session framing.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{AuthCodec, InputCodec, OutputCodec};
pub use error::ProtocolError;
pub use message::{
    ClientMessage, ServerFrame, MAX_INPUT_LINE, MAX_KEY_BLOCK_SIZE, MAX_USERNAME_LINE,
};
