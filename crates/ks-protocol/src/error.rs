//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing client or server messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A client message grew past its size cap before it was terminated
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
