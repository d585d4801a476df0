//! Protocol messages and literals
//!
//! Every prompt and response the server writes is plain text. The exact
//! strings are part of the protocol: existing clients match on them.

use bytes::Bytes;

/// Maximum size of a PEM key block sent on the registration path
pub const MAX_KEY_BLOCK_SIZE: usize = 2048;

/// Maximum size of a line sent in response to the initial or username prompt
pub const MAX_USERNAME_LINE: usize = 1024;

/// Maximum size of one line of shell input during a session
pub const MAX_INPUT_LINE: usize = 64 * 1024;

/// Sent as soon as a connection is accepted
pub const GREETING: &str =
    "To register an account, send the private key text to this port. To enter your username, press enter\n";

/// Sent after a successful proof of possession, before the username line
pub const REGISTRATION_OK: &str = "Authentication successful, creating you a connection profile\n";

/// Sent when the client chose the username path
pub const USERNAME_PROMPT: &str = "Enter your username: ";

/// Sent before closing a connection that named an unknown user
pub const INVALID_USERNAME: &str = "Invalid username\n";

/// Prefix marking the first line of a PEM block
pub const PEM_BEGIN: &str = "-----BEGIN ";

/// Prefix marking the last line of a PEM block
pub const PEM_END: &str = "-----END ";

/// Closing dashes of PEM BEGIN and END lines
pub const PEM_DASHES: &str = "-----";

/// Line announcing a freshly issued username
pub fn username_announcement(username: &str) -> String {
    format!("Username: {}\n", username)
}

/// Banner written once when a session attaches to the shell
pub fn connected_banner(local_addr: &str) -> String {
    format!("You are now connected to {}\n", local_addr)
}

/// A message decoded from the client during authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// A complete PEM block, from its BEGIN line through its END line
    KeyBlock(Bytes),
    /// A single line with its terminator and NUL padding stripped
    Line(String),
}

/// A unit of output written by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Plain protocol text, written as-is
    Text(Bytes),
    /// A chunk of shell output, written as `\r` + chunk + delimiter
    Output(Bytes),
    /// A bare delimiter marking the prompt boundary
    Prompt,
}

impl ServerFrame {
    /// Create a text frame
    pub fn text(s: impl Into<String>) -> Self {
        ServerFrame::Text(Bytes::from(s.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_announcement() {
        assert_eq!(username_announcement("42"), "Username: 42\n");
    }

    #[test]
    fn test_connected_banner() {
        assert_eq!(
            connected_banner("127.0.0.1:6060"),
            "You are now connected to 127.0.0.1:6060\n"
        );
    }

    #[test]
    fn test_literals_are_line_terminated() {
        assert!(GREETING.ends_with('\n'));
        assert!(REGISTRATION_OK.ends_with('\n'));
        assert!(INVALID_USERNAME.ends_with('\n'));
        // The username prompt leaves the cursor on the same line
        assert!(!USERNAME_PROMPT.ends_with('\n'));
    }
}
