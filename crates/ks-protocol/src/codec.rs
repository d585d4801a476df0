//! Tokio codecs for the keyshell line protocol
//!
//! Client input is delimiter framed. Bytes are accumulated across reads
//! until a terminator arrives, so a message split over several TCP
//! segments decodes exactly once and two messages coalesced into one
//! segment decode separately.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::message::{
    ClientMessage, ServerFrame, MAX_INPUT_LINE, MAX_KEY_BLOCK_SIZE, MAX_USERNAME_LINE, PEM_BEGIN,
    PEM_DASHES, PEM_END,
};

/// Strip NUL padding and trailing line terminators
fn clean_line(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\0' | b'\r' | b'\n') {
        end -= 1;
    }
    &raw[..end]
}

fn line_starts_with(line: &[u8], prefix: &str) -> bool {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace() && *b != b'\0')
        .unwrap_or(line.len());
    line[start..].starts_with(prefix.as_bytes())
}

/// Whether `line` is a complete PEM END line, e.g. `-----END RSA PRIVATE KEY-----`
fn is_end_line(line: &[u8]) -> bool {
    let trimmed = match line.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(start) => &line[start..],
        None => return false,
    };
    trimmed.starts_with(PEM_END.as_bytes())
        && trimmed.len() > PEM_END.len() + PEM_DASHES.len()
        && trimmed.ends_with(PEM_DASHES.as_bytes())
}

/// Decoder for the authentication phase
///
/// The first line decides the path. A line opening a PEM block switches the
/// codec into accumulation until the matching END line, yielding the whole
/// block as [`ClientMessage::KeyBlock`]. Any other line (including an empty
/// one) is yielded as [`ClientMessage::Line`].
#[derive(Debug, Default)]
pub struct AuthCodec {
    /// Offset up to which the buffer has been scanned for a newline
    next_index: usize,
    /// Offset of the current line inside a key block
    line_start: usize,
    /// Whether a BEGIN line has been seen
    in_key_block: bool,
}

impl AuthCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.next_index = 0;
        self.line_start = 0;
        self.in_key_block = false;
    }

    fn limit(&self) -> usize {
        if self.in_key_block {
            MAX_KEY_BLOCK_SIZE
        } else {
            MAX_USERNAME_LINE
        }
    }
}

impl Decoder for AuthCodec {
    type Item = ClientMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            let Some(newline) = newline else {
                if src.len() > self.limit() {
                    return Err(ProtocolError::MessageTooLarge {
                        size: src.len(),
                        max: self.limit(),
                    });
                }

                // An END line is self-terminating once its closing dashes arrive
                if self.in_key_block && is_end_line(clean_line(&src[self.line_start..])) {
                    let block = src.split().freeze();
                    self.reset();
                    return Ok(Some(ClientMessage::KeyBlock(block)));
                }

                self.next_index = src.len();
                return Ok(None);
            };

            let end = newline + 1;
            if end > self.limit() {
                return Err(ProtocolError::MessageTooLarge {
                    size: end,
                    max: self.limit(),
                });
            }

            let line = &src[self.line_start..newline];

            if !self.in_key_block {
                if line_starts_with(line, PEM_BEGIN) {
                    tracing::trace!("Key block started");
                    self.in_key_block = true;
                    self.line_start = end;
                    self.next_index = end;
                    continue;
                }

                let raw = src.split_to(end);
                self.reset();
                let text = String::from_utf8_lossy(clean_line(&raw)).into_owned();
                return Ok(Some(ClientMessage::Line(text)));
            }

            if line_starts_with(line, PEM_END) {
                let block = src.split_to(end).freeze();
                self.reset();
                return Ok(Some(ClientMessage::KeyBlock(block)));
            }

            self.line_start = end;
            self.next_index = end;
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // The peer closed mid-message: hand over what arrived
        let raw = src.split();
        let in_key_block = self.in_key_block;
        self.reset();
        if in_key_block {
            Ok(Some(ClientMessage::KeyBlock(raw.freeze())))
        } else {
            let text = String::from_utf8_lossy(clean_line(&raw)).into_owned();
            Ok(Some(ClientMessage::Line(text)))
        }
    }
}

/// Decoder for shell input during a session
///
/// Yields each newline-terminated line without its `\n` (or `\r\n`).
#[derive(Debug)]
pub struct InputCodec {
    next_index: usize,
    max_length: usize,
}

impl InputCodec {
    /// Create a codec with the default line cap
    pub fn new() -> Self {
        Self::with_max_length(MAX_INPUT_LINE)
    }

    /// Create a codec with a custom line cap
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }
}

impl Default for InputCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_terminator(mut line: BytesMut) -> Bytes {
    if line.last() == Some(&b'\n') {
        line.truncate(line.len() - 1);
    }
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    line.freeze()
}

impl Decoder for InputCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src[self.next_index..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                self.next_index = 0;
                if end > self.max_length {
                    src.advance(end);
                    return Err(ProtocolError::MessageTooLarge {
                        size: end,
                        max: self.max_length,
                    });
                }
                Ok(Some(strip_terminator(src.split_to(end))))
            }
            None => {
                if src.len() > self.max_length {
                    return Err(ProtocolError::MessageTooLarge {
                        size: src.len(),
                        max: self.max_length,
                    });
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(strip_terminator(src.split())))
        }
    }
}

/// Encoder for everything the server writes
#[derive(Debug, Clone)]
pub struct OutputCodec {
    /// Prompt delimiter written after output and before each input read
    delimiter: Bytes,
}

impl OutputCodec {
    /// Create an encoder using the given delimiter
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: Bytes::from(delimiter.into()),
        }
    }
}

impl Encoder<ServerFrame> for OutputCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: ServerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            ServerFrame::Text(text) => {
                dst.extend_from_slice(&text);
            }
            ServerFrame::Output(chunk) => {
                dst.reserve(1 + chunk.len() + self.delimiter.len());
                dst.put_u8(b'\r');
                dst.extend_from_slice(&chunk);
                dst.extend_from_slice(&self.delimiter);
            }
            ServerFrame::Prompt => {
                dst.extend_from_slice(&self.delimiter);
            }
        }
        Ok(())
    }
}
