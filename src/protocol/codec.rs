//! Line codec for command connections.
//!
//! The decoder half turns an inbound byte stream into [`TokenList`]s, one
//! per line; the encoder half writes [`Output`] values back.
//!
//! # Usage
//!
//! Use [`CommandCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).
//!
//! Bytes stay buffered until a `\n` arrives, so a chunk boundary that falls
//! inside a token or inside a multi-byte character is harmless: the line is
//! only converted to text once it is complete.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::config::DEFAULT_MAX_LINE_BYTES;
use crate::protocol::escape::tokenize;
use crate::protocol::{Output, TokenList};
use crate::{AppError, Result};

/// Codec for the command line protocol.
///
/// # Decoder
///
/// Framing is delegated to [`AnyDelimiterCodec`] split on `\n`. Raw bytes
/// are used rather than `LinesCodec` so that invalid UTF-8 is replaced with
/// U+FFFD instead of failing the connection. A `\r` before the `\n` is
/// dropped and does not count against the limit. Lines longer than the
/// limit return [`AppError::Codec`]`("line too long: …")`. On EOF an
/// unterminated, non-empty remainder is emitted as a final line.
///
/// # Encoder
///
/// [`Output::Text`] is written verbatim; structured outputs are written as
/// one compact JSON value followed by `\n`.
#[derive(Debug, Clone)]
pub struct CommandCodec {
    lines: AnyDelimiterCodec,
    max_length: usize,
}

impl CommandCodec {
    /// Create a codec with the default 1 MiB line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a codec rejecting lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            // One extra byte leaves room for the `\r` of a CRLF terminator.
            lines: AnyDelimiterCodec::new_with_max_length(
                vec![b'\n'],
                vec![b'\n'],
                max_length.saturating_add(1),
            ),
            max_length,
        }
    }

    /// Strip the line ending, enforce the limit, and tokenize one chunk.
    fn tokens(&self, chunk: &[u8]) -> Result<TokenList> {
        let body = chunk.strip_suffix(b"\r").unwrap_or(chunk);
        if body.len() > self.max_length {
            return Err(self.too_long());
        }
        Ok(tokenize(&String::from_utf8_lossy(body)))
    }

    fn too_long(&self) -> AppError {
        AppError::Codec(format!("line too long: exceeded {} bytes", self.max_length))
    }

    fn map_codec_error(&self, err: AnyDelimiterCodecError) -> AppError {
        match err {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => self.too_long(),
            AnyDelimiterCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = TokenList;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TokenList>> {
        match self.lines.decode(src) {
            Ok(Some(chunk)) => self.tokens(&chunk).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(self.map_codec_error(err)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<TokenList>> {
        match self.lines.decode_eof(src) {
            Ok(Some(chunk)) => self.tokens(&chunk).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(self.map_codec_error(err)),
        }
    }
}

impl Encoder<Output> for CommandCodec {
    type Error = AppError;

    fn encode(&mut self, item: Output, dst: &mut BytesMut) -> Result<()> {
        match item {
            Output::Text(line) => dst.put_slice(line.as_bytes()),
            structured => {
                let json = serde_json::to_vec(&structured)
                    .map_err(|err| AppError::Codec(format!("failed to serialise output: {err}")))?;
                dst.reserve(json.len() + 1);
                dst.put_slice(&json);
                dst.put_u8(b'\n');
            }
        }
        Ok(())
    }
}
