//! Token splitting and percent escaping.
//!
//! Arguments travel percent-encoded so that a single token may carry
//! spaces and reserved characters. Encoding leaves the same characters
//! untouched as URI component encoding: ASCII alphanumerics and
//! `- _ . ! ~ * ' ( )`.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::protocol::TokenList;

/// Characters that [`encode_token`] escapes.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-decode a single token.
///
/// Malformed escapes (`%zz`, a trailing `%`) are kept literally and byte
/// sequences that do not form valid UTF-8 become U+FFFD, so decoding never
/// fails.
#[must_use]
pub fn decode_token(token: &str) -> String {
    percent_decode_str(token).decode_utf8_lossy().into_owned()
}

/// Percent-encode a single token for transmission.
#[must_use]
pub fn encode_token(token: &str) -> String {
    utf8_percent_encode(token, COMPONENT).to_string()
}

/// Split one request line into a [`TokenList`].
///
/// Tokens are separated by runs of whitespace and individually decoded.
/// A blank line yields a single empty command name rather than nothing.
#[must_use]
pub fn tokenize(line: &str) -> TokenList {
    let mut tokens: TokenList = line.split_whitespace().map(decode_token).collect();
    if tokens.is_empty() {
        tokens.push(String::new());
    }
    tokens
}

/// Build a request line (without the trailing newline) from raw tokens.
#[must_use]
pub fn encode_line<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|token| encode_token(token.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
