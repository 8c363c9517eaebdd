//! RFC 2616 header value grammar.
//!
//! Readers in this module follow the same convention: they consume one element from the
//! start of the input and return it together with the rest of the input, with leading
//! linear whitespace removed. No partial result is ever returned on error.
//!
//! ```text
//! token          = 1*<any CHAR except CTLs or separators>
//! separators     = "(" | ")" | "<" | ">" | "@"
//!                | "," | ";" | ":" | "\" | <">
//!                | "/" | "[" | "]" | "?" | "="
//!                | "{" | "}" | SP | HT
//! quoted-string  = ( <"> *(qdtext | quoted-pair ) <"> )
//! qdtext         = <any TEXT except <">>
//! quoted-pair    = "\" CHAR
//! ```
//!
//! Lists use the `#rule`: elements are separated by one or more commas and optional
//! whitespace, and null elements do not count.

use std::borrow::Cow;

use nom::{bytes::complete::take_while1, IResult, Parser};
use thiserror::Error;

/// Errors produced while reading header values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The input ended where an element was required.
    #[error("expecting {0}")]
    Expected(&'static str),

    /// A character that cannot start or continue the expected element.
    #[error("expecting {expected}: found {found:?}")]
    Unexpected {
        /// What the reader was looking for.
        expected: &'static str,
        /// The offending character.
        found: char,
    },

    /// A value that was read successfully but is not a valid token.
    #[error("invalid token: {0:?}")]
    InvalidToken(String),

    /// Attaches the name of the element being read.
    #[error("{context}: {source}")]
    Context {
        /// Element being read, e.g. `parameter name`.
        context: &'static str,
        /// Underlying failure.
        source: Box<ParseError>,
    },

    /// Attaches the full header value that failed to parse.
    #[error("failed to parse {value:?}: {source}")]
    Value {
        /// The raw header value.
        value: String,
        /// Underlying failure.
        source: Box<ParseError>,
    },
}

impl ParseError {
    pub(crate) fn context(self, context: &'static str) -> Self {
        Self::Context {
            context,
            source: Box::new(self),
        }
    }

    pub(crate) fn in_value(self, value: &str) -> Self {
        Self::Value {
            value: value.to_owned(),
            source: Box::new(self),
        }
    }
}

/// Returns `true` if `s` is a non-empty run of token characters.
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_token_byte)
}

/// Returns `true` if `token` is in `tokens`, compared case-insensitively.
pub fn contains_token<S: AsRef<str>>(tokens: &[S], token: &str) -> bool {
    tokens
        .iter()
        .any(|candidate| candidate.as_ref().eq_ignore_ascii_case(token))
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii() && is_token_byte(c as u8)).parse(input)
}

/// Reads a token from the start of `s`.
///
/// Returns the token and the remaining input with leading whitespace trimmed.
pub fn read_token(s: &str) -> Result<(&str, &str), ParseError> {
    match token(s) {
        Ok((rest, token)) => Ok((token, trim_left_space(rest))),
        Err(_) => Err(match s.chars().next() {
            Some(found) => ParseError::Unexpected {
                expected: "token",
                found,
            },
            None => ParseError::Expected("token"),
        }),
    }
}

/// Reads a quoted string from the start of `s` and unescapes it.
///
/// Returns the unquoted value and the remaining input with leading whitespace trimmed.
/// The value is borrowed from the input when it contains no escapes.
pub fn read_quoted_string(s: &str) -> Result<(Cow<'_, str>, &str), ParseError> {
    let bytes = s.as_bytes();
    match bytes.first() {
        None => return Err(ParseError::Expected("quoted string")),
        Some(b'"') => {}
        Some(_) => {
            return Err(ParseError::Unexpected {
                expected: "opening quote",
                found: s.chars().next().unwrap_or_default(),
            })
        }
    }

    let mut escapes = 0;
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 1;
                match bytes.get(i) {
                    None => return Err(ParseError::Expected("escaped char")),
                    Some(&b) if !is_char(b) => {
                        return Err(ParseError::Unexpected {
                            expected: "escaped char",
                            found: s[i..].chars().next().unwrap_or_default(),
                        })
                    }
                    Some(_) => escapes += 1,
                }
            }
            b'"' => {
                let value = unescape(&s[1..i], escapes);
                return Ok((value, trim_left_space(&s[i + 1..])));
            }
            _ => {}
        }
        i += 1;
    }

    Err(ParseError::Expected("closing quote"))
}

/// Reads either a quoted string or a token, depending on the first character of `s`.
pub fn read_string(s: &str) -> Result<(Cow<'_, str>, &str), ParseError> {
    match s.as_bytes().first() {
        None => Err(ParseError::Expected("token or quoted string")),
        Some(b'"') => read_quoted_string(s),
        Some(_) => read_token(s).map(|(token, rest)| (Cow::Borrowed(token), rest)),
    }
}

/// Parses a single header value as a comma-separated list of tokens.
///
/// Null elements are skipped, but at least one token is required.
pub fn parse_token_list(value: &str) -> Result<Vec<&str>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = trim_left_comma_or_space(value);
    loop {
        let (token, remaining) = read_token(rest).map_err(|err| err.in_value(value))?;
        tokens.push(token);

        if remaining.is_empty() {
            return Ok(tokens);
        }
        if !remaining.starts_with(',') {
            let found = remaining.chars().next().unwrap_or_default();
            return Err(ParseError::Unexpected {
                expected: "','",
                found,
            }
            .in_value(value));
        }

        rest = trim_left_comma_or_space(remaining);
        if rest.is_empty() {
            return Ok(tokens);
        }
    }
}

/// Parses several header values as one concatenated token list.
///
/// Each value must itself be a valid non-empty list; no values yields an empty list.
pub fn parse_token_lists<'a, I>(values: I) -> Result<Vec<&'a str>, ParseError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tokens = Vec::new();
    for value in values {
        tokens.extend(parse_token_list(value)?);
    }
    Ok(tokens)
}

/// Formats `s` as a bare token when it qualifies, otherwise as a quoted string.
pub fn format_string(s: &str) -> Cow<'_, str> {
    if is_token(s) {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(quote_string(s))
    }
}

/// Quotes `s`, escaping `"`, `\` and any control character that is not whitespace.
pub fn quote_string(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if c.is_ascii() {
            let b = c as u8;
            // non-TEXT octets are a subset of CHAR, so they can be sent as quoted-pairs
            if !is_text(b) || b == b'"' || b == b'\\' {
                quoted.push('\\');
            }
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn unescape(s: &str, escapes: usize) -> Cow<'_, str> {
    if escapes == 0 {
        return Cow::Borrowed(s);
    }

    let mut unescaped = String::with_capacity(s.len() - escapes);
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                unescaped.push(escaped);
            }
        } else {
            unescaped.push(c);
        }
    }
    Cow::Owned(unescaped)
}

pub(crate) fn trim_left_space(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_ascii() && is_space(c as u8))
}

pub(crate) fn trim_left_comma_or_space(s: &str) -> &str {
    s.trim_start_matches(|c: char| c == ',' || (c.is_ascii() && is_space(c as u8)))
}

/// LWS = [CRLF] 1*( SP | HT )
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn is_token_byte(b: u8) -> bool {
    is_char(b) && !is_control(b) && !is_separator(b)
}

/// CHAR = <any US-ASCII character (octets 0 - 127)>
fn is_char(b: u8) -> bool {
    b <= 127
}

/// TEXT = <any OCTET except CTLs, but including LWS>
fn is_text(b: u8) -> bool {
    !is_control(b) || is_space(b)
}

/// CTL = <any US-ASCII control character (octets 0 - 31) and DEL (127)>
fn is_control(b: u8) -> bool {
    b <= 31 || b == 127
}

fn is_separator(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}
