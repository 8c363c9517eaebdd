//! RFC 6455 semantics for the upgrade headers, built on the [`grammar`](crate::grammar) readers.

use http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::grammar::{self, ParseError};
use crate::{Result, WebSocketError};

/// The only protocol version this crate speaks.
pub const WEBSOCKET_VERSION: u8 = 13;

/// Returns the single value of header `name`, trimmed.
///
/// Fails if the header is absent, appears more than once, or is empty.
pub fn get_one<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<&'a str> {
    let mut values = headers.get_all(name).iter();
    let value = match (values.next(), values.next()) {
        (None, _) => return Err(WebSocketError::MissingHeader(name.clone())),
        (Some(_), Some(_)) => return Err(WebSocketError::MultipleValues(name.clone())),
        (Some(value), None) => value,
    };
    if value.is_empty() {
        return Err(WebSocketError::EmptyHeader(name.clone()));
    }
    Ok(to_str(name, value)?.trim())
}

/// Views a header value as text, failing on bytes outside visible ASCII.
pub(crate) fn to_str<'a>(name: &HeaderName, value: &'a HeaderValue) -> Result<&'a str> {
    value.to_str().map_err(|_| WebSocketError::Parse {
        header: name.clone(),
        source: ParseError::Expected("visible ASCII"),
    })
}

fn values<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Vec<&'a str>> {
    headers
        .get_all(name)
        .iter()
        .map(|value| to_str(name, value))
        .collect()
}

/// Checks that header `name` is exactly one token equal to `token`, ignoring case.
///
/// All values of the header are parsed as a single token list, so `Upgrade, Upgrade` or a
/// second occurrence of the header are both rejected.
pub fn verify_is_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> Result<()> {
    if !headers.contains_key(name) {
        return Err(WebSocketError::MissingHeader(name.clone()));
    }
    let tokens = grammar::parse_token_lists(values(headers, name)?).map_err(|source| {
        WebSocketError::Parse {
            header: name.clone(),
            source,
        }
    })?;
    match tokens.as_slice() {
        [only] if only.eq_ignore_ascii_case(token) => Ok(()),
        _ => Err(WebSocketError::ProtocolViolation(format!(
            "invalid {name} header: {tokens:?} is not {token:?}"
        ))),
    }
}

/// Checks that header `name` contains `token`, ignoring case.
///
/// Values that fail to parse are skipped as long as another value contains the token; the
/// first parse failure is only reported when no value matches.
pub fn verify_contains_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> Result<()> {
    if !headers.contains_key(name) {
        return Err(WebSocketError::MissingHeader(name.clone()));
    }

    let mut seen = Vec::new();
    let mut first_err = None;
    for value in values(headers, name)? {
        match grammar::parse_token_list(value) {
            Ok(tokens) if grammar::contains_token(&tokens, token) => return Ok(()),
            Ok(tokens) => seen.extend(tokens),
            Err(err) => {
                first_err.get_or_insert(err);
            }
        }
    }

    match first_err {
        Some(source) => Err(WebSocketError::Parse {
            header: name.clone(),
            source,
        }),
        None => Err(WebSocketError::ProtocolViolation(format!(
            "invalid {name} header: {seen:?} does not contain {token:?}"
        ))),
    }
}

/// Sets `Connection: Upgrade`.
pub fn set_connection(headers: &mut HeaderMap) {
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
}

/// Sets `Upgrade: WebSocket`.
pub fn set_upgrade(headers: &mut HeaderMap) {
    headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
}

/// Sets `Sec-WebSocket-Version` to `version`.
pub fn set_version(headers: &mut HeaderMap, version: u8) {
    headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from(u16::from(version)));
}

/// Reads `Sec-WebSocket-Version`.
///
/// ```text
/// version = DIGIT | (NZDIGIT DIGIT) | ("1" DIGIT DIGIT) | ("2" DIGIT DIGIT)
/// ```
///
/// Only a single version is accepted, in the range 0-255.
pub fn version(headers: &HeaderMap) -> Result<u8> {
    let value = get_one(headers, &header::SEC_WEBSOCKET_VERSION)?;
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WebSocketError::InvalidVersion(value.to_owned()));
    }
    value
        .parse()
        .map_err(|_| WebSocketError::InvalidVersion(value.to_owned()))
}
