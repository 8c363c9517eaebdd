//! `Sec-WebSocket-Protocol` negotiation.
//!
//! ```text
//! Sec-WebSocket-Protocol-Client = 1#token
//! Sec-WebSocket-Protocol-Server = token
//! ```

use http::{header, HeaderMap, HeaderValue};

use crate::grammar;
use crate::headers::to_str;
use crate::{Result, WebSocketError};

/// Parses every `Sec-WebSocket-Protocol` value as one token list.
///
/// A missing header yields an empty list.
pub fn parse_protocols(headers: &HeaderMap) -> Result<Vec<&str>> {
    let values = headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .map(|value| to_str(&header::SEC_WEBSOCKET_PROTOCOL, value))
        .collect::<Result<Vec<_>>>()?;

    grammar::parse_token_lists(values).map_err(|source| WebSocketError::Parse {
        header: header::SEC_WEBSOCKET_PROTOCOL,
        source,
    })
}

/// Sets `Sec-WebSocket-Protocol` to `protocols` joined by `", "`, or removes it when empty.
pub fn set_protocols<S: AsRef<str>>(headers: &mut HeaderMap, protocols: &[S]) -> Result<()> {
    if protocols.is_empty() {
        headers.remove(header::SEC_WEBSOCKET_PROTOCOL);
        return Ok(());
    }

    let joined = protocols
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(", ");
    headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::try_from(joined)?);
    Ok(())
}

/// Returns `true` if `protocol` is in `protocols`, ignoring case.
pub fn contains_protocol<S: AsRef<str>>(protocols: &[S], protocol: &str) -> bool {
    grammar::contains_token(protocols, protocol)
}

/// Picks the subprotocol for a server response.
///
/// `supported` is walked in the server's priority order, not the client's, and the first
/// entry offered by the client wins. The server's spelling is returned. A header that fails
/// to parse negotiates nothing.
pub fn select_protocol<'a, S: AsRef<str>>(
    headers: &HeaderMap,
    supported: &'a [S],
) -> Option<&'a str> {
    let offered = parse_protocols(headers).ok()?;
    supported
        .iter()
        .map(AsRef::as_ref)
        .find(|protocol| contains_protocol(&offered, protocol))
}

/// Checks the subprotocol chosen by a server against the ones the client `offered`.
///
/// No protocol in the response is fine. Otherwise the response must name exactly one of
/// the offered protocols, and the client's spelling of it is returned.
pub fn verify_protocol<'a, S: AsRef<str>>(
    headers: &HeaderMap,
    offered: &'a [S],
) -> Result<Option<&'a str>> {
    let selected = parse_protocols(headers)?;
    let chosen = match selected.as_slice() {
        [] => return Ok(None),
        [chosen] => *chosen,
        _ => {
            return Err(WebSocketError::ProtocolViolation(format!(
                "invalid Sec-WebSocket-Protocol header: {selected:?}"
            )))
        }
    };

    offered
        .iter()
        .map(AsRef::as_ref)
        .find(|protocol| protocol.eq_ignore_ascii_case(chosen))
        .map(Some)
        .ok_or_else(|| {
            WebSocketError::ProtocolViolation(format!(
                "unexpected Sec-WebSocket-Protocol from server: {chosen:?}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(
                header::SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_parse_protocols() {
        assert!(parse_protocols(&headers(&[])).unwrap().is_empty());
        assert_eq!(
            parse_protocols(&headers(&["chat, superchat", "echo"])).unwrap(),
            vec!["chat", "superchat", "echo"]
        );
        assert!(matches!(
            parse_protocols(&headers(&["chat superchat"])),
            Err(WebSocketError::Parse { .. })
        ));
    }

    #[test]
    fn test_set_protocols() {
        let mut map = HeaderMap::new();
        set_protocols(&mut map, &["chat", "echo"]).unwrap();
        assert_eq!(map[header::SEC_WEBSOCKET_PROTOCOL], "chat, echo");

        set_protocols::<&str>(&mut map, &[]).unwrap();
        assert!(!map.contains_key(header::SEC_WEBSOCKET_PROTOCOL));
    }

    #[test]
    fn test_select_protocol() {
        // server priority wins, with the server's spelling
        let supported = ["BAR", "FOO"];
        assert_eq!(select_protocol(&headers(&["foo"]), &supported), Some("FOO"));
        assert_eq!(
            select_protocol(&headers(&["foo, bar"]), &supported),
            Some("BAR")
        );
        assert_eq!(select_protocol(&headers(&["baz"]), &supported), None);
        assert_eq!(select_protocol(&headers(&[]), &supported), None);
        assert_eq!(select_protocol(&headers(&["foo bar"]), &supported), None);
        assert_eq!(select_protocol::<&str>(&headers(&["foo"]), &[]), None);
    }

    #[test]
    fn test_verify_protocol() {
        let offered = ["Chat", "echo"];
        assert_eq!(verify_protocol(&headers(&[]), &offered).unwrap(), None);
        assert_eq!(
            verify_protocol(&headers(&["chat"]), &offered).unwrap(),
            Some("Chat")
        );

        let violations: &[&[&str]] = &[&["chat, echo"], &["chat", "echo"], &["superchat"]];
        for values in violations {
            assert!(
                matches!(
                    verify_protocol(&headers(values), &offered),
                    Err(WebSocketError::ProtocolViolation(_))
                ),
                "{values:?}"
            );
        }

        assert!(matches!(
            verify_protocol::<&str>(&headers(&["chat"]), &[]),
            Err(WebSocketError::ProtocolViolation(_))
        ));
    }
}
