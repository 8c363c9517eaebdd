//! permessage-deflate (RFC 7692) offer negotiation.
//!
//! The server walks the client's offers and takes the first one it can honour, silently
//! skipping the rest. The client is strict: whatever the server answers must be a single
//! `permessage-deflate` it understands, or the handshake fails.

use std::fmt;

use http::{header, HeaderMap, HeaderValue};
use nom::{character::complete::digit1, combinator::all_consuming, Parser};

use crate::extensions::{self, Extension, ExtensionParam, Extensions};
use crate::{Result, WebSocketError};

pub(crate) const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

/// How an endpoint is willing to compress messages.
///
/// Compression trades CPU and memory for bandwidth, and only pays off for larger text
/// messages, so it is off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionMode {
    /// Never negotiate permessage-deflate.
    #[default]
    Disabled,

    /// Compress every message independently. Each side drops its sliding window after a
    /// message, so no compression state is kept between messages.
    NoContextTakeover,

    /// Keep the sliding window between messages. Better ratios for streams of similar
    /// messages, at the cost of keeping a compressor alive per connection.
    ContextTakeover,
}

impl CompressionMode {
    /// The parameters this mode starts negotiation from.
    ///
    /// Clients send this as their offer; servers apply the client's flags on top of it.
    pub fn options(self) -> CompressionOptions {
        match self {
            Self::Disabled | Self::ContextTakeover => CompressionOptions::default(),
            Self::NoContextTakeover => CompressionOptions {
                client_no_context_takeover: true,
                server_no_context_takeover: true,
            },
        }
    }

    /// Smallest message size worth compressing in this mode.
    pub fn default_threshold(self) -> usize {
        match self {
            Self::Disabled => 0,
            Self::NoContextTakeover => 512,
            Self::ContextTakeover => 128,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::Disabled
    }
}

/// Negotiated permessage-deflate parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionOptions {
    /// The client resets its compressor after every message.
    pub client_no_context_takeover: bool,
    /// The server resets its compressor after every message.
    pub server_no_context_takeover: bool,
}

impl From<CompressionOptions> for Extension {
    fn from(options: CompressionOptions) -> Self {
        let mut extension = Extension::new(PERMESSAGE_DEFLATE);
        if options.client_no_context_takeover {
            extension
                .params
                .push(ExtensionParam::new(CLIENT_NO_CONTEXT_TAKEOVER));
        }
        if options.server_no_context_takeover {
            extension
                .params
                .push(ExtensionParam::new(SERVER_NO_CONTEXT_TAKEOVER));
        }
        extension
    }
}

impl fmt::Display for CompressionOptions {
    /// `permessage-deflate[; client_no_context_takeover][; server_no_context_takeover]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Extension::from(*self).fmt(f)
    }
}

impl CompressionOptions {
    /// Replaces `Sec-WebSocket-Extensions` with exactly these options.
    pub fn set_header(&self, headers: &mut HeaderMap) -> Result<()> {
        headers.insert(
            header::SEC_WEBSOCKET_EXTENSIONS,
            HeaderValue::try_from(self.to_string())?,
        );
        Ok(())
    }
}

/// Server side: selects the first acceptable permessage-deflate offer.
///
/// Offers are tried in header order. An offer with a duplicated parameter, an unknown
/// parameter or a value this implementation cannot honour is skipped in favour of the next
/// one. `None` means the connection proceeds uncompressed, which is never an error.
pub fn select_deflate(mode: CompressionMode, offered: &Extensions) -> Option<CompressionOptions> {
    if !mode.is_enabled() {
        return None;
    }

    offered
        .iter()
        .filter(|extension| extension.name == PERMESSAGE_DEFLATE)
        .find_map(|extension| {
            let accepted = accept_deflate(mode, &extension.params);
            if accepted.is_none() {
                #[cfg(feature = "logging")]
                log::debug!("skipping permessage-deflate offer: {extension}");
            }
            accepted
        })
}

fn accept_deflate(mode: CompressionMode, params: &[ExtensionParam]) -> Option<CompressionOptions> {
    let mut options = mode.options();
    let mut seen: Vec<&str> = Vec::with_capacity(params.len());

    for param in params {
        if seen.contains(&param.name.as_str()) {
            return None;
        }
        seen.push(&param.name);

        match param.name.as_str() {
            CLIENT_NO_CONTEXT_TAKEOVER if param.is_flag() => {
                options.client_no_context_takeover = true;
            }
            SERVER_NO_CONTEXT_TAKEOVER if param.is_flag() => {
                options.server_no_context_takeover = true;
            }
            // our inflater accepts any window, so the client may use a smaller one
            CLIENT_MAX_WINDOW_BITS if param.is_flag() || is_valid_window_bits(&param.value) => {}
            // our deflater cannot shrink its window
            SERVER_MAX_WINDOW_BITS if param.value == "15" => {}
            _ => return None,
        }
    }

    Some(options)
}

/// `1*DIGIT` in the range 8-15.
fn is_valid_window_bits(value: &str) -> bool {
    let digits: nom::IResult<&str, &str> = all_consuming(digit1).parse(value);
    digits
        .ok()
        .and_then(|(_, digits)| digits.parse::<u8>().ok())
        .is_some_and(|bits| (8..=15).contains(&bits))
}

/// Client side: checks the server's `Sec-WebSocket-Extensions` answer against our `offer`.
///
/// No extensions means no compression, even if it was offered. Otherwise the answer must be
/// exactly one `permessage-deflate` to an offer we actually made, carrying only parameters
/// we understand.
pub fn verify_server_extensions(
    offer: Option<CompressionOptions>,
    headers: &HeaderMap,
) -> Result<Option<CompressionOptions>> {
    let extensions = extensions::parse_header(headers)?;
    let extension = match (extensions.0.as_slice(), offer) {
        ([], _) => return Ok(None),
        ([extension], Some(_)) if extension.name == PERMESSAGE_DEFLATE => extension,
        _ => {
            return Err(WebSocketError::ProtocolViolation(format!(
                "unsupported extensions from server: {extensions}"
            )))
        }
    };

    let mut options = offer.unwrap_or_default();
    for param in &extension.params {
        match param.name.as_str() {
            CLIENT_NO_CONTEXT_TAKEOVER if param.is_flag() => {
                options.client_no_context_takeover = true;
            }
            SERVER_NO_CONTEXT_TAKEOVER if param.is_flag() => {
                options.server_no_context_takeover = true;
            }
            // a larger server window still decodes fine
            SERVER_MAX_WINDOW_BITS if !param.is_flag() => {}
            _ => {
                return Err(WebSocketError::ProtocolViolation(format!(
                    "unsupported permessage-deflate parameter: {param}"
                )))
            }
        }
    }

    Ok(Some(options))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offers(value: &str) -> Extensions {
        if value.is_empty() {
            Extensions::default()
        } else {
            value.parse().unwrap()
        }
    }

    fn response(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(
                header::SEC_WEBSOCKET_EXTENSIONS,
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    const BOTH: CompressionOptions = CompressionOptions {
        client_no_context_takeover: true,
        server_no_context_takeover: true,
    };

    #[test]
    fn test_mode_defaults() {
        assert_eq!(CompressionMode::default(), CompressionMode::Disabled);
        assert_eq!(CompressionMode::NoContextTakeover.options(), BOTH);
        assert_eq!(
            CompressionMode::ContextTakeover.options(),
            CompressionOptions::default()
        );
        assert_eq!(CompressionMode::NoContextTakeover.default_threshold(), 512);
        assert_eq!(CompressionMode::ContextTakeover.default_threshold(), 128);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            CompressionOptions::default().to_string(),
            "permessage-deflate"
        );
        assert_eq!(
            BOTH.to_string(),
            "permessage-deflate; client_no_context_takeover; server_no_context_takeover"
        );
        let server_only = CompressionOptions {
            server_no_context_takeover: true,
            ..Default::default()
        };
        assert_eq!(
            server_only.to_string(),
            "permessage-deflate; server_no_context_takeover"
        );
    }

    #[test]
    fn test_select_deflate() {
        use CompressionMode::*;

        let cases: &[(&str, CompressionMode, &str, Option<CompressionOptions>)] = &[
            ("disabled", Disabled, "permessage-deflate", None),
            ("no client support", NoContextTakeover, "", None),
            (
                "permessage-deflate",
                NoContextTakeover,
                "permessage-deflate; client_max_window_bits",
                Some(BOTH),
            ),
            (
                "first offer wins",
                ContextTakeover,
                "permessage-deflate; server_no_context_takeover; client_no_context_takeover, permessage-deflate",
                Some(BOTH),
            ),
            (
                "duplicate parameter",
                ContextTakeover,
                "permessage-deflate; server_no_context_takeover; server_no_context_takeover",
                None,
            ),
            (
                "duplicate parameter with fallback",
                ContextTakeover,
                "permessage-deflate; server_no_context_takeover; server_no_context_takeover, permessage-deflate; server_no_context_takeover",
                Some(CompressionOptions {
                    client_no_context_takeover: false,
                    server_no_context_takeover: true,
                }),
            ),
            (
                "unknown parameter",
                NoContextTakeover,
                "permessage-deflate; meow",
                None,
            ),
            (
                "unknown parameter with fallback",
                NoContextTakeover,
                "permessage-deflate; meow, permessage-deflate; client_max_window_bits",
                Some(BOTH),
            ),
            (
                "server window out of range",
                ContextTakeover,
                "permessage-deflate; server_max_window_bits=16",
                None,
            ),
            (
                "server window cannot shrink",
                ContextTakeover,
                "permessage-deflate; server_max_window_bits=10",
                None,
            ),
            (
                "server window at maximum",
                ContextTakeover,
                "permessage-deflate; server_max_window_bits=15",
                Some(CompressionOptions::default()),
            ),
            (
                "client window in range",
                ContextTakeover,
                r#"permessage-deflate; client_max_window_bits="8""#,
                Some(CompressionOptions::default()),
            ),
            (
                "client window out of range",
                ContextTakeover,
                "permessage-deflate; client_max_window_bits=7",
                None,
            ),
            (
                "flag with value",
                ContextTakeover,
                "permessage-deflate; client_no_context_takeover=1",
                None,
            ),
            (
                "other extensions ignored",
                ContextTakeover,
                "x-webkit-deflate-frame, permessage-deflate",
                Some(CompressionOptions::default()),
            ),
            (
                "name is case-sensitive",
                ContextTakeover,
                "Permessage-Deflate",
                None,
            ),
        ];

        for (name, mode, header, expected) in cases {
            assert_eq!(select_deflate(*mode, &offers(header)), *expected, "{name}");
        }
    }

    #[test]
    fn test_is_valid_window_bits() {
        for valid in ["8", "9", "15", "08"] {
            assert!(is_valid_window_bits(valid), "{valid:?}");
        }
        for invalid in ["", "7", "16", "256", "1a", "+9", " 9"] {
            assert!(!is_valid_window_bits(invalid), "{invalid:?}");
        }
    }

    #[test]
    fn test_verify_server_extensions() {
        let offer = Some(CompressionMode::ContextTakeover.options());

        assert_eq!(verify_server_extensions(offer, &response(&[])).unwrap(), None);
        assert_eq!(verify_server_extensions(None, &response(&[])).unwrap(), None);

        assert_eq!(
            verify_server_extensions(offer, &response(&["permessage-deflate"])).unwrap(),
            Some(CompressionOptions::default())
        );
        assert_eq!(
            verify_server_extensions(
                offer,
                &response(&[
                    "permessage-deflate; client_no_context_takeover; server_no_context_takeover; server_max_window_bits=10"
                ])
            )
            .unwrap(),
            Some(BOTH)
        );
    }

    #[test]
    fn test_verify_server_extensions_fail() {
        let offer = Some(CompressionMode::NoContextTakeover.options());

        let violations: &[(Option<CompressionOptions>, &[&str])] = &[
            (None, &["permessage-deflate"]),
            (offer, &["x-webkit-deflate-frame"]),
            (offer, &["permessage-deflate, permessage-deflate"]),
            (offer, &["permessage-deflate", "permessage-deflate"]),
            (offer, &["permessage-deflate; client_max_window_bits=10"]),
            (offer, &["permessage-deflate; server_max_window_bits"]),
            (offer, &["permessage-deflate; meow"]),
        ];
        for (offer, values) in violations {
            assert!(
                matches!(
                    verify_server_extensions(*offer, &response(values)),
                    Err(WebSocketError::ProtocolViolation(_))
                ),
                "{values:?}"
            );
        }

        assert!(matches!(
            verify_server_extensions(offer, &response(&["permessage-deflate; ???"])),
            Err(WebSocketError::Parse { .. })
        ));
    }

    #[test]
    fn test_set_header() {
        let mut headers = HeaderMap::new();
        BOTH.set_header(&mut headers).unwrap();
        assert_eq!(
            headers[header::SEC_WEBSOCKET_EXTENSIONS],
            "permessage-deflate; client_no_context_takeover; server_no_context_takeover"
        );
    }
}
