//! # yawc-handshake
//! The opening handshake of the WebSocket protocol (RFC 6455) and the negotiation of the
//! permessage-deflate extension (RFC 7692), for both clients and servers.
//!
//! The crate stops where frames begin: a successful handshake yields [`ConnectionParts`],
//! holding the upgraded stream, the negotiated subprotocol and compression parameters, and
//! the read/write buffers of the connection.
//!
//! # Features
//! - `logging`: Enables debug logging of the negotiation using the `log` crate. Enabled by
//!   default.
//!
//! # Client Example
//! ```no_run
//! use yawc_handshake::{CompressionMode, DialOptions, Dialer};
//!
//! async fn connect() -> Result<(), yawc_handshake::DialError> {
//!     let options = DialOptions::default()
//!         .with_subprotocol("chat")
//!         .with_compression(CompressionMode::NoContextTakeover);
//!
//!     let (parts, response) = Dialer::new()
//!         .dial("wss://echo.example.com/ws".parse().unwrap(), &options)
//!         .await?;
//!     println!("{} with {:?}", response.status(), parts.subprotocol());
//!     Ok(())
//! }
//! ```
//!
//! # Server Example
//! ```no_run
//! use http_body_util::Full;
//! use hyper::{body::{Bytes, Incoming}, Request, Response};
//! use yawc_handshake::{server, AcceptOptions};
//!
//! fn upgrade(mut req: Request<Incoming>) -> Response<Full<Bytes>> {
//!     match server::accept(&mut req, &AcceptOptions::default()) {
//!         Ok((response, fut)) => {
//!             tokio::spawn(async move {
//!                 if let Ok(parts) = fut.await {
//!                     // frames are read from parts.io, after parts.read_buf
//!                     let _ = parts;
//!                 }
//!             });
//!             response
//!         }
//!         Err(rejected) => rejected.response,
//!     }
//! }
//! ```
//!
//! # Header Toolkit
//! The lower level building blocks are public as well: the RFC 2616 [`grammar`], the
//! [`extensions`] list codec, the [`challenge`] hash, the upgrade [`headers`] validators and
//! the [`protocols`] negotiation.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod challenge;
pub mod client;
mod compression;
mod conn;
pub mod connector;
pub mod extensions;
pub mod grammar;
pub mod headers;
mod options;
pub mod origin;
mod pool;
pub mod protocols;
pub mod server;
mod stream;

use http::{header::InvalidHeaderValue, HeaderName, Method, StatusCode, Version};
use thiserror::Error;

pub use client::{DialError, Dialer};
pub use compression::{select_deflate, verify_server_extensions, CompressionMode, CompressionOptions};
pub use conn::{ConnectionParts, Role};
pub use connector::{Connector, TcpConnector};
pub use grammar::ParseError;
pub use options::{AcceptOptions, DialOptions};
pub use pool::{BufferPool, PooledBuf, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_IDLE};
pub use server::{accept, HttpResponse, Rejected, UpgradeFut};
pub use stream::MaybeTlsStream;

/// A result type for handshake operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during the opening handshake.
///
/// The errors are broadly categorized into:
///
/// - Malformed or missing headers, on either side
/// - Requests a server must refuse, each with its own HTTP status (see [`status_code`](Self::status_code))
/// - Protocol violations by a server, detected while dialing
/// - Transport, TLS and I/O errors
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// A header value does not follow the RFC 2616 grammar.
    #[error("invalid {header} header: {source}")]
    Parse {
        header: HeaderName,
        #[source]
        source: ParseError,
    },

    /// A required header is absent.
    #[error("missing {0} header")]
    MissingHeader(HeaderName),

    /// A single valued header appears more than once.
    #[error("multiple {0} headers")]
    MultipleValues(HeaderName),

    /// A single valued header is present but blank.
    #[error("empty {0} header")]
    EmptyHeader(HeaderName),

    /// `Sec-WebSocket-Version` is not a decimal number between 0 and 255.
    #[error("invalid Sec-WebSocket-Version {0:?}")]
    InvalidVersion(String),

    /// The client speaks a version of the protocol other than 13.
    #[error("unsupported WebSocket protocol version {0}, only 13 is supported")]
    UnsupportedVersion(u8),

    /// `Sec-WebSocket-Key` is not valid base64.
    #[error("invalid Sec-WebSocket-Key {value:?}: {source}")]
    InvalidKey {
        value: String,
        #[source]
        source: base64::DecodeError,
    },

    /// The upgrade request was not sent over HTTP/1.1 or later.
    #[error("unsupported HTTP version {0:?}, WebSocket requires HTTP/1.1")]
    UnsupportedHttpVersion(Version),

    /// The request does not ask for a WebSocket upgrade through `Connection` and `Upgrade`.
    #[error("{0}")]
    UpgradeRequired(#[source] Box<WebSocketError>),

    /// The upgrade request does not use the GET method.
    #[error("WebSocket protocol violation: handshake request method is not GET but {0}")]
    MethodNotAllowed(Method),

    /// The `Origin` header cannot be parsed as a URL.
    #[error("failed to parse Origin header {0:?}")]
    InvalidOrigin(String),

    /// A cross-origin request matched none of the authorized patterns.
    #[error("request Origin {origin:?} is not a valid cross-origin for host {host:?}")]
    OriginNotAuthorized { origin: String, host: String },

    /// An authorized origin pattern is not a valid glob.
    #[error("failed to parse origin pattern {0:?}")]
    BadOriginPattern(String),

    /// The HTTP server cannot hand over the underlying connection.
    #[error("HTTP server does not support connection hijacking")]
    HijackUnsupported,

    /// Taking over the connection after the `101` response failed.
    #[error("failed to hijack connection: {0}")]
    Hijack(#[source] std::io::Error),

    /// The peer broke a rule of the opening handshake.
    #[error("WebSocket protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server answered with something else than `101 Switching Protocols`.
    #[error("expected handshake response status code 101 but got {0}")]
    InvalidStatusCode(u16),

    /// Returned when attempting to dial a URL with a scheme other than ws, wss, http or https.
    #[error("unexpected url scheme: {0:?}")]
    InvalidHttpScheme(String),

    /// The URL to dial has no host.
    #[error("url has no host")]
    MissingHost,

    /// The connector bounds every request with a fixed timeout.
    #[error("connector has a static request timeout of {0:?}, bound the dial future instead")]
    StaticTimeout(std::time::Duration),

    /// The upgraded response cannot be used as a duplex stream.
    #[error("response body is not a read write stream")]
    NotDuplex,

    /// Generating the random key failed.
    #[error("failed to generate Sec-WebSocket-Key: {0}")]
    Random(#[source] rand::Error),

    /// A value cannot be sent as a header.
    #[error(transparent)]
    InvalidHeaderValue(#[from] InvalidHeaderValue),

    /// Building the handshake request failed.
    #[error(transparent)]
    Http(#[from] http::Error),

    /// Wraps standard I/O errors, such as connection resets or TLS failures.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from the hyper HTTP library during the request/response exchange.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),
}

impl WebSocketError {
    /// The HTTP status a server answers with when refusing a handshake for this reason.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedHttpVersion(_)
            | Self::UpgradeRequired(_)
            | Self::UnsupportedVersion(_) => StatusCode::UPGRADE_REQUIRED,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Parse { .. }
            | Self::MissingHeader(_)
            | Self::MultipleValues(_)
            | Self::EmptyHeader(_)
            | Self::InvalidVersion(_)
            | Self::InvalidKey { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidOrigin(_)
            | Self::OriginNotAuthorized { .. }
            | Self::BadOriginPattern(_) => StatusCode::FORBIDDEN,
            Self::HijackUnsupported => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
