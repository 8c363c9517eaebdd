//! Server side of the opening handshake.
//!
//! [`accept`] validates an upgrade request coming out of hyper, prepares the `101 Switching
//! Protocols` response and returns a future resolving to the hijacked connection once that
//! response has been written.
//!
//! ```no_run
//! use http_body_util::Full;
//! use hyper::{body::{Bytes, Incoming}, Request, Response};
//! use yawc_handshake::{server, AcceptOptions};
//!
//! async fn handler(mut request: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
//!     let options = AcceptOptions::default().with_subprotocols(["chat"]);
//!     match server::accept(&mut request, &options) {
//!         Ok((response, upgrade)) => {
//!             tokio::spawn(async move {
//!                 if let Ok(parts) = upgrade.await {
//!                     // hand `parts` to the frame layer
//!                     let _ = parts;
//!                 }
//!             });
//!             Ok(response)
//!         }
//!         Err(rejected) => Ok(rejected.response),
//!     }
//! }
//! ```

use std::{
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use futures::{future::BoxFuture, FutureExt};
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Version};
use http_body_util::Full;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use pin_project::pin_project;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    challenge,
    compression::{self, CompressionOptions},
    conn::{ConnectionParts, Role},
    extensions,
    headers::{self, WEBSOCKET_VERSION},
    options::AcceptOptions,
    origin,
    pool::{BufferPool, PooledBuf},
    protocols, Result, WebSocketError,
};

/// Response type produced by the server handshake, for both upgrades and rejections.
pub type HttpResponse = Response<Full<Bytes>>;

/// A refused handshake.
///
/// `response` carries the status code matching `error` and a plain text explanation. Send
/// it back to the client as is.
#[derive(Debug, Error)]
#[error("failed to accept WebSocket connection: {error}")]
pub struct Rejected {
    pub response: HttpResponse,
    #[source]
    pub error: WebSocketError,
}

/// The raw transport taken over from the HTTP server.
#[derive(Debug)]
pub struct Hijacked<Io> {
    pub io: Io,
    /// Bytes the HTTP server had already read past the request head.
    pub read_buf: Bytes,
}

/// The ability to take the connection away from the HTTP server.
///
/// Implemented for hyper's [`OnUpgrade`]. Other HTTP stacks, or tests, can provide their own
/// transport by implementing it.
pub trait Hijack {
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    type Future: Future<Output = io::Result<Hijacked<Self::Io>>>;

    /// Resolves once the switching protocols response has been flushed.
    fn hijack(self) -> Self::Future;
}

impl Hijack for OnUpgrade {
    type Io = TokioIo<Upgraded>;
    type Future = BoxFuture<'static, io::Result<Hijacked<Self::Io>>>;

    fn hijack(self) -> Self::Future {
        async move {
            // hyper replays bytes it buffered past the head through `Upgraded` itself
            let upgraded = self.await.map_err(io::Error::other)?;
            Ok(Hijacked {
                io: TokioIo::new(upgraded),
                read_buf: Bytes::new(),
            })
        }
        .boxed()
    }
}

/// Checks that `request` is a well-formed WebSocket upgrade request.
///
/// The checks run in order and the first failure wins: HTTP version, `Connection`,
/// `Upgrade`, method, `Sec-WebSocket-Version` and finally `Sec-WebSocket-Key`, whose
/// decoded value is returned. [`WebSocketError::status_code`] gives the status to answer
/// a failure with.
pub fn verify_client_request<B>(request: &Request<B>) -> Result<Vec<u8>> {
    if matches!(request.version(), Version::HTTP_09 | Version::HTTP_10) {
        return Err(WebSocketError::UnsupportedHttpVersion(request.version()));
    }

    let headers = request.headers();
    headers::verify_contains_token(headers, &header::CONNECTION, "upgrade")
        .map_err(|err| WebSocketError::UpgradeRequired(Box::new(err)))?;
    headers::verify_contains_token(headers, &header::UPGRADE, "websocket")
        .map_err(|err| WebSocketError::UpgradeRequired(Box::new(err)))?;

    if request.method() != Method::GET {
        return Err(WebSocketError::MethodNotAllowed(request.method().clone()));
    }

    let version = headers::version(headers)?;
    if version != WEBSOCKET_VERSION {
        return Err(WebSocketError::UnsupportedVersion(version));
    }

    challenge::challenge(headers)
}

/// Accepts a WebSocket handshake from a hyper request.
///
/// On success, returns the `101` response to send and a future that resolves to the
/// connection once hyper has handed over the transport. On failure, the returned
/// [`Rejected`] holds the error response to send instead.
///
/// The request must come from a hyper connection served with upgrades enabled, otherwise
/// the handshake is refused with `501 Not Implemented`.
pub fn accept<B>(
    request: &mut Request<B>,
    options: &AcceptOptions,
) -> std::result::Result<(HttpResponse, UpgradeFut<OnUpgrade>), Rejected> {
    let negotiated = negotiate(request, options).map_err(reject)?;
    let hijacker = request.extensions_mut().remove::<OnUpgrade>();
    finish(negotiated, hijacker, options)
}

/// Like [`accept`], with the hijack capability supplied by the caller.
///
/// `None` means the transport cannot be taken over, and the request is refused with
/// `501 Not Implemented`.
pub fn accept_with<B, H: Hijack>(
    request: &Request<B>,
    hijacker: Option<H>,
    options: &AcceptOptions,
) -> std::result::Result<(HttpResponse, UpgradeFut<H>), Rejected> {
    let negotiated = negotiate(request, options).map_err(reject)?;
    finish(negotiated, hijacker, options)
}

struct Negotiated {
    challenge: Vec<u8>,
    subprotocol: Option<String>,
    compression: Option<CompressionOptions>,
}

fn negotiate<B>(request: &Request<B>, options: &AcceptOptions) -> Result<Negotiated> {
    let challenge = verify_client_request(request)?;

    if !options.insecure_skip_verify {
        origin::authenticate_origin(request.headers(), request_host(request), &options.origin_patterns)
            .inspect_err(|err| {
                if let WebSocketError::BadOriginPattern(_) = err {
                    #[cfg(feature = "logging")]
                    log::warn!("websocket: {err}");
                }
            })?;
    }

    let subprotocol = protocols::select_protocol(request.headers(), &options.subprotocols)
        .map(str::to_owned);

    let offered = extensions::parse_header(request.headers()).unwrap_or_else(|_err| {
        #[cfg(feature = "logging")]
        log::debug!("ignoring malformed extension offer: {_err}");
        Default::default()
    });
    let compression = compression::select_deflate(options.compression_mode, &offered);

    #[cfg(feature = "logging")]
    log::debug!(
        "negotiated subprotocol={:?} compression={:?}",
        subprotocol,
        compression
    );

    Ok(Negotiated {
        challenge,
        subprotocol,
        compression,
    })
}

fn finish<H: Hijack>(
    negotiated: Negotiated,
    hijacker: Option<H>,
    options: &AcceptOptions,
) -> std::result::Result<(HttpResponse, UpgradeFut<H>), Rejected> {
    let hijacker = hijacker.ok_or_else(|| reject(WebSocketError::HijackUnsupported))?;
    let response = switching_protocols(&negotiated).map_err(reject)?;

    let future = UpgradeFut {
        inner: hijacker.hijack(),
        pending: Some(Pending {
            subprotocol: negotiated.subprotocol.unwrap_or_default(),
            compression: negotiated.compression,
            compression_threshold: options.compression_threshold(),
            pool: options.pool.clone(),
        }),
    };

    Ok((response, future))
}

fn switching_protocols(negotiated: &Negotiated) -> Result<HttpResponse> {
    let mut response = Response::new(Full::default());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    challenge::set_accept(headers, &negotiated.challenge)?;
    if let Some(subprotocol) = &negotiated.subprotocol {
        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_str(subprotocol)?,
        );
    }
    if let Some(compression) = &negotiated.compression {
        compression.set_header(headers)?;
    }

    Ok(response)
}

/// The `Host` of the request, falling back to the authority of its URI.
fn request_host<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()))
        .unwrap_or_default()
}

fn reject(error: WebSocketError) -> Rejected {
    let status = error.status_code();

    #[cfg(feature = "logging")]
    log::debug!("rejecting WebSocket handshake with {status}: {error}");

    let message = match &error {
        WebSocketError::BadOriginPattern(_) | WebSocketError::HijackUnsupported => status
            .canonical_reason()
            .unwrap_or_default()
            .to_owned(),
        _ => error.to_string(),
    };

    let mut response = Response::new(Full::new(Bytes::from(format!("{message}\n"))));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    add_hints(headers, &error);

    Rejected { response, error }
}

/// Tells the client what a valid request would have looked like.
fn add_hints(headers: &mut HeaderMap, error: &WebSocketError) {
    match error {
        WebSocketError::UpgradeRequired(_) => {
            headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
            headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        }
        WebSocketError::MethodNotAllowed(_) => {
            headers.insert(header::ALLOW, HeaderValue::from_static("GET"));
        }
        WebSocketError::UnsupportedVersion(_) | WebSocketError::InvalidVersion(_) => {
            headers::set_version(headers, WEBSOCKET_VERSION);
        }
        WebSocketError::MissingHeader(name)
        | WebSocketError::MultipleValues(name)
        | WebSocketError::EmptyHeader(name)
            if *name == header::SEC_WEBSOCKET_VERSION =>
        {
            headers::set_version(headers, WEBSOCKET_VERSION);
        }
        _ => {}
    }
}

struct Pending {
    subprotocol: String,
    compression: Option<CompressionOptions>,
    compression_threshold: usize,
    pool: Option<Arc<BufferPool>>,
}

/// Future resolving to the server side of an accepted connection.
///
/// It completes only after the `101` response returned alongside it has been sent, so it
/// must be polled from a separate task, never before returning the response to hyper.
#[pin_project]
pub struct UpgradeFut<H: Hijack> {
    #[pin]
    inner: H::Future,
    pending: Option<Pending>,
}

impl<H: Hijack> std::fmt::Debug for UpgradeFut<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeFut").finish_non_exhaustive()
    }
}

impl<H: Hijack> Future for UpgradeFut<H> {
    type Output = Result<ConnectionParts<H::Io>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let hijacked = ready!(this.inner.poll(cx)).map_err(WebSocketError::Hijack)?;

        let Some(pending) = this.pending.take() else {
            return Poll::Ready(Err(WebSocketError::Hijack(io::Error::other(
                "upgrade future polled after completion",
            ))));
        };

        let mut read_buf = PooledBuf::acquire_from(pending.pool.as_ref());
        read_buf.extend_from_slice(&hijacked.read_buf);
        let write_buf = PooledBuf::acquire_from(pending.pool.as_ref());

        Poll::Ready(Ok(ConnectionParts {
            subprotocol: pending.subprotocol,
            io: hijacked.io,
            role: Role::Server,
            compression: pending.compression,
            compression_threshold: pending.compression_threshold,
            read_buf,
            write_buf,
        }))
    }
}
