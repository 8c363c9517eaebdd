//! Client side of the opening handshake.
//!
//! [`Dialer::dial`] connects to a `ws`, `wss`, `http` or `https` URL, sends the upgrade
//! request over HTTP/1.1 and checks the server's answer before handing the raw stream over.

use std::{
    cmp,
    future::{poll_fn, Future},
    pin::{pin, Pin},
    sync::Arc,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures::{future::FusedFuture, FutureExt};
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use rand::rngs::OsRng;
use thiserror::Error;
use url::Url;

use crate::{
    challenge::{self, Challenge},
    compression::{self, CompressionOptions},
    conn::{ConnectionParts, Role},
    connector::{Connector, TcpConnector},
    headers::{self, WEBSOCKET_VERSION},
    options::DialOptions,
    pool::{BufferPool, PooledBuf},
    protocols, Result, WebSocketError,
};

/// At most this much of a failed handshake response body is kept for the caller.
pub const MAX_ERROR_BODY: usize = 1024;

/// How long reading that body may take.
pub const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(3);

/// A failed dial.
///
/// When the server did answer, `response` holds its status, headers and the first
/// [`MAX_ERROR_BODY`] bytes of its body, to help diagnose the failure.
#[derive(Debug, Error)]
#[error("failed to WebSocket dial: {source}")]
pub struct DialError {
    #[source]
    pub source: WebSocketError,
    pub response: Option<Response<Bytes>>,
}

impl From<WebSocketError> for DialError {
    fn from(source: WebSocketError) -> Self {
        Self {
            source,
            response: None,
        }
    }
}

/// What the server agreed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Empty when the server picked no subprotocol.
    pub subprotocol: String,
    pub compression: Option<CompressionOptions>,
}

/// Opens WebSocket connections through a [`Connector`].
///
/// ```no_run
/// use yawc_handshake::{DialOptions, Dialer};
///
/// # async fn run() -> Result<(), yawc_handshake::DialError> {
/// let dialer = Dialer::new();
/// let (parts, _response) = dialer
///     .dial("ws://localhost:9001/".parse().unwrap(), &DialOptions::default())
///     .await?;
/// # let _ = parts;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Dialer<C = TcpConnector> {
    connector: C,
    pool: Option<Arc<BufferPool>>,
}

impl Dialer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Connector> Dialer<C> {
    /// Replaces the transport used to reach servers.
    pub fn with_connector<D: Connector>(self, connector: D) -> Dialer<D> {
        Dialer {
            connector,
            pool: self.pool,
        }
    }

    /// Takes connection buffers from `pool` instead of allocating them.
    pub fn with_pool(self, pool: Arc<BufferPool>) -> Self {
        Self {
            pool: Some(pool),
            ..self
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Performs the opening handshake with the server at `url`.
    ///
    /// On success, returns the connection together with the `101` response. Drop the future
    /// to cancel the handshake, or wrap it in [`tokio::time::timeout`] to bound it.
    pub async fn dial(
        &self,
        url: Url,
        options: &DialOptions,
    ) -> std::result::Result<(ConnectionParts<C::Io>, Response<()>), DialError> {
        let challenge = Challenge::generate(&mut OsRng)?;
        self.dial_with_challenge(url, options, challenge).await
    }

    /// Like [`dial`](Self::dial) with a caller provided key.
    pub async fn dial_with_challenge(
        &self,
        url: Url,
        options: &DialOptions,
        challenge: Challenge,
    ) -> std::result::Result<(ConnectionParts<C::Io>, Response<()>), DialError> {
        if let Some(timeout) = self.connector.request_timeout() {
            return Err(WebSocketError::StaticTimeout(timeout).into());
        }

        let url = http_url(url)?;
        let request = build_request(&url, options, &challenge)?;

        #[cfg(feature = "logging")]
        log::debug!("dialing {url}");

        let io = self.connector.connect(&url).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
            .await
            .map_err(WebSocketError::from)?;

        // polled next to every step below, until it gives the stream up to the upgrade
        let conn = conn
            .with_upgrades()
            .map(|result| {
                if let Err(_err) = result {
                    #[cfg(feature = "logging")]
                    log::error!("upgrading connection: {_err:?}");
                }
            })
            .fuse();
        let mut conn = pin!(conn);

        let mut response = drive(conn.as_mut(), sender.send_request(request))
            .await
            .map_err(WebSocketError::from)?;

        let negotiated = match verify_server_response(&response, challenge.as_bytes(), options) {
            Ok(negotiated) => negotiated,
            Err(source) => {
                #[cfg(feature = "logging")]
                log::debug!("handshake with {url} failed: {source}");

                let response = drive(conn.as_mut(), truncated(response)).await;
                return Err(DialError {
                    source,
                    response: Some(response),
                });
            }
        };

        let upgraded = match drive(conn.as_mut(), hyper::upgrade::on(&mut response)).await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                return Err(DialError {
                    source: err.into(),
                    response: Some(response.map(|_| Bytes::new())),
                })
            }
        };
        let Ok(hijacked) = upgraded.downcast::<TokioIo<C::Io>>() else {
            return Err(DialError {
                source: WebSocketError::NotDuplex,
                response: Some(response.map(|_| Bytes::new())),
            });
        };

        #[cfg(feature = "logging")]
        log::debug!(
            "connected to {url} subprotocol={:?} compression={:?}",
            negotiated.subprotocol,
            negotiated.compression
        );

        let mut read_buf = PooledBuf::acquire_from(self.pool.as_ref());
        read_buf.extend_from_slice(&hijacked.read_buf);

        let parts = ConnectionParts {
            subprotocol: negotiated.subprotocol,
            io: hijacked.io.into_inner(),
            role: Role::Client,
            compression: negotiated.compression,
            compression_threshold: options.compression_threshold(),
            read_buf,
            write_buf: PooledBuf::acquire_from(self.pool.as_ref()),
        };

        Ok((parts, response.map(|_| ())))
    }
}

/// Checks the server's answer to our upgrade request.
///
/// `challenge` is the raw key that was sent, `options` the ones the request was built from.
pub fn verify_server_response<B>(
    response: &Response<B>,
    challenge: &[u8],
    options: &DialOptions,
) -> Result<Negotiated> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(WebSocketError::InvalidStatusCode(response.status().as_u16()));
    }

    let headers = response.headers();
    headers::verify_is_token(headers, &header::CONNECTION, "upgrade")?;
    headers::verify_is_token(headers, &header::UPGRADE, "websocket")?;
    challenge::verify_accept(headers, challenge)?;

    let subprotocol = protocols::verify_protocol(headers, &options.subprotocols)?
        .map(str::to_owned)
        .unwrap_or_default();
    let compression = compression::verify_server_extensions(options.compression_offer(), headers)?;

    Ok(Negotiated {
        subprotocol,
        compression,
    })
}

/// Maps WebSocket schemes onto the HTTP ones the request is actually sent with.
fn http_url(mut url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        scheme => return Err(WebSocketError::InvalidHttpScheme(scheme.to_owned())),
    };
    url.set_scheme(scheme)
        .map_err(|_| WebSocketError::InvalidHttpScheme(url.scheme().to_owned()))?;

    if url.host_str().is_none() {
        return Err(WebSocketError::MissingHost);
    }
    Ok(url)
}

fn build_request(
    url: &Url,
    options: &DialOptions,
    challenge: &Challenge,
) -> Result<Request<Empty<Bytes>>> {
    let mut request = Request::builder()
        .method(Method::GET)
        .uri(&url[url::Position::BeforePath..])
        .body(Empty::<Bytes>::new())?;

    let headers = request.headers_mut();
    headers.extend(options.headers.clone());

    // allow the user to set a custom Host header
    if !headers.contains_key(header::HOST) {
        let host = url.host_str().ok_or(WebSocketError::MissingHost)?;
        let value = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        headers.insert(header::HOST, HeaderValue::try_from(value)?);
    }

    headers::set_connection(headers);
    headers::set_upgrade(headers);
    headers::set_version(headers, WEBSOCKET_VERSION);
    challenge::set_challenge(headers, challenge.as_bytes())?;
    if !options.subprotocols.is_empty() {
        protocols::set_protocols(headers, &options.subprotocols)?;
    }
    if let Some(offer) = options.compression_offer() {
        offer.set_header(headers)?;
    }

    Ok(request)
}

/// Polls the HTTP connection `conn` while waiting for `fut`.
///
/// `conn` must be fused: it keeps being polled after it completed.
async fn drive<C, F>(mut conn: Pin<&mut C>, fut: F) -> F::Output
where
    C: Future<Output = ()> + FusedFuture,
    F: Future,
{
    let mut fut = pin!(fut);
    poll_fn(|cx| {
        if !conn.is_terminated() {
            let _ = conn.as_mut().poll(cx);
        }
        fut.as_mut().poll(cx)
    })
    .await
}

/// Keeps the head of `response` and at most [`MAX_ERROR_BODY`] bytes of its body.
async fn truncated(response: Response<Incoming>) -> Response<Bytes> {
    let (parts, mut body) = response.into_parts();
    let mut buf = BytesMut::new();

    let read = async {
        while buf.len() < MAX_ERROR_BODY {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        let take = cmp::min(data.len(), MAX_ERROR_BODY - buf.len());
                        buf.extend_from_slice(&data[..take]);
                    }
                }
                _ => break,
            }
        }
    };
    if tokio::time::timeout(ERROR_BODY_TIMEOUT, read).await.is_err() {
        #[cfg(feature = "logging")]
        log::debug!("gave up reading handshake response body");
    }

    Response::from_parts(parts, buf.freeze())
}
