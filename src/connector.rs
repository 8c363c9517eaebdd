//! How the dialer reaches a server.
//!
//! [`Dialer`](crate::Dialer) is generic over a [`Connector`] so the transport can be
//! replaced, for instance by a proxy tunnel or an in-memory pipe in tests.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{
    rustls::{self, pki_types::ServerName},
    TlsConnector,
};
use url::Url;

use crate::{stream::MaybeTlsStream, Result, WebSocketError};

/// Opens the byte stream the handshake request is written to.
pub trait Connector: Send + Sync {
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connects to the server designated by `url`, whose scheme is `http` or `https`.
    fn connect(&self, url: &Url) -> impl Future<Output = Result<Self::Io>> + Send;

    /// A timeout this connector applies to every request on its own.
    ///
    /// Dialing with such a connector is refused: a fixed timeout would also bound the
    /// lifetime of the upgraded connection. Bound the dial future instead.
    fn request_timeout(&self) -> Option<Duration> {
        None
    }
}

/// The default [`Connector`]: plain TCP, with TLS for `https` URLs.
///
/// Server certificates are verified against the Mozilla root store bundled by
/// `webpki-roots`.
#[derive(Clone, Default)]
pub struct TcpConnector {
    tls: Option<TlsConnector>,
    tcp_address: Option<SocketAddr>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom TLS configuration, for instance to trust a private CA.
    pub fn with_tls_connector(self, connector: TlsConnector) -> Self {
        Self {
            tls: Some(connector),
            ..self
        }
    }

    /// Connects to `address` instead of resolving the URL's host.
    ///
    /// The host still names the server in the `Host` header and during TLS verification.
    pub fn with_tcp_address(self, address: SocketAddr) -> Self {
        Self {
            tcp_address: Some(address),
            ..self
        }
    }
}

impl Connector for TcpConnector {
    type Io = MaybeTlsStream;

    async fn connect(&self, url: &Url) -> Result<Self::Io> {
        let host = url.host_str().ok_or(WebSocketError::MissingHost)?;

        let tcp_stream = match self.tcp_address {
            Some(address) => TcpStream::connect(address).await?,
            None => {
                let port = url
                    .port_or_known_default()
                    .ok_or_else(|| WebSocketError::InvalidHttpScheme(url.scheme().to_owned()))?;
                TcpStream::connect(format!("{host}:{port}")).await?
            }
        };

        #[cfg(feature = "logging")]
        log::debug!("connected to {:?}", tcp_stream.peer_addr());

        match url.scheme() {
            "http" | "ws" => Ok(MaybeTlsStream::Plain(tcp_stream)),
            "https" | "wss" => {
                let connector = match &self.tls {
                    Some(connector) => connector.clone(),
                    None => tls_connector()?,
                };
                // IPv6 literals come bracketed out of the URL
                let name = host.trim_start_matches('[').trim_end_matches(']').to_owned();
                let domain = ServerName::try_from(name)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))?;

                Ok(MaybeTlsStream::Tls(connector.connect(domain, tcp_stream).await?))
            }
            scheme => Err(WebSocketError::InvalidHttpScheme(scheme.to_owned())),
        }
    }
}

/// Creates a TLS connector trusting the webpki roots, with HTTP/1.1 ALPN.
///
/// Uses the process wide crypto provider if one was installed, [*ring*](https://github.com/briansmith/ring)
/// otherwise.
fn tls_connector() -> io::Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}
