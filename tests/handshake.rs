use std::{
    convert::Infallible,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream},
    net::TcpListener,
};
use url::Url;
use yawc_handshake::{
    AcceptOptions, BufferPool, CompressionMode, CompressionOptions, ConnectionParts, Connector,
    DialOptions, Dialer, Role, WebSocketError,
};

fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}

/// Upgrades the request, then greets the client and echoes back the 4 bytes it sends.
async fn handle(
    mut request: Request<Incoming>,
    options: Arc<AcceptOptions>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match yawc_handshake::accept(&mut request, &options) {
        Ok((response, upgrade)) => {
            tokio::spawn(async move {
                let Ok(mut parts) = upgrade.await else {
                    return;
                };
                assert_eq!(parts.role, Role::Server);
                // clients that hang up right after the handshake are fine
                let mut buf = [0u8; 4];
                if parts.io.write_all(b"hello").await.is_ok()
                    && parts.io.read_exact(&mut buf).await.is_ok()
                {
                    let _ = parts.io.write_all(&buf).await;
                }
            });
            Ok(response)
        }
        Err(rejected) => Ok(rejected.response),
    }
}

fn serve<S>(io: S, options: Arc<AcceptOptions>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let service = service_fn(move |request| handle(request, Arc::clone(&options)));
        let _ = http1::Builder::new()
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades()
            .await;
    });
}

/// Reads `n` bytes, consuming the bytes buffered during the handshake first.
async fn read_exact<S: AsyncRead + Unpin>(parts: &mut ConnectionParts<S>, n: usize) -> Vec<u8> {
    let buffered = parts.read_buf.len().min(n);
    let mut out = parts.read_buf.split_to(buffered).to_vec();
    let mut rest = vec![0u8; n - buffered];
    parts.io.read_exact(&mut rest).await.expect("read");
    out.extend_from_slice(&rest);
    out
}

/// Hands out in-memory pipes, each served by its own hyper connection.
struct InMemory {
    options: Arc<AcceptOptions>,
}

impl InMemory {
    fn new(options: AcceptOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

impl Connector for InMemory {
    type Io = DuplexStream;

    async fn connect(&self, _url: &Url) -> yawc_handshake::Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(4096);
        serve(server, Arc::clone(&self.options));
        Ok(client)
    }
}

/// Answers the handshake request with canned bytes, then holds the stream open until the
/// client hangs up.
struct Canned {
    response: Vec<u8>,
}

impl Connector for Canned {
    type Io = DuplexStream;

    async fn connect(&self, _url: &Url) -> yawc_handshake::Result<DuplexStream> {
        let (client, mut server) = tokio::io::duplex(16 * 1024);
        let response = self.response.clone();
        tokio::spawn(async move {
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match server.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            if server.write_all(&response).await.is_err() {
                return;
            }
            while matches!(server.read(&mut buf).await, Ok(n) if n > 0) {}
        });
        Ok(client)
    }
}

fn url(s: &str) -> Url {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_dial_accept() -> anyhow::Result<()> {
    init_logger();

    let dialer = Dialer::new().with_connector(InMemory::new(AcceptOptions::default()));
    let (mut parts, response) = dialer
        .dial(url("ws://example.com/chat"), &DialOptions::default())
        .await?;

    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(parts.role, Role::Client);
    assert_eq!(parts.subprotocol(), None);
    assert!(!parts.is_compressed());

    assert_eq!(read_exact(&mut parts, 5).await, b"hello");
    parts.io.write_all(b"ping").await?;
    assert_eq!(read_exact(&mut parts, 4).await, b"ping");
    Ok(())
}

#[tokio::test]
async fn test_subprotocol() -> anyhow::Result<()> {
    let server = AcceptOptions::default().with_subprotocols(["graphql-ws", "chat"]);
    let dialer = Dialer::new().with_connector(InMemory::new(server));

    let options = DialOptions::default().with_subprotocols(["echo", "CHAT"]);
    let (parts, response) = dialer.dial(url("ws://example.com/"), &options).await?;

    assert_eq!(response.headers()[header::SEC_WEBSOCKET_PROTOCOL], "chat");
    // the client keeps its own spelling
    assert_eq!(parts.subprotocol(), Some("CHAT"));
    Ok(())
}

#[tokio::test]
async fn test_compression() -> anyhow::Result<()> {
    let server = AcceptOptions::default().with_compression(CompressionMode::ContextTakeover);
    let dialer = Dialer::new().with_connector(InMemory::new(server));

    let options = DialOptions::default().with_compression(CompressionMode::NoContextTakeover);
    let (parts, _) = dialer.dial(url("wss://example.com/"), &options).await?;

    assert_eq!(
        parts.compression,
        Some(CompressionOptions {
            client_no_context_takeover: true,
            server_no_context_takeover: true,
        })
    );
    assert_eq!(parts.compression_threshold, 512);
    Ok(())
}

#[tokio::test]
async fn test_compression_declined() -> anyhow::Result<()> {
    let dialer = Dialer::new().with_connector(InMemory::new(AcceptOptions::default()));

    let options = DialOptions::default().with_compression(CompressionMode::ContextTakeover);
    let (parts, response) = dialer.dial(url("ws://example.com/"), &options).await?;

    assert!(!response
        .headers()
        .contains_key(header::SEC_WEBSOCKET_EXTENSIONS));
    assert_eq!(parts.compression, None);
    Ok(())
}

#[tokio::test]
async fn test_cross_origin_rejected() {
    let dialer = Dialer::new().with_connector(InMemory::new(AcceptOptions::default()));

    let options =
        DialOptions::default().with_header(header::ORIGIN, HeaderValue::from_static("https://evil.com"));
    let err = dialer
        .dial(url("ws://example.com/"), &options)
        .await
        .err()
        .unwrap();

    assert!(matches!(err.source, WebSocketError::InvalidStatusCode(403)));
    let response = err.response.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    assert!(body.contains("not a valid cross-origin"), "{body}");
}

#[tokio::test]
async fn test_cross_origin_authorized() -> anyhow::Result<()> {
    let server = AcceptOptions::default().with_origin_pattern("*.example.com");
    let dialer = Dialer::new().with_connector(InMemory::new(server));

    let options = DialOptions::default()
        .with_header(header::ORIGIN, HeaderValue::from_static("https://app.example.com"));
    dialer.dial(url("ws://api.example.net/"), &options).await?;
    Ok(())
}

#[tokio::test]
async fn test_error_body_truncated() {
    let mut response = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 5000\r\n\r\n".to_vec();
    response.extend_from_slice(&[b'x'; 5000]);
    let dialer = Dialer::new().with_connector(Canned { response });

    let err = dialer
        .dial(url("ws://example.com/"), &DialOptions::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(err.source, WebSocketError::InvalidStatusCode(400)));
    let response = err.response.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.body().len(), 1024);
    assert!(response.body().iter().all(|b| *b == b'x'));
}

#[tokio::test]
async fn test_error_body_stalled() {
    // promises more than it sends, then goes quiet
    let response = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 100\r\n\r\nabc".to_vec();
    let dialer = Dialer::new().with_connector(Canned { response });

    let start = Instant::now();
    let err = dialer
        .dial(url("ws://example.com/"), &DialOptions::default())
        .await
        .err()
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());
    assert!(matches!(err.source, WebSocketError::InvalidStatusCode(400)));
    assert_eq!(&err.response.unwrap().body()[..], b"abc");
}

#[tokio::test]
async fn test_pooled_buffers() -> anyhow::Result<()> {
    let pool = Arc::new(BufferPool::new(1024));
    let dialer = Dialer::new()
        .with_pool(Arc::clone(&pool))
        .with_connector(InMemory::new(AcceptOptions::default()));

    let (parts, _) = dialer
        .dial(url("ws://example.com/"), &DialOptions::default())
        .await?;
    assert!(parts.read_buf.is_pooled());
    assert_eq!(pool.idle(), 0);

    drop(parts);
    assert_eq!(pool.idle(), 2);
    Ok(())
}

#[tokio::test]
async fn test_http10_upgrade_required() {
    let (mut client, server) = tokio::io::duplex(4096);
    serve(server, Arc::new(AcceptOptions::default()));

    client
        .write_all(
            b"GET / HTTP/1.0\r\n\
              Host: example.com\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              \r\n",
        )
        .await
        .unwrap();

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    while !response.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = client.read(&mut buf).await.unwrap();
        assert_ne!(n, 0, "connection closed before the response head");
        response.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&response).to_ascii_lowercase();
    assert!(head.starts_with("http/1.1 426") || head.starts_with("http/1.0 426"), "{head}");
}

#[tokio::test]
async fn test_dial_over_tcp() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            serve(socket, Arc::new(AcceptOptions::default()));
        }
    });

    let (mut parts, _) = Dialer::new()
        .dial(url(&format!("ws://{addr}/")), &DialOptions::default())
        .await?;
    assert!(!parts.io.is_tls());

    assert_eq!(read_exact(&mut parts, 5).await, b"hello");
    parts.io.write_all(b"pong").await?;
    assert_eq!(read_exact(&mut parts, 4).await, b"pong");
    Ok(())
}

#[tokio::test]
async fn test_invalid_scheme() {
    let err = Dialer::new()
        .dial(url("ftp://example.com/"), &DialOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err.source, WebSocketError::InvalidHttpScheme(_)));
    assert!(err.response.is_none());
}
