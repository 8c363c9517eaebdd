//! Handshake configuration for both sides.

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::compression::{CompressionMode, CompressionOptions};
use crate::pool::BufferPool;

/// Configuration for dialing a WebSocket server.
///
/// Built with consuming `with_*` methods:
///
/// ```
/// use yawc_handshake::{CompressionMode, DialOptions};
///
/// let options = DialOptions::default()
///     .with_subprotocol("chat")
///     .with_compression(CompressionMode::NoContextTakeover);
///
/// assert_eq!(options.compression_threshold(), 512);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Extra headers sent with the handshake request.
    ///
    /// The upgrade headers themselves are always set by the dialer and override anything
    /// configured here. A `Host` header, if present, replaces the one derived from the URL.
    pub headers: HeaderMap,

    /// Subprotocols to offer, in order of preference.
    pub subprotocols: Vec<String>,

    /// Whether to offer permessage-deflate. Default: [`CompressionMode::Disabled`].
    pub compression_mode: CompressionMode,

    /// Minimum message size before compression is applied.
    ///
    /// Defaults to [`CompressionMode::default_threshold`].
    pub compression_threshold: Option<usize>,
}

impl DialOptions {
    /// Appends a header to the handshake request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces all extra request headers.
    pub fn with_headers(self, headers: HeaderMap) -> Self {
        Self { headers, ..self }
    }

    /// Offers one more subprotocol, after those already configured.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocols.push(subprotocol.into());
        self
    }

    /// Replaces the list of offered subprotocols.
    pub fn with_subprotocols<I, S>(self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subprotocols: subprotocols.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_compression(self, compression_mode: CompressionMode) -> Self {
        Self {
            compression_mode,
            ..self
        }
    }

    pub fn with_compression_threshold(self, threshold: usize) -> Self {
        Self {
            compression_threshold: Some(threshold),
            ..self
        }
    }

    /// The effective compression threshold.
    pub fn compression_threshold(&self) -> usize {
        self.compression_threshold
            .unwrap_or_else(|| self.compression_mode.default_threshold())
    }

    /// The permessage-deflate offer to send, if compression is enabled.
    pub fn compression_offer(&self) -> Option<CompressionOptions> {
        self.compression_mode
            .is_enabled()
            .then(|| self.compression_mode.options())
    }
}

/// Configuration for accepting WebSocket handshakes.
///
/// Cross-origin requests are rejected unless their origin matches one of
/// [`origin_patterns`](Self::origin_patterns) or verification is turned off.
///
/// ```
/// use std::sync::Arc;
/// use yawc_handshake::{AcceptOptions, BufferPool, CompressionMode};
///
/// let options = AcceptOptions::default()
///     .with_subprotocols(["chat", "echo"])
///     .with_origin_pattern("*.example.com")
///     .with_compression(CompressionMode::ContextTakeover)
///     .with_pool(Arc::new(BufferPool::default()));
///
/// assert_eq!(options.compression_threshold(), 128);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AcceptOptions {
    /// Subprotocols the server speaks, highest priority first.
    ///
    /// Accepting without a subprotocol is always allowed. Close the connection afterwards if
    /// that is not acceptable.
    pub subprotocols: Vec<String>,

    /// Disables origin verification entirely.
    ///
    /// Prefer [`origin_patterns`](Self::origin_patterns), this opens the server to
    /// cross-site WebSocket hijacking.
    pub insecure_skip_verify: bool,

    /// Host patterns of authorized cross origins, matched case-insensitively.
    ///
    /// `*` matches any run of characters, `?` a single character and `[a-z]` a class, as in
    /// shell globs. The request's own host is always authorized.
    pub origin_patterns: Vec<String>,

    /// Whether to accept permessage-deflate offers. Default: [`CompressionMode::Disabled`].
    pub compression_mode: CompressionMode,

    /// Minimum message size before compression is applied.
    ///
    /// Defaults to [`CompressionMode::default_threshold`].
    pub compression_threshold: Option<usize>,

    /// Pool the connection buffers are taken from. Fresh buffers are allocated without one.
    pub pool: Option<Arc<BufferPool>>,
}

impl AcceptOptions {
    /// Replaces the list of supported subprotocols.
    pub fn with_subprotocols<I, S>(self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subprotocols: subprotocols.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Accepts requests from any origin. See [`insecure_skip_verify`](Self::insecure_skip_verify).
    pub fn insecure_skip_verify(self) -> Self {
        Self {
            insecure_skip_verify: true,
            ..self
        }
    }

    /// Authorizes one more origin host pattern.
    pub fn with_origin_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.origin_patterns.push(pattern.into());
        self
    }

    pub fn with_compression(self, compression_mode: CompressionMode) -> Self {
        Self {
            compression_mode,
            ..self
        }
    }

    pub fn with_compression_threshold(self, threshold: usize) -> Self {
        Self {
            compression_threshold: Some(threshold),
            ..self
        }
    }

    pub fn with_pool(self, pool: Arc<BufferPool>) -> Self {
        Self {
            pool: Some(pool),
            ..self
        }
    }

    /// The effective compression threshold.
    pub fn compression_threshold(&self) -> usize {
        self.compression_threshold
            .unwrap_or_else(|| self.compression_mode.default_threshold())
    }
}
