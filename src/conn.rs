//! What a completed handshake hands over to the frame layer.

use std::fmt;

use crate::compression::CompressionOptions;
use crate::pool::PooledBuf;

/// The side of the connection this endpoint plays.
///
/// Clients mask the frames they send, servers do not.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn is_client(self) -> bool {
        self == Self::Client
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Everything negotiated during the opening handshake, together with the raw stream.
///
/// The holder owns `io` exclusively and is responsible for closing it. `read_buf` may
/// already contain bytes the peer sent right after the handshake; they must be consumed
/// before reading from `io`.
#[derive(Debug)]
pub struct ConnectionParts<S> {
    /// Negotiated subprotocol, empty if none was agreed on.
    pub subprotocol: String,
    /// The upgraded duplex stream.
    pub io: S,
    pub role: Role,
    /// Negotiated permessage-deflate parameters, `None` if compression is off.
    pub compression: Option<CompressionOptions>,
    /// Messages smaller than this are sent uncompressed.
    pub compression_threshold: usize,
    pub read_buf: PooledBuf,
    pub write_buf: PooledBuf,
}

impl<S> ConnectionParts<S> {
    /// Returns the negotiated subprotocol, if any.
    pub fn subprotocol(&self) -> Option<&str> {
        (!self.subprotocol.is_empty()).then_some(self.subprotocol.as_str())
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    /// Replaces the stream, keeping the negotiated state and buffers.
    pub fn map_io<T>(self, f: impl FnOnce(S) -> T) -> ConnectionParts<T> {
        ConnectionParts {
            subprotocol: self.subprotocol,
            io: f(self.io),
            role: self.role,
            compression: self.compression,
            compression_threshold: self.compression_threshold,
            read_buf: self.read_buf,
            write_buf: self.write_buf,
        }
    }
}
