//! The `Sec-WebSocket-Key` challenge and its `Sec-WebSocket-Accept` proof.

use base64::prelude::*;
use http::{header, HeaderMap, HeaderValue};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::headers::get_one;
use crate::{Result, WebSocketError};

/// GUID appended to the encoded key before hashing, fixed by RFC 6455.
const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Random nonce sent by the client in `Sec-WebSocket-Key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge([u8; 16]);

impl Challenge {
    /// Fills a new challenge from `rng`.
    ///
    /// The source must provide all 16 bytes; a short or failed read is an error.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut bytes = [0u8; 16];
        rng.try_fill_bytes(&mut bytes)
            .map_err(WebSocketError::Random)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The accept value a server must answer this challenge with.
    pub fn accept(&self) -> String {
        hash(&self.0)
    }
}

impl From<[u8; 16]> for Challenge {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

/// Computes `base64(SHA1(base64(challenge) ++ GUID))`.
pub fn hash(challenge: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(BASE64_STANDARD.encode(challenge).as_bytes());
    sha1.update(ACCEPT_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Sets `Sec-WebSocket-Key` to the base64 encoding of `challenge`.
pub fn set_challenge(headers: &mut HeaderMap, challenge: &[u8]) -> Result<()> {
    let value = HeaderValue::try_from(BASE64_STANDARD.encode(challenge))?;
    headers.insert(header::SEC_WEBSOCKET_KEY, value);
    Ok(())
}

/// Reads and decodes `Sec-WebSocket-Key`.
///
/// The header must appear exactly once, be non-empty and be valid base64.
pub fn challenge(headers: &HeaderMap) -> Result<Vec<u8>> {
    let value = get_one(headers, &header::SEC_WEBSOCKET_KEY)?;
    BASE64_STANDARD
        .decode(value)
        .map_err(|source| WebSocketError::InvalidKey {
            value: value.to_owned(),
            source,
        })
}

/// Sets `Sec-WebSocket-Accept` to the hash of `challenge`.
pub fn set_accept(headers: &mut HeaderMap, challenge: &[u8]) -> Result<()> {
    let value = HeaderValue::try_from(hash(challenge))?;
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    Ok(())
}

/// Checks that `Sec-WebSocket-Accept` appears once and equals the hash of `challenge`.
///
/// The comparison is byte for byte since base64 is case-sensitive.
pub fn verify_accept(headers: &HeaderMap, challenge: &[u8]) -> Result<()> {
    let value = get_one(headers, &header::SEC_WEBSOCKET_ACCEPT)?;
    let expected = hash(challenge);
    if value != expected {
        return Err(WebSocketError::ProtocolViolation(format!(
            "invalid Sec-WebSocket-Accept header: hash {value:?} does not match key {:?}",
            BASE64_STANDARD.encode(challenge)
        )));
    }
    Ok(())
}
