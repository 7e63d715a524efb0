//! WebSocket upgrade handshake
//!
//! Parses the HTTP upgrade request out of a connection's accumulated bytes
//! and produces the `101 Switching Protocols` response. Bytes following the
//! header terminator belong to the first frames and are left for the frame
//! parser; the caller re-feeds them, never discards them.

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::WS_GUID;
use crate::error::{Error, Result};

/// Maximum HTTP header size (8KB should be enough for any reasonable request)
const MAX_HEADER_SIZE: usize = 8192;

/// A parsed WebSocket upgrade request (server side)
#[derive(Debug)]
pub struct UpgradeRequest<'a> {
    /// The request path
    pub path: &'a str,
    /// The Sec-WebSocket-Key header
    pub key: &'a str,
}

/// Try to parse a WebSocket upgrade request from accumulated bytes
///
/// Returns:
/// - `Ok(Some((request, consumed)))` once the header-terminating blank line
///   has arrived; `consumed` marks where frame data begins
/// - `Ok(None)` while the request is still incomplete
/// - `Err(e)` when the request can never become a WebSocket upgrade; the
///   caller closes the socket without a response
pub fn parse_request(buf: &[u8]) -> Result<Option<(UpgradeRequest<'_>, usize)>> {
    if buf.len() > MAX_HEADER_SIZE {
        return Err(Error::InvalidHttp("request too large"));
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let mut key = None;
            let mut upgrade = false;

            for header in req.headers.iter() {
                let name = header.name.to_ascii_lowercase();
                let value = std::str::from_utf8(header.value)
                    .map_err(|_| Error::InvalidHttp("invalid header value"))?;

                match name.as_str() {
                    "sec-websocket-key" => key = Some(value.trim()),
                    "upgrade" => {
                        if value.trim().eq_ignore_ascii_case("websocket") {
                            upgrade = true;
                        }
                    }
                    _ => {}
                }
            }

            if !upgrade {
                return Err(Error::HandshakeFailed("missing Upgrade: websocket"));
            }
            let key = key.ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Key"))?;

            let path = req.path.unwrap_or("/");

            Ok(Some((UpgradeRequest { path, key }, len)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(_) => Err(Error::InvalidHttp("failed to parse HTTP request")),
    }
}

/// Generate the Sec-WebSocket-Accept key
///
/// Computes `Base64(SHA-1(key + GUID))` with the GUID mandated by RFC 6455.
#[inline]
pub fn generate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Build the `101 Switching Protocols` upgrade response
pub fn build_response(accept_key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(160);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.freeze()
}

/// Build a WebSocket upgrade request (client side)
pub fn build_request(host: &str, path: &str, key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    buf.put_slice(b"GET ");
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    buf.put_slice(b"Host: ");
    buf.put_slice(host.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Key: ");
    buf.put_slice(key.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Sec-WebSocket-Version: 13\r\n\r\n");
    buf.freeze()
}

/// Generate a random 16-byte WebSocket key (client side)
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    for byte in &mut bytes {
        *byte = fastrand::u8(..);
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Parse a WebSocket upgrade response (client side)
///
/// Returns the accept key and the number of bytes consumed; any remainder
/// is the start of frame data.
pub fn parse_response(buf: &[u8]) -> Result<Option<(String, usize)>> {
    if buf.len() > MAX_HEADER_SIZE {
        return Err(Error::InvalidHttp("response too large"));
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut res = httparse::Response::new(&mut headers);

    match res.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            if res.code != Some(101) {
                return Err(Error::HandshakeFailed("expected 101 Switching Protocols"));
            }

            let mut accept = None;
            for header in res.headers.iter() {
                if header.name.eq_ignore_ascii_case("sec-websocket-accept") {
                    let value = std::str::from_utf8(header.value)
                        .map_err(|_| Error::InvalidHttp("invalid header value"))?;
                    accept = Some(value.trim().to_string());
                }
            }

            let accept = accept.ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Accept"))?;
            Ok(Some((accept, len)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(_) => Err(Error::InvalidHttp("failed to parse HTTP response")),
    }
}

/// Validate the server's accept key against the key the client sent
pub fn validate_accept_key(sent_key: &str, received_accept: &str) -> bool {
    generate_accept_key(sent_key) == received_accept
}
