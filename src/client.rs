//! Diagnostic WebSocket client
//!
//! A thin client for manual protocol verification: it performs the upgrade
//! handshake, masks its frames as RFC 6455 requires of the client side, and
//! prints every event the server pushes. The integration tests drive the
//! same machinery.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::{FrameParser, OpCode, encode_frame_masked};
use crate::handshake;

/// A connected, upgraded chat client
pub struct ChatClient {
    stream: TcpStream,
    /// Bytes received but not yet forming a complete frame
    inbound: BytesMut,
    parser: FrameParser,
}

impl ChatClient {
    /// Connect and perform the upgrade handshake
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let mut stream = TcpStream::connect((host, port)).await?;

        let key = handshake::generate_key();
        let request = handshake::build_request(&format!("{}:{}", host, port), "/", &key);
        stream.write_all(&request).await?;

        let mut inbound = BytesMut::with_capacity(4096);
        loop {
            let n = stream.read_buf(&mut inbound).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }

            if let Some((accept, consumed)) = handshake::parse_response(&inbound)? {
                if !handshake::validate_accept_key(&key, &accept) {
                    return Err(Error::HandshakeFailed("invalid Sec-WebSocket-Accept"));
                }
                // Anything past the response is already frame data
                inbound.advance(consumed);
                return Ok(Self {
                    stream,
                    inbound,
                    parser: FrameParser::new(16 * 1024 * 1024),
                });
            }
        }
    }

    /// Send a JSON payload as a masked Text frame
    pub async fn send_json(&mut self, payload: &serde_json::Value) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_frame_masked(&mut buf, OpCode::Text, payload.to_string().as_bytes());
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    /// Authenticate with a bearer token
    pub async fn authenticate(&mut self, token: &str) -> Result<()> {
        self.send_json(&json!({"type": "auth", "token": token})).await
    }

    /// Send a chat message
    pub async fn send_message(&mut self, text: &str) -> Result<()> {
        self.send_json(&json!({"type": "message", "message": text}))
            .await
    }

    /// Wait for the next server event
    ///
    /// Replies to frame-level pings transparently; returns
    /// `Err(ConnectionClosed)` once the server sends a Close frame or the
    /// socket ends.
    pub async fn next_event(&mut self) -> Result<serde_json::Value> {
        loop {
            while let Some(frame) = self.parser.parse(&mut self.inbound)? {
                match frame.opcode {
                    OpCode::Text => {
                        match serde_json::from_slice(&frame.payload) {
                            Ok(event) => return Ok(event),
                            // Skip anything that is not a JSON event
                            Err(_) => debug!("skipping non-JSON text frame"),
                        }
                    }
                    OpCode::Close => return Err(Error::ConnectionClosed),
                    OpCode::Ping => {
                        let mut buf = BytesMut::new();
                        encode_frame_masked(&mut buf, OpCode::Pong, &frame.payload);
                        self.stream.write_all(&buf).await?;
                    }
                    _ => {}
                }
            }

            let n = self.stream.read_buf(&mut self.inbound).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Send a Close frame and shut the socket down
    pub async fn close(&mut self) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_frame_masked(&mut buf, OpCode::Close, b"");
        self.stream.write_all(&buf).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Connect, authenticate, send one test message, and print every event
/// received within the run window
pub async fn run_diagnostic(host: &str, port: u16, token: &str) -> Result<()> {
    println!("Connecting to {}:{}...", host, port);
    let mut client = ChatClient::connect(host, port).await?;
    println!("Handshake successful");

    client.authenticate(token).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, client.next_event()).await {
            Ok(Ok(event)) => {
                println!(
                    "Received: {}",
                    serde_json::to_string_pretty(&event).unwrap_or_default()
                );
                if event["type"] == "auth_success" {
                    println!("Sending test message...");
                    client
                        .send_message("Hello from chatsock diagnostic client!")
                        .await?;
                }
            }
            Ok(Err(e)) if e.is_disconnect() => break,
            Ok(Err(e)) => return Err(e),
            Err(_) => break,
        }
    }

    println!("Closing connection");
    client.close().await?;
    Ok(())
}
