//! Per-connection state machine
//!
//! Each accepted socket is owned by one task that walks the connection
//! through its lifecycle: accumulate bytes until the upgrade request is
//! complete, answer with the 101 response, then decode frames out of the
//! retained inbound buffer until the peer goes away. A paired writer task
//! drains an unbounded channel of pre-encoded frames, so a slow peer never
//! blocks anyone else's broadcast.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{debug, info, trace, warn};

use crate::Config;
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameParser, OpCode, encode_frame};
use crate::handshake;
use crate::message::{ClientMessage, ServerEvent};
use crate::registry::ConnectionId;
use crate::router::Router;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accumulating the HTTP upgrade request
    Handshaking,
    /// Upgraded, registered, not yet authenticated
    Established,
    /// Identity attached after a successful `auth`
    Authenticated,
    /// Socket closed; further close signals are ignored
    Closed,
}

/// One connection's state machine and buffers
///
/// Owned exclusively by its task; the registry only holds the outbound
/// channel, keyed by `id`.
pub struct Connection {
    id: ConnectionId,
    state: ConnState,
    /// Bytes received but not yet forming a complete request or frame
    inbound: BytesMut,
    parser: FrameParser,
    outbound: UnboundedSender<Bytes>,
    router: Arc<Router>,
    idle_timeout: u32,
}

impl Connection {
    /// Drive a freshly accepted socket until it closes
    ///
    /// Spawns the writer task internally and deregisters on the way out,
    /// broadcasting `user_left` if the connection had authenticated.
    pub async fn run<S>(stream: S, config: &Config, router: Arc<Router>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = ConnectionId::next();
        let (read_half, mut write_half) = tokio::io::split(stream);
        // Frames queue without bound while a peer stalls; the queue lives
        // only as long as the connection and broadcasters never wait on a
        // slow reader.
        let (tx, mut rx) = unbounded_channel::<Bytes>();

        let writer = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let mut conn = Connection {
            id,
            state: ConnState::Handshaking,
            inbound: BytesMut::with_capacity(4096),
            parser: FrameParser::new(config.max_frame_size),
            outbound: tx,
            router,
            idle_timeout: config.idle_timeout,
        };

        if let Err(e) = conn.read_loop(read_half).await {
            if e.is_disconnect() {
                debug!(conn = %id, "peer disconnected");
            } else {
                warn!(conn = %id, error = %e, "closing connection");
            }
        }
        conn.close();

        // Dropping the sender ends the writer once queued frames flush.
        drop(conn);
        let _ = writer.await;
    }

    async fn read_loop<R>(&mut self, mut read_half: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let n = self.read_more(&mut read_half).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }

            if self.state == ConnState::Handshaking && !self.try_handshake()? {
                continue;
            }

            // Drain every complete frame the buffer holds; a partial tail
            // stays for the next read.
            while let Some(frame) = self.parser.parse(&mut self.inbound)? {
                if !self.dispatch_frame(frame).await {
                    return Ok(());
                }
            }
        }
    }

    async fn read_more<R>(&mut self, read_half: &mut R) -> Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        if self.idle_timeout == 0 {
            return Ok(read_half.read_buf(&mut self.inbound).await?);
        }
        let window = Duration::from_secs(self.idle_timeout as u64);
        match tokio::time::timeout(window, read_half.read_buf(&mut self.inbound)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                debug!(conn = %self.id, "idle timeout");
                Err(Error::ConnectionClosed)
            }
        }
    }

    /// Attempt the upgrade; true once frame data may follow
    ///
    /// On reject the socket closes without a response.
    fn try_handshake(&mut self) -> Result<bool> {
        let Some((request, consumed)) = handshake::parse_request(&self.inbound)? else {
            return Ok(false);
        };

        let accept_key = handshake::generate_accept_key(request.key);
        trace!(conn = %self.id, path = request.path, "upgrade accepted");

        self.inbound.advance(consumed);
        self.send_raw(handshake::build_response(&accept_key));

        let registry = self.router.registry();
        registry.register(self.id, self.outbound.clone());
        registry.send_to(self.id, &ServerEvent::connected());

        self.state = ConnState::Established;
        info!(conn = %self.id, "websocket established");
        Ok(true)
    }

    /// Handle one decoded frame; false ends the connection
    async fn dispatch_frame(&mut self, frame: Frame) -> bool {
        match frame.opcode {
            OpCode::Text => {
                // Malformed JSON is tolerated, not reported.
                if let Some(msg) = ClientMessage::decode(&frame.payload) {
                    self.router.handle(self.id, msg).await;
                    if self.state == ConnState::Established
                        && self.router.registry().identity_of(self.id).is_some()
                    {
                        self.state = ConnState::Authenticated;
                    }
                } else {
                    trace!(conn = %self.id, "ignoring undecodable text payload");
                }
                true
            }
            OpCode::Close => {
                debug!(conn = %self.id, "close frame received");
                false
            }
            OpCode::Ping => {
                let mut buf = BytesMut::new();
                encode_frame(&mut buf, OpCode::Pong, &frame.payload);
                self.send_raw(buf.freeze());
                true
            }
            // Pong, Binary, and stray continuations are ignored
            _ => true,
        }
    }

    fn send_raw(&self, bytes: Bytes) {
        // The writer task going away means teardown is already underway.
        let _ = self.outbound.send(bytes);
    }

    /// Deregister and announce departure; idempotent
    fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;

        let registry = self.router.registry();
        if let Some(identity) = registry.deregister(self.id) {
            info!(conn = %self.id, user = %identity.name, "user left");
            registry.broadcast(&ServerEvent::user_left(identity), Some(self.id));
        }
    }
}
