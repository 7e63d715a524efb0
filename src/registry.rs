//! Client registry and broadcaster
//!
//! The registry is the only state shared across connection tasks: an
//! insertion-ordered table of live connections, keyed by id, each holding
//! the outbound channel of its writer task. All mutation and all broadcast
//! iteration happen under one mutex, so a broadcast can never write to a
//! half-removed connection.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::auth::Identity;
use crate::frame::{OpCode, encode_frame};
use crate::message::ServerEvent;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection
///
/// Allocated once per accepted socket and stable for the connection's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next process-unique id
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    id: ConnectionId,
    sender: UnboundedSender<Bytes>,
    identity: Option<Identity>,
    authenticated: bool,
}

/// The authoritative set of live, possibly-authenticated connections
///
/// Entries are added on handshake completion, updated on auth success, and
/// removed on disconnect. `authenticated == true` always implies a present
/// identity.
#[derive(Default)]
pub struct Registry {
    // Vec keeps strict insertion order for broadcast delivery
    entries: Mutex<Vec<Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly upgraded, unauthenticated connection
    pub fn register(&self, id: ConnectionId, sender: UnboundedSender<Bytes>) {
        self.entries.lock().push(Entry {
            id,
            sender,
            identity: None,
            authenticated: false,
        });
    }

    /// Attach an identity and mark the entry authenticated
    ///
    /// Returns false if the connection is no longer registered.
    pub fn mark_authenticated(&self, id: ConnectionId, identity: Identity) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.identity = Some(identity);
                entry.authenticated = true;
                true
            }
            None => false,
        }
    }

    /// Remove a connection
    ///
    /// Returns the identity if the connection had been authenticated, so
    /// the caller can announce `user_left`. Idempotent.
    pub fn deregister(&self, id: ConnectionId) -> Option<Identity> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|e| e.id == id)?;
        let entry = entries.remove(index);
        if entry.authenticated { entry.identity } else { None }
    }

    /// The sender's identity, if authenticated
    pub fn identity_of(&self, id: ConnectionId) -> Option<Identity> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|e| e.id == id && e.authenticated)
            .and_then(|e| e.identity.clone())
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Fan an event out to every authenticated connection
    ///
    /// The event is encoded once and the identical byte sequence goes to
    /// each authenticated entry in insertion order, skipping `exclude`.
    /// Returns the number of connections written to.
    pub fn broadcast(&self, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        let bytes = encode_event(event);
        let entries = self.entries.lock();
        let mut count = 0;
        for entry in entries.iter() {
            if entry.authenticated && Some(entry.id) != exclude {
                // A closed receiver just means the connection is tearing
                // down; its own task deregisters it.
                if entry.sender.send(bytes.clone()).is_ok() {
                    count += 1;
                }
            }
        }
        count
    }

    /// Send an event to a single connection regardless of auth state
    ///
    /// Used for the handshake welcome and for auth/error replies.
    pub fn send_to(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        let bytes = encode_event(event);
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.sender.send(bytes).is_ok())
            .unwrap_or(false)
    }
}

fn encode_event(event: &ServerEvent) -> Bytes {
    let payload = event.to_json();
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, OpCode::Text, &payload);
    buf.freeze()
}
