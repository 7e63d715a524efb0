//! Application message dispatch
//!
//! Routes decoded client messages to the registry and the auth/persistence
//! adapters. Everything recoverable is answered with an `auth_error` or
//! `error` event on the sender's connection; the socket never closes here.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::TokenValidator;
use crate::message::{ClientMessage, ServerEvent};
use crate::registry::{ConnectionId, Registry};
use crate::store::MessageStore;

/// Dispatches decoded application messages
pub struct Router {
    registry: Arc<Registry>,
    auth: Arc<dyn TokenValidator>,
    store: Arc<dyn MessageStore>,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        auth: Arc<dyn TokenValidator>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            auth,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one decoded message from connection `id`
    pub async fn handle(&self, id: ConnectionId, msg: ClientMessage) {
        match msg {
            ClientMessage::Auth { token } => self.handle_auth(id, token).await,
            ClientMessage::Message { message } => self.handle_message(id, message).await,
            ClientMessage::Typing { is_typing } => self.handle_typing(id, is_typing),
            ClientMessage::Ping => {
                self.registry.send_to(id, &ServerEvent::Pong);
            }
            ClientMessage::Unknown => {
                debug!(conn = %id, "ignoring unknown message type");
            }
        }
    }

    async fn handle_auth(&self, id: ConnectionId, token: Option<String>) {
        let Some(token) = token else {
            self.registry
                .send_to(id, &ServerEvent::auth_error("Token required"));
            return;
        };

        let Some(identity) = self.auth.validate(&token).await else {
            debug!(conn = %id, "token rejected");
            self.registry
                .send_to(id, &ServerEvent::auth_error("Invalid token"));
            return;
        };

        if !self.registry.mark_authenticated(id, identity.clone()) {
            // The connection dropped while the token was being validated.
            return;
        }

        info!(conn = %id, user = %identity.name, "authenticated");
        self.registry
            .send_to(id, &ServerEvent::auth_success(identity.clone()));
        self.registry
            .broadcast(&ServerEvent::user_joined(identity), Some(id));
    }

    async fn handle_message(&self, id: ConnectionId, text: Option<String>) {
        let Some(user) = self.registry.identity_of(id) else {
            self.registry
                .send_to(id, &ServerEvent::error("Not authenticated"));
            return;
        };

        // A `message` without its text field is treated like any other
        // malformed payload.
        let Some(text) = text else {
            debug!(conn = %id, "message event without text");
            return;
        };

        // Persist first: a message that was not durably saved is never
        // broadcast.
        match self.store.save(&user, &text).await {
            Ok(record) => {
                debug!(conn = %id, user = %user.name, message_id = record.id, "message saved");
                self.registry.broadcast(&ServerEvent::message(record), None);
            }
            Err(e) => {
                warn!(conn = %id, error = %e, "failed to persist message");
                self.registry
                    .send_to(id, &ServerEvent::error("Failed to save message"));
            }
        }
    }

    fn handle_typing(&self, id: ConnectionId, is_typing: bool) {
        // Unauthenticated typing indicators are dropped silently.
        let Some(user) = self.registry.identity_of(id) else {
            return;
        };
        self.registry
            .broadcast(&ServerEvent::typing(&user, is_typing), Some(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, StaticTokens};
    use crate::frame::FrameParser;
    use crate::store::{FailingStore, MemoryStore};
    use bytes::{Bytes, BytesMut};
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    struct Fixture {
        router: Router,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let auth = StaticTokens::new()
            .with_token(
                "T",
                Identity {
                    id: 1,
                    name: "Alice".to_string(),
                },
            )
            .with_token(
                "U",
                Identity {
                    id: 2,
                    name: "Bob".to_string(),
                },
            );
        let store = Arc::new(MemoryStore::new());
        let router = Router::new(
            Arc::new(Registry::new()),
            Arc::new(auth),
            store.clone() as Arc<dyn MessageStore>,
        );
        Fixture { router, store }
    }

    fn join(router: &Router) -> (ConnectionId, UnboundedReceiver<Bytes>) {
        let (tx, rx) = unbounded_channel();
        let id = ConnectionId::next();
        router.registry().register(id, tx);
        (id, rx)
    }

    fn recv_event(rx: &mut UnboundedReceiver<Bytes>) -> serde_json::Value {
        let bytes = rx.try_recv().expect("expected an event");
        let mut buf = BytesMut::from(&bytes[..]);
        let frame = FrameParser::new(1024 * 1024).parse(&mut buf).unwrap().unwrap();
        serde_json::from_slice(&frame.payload).unwrap()
    }

    async fn authenticate(
        router: &Router,
        id: ConnectionId,
        rx: &mut UnboundedReceiver<Bytes>,
        token: &str,
    ) {
        router
            .handle(
                id,
                ClientMessage::Auth {
                    token: Some(token.to_string()),
                },
            )
            .await;
        let event = recv_event(rx);
        assert_eq!(event["type"], "auth_success");
    }

    #[tokio::test]
    async fn test_auth_missing_token() {
        let f = fixture();
        let (id, mut rx) = join(&f.router);

        f.router.handle(id, ClientMessage::Auth { token: None }).await;
        let event = recv_event(&mut rx);
        assert_eq!(event["type"], "auth_error");
        assert_eq!(event["message"], "Token required");
    }

    #[tokio::test]
    async fn test_auth_invalid_token_keeps_connection_open() {
        let f = fixture();
        let (id, mut rx) = join(&f.router);

        f.router
            .handle(
                id,
                ClientMessage::Auth {
                    token: Some("bogus".to_string()),
                },
            )
            .await;
        let event = recv_event(&mut rx);
        assert_eq!(event["type"], "auth_error");
        assert_eq!(event["message"], "Invalid token");
        assert_eq!(f.router.registry().len(), 1);

        // Retry with a valid token succeeds on the same connection
        authenticate(&f.router, id, &mut rx, "T").await;
    }

    #[tokio::test]
    async fn test_auth_success_notifies_others() {
        let f = fixture();
        let (alice, mut rx_alice) = join(&f.router);
        let (bob, mut rx_bob) = join(&f.router);
        authenticate(&f.router, bob, &mut rx_bob, "U").await;

        authenticate(&f.router, alice, &mut rx_alice, "T").await;

        let joined = recv_event(&mut rx_bob);
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["user"]["id"], 1);
        assert_eq!(joined["user"]["name"], "Alice");
        // The joining connection does not see its own user_joined
        assert!(rx_alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_message_requires_auth_and_persists_nothing() {
        let f = fixture();
        let (id, mut rx) = join(&f.router);

        f.router
            .handle(
                id,
                ClientMessage::Message {
                    message: Some("hi".to_string()),
                },
            )
            .await;

        let event = recv_event(&mut rx);
        assert_eq!(event["type"], "error");
        assert_eq!(event["message"], "Not authenticated");
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_message_broadcasts_stored_record_to_all_including_sender() {
        let f = fixture();
        let (alice, mut rx_alice) = join(&f.router);
        let (bob, mut rx_bob) = join(&f.router);
        authenticate(&f.router, alice, &mut rx_alice, "T").await;
        authenticate(&f.router, bob, &mut rx_bob, "U").await;
        let _ = rx_alice.try_recv(); // drain Bob's user_joined

        f.router
            .handle(
                alice,
                ClientMessage::Message {
                    message: Some("Hello".to_string()),
                },
            )
            .await;

        for rx in [&mut rx_alice, &mut rx_bob] {
            let event = recv_event(rx);
            assert_eq!(event["type"], "message");
            assert_eq!(event["message"]["message"], "Hello");
            assert_eq!(event["message"]["user_id"], 1);
            assert_eq!(event["message"]["user"]["name"], "Alice");
            assert!(event["message"]["created_at"].as_str().is_some());
        }
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_blocks_broadcast() {
        let auth = StaticTokens::new().with_token(
            "T",
            Identity {
                id: 1,
                name: "Alice".to_string(),
            },
        );
        let router = Router::new(
            Arc::new(Registry::new()),
            Arc::new(auth),
            Arc::new(FailingStore),
        );
        let (alice, mut rx_alice) = join(&router);
        let (bob, mut rx_bob) = join(&router);
        authenticate(&router, alice, &mut rx_alice, "T").await;
        router.registry().mark_authenticated(
            bob,
            Identity {
                id: 2,
                name: "Bob".to_string(),
            },
        );
        let _ = rx_alice.try_recv(); // drain any join noise

        router
            .handle(
                alice,
                ClientMessage::Message {
                    message: Some("lost".to_string()),
                },
            )
            .await;

        let event = recv_event(&mut rx_alice);
        assert_eq!(event["type"], "error");
        assert_eq!(event["message"], "Failed to save message");
        // The unsaved message reaches nobody
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_typing_excludes_sender_and_drops_unauthenticated() {
        let f = fixture();
        let (alice, mut rx_alice) = join(&f.router);
        let (bob, mut rx_bob) = join(&f.router);

        // Unauthenticated: dropped with no reply at all
        f.router
            .handle(alice, ClientMessage::Typing { is_typing: true })
            .await;
        assert!(rx_alice.try_recv().is_err());

        authenticate(&f.router, alice, &mut rx_alice, "T").await;
        authenticate(&f.router, bob, &mut rx_bob, "U").await;
        let _ = rx_alice.try_recv();

        f.router
            .handle(alice, ClientMessage::Typing { is_typing: true })
            .await;
        let event = recv_event(&mut rx_bob);
        assert_eq!(event["type"], "typing");
        assert_eq!(event["userId"], 1);
        assert_eq!(event["userName"], "Alice");
        assert_eq!(event["isTyping"], true);
        assert!(rx_alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_replies_pong_without_auth() {
        let f = fixture();
        let (id, mut rx) = join(&f.router);

        f.router.handle(id, ClientMessage::Ping).await;
        let event = recv_event(&mut rx);
        assert_eq!(event["type"], "pong");
    }

    #[tokio::test]
    async fn test_unknown_type_ignored() {
        let f = fixture();
        let (id, mut rx) = join(&f.router);

        f.router.handle(id, ClientMessage::Unknown).await;
        assert!(rx.try_recv().is_err());
    }
}
