//! TCP listener and accept loop
//!
//! One task per accepted socket; the registry inside the router is the
//! only state they share.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::Config;
use crate::auth::TokenValidator;
use crate::connection::Connection;
use crate::error::Result;
use crate::registry::Registry;
use crate::router::Router;
use crate::store::MessageStore;

/// The chat transport server
pub struct ChatServer {
    config: Config,
    router: Arc<Router>,
}

impl ChatServer {
    /// Create a server over the given adapters
    pub fn new(
        config: Config,
        auth: Arc<dyn TokenValidator>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let router = Arc::new(Router::new(Arc::new(Registry::new()), auth, store));
        Self { config, router }
    }

    /// The router driving this server's connections
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Bind all interfaces on the configured port and serve forever
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        info!(port = self.config.port, "chat server listening");
        self.serve(listener).await
    }

    /// Serve connections from an existing listener
    ///
    /// Split out from [`run`](Self::run) so tests can bind an ephemeral
    /// port first.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "connection accepted");
                    let router = self.router.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        Connection::run(stream, &config, router).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    }
}
