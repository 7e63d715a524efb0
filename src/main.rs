use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatsock::auth::SqliteAuth;
use chatsock::server::ChatServer;
use chatsock::store::{Database, SqliteStore};
use chatsock::{Config, Result};

#[derive(Parser)]
#[command(name = "chatsock", about = "Real-time chat transport server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the chat server
    Serve {
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// SQLite database path for users, tokens, and messages
        #[arg(long, default_value = "chatsock.db")]
        database: String,
        /// Idle timeout in seconds (0 disables)
        #[arg(long, default_value_t = 0)]
        idle_timeout: u32,
    },
    /// Run the diagnostic client against a server
    Client {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Bearer token to authenticate with
        #[arg(long)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            port,
            database,
            idle_timeout,
        } => {
            let db = Database::open(&database)?;
            info!(path = %database, "database ready");

            let config = Config::builder()
                .port(port)
                .idle_timeout(idle_timeout)
                .build();
            let server = ChatServer::new(
                config,
                Arc::new(SqliteAuth::new(db.clone())),
                Arc::new(SqliteStore::new(db)),
            );
            server.run().await
        }
        Command::Client { host, port, token } => {
            chatsock::client::run_diagnostic(&host, port, &token).await
        }
    }
}
