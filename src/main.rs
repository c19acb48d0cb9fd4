//! Chat Relay Server - Entry Point
//!
//! Listens on the given port and relays lines between connected peers.

use std::env;
use std::time::Duration;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{ChatConfig, ChatError, Server};

/// Default listening port
const DEFAULT_PORT: u16 = 8080;

/// Environment variable naming an optional JSON config file
const CONFIG_ENV: &str = "CHAT_RELAY_CONFIG";

/// Upper bound on one reactor wait
const UPDATE_TIMEOUT: Duration = Duration::from_millis(500);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    // Get port from command line or use default
    let port = match env::args().nth(1) {
        Some(arg) => arg.parse::<u16>()?,
        None => DEFAULT_PORT,
    };

    let config = match env::var(CONFIG_ENV) {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            ChatConfig::from_file(path)?
        }
        Err(_) => ChatConfig::default(),
    };

    let mut server = Server::with_config(config);
    server.listen(port)?;
    info!("Chat relay server started on port {}", port);

    // Reactor loop
    loop {
        match server.update(UPDATE_TIMEOUT) {
            Ok(()) | Err(ChatError::Timeout) => {}
            Err(e) => {
                error!("Reactor failed: {}", e);
                return Err(e.into());
            }
        }

        while let Some(message) = server.pop_next() {
            debug!("{}", message);
        }
    }
}
