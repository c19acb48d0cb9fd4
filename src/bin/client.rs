//! Chat Relay Client - Entry Point
//!
//! Connects under a display name, sends every stdin line and prints
//! relayed messages as `author: body`.
//!
//! Usage: chat_relay_client <name> [host:port]

use std::env;
use std::io::{self, BufRead};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{ChatConfig, ChatError, Client};

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Environment variable naming an optional JSON config file
const CONFIG_ENV: &str = "CHAT_RELAY_CONFIG";

/// Upper bound on one wait, so typed lines go out promptly
const UPDATE_TIMEOUT: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout carries only chat lines
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=warn")),
        )
        .init();

    let mut args = env::args().skip(1);
    let name = args.next().ok_or("usage: chat_relay_client <name> [host:port]")?;
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let config = match env::var(CONFIG_ENV) {
        Ok(path) => ChatConfig::from_file(path)?,
        Err(_) => ChatConfig::default(),
    };

    let mut client = Client::with_config(name, config);
    client.connect(&addr)?;
    info!("Connected to {}", addr);

    // Stdin blocks, so it gets its own thread feeding the reactor loop
    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        loop {
            match line_rx.try_recv() {
                Ok(line) => client.feed(&format!("{}\n", line))?,
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    info!("Input closed");
                    return Ok(());
                }
            }
        }

        match client.update(UPDATE_TIMEOUT) {
            Ok(()) | Err(ChatError::Timeout) => {}
            Err(ChatError::NotStarted) => {
                println!("-- connection closed --");
                return Ok(());
            }
            Err(e) => {
                error!("Client failed: {}", e);
                return Err(e.into());
            }
        }

        while let Some(message) = client.pop_next() {
            println!("{}", message);
        }

        if !client.is_connected() {
            println!("-- connection closed --");
            return Ok(());
        }
    }
}
