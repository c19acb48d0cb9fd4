//! Line Chat Relay Library
//!
//! A readiness-driven chat relay built directly on mio: one
//! single-threaded reactor watches the listener and every peer socket,
//! and never blocks on a slow or congested peer.
//!
//! # Protocol
//! - Newline-delimited byte lines, one message per line
//! - A client's first line is its display name and is never relayed
//! - Every later line is relayed to all other peers as two lines:
//!   the author name, then the body
//!
//! # Architecture
//! - `Server` owns a mio `Poll`, the listener and a `PeerRegistry`
//! - Each `Peer` carries its own `LineFramer` and `OutputQueue`
//! - Peers register for writable readiness only while output is queued
//! - `update(timeout)` is the only place either side waits
//!
//! # Example
//! ```ignore
//! use std::time::Duration;
//! use chat_relay::{ChatError, Client, Server};
//!
//! let mut server = Server::new();
//! server.listen(8080)?;
//!
//! let mut alice = Client::new("alice");
//! alice.connect("127.0.0.1:8080")?;
//! alice.feed("hello\n")?;
//!
//! loop {
//!     match server.update(Duration::from_millis(100)) {
//!         Ok(()) | Err(ChatError::Timeout) => {}
//!         Err(e) => return Err(e),
//!     }
//!     let _ = alice.update(Duration::ZERO);
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod framer;
pub mod message;
pub mod outbox;
pub mod peer;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use config::{ChatConfig, ConfigError};
pub use error::{ChatError, FrameError};
pub use framer::LineFramer;
pub use message::Message;
pub use outbox::OutputQueue;
pub use peer::{Peer, PeerLimits, PeerState};
pub use registry::PeerRegistry;
pub use server::Server;
pub use types::{ChatEvents, PeerId};
