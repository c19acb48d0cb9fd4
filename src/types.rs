//! Basic type definitions for the chat relay
//!
//! Provides:
//! - `PeerId`: stable arena index of a connected peer, doubling as its mio token
//! - `ChatEvents`: the readiness a server or client currently wants

use mio::Token;

/// Connected peer identifier (newtype pattern)
///
/// Assigned monotonically by the registry and never reused while the
/// peer is alive. Converts directly to the `mio::Token` the peer is
/// registered under, so readiness events map to peers without a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub usize);

impl From<PeerId> for Token {
    fn from(id: PeerId) -> Self {
        Token(id.0)
    }
}

impl From<Token> for PeerId {
    fn from(token: Token) -> Self {
        PeerId(token.0)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness an instance is currently interested in
///
/// Lets an embedding event loop poll the descriptor returned by
/// `raw_fd()` with the right event mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatEvents {
    /// Wants to read (always set while running)
    pub input: bool,
    /// Has queued output waiting to be written
    pub output: bool,
}

impl ChatEvents {
    /// Nothing registered
    pub const NONE: ChatEvents = ChatEvents {
        input: false,
        output: false,
    };

    /// Running, nothing queued
    pub const INPUT: ChatEvents = ChatEvents {
        input: true,
        output: false,
    };

    /// Running with queued output
    pub const INPUT_OUTPUT: ChatEvents = ChatEvents {
        input: true,
        output: true,
    };
}
