//! Peer struct definition
//!
//! Represents one accepted connection: its socket, naming state, input
//! framer and pending output.

use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry};
use tracing::debug;

use crate::config::ChatConfig;
use crate::error::FrameError;
use crate::framer::{FillStatus, LineFramer};
use crate::outbox::{FlushStatus, OutputQueue};
use crate::types::PeerId;

/// Peer lifecycle
///
/// `Connecting → Named → Closed`. The line that moves a peer to `Named`
/// is consumed as its name and never relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    /// Socket open, no line received yet
    Connecting,
    /// First line received and taken as the display name
    Named { name: Vec<u8> },
    /// Terminal; waiting to be removed from the registry
    Closed,
}

/// Lines read from a peer in one drain
///
/// Lines completed before a fault are still returned in `bodies`.
#[derive(Debug)]
pub struct PeerRead {
    /// Message bodies, in arrival order (the name line is not included)
    pub bodies: Vec<Vec<u8>>,
    pub outcome: Result<FillStatus, FrameError>,
}

/// Per-peer buffer ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerLimits {
    /// Longest partial input line
    pub max_line_len: usize,
    /// Most output that may wait in the queue
    pub max_output_len: usize,
}

impl From<&ChatConfig> for PeerLimits {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_line_len: config.max_line_len,
            max_output_len: config.max_output_len,
        }
    }
}

/// Connected peer
///
/// Owned by the `PeerRegistry`. Holds everything the reactor needs to
/// service the connection without looking anything up elsewhere.
#[derive(Debug)]
pub struct Peer {
    /// Registry identity, also the mio token
    pub id: PeerId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    stream: TcpStream,
    state: PeerState,
    framer: LineFramer,
    outbox: OutputQueue,
    max_output_len: usize,
    /// Interest currently registered with the multiplexer
    interest: Interest,
}

impl Peer {
    /// Create a peer for an accepted, non-blocking stream
    pub fn new(id: PeerId, stream: TcpStream, addr: SocketAddr, limits: PeerLimits) -> Self {
        Self {
            id,
            addr,
            stream,
            state: PeerState::Connecting,
            framer: LineFramer::new(limits.max_line_len),
            outbox: OutputQueue::new(),
            max_output_len: limits.max_output_len,
            interest: Interest::READABLE,
        }
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    /// Raw name bytes, once the peer has sent its first line
    pub fn name(&self) -> Option<&[u8]> {
        match &self.state {
            PeerState::Named { name } => Some(name),
            _ => None,
        }
    }

    /// Get the display name for this peer
    ///
    /// Returns the name if set, otherwise "Unknown".
    pub fn display_name(&self) -> Cow<'_, str> {
        match self.name() {
            Some(name) => String::from_utf8_lossy(name),
            None => Cow::Borrowed("Unknown"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == PeerState::Closed
    }

    /// Mark the peer closed and release its buffers
    pub fn close(&mut self) {
        self.state = PeerState::Closed;
        self.framer.clear();
        self.outbox.clear();
    }

    /// Drain the socket and route the completed lines
    ///
    /// The first line ever completed names the peer; every other line is
    /// returned as a message body.
    pub fn read(&mut self, chunk: usize, attempts: usize) -> PeerRead {
        // A failed fill keeps the lines it completed before the fault
        let outcome = self
            .framer
            .fill_from(&mut self.stream, chunk, attempts)
            .map(|fill| fill.status);

        let mut bodies = Vec::new();
        for line in self.framer.lines() {
            match self.state {
                PeerState::Connecting => {
                    debug!(
                        "Peer {} named '{}'",
                        self.id,
                        String::from_utf8_lossy(&line)
                    );
                    self.state = PeerState::Named { name: line };
                }
                PeerState::Named { .. } => bodies.push(line),
                PeerState::Closed => break,
            }
        }

        PeerRead { bodies, outcome }
    }

    /// Queue bytes for this peer
    ///
    /// Returns true if writable interest must now be registered. Fails
    /// with `OutputOverflow` if the queue would grow past its ceiling;
    /// nothing is queued in that case.
    pub fn queue(&mut self, bytes: &[u8]) -> Result<bool, FrameError> {
        if self.is_closed() {
            return Ok(false);
        }
        let len = self.outbox.len() + bytes.len();
        if len > self.max_output_len {
            return Err(FrameError::OutputOverflow {
                len,
                max: self.max_output_len,
            });
        }
        Ok(self.outbox.enqueue(bytes))
    }

    /// Write queued output, at most `attempts` write calls
    pub fn flush(&mut self, attempts: usize) -> io::Result<FlushStatus> {
        self.outbox.flush(&mut self.stream, attempts)
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Interest this peer should be registered with right now
    ///
    /// Writable only while output is queued.
    pub fn desired_interest(&self) -> Interest {
        if self.outbox.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        self.interest = self.desired_interest();
        registry.register(&mut self.stream, self.id.into(), self.interest)
    }

    /// Bring the multiplexer registration in line with the output queue
    pub fn sync_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let wanted = self.desired_interest();
        if wanted != self.interest {
            registry.reregister(&mut self.stream, self.id.into(), wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}
