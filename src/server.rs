//! Chat relay server
//!
//! A single-threaded reactor over a mio `Poll`. `update` is the only call
//! that waits; it then services every ready socket once:
//! - listener readiness accepts until the backlog would block
//! - peer read readiness drains input, names the peer from its first
//!   line and relays every later line to all other peers
//! - peer write readiness flushes that peer's output queue
//!
//! A peer registers for writable readiness only while its output queue is
//! non-empty. Work cut short by the per-socket attempt ceiling is kept on
//! a backlog and serviced by the next `update` without waiting, because
//! the edge-triggered multiplexer will not report it again.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info, trace, warn};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::framer::FillStatus;
use crate::message::{encode_relay, take_lines, Message};
use crate::outbox::FlushStatus;
use crate::peer::PeerLimits;
use crate::registry::PeerRegistry;
use crate::types::{ChatEvents, PeerId};

/// Token of the listening socket
const LISTENER: Token = Token(0);

/// Readiness collected for one peer in one pass
#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    readable: bool,
    writable: bool,
}

/// Everything that exists only while the server is listening
#[derive(Debug)]
struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    peers: PeerRegistry,
    /// Peers with work left over from the previous pass
    backlog: BTreeMap<PeerId, Readiness>,
    /// Relayed messages kept for `Server::pop_next`
    inbox: VecDeque<Message>,
    /// Unterminated text passed to `Server::feed`
    draft: String,
    config: ChatConfig,
}

/// The chat relay server
///
/// Lifecycle: `new` → `listen` → repeated `update` → `close` (or drop).
/// A failed `listen` leaves the server stopped and ready to retry.
#[derive(Debug)]
pub struct Server {
    config: ChatConfig,
    reactor: Option<Reactor>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Create a stopped server with the default configuration
    pub fn new() -> Self {
        Self::with_config(ChatConfig::default())
    }

    pub fn with_config(config: ChatConfig) -> Self {
        Self {
            config,
            reactor: None,
        }
    }

    /// Listen on `port` on every local interface
    pub fn listen(&mut self, port: u16) -> Result<(), ChatError> {
        self.listen_on(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    /// Listen on an explicit address
    ///
    /// Fails with `AlreadyStarted` if listening, `PortBusy` if the address
    /// is taken and `System` for any other bind or multiplexer failure.
    pub fn listen_on(&mut self, addr: SocketAddr) -> Result<(), ChatError> {
        if self.reactor.is_some() {
            return Err(ChatError::AlreadyStarted);
        }

        let mut listener = TcpListener::bind(addr).map_err(ChatError::from_bind)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        info!("Chat relay listening on {}", local_addr);

        self.reactor = Some(Reactor {
            poll,
            events: Events::with_capacity(self.config.event_capacity),
            listener,
            local_addr,
            peers: PeerRegistry::new(),
            backlog: BTreeMap::new(),
            inbox: VecDeque::new(),
            draft: String::new(),
            config: self.config.clone(),
        });
        Ok(())
    }

    /// Wait up to `timeout` for readiness, then service every ready socket
    ///
    /// Returns `Timeout` if nothing became ready. Only the wait is bounded
    /// by `timeout`; servicing is bounded by the attempt ceiling.
    pub fn update(&mut self, timeout: Duration) -> Result<(), ChatError> {
        let reactor = self.reactor.as_mut().ok_or(ChatError::NotStarted)?;
        reactor.update(timeout)
    }

    /// Broadcast lines authored by the server itself to every peer
    ///
    /// Follows the same rule as `Client::feed`: each `\n`-terminated line,
    /// trimmed of surrounding spaces, becomes one message, and a trailing
    /// fragment is held until a later call completes it.
    pub fn feed(&mut self, text: &str) -> Result<(), ChatError> {
        let reactor = self.reactor.as_mut().ok_or(ChatError::NotStarted)?;
        let bodies: Vec<Vec<u8>> = take_lines(&mut reactor.draft, text)
            .into_iter()
            .map(String::into_bytes)
            .collect();
        if bodies.is_empty() {
            return Ok(());
        }
        let author = reactor.config.server_name.clone().into_bytes();
        reactor.relay(None, &author, &bodies);
        Ok(())
    }

    /// Take the earliest relayed message not yet popped
    pub fn pop_next(&mut self) -> Option<Message> {
        self.reactor.as_mut()?.inbox.pop_front()
    }

    /// Readiness the server currently wants
    pub fn events(&self) -> ChatEvents {
        match &self.reactor {
            None => ChatEvents::NONE,
            Some(reactor) if reactor.peers.has_pending_output() => ChatEvents::INPUT_OUTPUT,
            Some(_) => ChatEvents::INPUT,
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.reactor.as_ref().map(|r| r.local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.reactor.is_some()
    }

    /// Number of connected peers, named or not
    pub fn peer_count(&self) -> usize {
        self.reactor.as_ref().map_or(0, |r| r.peers.len())
    }

    /// Display names of the peers that have sent their first line
    pub fn peer_names(&self) -> Vec<String> {
        let Some(reactor) = &self.reactor else {
            return Vec::new();
        };
        let mut names: Vec<String> = reactor
            .peers
            .ids()
            .into_iter()
            .filter_map(|id| reactor.peers.get(id))
            .filter(|peer| peer.name().is_some())
            .map(|peer| peer.display_name().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Multiplexer descriptor, for embedding in an outer event loop
    #[cfg(unix)]
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.reactor.as_ref().map(|r| r.poll.as_raw_fd())
    }

    /// Stop listening and drop every peer
    pub fn close(&mut self) {
        if let Some(mut reactor) = self.reactor.take() {
            reactor.shutdown();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

impl Reactor {
    fn update(&mut self, timeout: Duration) -> Result<(), ChatError> {
        let wait = if self.backlog.is_empty() {
            timeout
        } else {
            Duration::ZERO
        };

        match self.poll.poll(&mut self.events, Some(wait)) {
            Ok(()) => {}
            // Treated as an empty wait
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                error!("Error waiting for readiness: {}", e);
                return Err(ChatError::System(e));
            }
        }

        let mut accept = false;
        let mut ready = std::mem::take(&mut self.backlog);
        for event in self.events.iter() {
            if event.token() == LISTENER {
                accept = true;
                continue;
            }
            let entry = ready.entry(PeerId::from(event.token())).or_default();
            // Errors and hang-ups surface through the read attempt
            entry.readable |= event.is_readable() || event.is_read_closed() || event.is_error();
            entry.writable |= event.is_writable();
        }

        if !accept && ready.is_empty() {
            return Err(ChatError::Timeout);
        }

        if accept {
            self.accept_peers();
        }
        for (id, readiness) in ready {
            self.service_peer(id, readiness);
        }
        Ok(())
    }

    /// Accept connections until the listener would block
    fn accept_peers(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    match self.peers.insert(
                        stream,
                        addr,
                        PeerLimits::from(&self.config),
                        self.poll.registry(),
                    ) {
                        Ok(id) => {
                            info!("Peer {} connected from {}", id, addr);
                            debug!("Total peers: {}", self.peers.len());
                        }
                        Err(e) => warn!("Failed to register connection from {}: {}", addr, e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    warn!("Transient accept error: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    break;
                }
            }
        }
    }

    fn service_peer(&mut self, id: PeerId, readiness: Readiness) {
        if readiness.readable {
            self.read_peer(id);
        }
        if readiness.writable {
            self.write_peer(id);
        }
    }

    /// Drain a peer's input and relay the complete lines
    ///
    /// Lines completed before end-of-stream or a fault are relayed before
    /// the peer is closed.
    fn read_peer(&mut self, id: PeerId) {
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };
        let addr = peer.addr;
        let read = peer.read(self.config.read_chunk, self.config.io_attempts);

        if !read.bodies.is_empty() {
            let author = peer.name().unwrap_or_default().to_vec();
            self.relay(Some(id), &author, &read.bodies);
        }

        match read.outcome {
            Err(e) => {
                warn!("Dropping peer {} ({}): {}", id, addr, e);
                self.close_peer(id);
            }
            Ok(FillStatus::Eof) => {
                info!("Peer {} disconnected", id);
                self.close_peer(id);
            }
            Ok(FillStatus::Saturated) => {
                self.backlog.entry(id).or_default().readable = true;
            }
            Ok(FillStatus::Drained) => {}
        }
    }

    /// Flush a peer's output queue
    fn write_peer(&mut self, id: PeerId) {
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };

        let status = match peer.flush(self.config.io_attempts) {
            Ok(status) => status,
            Err(e) => {
                warn!("Dropping peer {} ({}) while writing: {}", id, peer.addr, e);
                self.close_peer(id);
                return;
            }
        };
        trace!("Wrote {} bytes to peer {}", status.sent(), id);

        if let FlushStatus::Deferred { .. } = status {
            self.backlog.entry(id).or_default().writable = true;
        }

        if let Err(e) = peer.sync_interest(self.poll.registry()) {
            warn!("Failed to update registration of peer {}: {}", id, e);
            self.close_peer(id);
        }
    }

    /// Queue a batch of messages for every peer except the author
    fn relay(&mut self, from: Option<PeerId>, author: &[u8], bodies: &[Vec<u8>]) {
        let mut batch = Vec::new();
        for body in bodies {
            encode_relay(&mut batch, author, body);
            self.remember(Message::from_lines(author, body));
        }

        let (delivered, failed) = self.peers.broadcast(from, &batch, self.poll.registry());
        debug!(
            "Relayed {} message(s) from '{}' to {} peer(s)",
            bodies.len(),
            String::from_utf8_lossy(author),
            delivered
        );

        for id in failed {
            self.close_peer(id);
        }
    }

    /// Keep a relayed message for `pop_next`, dropping the oldest when full
    fn remember(&mut self, message: Message) {
        if self.config.inbox_capacity == 0 {
            return;
        }
        if self.inbox.len() >= self.config.inbox_capacity {
            warn!("Inbox full, dropping oldest message");
            self.inbox.pop_front();
        }
        self.inbox.push_back(message);
    }

    fn close_peer(&mut self, id: PeerId) {
        self.backlog.remove(&id);
        if let Some(peer) = self.peers.remove(id, self.poll.registry()) {
            debug!("Closed peer {} ({})", id, peer.display_name());
        }
    }

    fn shutdown(&mut self) {
        info!("Chat relay on {} shutting down", self.local_addr);
        self.peers.clear(self.poll.registry());
        self.backlog.clear();
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            warn!("Failed to deregister listener: {}", e);
        }
    }
}
