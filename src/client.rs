//! Chat relay client
//!
//! Single-connection counterpart of the server. Sends its name as the
//! first line, then relays lines fed by the caller, and decodes the
//! author/body pairs the server relays back.
//!
//! The name travels through the same output queue as every message, ahead
//! of them, so a partially sent name resumes exactly where it stopped.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info, trace, warn};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::framer::{FillStatus, LineFramer};
use crate::message::{take_lines, Message, MessageDecoder};
use crate::outbox::{FlushStatus, OutputQueue};
use crate::types::ChatEvents;

const SOCKET: Token = Token(0);

/// Progress of the name line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameState {
    /// `remaining` bytes of the name line are still at the queue front
    Pending { remaining: usize },
    Sent,
}

/// Whether the connection survived a service pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Open,
    Closed,
}

/// Live connection state
#[derive(Debug)]
struct Connection {
    poll: Poll,
    events: Events,
    stream: TcpStream,
    peer_addr: SocketAddr,
    name: NameState,
    interest: Interest,
    /// Text fed by the caller that has no newline yet
    draft: String,
    outbox: OutputQueue,
    framer: LineFramer,
    decoder: MessageDecoder,
    /// Read/write work left over from the previous pass
    pending_read: bool,
    pending_write: bool,
}

/// The chat relay client
///
/// States: disconnected, then connected with the name pending, then
/// connected with the name sent.
#[derive(Debug)]
pub struct Client {
    name: String,
    config: ChatConfig,
    conn: Option<Connection>,
    /// Received messages, earliest first
    inbox: VecDeque<Message>,
}

impl Client {
    /// Create a disconnected client that will introduce itself as `name`
    ///
    /// Only the first line of `name` is used, trimmed of surrounding spaces.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ChatConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ChatConfig) -> Self {
        let name: String = name.into();
        let name = name.lines().next().unwrap_or("").trim_matches(' ').to_string();
        Self {
            name,
            config,
            conn: None,
            inbox: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect to a `"host:port"` address
    ///
    /// Fails with `AlreadyStarted` if connected, `NoAddress` if the address
    /// does not resolve, `PortBusy` if no local address is available and
    /// `System` for any other failure. The attempt is bounded by the
    /// configured connect timeout.
    pub fn connect(&mut self, addr: &str) -> Result<(), ChatError> {
        if self.conn.is_some() {
            return Err(ChatError::AlreadyStarted);
        }

        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| {
                debug!("Failed to resolve '{}': {}", addr, e);
                ChatError::NoAddress(addr.to_string())
            })?
            .collect();
        if candidates.is_empty() {
            return Err(ChatError::NoAddress(addr.to_string()));
        }

        let mut last_err = None;
        let mut connected = None;
        for candidate in candidates {
            match StdTcpStream::connect_timeout(&candidate, self.config.connect_timeout()) {
                Ok(stream) => {
                    connected = Some((stream, candidate));
                    break;
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", candidate, e);
                    last_err = Some(e);
                }
            }
        }
        let Some((stream, peer_addr)) = connected else {
            let err = last_err.unwrap_or_else(|| io::ErrorKind::NotConnected.into());
            return Err(ChatError::from_connect(err));
        };

        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let mut stream = TcpStream::from_std(stream);

        let poll = Poll::new()?;
        let mut outbox = OutputQueue::new();
        let name_line = format!("{}\n", self.name);
        outbox.enqueue(name_line.as_bytes());
        let interest = Interest::READABLE | Interest::WRITABLE;
        poll.registry().register(&mut stream, SOCKET, interest)?;

        info!("Connected to {} as '{}'", peer_addr, self.name);

        self.conn = Some(Connection {
            poll,
            events: Events::with_capacity(self.config.event_capacity),
            stream,
            peer_addr,
            name: NameState::Pending {
                remaining: name_line.len(),
            },
            interest,
            draft: String::new(),
            outbox,
            framer: LineFramer::new(self.config.max_line_len),
            decoder: MessageDecoder::new(),
            pending_read: false,
            pending_write: false,
        });
        Ok(())
    }

    /// Queue caller text for sending
    ///
    /// Text is split on newlines and each line is trimmed of leading and
    /// trailing spaces. A trailing fragment without a newline is held until
    /// a later call completes it.
    pub fn feed(&mut self, text: &str) -> Result<(), ChatError> {
        let conn = self.conn.as_mut().ok_or(ChatError::NotStarted)?;
        let lines = take_lines(&mut conn.draft, text);
        for line in &lines {
            let mut wire = Vec::with_capacity(line.len() + 1);
            wire.extend_from_slice(line.as_bytes());
            wire.push(b'\n');
            conn.outbox.enqueue(&wire);
        }

        if !lines.is_empty() {
            trace!("Queued {} line(s)", lines.len());
            conn.sync_interest()?;
        }
        Ok(())
    }

    /// Wait up to `timeout` for socket readiness, then send and receive
    ///
    /// Returns `Timeout` if the socket did not become ready. If the server
    /// closes the connection the client drops back to disconnected;
    /// messages already received remain available from `pop_next`.
    pub fn update(&mut self, timeout: Duration) -> Result<(), ChatError> {
        let conn = self.conn.as_mut().ok_or(ChatError::NotStarted)?;
        match conn.update(timeout, &self.config, &mut self.inbox)? {
            Liveness::Open => Ok(()),
            Liveness::Closed => {
                self.disconnect();
                Ok(())
            }
        }
    }

    /// Take the earliest received message
    pub fn pop_next(&mut self) -> Option<Message> {
        self.inbox.pop_front()
    }

    /// Readiness the client currently wants
    pub fn events(&self) -> ChatEvents {
        match &self.conn {
            None => ChatEvents::NONE,
            Some(conn) if !conn.outbox.is_empty() => ChatEvents::INPUT_OUTPUT,
            Some(_) => ChatEvents::INPUT,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Whether the name line has been fully written
    pub fn is_name_sent(&self) -> bool {
        matches!(
            self.conn,
            Some(Connection {
                name: NameState::Sent,
                ..
            })
        )
    }

    /// Connected socket, for embedding in an outer event loop
    #[cfg(unix)]
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.conn.as_ref().map(|c| c.stream.as_raw_fd())
    }

    /// Close the connection, discarding unsent output
    pub fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.poll.registry().deregister(&mut conn.stream) {
                warn!("Failed to deregister socket: {}", e);
            }
            info!("Disconnected from {}", conn.peer_addr);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Connection {
    fn update(
        &mut self,
        timeout: Duration,
        config: &ChatConfig,
        inbox: &mut VecDeque<Message>,
    ) -> Result<Liveness, ChatError> {
        let wait = if self.pending_read || self.pending_write {
            Duration::ZERO
        } else {
            timeout
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

        let mut readable = std::mem::take(&mut self.pending_read);
        let mut writable = std::mem::take(&mut self.pending_write);
        for event in self.events.iter() {
            readable |= event.is_readable() || event.is_read_closed() || event.is_error();
            writable |= event.is_writable();
        }

        if !readable && !writable {
            return Err(ChatError::Timeout);
        }

        if writable && self.write(config) == Liveness::Closed {
            return Ok(Liveness::Closed);
        }
        if readable {
            return Ok(self.read(config, inbox));
        }
        Ok(Liveness::Open)
    }

    /// Flush the name, then queued messages
    fn write(&mut self, config: &ChatConfig) -> Liveness {
        let status = match self.outbox.flush(&mut self.stream, config.io_attempts) {
            Ok(status) => status,
            Err(e) => {
                warn!("Write to {} failed: {}", self.peer_addr, e);
                return Liveness::Closed;
            }
        };
        trace!("Wrote {} bytes to {}", status.sent(), self.peer_addr);

        if let NameState::Pending { remaining } = self.name {
            if status.sent() >= remaining {
                debug!("Name sent to {}", self.peer_addr);
                self.name = NameState::Sent;
            } else {
                self.name = NameState::Pending {
                    remaining: remaining - status.sent(),
                };
            }
        }

        if let FlushStatus::Deferred { .. } = status {
            self.pending_write = true;
        }

        if let Err(e) = self.sync_interest() {
            warn!("Failed to update registration: {}", e);
            return Liveness::Closed;
        }
        Liveness::Open
    }

    /// Drain inbound bytes into author/body messages
    fn read(&mut self, config: &ChatConfig, inbox: &mut VecDeque<Message>) -> Liveness {
        let fill = self
            .framer
            .fill_from(&mut self.stream, config.read_chunk, config.io_attempts);

        // Lines completed before a fault are still delivered
        for line in self.framer.lines() {
            if let Some(message) = self.decoder.push_line(line) {
                inbox.push_back(message);
            }
        }

        let fill = match fill {
            Ok(fill) => fill,
            Err(e) => {
                warn!("Read from {} failed: {}", self.peer_addr, e);
                return Liveness::Closed;
            }
        };
        trace!("Read {} bytes from {}", fill.bytes, self.peer_addr);

        match fill.status {
            FillStatus::Eof => {
                info!("Server {} closed the connection", self.peer_addr);
                Liveness::Closed
            }
            FillStatus::Saturated => {
                self.pending_read = true;
                Liveness::Open
            }
            FillStatus::Drained => Liveness::Open,
        }
    }

    /// Register writable interest exactly while output is queued
    fn sync_interest(&mut self) -> io::Result<()> {
        let wanted = if self.outbox.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if wanted != self.interest {
            self.poll
                .registry()
                .reregister(&mut self.stream, SOCKET, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    /// A plain blocking listener standing in for the server
    fn fake_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    fn read_exact_within(stream: &mut StdTcpStream, client: &mut Client, len: usize) -> Vec<u8> {
        stream
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut got = Vec::new();
        while got.len() < len && Instant::now() < deadline {
            let _ = client.update(Duration::ZERO);
            let mut buf = [0u8; 256];
            if let Ok(n) = stream.read(&mut buf) {
                got.extend_from_slice(&buf[..n]);
            }
        }
        got
    }

    #[test]
    fn test_operations_before_connect() {
        let mut client = Client::new("alice");
        assert!(!client.is_connected());
        assert!(matches!(client.feed("hi\n"), Err(ChatError::NotStarted)));
        assert!(matches!(
            client.update(Duration::ZERO),
            Err(ChatError::NotStarted)
        ));
        assert!(client.pop_next().is_none());
        assert_eq!(client.events(), ChatEvents::NONE);
    }

    #[test]
    fn test_name_is_sanitized() {
        let client = Client::new("  alice  \nextra");
        assert_eq!(client.name(), "alice");
    }

    #[test]
    fn test_connect_refused_is_system() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = Client::new("alice");
        let err = client.connect(&format!("127.0.0.1:{}", port)).unwrap_err();
        assert!(matches!(err, ChatError::System(_)));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_unresolvable_address() {
        let mut client = Client::new("alice");
        assert!(matches!(
            client.connect("not an address"),
            Err(ChatError::NoAddress(_))
        ));
        assert!(matches!(
            client.connect("127.0.0.1"),
            Err(ChatError::NoAddress(_))
        ));
    }

    #[test]
    fn test_connect_twice() {
        let (_listener, addr) = fake_server();
        let mut client = Client::new("alice");
        client.connect(&addr).unwrap();
        assert!(matches!(
            client.connect(&addr),
            Err(ChatError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_name_then_trimmed_lines() {
        let (listener, addr) = fake_server();
        let mut client = Client::new("alice");
        client.connect(&addr).unwrap();
        let (mut remote, _) = listener.accept().unwrap();

        assert!(!client.is_name_sent());
        assert_eq!(client.events(), ChatEvents::INPUT_OUTPUT);

        client.feed("  hello  \n second \nunfinished").unwrap();
        let expected = b"alice\nhello\nsecond\n";
        let got = read_exact_within(&mut remote, &mut client, expected.len());
        assert_eq!(got, expected);
        assert!(client.is_name_sent());
        assert_eq!(client.events(), ChatEvents::INPUT);

        client.feed(" done \n").unwrap();
        let got = read_exact_within(&mut remote, &mut client, 16);
        assert_eq!(got, b"unfinished done\n");
    }

    #[test]
    fn test_receives_pairs_in_order() {
        let (listener, addr) = fake_server();
        let mut client = Client::new("bob");
        client.connect(&addr).unwrap();
        let (mut remote, _) = listener.accept().unwrap();

        remote.write_all(b"alice\nhel").unwrap();
        remote.write_all(b"lo\ncarol\nhi\nal").unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut received = Vec::new();
        while received.len() < 2 && Instant::now() < deadline {
            let _ = client.update(Duration::from_millis(10));
            while let Some(msg) = client.pop_next() {
                received.push(msg);
            }
        }
        assert_eq!(
            received,
            vec![Message::new("alice", "hello"), Message::new("carol", "hi")]
        );
    }

    #[test]
    fn test_server_close_disconnects() {
        let (listener, addr) = fake_server();
        let mut client = Client::new("bob");
        client.connect(&addr).unwrap();
        let (mut remote, _) = listener.accept().unwrap();
        remote.write_all(b"alice\nbye\n").unwrap();
        drop(remote);

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.is_connected() && Instant::now() < deadline {
            let _ = client.update(Duration::from_millis(10));
        }
        assert!(!client.is_connected());
        assert_eq!(client.pop_next(), Some(Message::new("alice", "bye")));
        assert!(matches!(
            client.update(Duration::ZERO),
            Err(ChatError::NotStarted)
        ));
    }

    #[test]
    fn test_overlong_line_keeps_earlier_messages() {
        let mut config = ChatConfig::default();
        config.max_line_len = 64;
        let (listener, addr) = fake_server();
        let mut client = Client::with_config("bob", config);
        client.connect(&addr).unwrap();
        let (mut remote, _) = listener.accept().unwrap();

        let mut data = b"alice\nhi\n".to_vec();
        data.extend_from_slice(&[b'z'; 512]);
        remote.write_all(&data).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.is_connected() && Instant::now() < deadline {
            let _ = client.update(Duration::from_millis(10));
        }
        assert!(!client.is_connected());
        assert_eq!(client.pop_next(), Some(Message::new("alice", "hi")));
    }

    #[test]
    fn test_idle_update_times_out() {
        let (listener, addr) = fake_server();
        let mut client = Client::new("bob");
        client.connect(&addr).unwrap();
        let (_remote, _) = listener.accept().unwrap();

        // Flush the name so nothing is left to write
        let deadline = Instant::now() + Duration::from_secs(2);
        while !client.is_name_sent() && Instant::now() < deadline {
            let _ = client.update(Duration::from_millis(10));
        }
        // Drain any trailing writable edge
        let _ = client.update(Duration::ZERO);

        let start = Instant::now();
        assert!(matches!(
            client.update(Duration::from_millis(50)),
            Err(ChatError::Timeout)
        ));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
