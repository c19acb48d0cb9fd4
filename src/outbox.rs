//! Per-connection output queue
//!
//! Holds bytes accepted for a socket but not yet written. Flushing writes
//! as much as the transport takes and compacts the unsent remainder to the
//! front, so a short write never loses or repeats a byte.

use std::io::{self, Write};

/// Outcome of a flush that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// The queue is now empty
    Drained { sent: usize },
    /// The transport would block; a writable event will follow
    Blocked { sent: usize },
    /// The attempt ceiling was reached with data still queued
    Deferred { sent: usize },
}

impl FlushStatus {
    pub fn sent(&self) -> usize {
        match *self {
            FlushStatus::Drained { sent }
            | FlushStatus::Blocked { sent }
            | FlushStatus::Deferred { sent } => sent,
        }
    }
}

/// Pending outbound bytes for one socket
#[derive(Debug, Default)]
pub struct OutputQueue {
    buf: Vec<u8>,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` to the queue
    ///
    /// Returns true if the queue was empty before, meaning the owner must
    /// now register interest in writable readiness.
    pub fn enqueue(&mut self, bytes: &[u8]) -> bool {
        let was_empty = self.buf.is_empty();
        self.buf.extend_from_slice(bytes);
        was_empty && !self.buf.is_empty()
    }

    /// Write queued bytes to `writer`, issuing at most `attempts` writes
    ///
    /// Would-block and the attempt ceiling are reported through the
    /// returned status. A zero-length write is reported as `WriteZero`;
    /// it and any other hard error mean the connection is gone.
    pub fn flush<W: Write>(&mut self, writer: &mut W, attempts: usize) -> io::Result<FlushStatus> {
        let mut sent = 0;
        let mut status = None;

        for _ in 0..attempts {
            if sent == self.buf.len() {
                break;
            }
            match writer.write(&self.buf[sent..]) {
                Ok(0) => {
                    self.buf.drain(..sent);
                    return Err(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    status = Some(FlushStatus::Blocked { sent });
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.drain(..sent);
                    return Err(e);
                }
            }
        }

        // Remove the data we wrote
        self.buf.drain(..sent);

        if self.buf.is_empty() {
            return Ok(FlushStatus::Drained { sent });
        }
        Ok(status.unwrap_or(FlushStatus::Deferred { sent }))
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// The unsent bytes, oldest first
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
