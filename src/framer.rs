//! Line framing
//!
//! Splits a byte stream into `\n`-terminated lines, carrying the
//! incomplete trailing fragment across reads. Used on both sides of the
//! connection: the server frames peer input, the client frames relayed
//! author/body lines.

use std::io::{self, Read};

use crate::error::FrameError;

/// Why a `fill_from` call stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// The reader would block: everything available was consumed
    Drained,
    /// The attempt ceiling was reached; more data may be waiting
    Saturated,
    /// The reader reported end-of-stream
    Eof,
}

/// Result of a `fill_from` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    /// Bytes appended to the framer
    pub bytes: usize,
    pub status: FillStatus,
}

/// Stateful line splitter
///
/// Complete lines are handed out with the delimiter stripped. Bytes after
/// the last newline stay buffered until a later feed completes them. The
/// buffered fragment is capped at `max_line_len` so an endless line cannot
/// exhaust memory.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Start of the first line not yet handed out
    pos: usize,
    /// Start of the incomplete fragment (one past the last newline seen)
    tail_start: usize,
    max_line_len: usize,
}

impl LineFramer {
    /// Create a framer that faults once a partial line exceeds `max_line_len`
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            tail_start: 0,
            max_line_len,
        }
    }

    /// Append `data` and iterate over every line it completes
    ///
    /// Lines left unconsumed when the iterator is dropped are returned by
    /// the next call.
    pub fn feed(&mut self, data: &[u8]) -> Result<Lines<'_>, FrameError> {
        self.compact();
        let start = self.buf.len();
        self.buf.extend_from_slice(data);
        self.mark_newlines(start)?;
        Ok(self.lines())
    }

    /// Read from a non-blocking `reader` straight into the framer
    ///
    /// Issues at most `attempts` reads of up to `chunk` bytes each and
    /// stops early on would-block or end-of-stream. Interrupted reads
    /// count as an attempt.
    pub fn fill_from<R: Read>(
        &mut self,
        reader: &mut R,
        chunk: usize,
        attempts: usize,
    ) -> Result<Fill, FrameError> {
        self.compact();
        let mut bytes = 0;

        for _ in 0..attempts {
            let start = self.buf.len();
            self.buf.resize(start + chunk, 0);

            match reader.read(&mut self.buf[start..]) {
                Ok(0) => {
                    self.buf.truncate(start);
                    return Ok(Fill {
                        bytes,
                        status: FillStatus::Eof,
                    });
                }
                Ok(n) => {
                    self.buf.truncate(start + n);
                    bytes += n;
                    self.mark_newlines(start)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.buf.truncate(start);
                    return Ok(Fill {
                        bytes,
                        status: FillStatus::Drained,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.buf.truncate(start);
                }
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e.into());
                }
            }
        }

        Ok(Fill {
            bytes,
            status: FillStatus::Saturated,
        })
    }

    /// Take the next complete line, if any
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        if self.pos >= self.tail_start {
            return None;
        }
        let complete = &self.buf[self.pos..self.tail_start];
        let end = complete.iter().position(|&b| b == b'\n')?;
        let line = complete[..end].to_vec();
        self.pos += end + 1;
        Some(line)
    }

    /// Iterate over the complete lines currently buffered
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { framer: self }
    }

    /// Length of the incomplete trailing fragment
    pub fn pending(&self) -> usize {
        self.buf.len() - self.tail_start
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.tail_start = 0;
    }

    /// Move `tail_start` past the last newline in `buf[from..]` and
    /// enforce the fragment ceiling
    fn mark_newlines(&mut self, from: usize) -> Result<(), FrameError> {
        if let Some(i) = self.buf[from..].iter().rposition(|&b| b == b'\n') {
            self.tail_start = from + i + 1;
        }
        let len = self.pending();
        if len > self.max_line_len {
            return Err(FrameError::LineTooLong {
                len,
                max: self.max_line_len,
            });
        }
        Ok(())
    }

    /// Discard lines already handed out
    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.tail_start -= self.pos;
            self.pos = 0;
        }
    }
}

/// Lazy iterator over the complete lines in a `LineFramer`
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::VecDeque;

    const LIMIT: usize = 1024;

    fn feed_all(framer: &mut LineFramer, data: &[u8]) -> Vec<Vec<u8>> {
        framer.feed(data).unwrap().collect()
    }

    /// Reader replaying a fixed script of read results
    struct ScriptedReader(VecDeque<io::Result<Vec<u8>>>);

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(data)) => {
                    assert!(data.len() <= buf.len());
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    #[test]
    fn test_single_feed_multiple_lines() {
        let mut framer = LineFramer::new(LIMIT);
        let lines = feed_all(&mut framer, b"alice\nhello\n");
        assert_eq!(lines, vec![b"alice".to_vec(), b"hello".to_vec()]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_fragment_carried_over() {
        let mut framer = LineFramer::new(LIMIT);
        assert!(feed_all(&mut framer, b"hel").is_empty());
        assert_eq!(framer.pending(), 3);
        assert_eq!(feed_all(&mut framer, b"lo\nwor"), vec![b"hello".to_vec()]);
        assert_eq!(feed_all(&mut framer, b"ld\n"), vec![b"world".to_vec()]);
    }

    #[test]
    fn test_empty_lines_preserved() {
        let mut framer = LineFramer::new(LIMIT);
        let lines = feed_all(&mut framer, b"\n\nx\n");
        assert_eq!(lines, vec![vec![], vec![], b"x".to_vec()]);
    }

    #[test]
    fn test_unconsumed_lines_returned_later() {
        let mut framer = LineFramer::new(LIMIT);
        {
            let mut lines = framer.feed(b"a\nb\nc\n").unwrap();
            assert_eq!(lines.next(), Some(b"a".to_vec()));
        }
        let rest = feed_all(&mut framer, b"d\n");
        assert_eq!(
            rest,
            vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
    }

    #[test]
    fn test_split_invariance() {
        let mut rng = rand::thread_rng();
        let input: Vec<u8> = b"alice\nhello there\n\nsecond line\nunterminated tail".to_vec();

        let mut whole = LineFramer::new(LIMIT);
        let expected = feed_all(&mut whole, &input);

        for _ in 0..200 {
            let mut framer = LineFramer::new(LIMIT);
            let mut got = Vec::new();
            let mut rest = &input[..];
            while !rest.is_empty() {
                let n = rng.gen_range(1..=rest.len());
                got.extend(feed_all(&mut framer, &rest[..n]));
                rest = &rest[n..];
            }
            assert_eq!(got, expected);
            assert_eq!(framer.pending(), whole.pending());
        }
    }

    #[test]
    fn test_fragment_ceiling() {
        let mut framer = LineFramer::new(8);
        assert!(framer.feed(b"12345678").is_ok());
        let err = framer.feed(b"9").err().unwrap();
        assert!(matches!(err, FrameError::LineTooLong { len: 9, max: 8 }));
    }

    #[test]
    fn test_ceiling_counts_only_the_fragment() {
        let mut framer = LineFramer::new(8);
        let lines = feed_all(&mut framer, b"0123456789abcdef\n1234");
        assert_eq!(lines, vec![b"0123456789abcdef".to_vec()]);
        assert_eq!(framer.pending(), 4);
    }

    #[test]
    fn test_fill_from_until_would_block() {
        let mut reader = ScriptedReader(VecDeque::from(vec![
            Ok(b"bob\nhi".to_vec()),
            Ok(b" all\n".to_vec()),
        ]));
        let mut framer = LineFramer::new(LIMIT);
        let fill = framer.fill_from(&mut reader, 64, 10).unwrap();
        assert_eq!(fill.bytes, 11);
        assert_eq!(fill.status, FillStatus::Drained);
        let lines: Vec<_> = framer.lines().collect();
        assert_eq!(lines, vec![b"bob".to_vec(), b"hi all".to_vec()]);
    }

    #[test]
    fn test_fill_from_eof_keeps_data() {
        let mut reader = ScriptedReader(VecDeque::from(vec![Ok(b"last\n".to_vec()), Ok(vec![])]));
        let mut framer = LineFramer::new(LIMIT);
        let fill = framer.fill_from(&mut reader, 64, 10).unwrap();
        assert_eq!(fill.status, FillStatus::Eof);
        assert_eq!(fill.bytes, 5);
        assert_eq!(framer.next_line(), Some(b"last".to_vec()));
    }

    #[test]
    fn test_fill_from_respects_attempt_ceiling() {
        let script = (0..5).map(|_| Ok(b"x\n".to_vec())).collect();
        let mut reader = ScriptedReader(script);
        let mut framer = LineFramer::new(LIMIT);
        let fill = framer.fill_from(&mut reader, 64, 3).unwrap();
        assert_eq!(fill.status, FillStatus::Saturated);
        assert_eq!(framer.lines().count(), 3);

        let fill = framer.fill_from(&mut reader, 64, 3).unwrap();
        assert_eq!(fill.status, FillStatus::Drained);
        assert_eq!(framer.lines().count(), 2);
    }

    #[test]
    fn test_fill_from_retries_interrupted() {
        let mut reader = ScriptedReader(VecDeque::from(vec![
            Err(io::ErrorKind::Interrupted.into()),
            Ok(b"ok\n".to_vec()),
        ]));
        let mut framer = LineFramer::new(LIMIT);
        let fill = framer.fill_from(&mut reader, 64, 10).unwrap();
        assert_eq!(fill.bytes, 3);
        assert_eq!(framer.next_line(), Some(b"ok".to_vec()));
    }

    #[test]
    fn test_fill_from_hard_error() {
        let mut reader = ScriptedReader(VecDeque::from(vec![Err(
            io::ErrorKind::ConnectionReset.into(),
        )]));
        let mut framer = LineFramer::new(LIMIT);
        let err = framer.fill_from(&mut reader, 64, 10).unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[test]
    fn test_fill_from_enforces_ceiling() {
        let mut reader = ScriptedReader(VecDeque::from(vec![Ok(vec![b'a'; 32])]));
        let mut framer = LineFramer::new(16);
        let err = framer.fill_from(&mut reader, 64, 10).unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { len: 32, max: 16 }));
    }
}
