//! Wire message definitions
//!
//! Line-oriented protocol, one message per `\n`-terminated line:
//! - Client → Server: the first line is the sender's display name, every
//!   later line is a message body.
//! - Server → Client: each relayed message is two lines, the author name
//!   followed by the body.
//!
//! Lines are raw bytes on the wire; they are decoded lossily into text
//! only when handed to the caller as a `Message`.

/// One relayed chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Display name of the peer that sent the line
    pub author: String,
    /// The line itself, without the trailing newline
    pub body: String,
}

impl Message {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
        }
    }

    /// Build a message from raw wire lines
    pub fn from_lines(author: &[u8], body: &[u8]) -> Self {
        Self {
            author: String::from_utf8_lossy(author).into_owned(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.author, self.body)
    }
}

/// Append the server → client encoding of one message to `out`
pub fn encode_relay(out: &mut Vec<u8>, author: &[u8], body: &[u8]) {
    out.reserve(author.len() + body.len() + 2);
    out.extend_from_slice(author);
    out.push(b'\n');
    out.extend_from_slice(body);
    out.push(b'\n');
}

/// Pairs incoming lines into author/body messages
///
/// Strict alternation: the first line is an author, the second its body,
/// and so on. A dangling author is held until its body arrives.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    author: Option<Vec<u8>>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line; returns a message once a pair is complete
    pub fn push_line(&mut self, line: Vec<u8>) -> Option<Message> {
        match self.author.take() {
            None => {
                self.author = Some(line);
                None
            }
            Some(author) => Some(Message::from_lines(&author, &line)),
        }
    }
}

/// Append `text` to `draft` and take out every line it completes
///
/// Each line is trimmed of surrounding spaces. A trailing fragment without
/// a newline stays in `draft` until a later call completes it.
pub(crate) fn take_lines(draft: &mut String, text: &str) -> Vec<String> {
    draft.push_str(text);
    let mut lines = Vec::new();
    while let Some(end) = draft.find('\n') {
        lines.push(draft[..end].trim_matches(' ').to_string());
        draft.drain(..=end);
    }
    lines
}
