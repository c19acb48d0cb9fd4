//! Error types for the chat relay
//!
//! Defines the public error taxonomy returned by server and client
//! operations, and the per-connection faults raised while framing input.
//! Uses thiserror for ergonomic error definitions.

use std::io;

use thiserror::Error;

/// Errors returned by `Server` and `Client` operations
///
/// `Timeout` is an expected outcome of `update`, not a failure.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The operation needs a listener or connection that does not exist
    #[error("Not started")]
    NotStarted,

    /// `listen` or `connect` called on an instance that is already running
    #[error("Already started")]
    AlreadyStarted,

    /// Address resolution failed or produced no endpoints
    #[error("No address found for '{0}'")]
    NoAddress(String),

    /// The address is already bound
    #[error("Port is busy")]
    PortBusy,

    /// Nothing became ready within the wait window
    #[error("Timed out")]
    Timeout,

    /// Unexpected OS-level failure
    #[error("System error: {0}")]
    System(#[from] io::Error),

    /// Reserved extension point
    #[error("Not implemented")]
    NotImplemented,
}

impl ChatError {
    /// Map a listener bind error; only "address in use" is `PortBusy`
    pub(crate) fn from_bind(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => ChatError::PortBusy,
            _ => ChatError::System(err),
        }
    }

    /// Map a connect error; running out of local ports is also `PortBusy`
    pub(crate) fn from_connect(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => ChatError::PortBusy,
            _ => ChatError::System(err),
        }
    }
}

/// Per-connection faults
///
/// These never escape the reactor: they close the affected peer only.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The retained partial line grew past the configured ceiling
    #[error("Line of {len} bytes exceeds limit of {max} bytes")]
    LineTooLong { len: usize, max: usize },

    /// A peer that is not reading let its pending output grow past the ceiling
    #[error("Pending output of {len} bytes exceeds limit of {max} bytes")]
    OutputOverflow { len: usize, max: usize },

    /// Transport error while reading or writing
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_in_use_maps_to_port_busy() {
        let err = io::Error::from(io::ErrorKind::AddrInUse);
        assert!(matches!(ChatError::from_bind(err), ChatError::PortBusy));
    }

    #[test]
    fn test_other_bind_errors_are_system() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(ChatError::from_bind(err), ChatError::System(_)));
    }

    #[test]
    fn test_unavailable_address_on_bind_is_system() {
        let err = io::Error::from(io::ErrorKind::AddrNotAvailable);
        assert!(matches!(ChatError::from_bind(err), ChatError::System(_)));
    }

    #[test]
    fn test_connect_errors() {
        let err = io::Error::from(io::ErrorKind::AddrNotAvailable);
        assert!(matches!(ChatError::from_connect(err), ChatError::PortBusy));
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(ChatError::from_connect(err), ChatError::System(_)));
    }

    #[test]
    fn test_line_too_long_display() {
        let err = FrameError::LineTooLong { len: 20, max: 10 };
        assert_eq!(
            err.to_string(),
            "Line of 20 bytes exceeds limit of 10 bytes"
        );
    }
}
