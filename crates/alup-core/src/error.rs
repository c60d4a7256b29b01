use core::fmt;
use std::io;

use alup_proto::DecodeError;

/// Failure kinds a [`crate::Session`] can surface (spec.md §7).
#[derive(Debug, Clone)]
pub enum SessionError {
    LinkUnavailable(String),
    LinkClosed,
    HandshakeTimeout,
    FramingError(String),
    CrcMismatch,
    /// An unexpected but well-framed condition: an ACK for an unknown
    /// sequence, a duplicate ACK, or `status = ERROR` from the
    /// controller. `sequence` is attached when known.
    ProtocolError { sequence: Option<u32>, reason: String },
    Timeout,
    BufferFull,
    Cancelled,
    InvalidArgument(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::LinkUnavailable(reason) => write!(f, "link unavailable: {reason}"),
            SessionError::LinkClosed => write!(f, "link closed"),
            SessionError::HandshakeTimeout => write!(f, "handshake timed out"),
            SessionError::FramingError(reason) => write!(f, "framing error: {reason}"),
            SessionError::CrcMismatch => write!(f, "CRC mismatch"),
            SessionError::ProtocolError { sequence: Some(seq), reason } => {
                write!(f, "protocol error on sequence {seq}: {reason}")
            }
            SessionError::ProtocolError { sequence: None, reason } => write!(f, "protocol error: {reason}"),
            SessionError::Timeout => write!(f, "timed out waiting for acknowledgement"),
            SessionError::BufferFull => write!(f, "frame buffer full"),
            SessionError::Cancelled => write!(f, "cancelled"),
            SessionError::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<DecodeError> for SessionError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Framing(reason) => SessionError::FramingError(reason.to_string()),
            DecodeError::CrcMismatch { .. } => SessionError::CrcMismatch,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::LinkUnavailable(err.to_string())
    }
}

/// A link-level failure, independent of the ALUP protocol running on
/// top of it.
#[derive(Debug)]
pub enum LinkError {
    Io(io::Error),
    /// A write could not complete before its deadline.
    Timeout,
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Io(err) => write!(f, "I/O error: {err}"),
            LinkError::Timeout => write!(f, "write timed out"),
            LinkError::Closed => write!(f, "link closed"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        LinkError::Io(err)
    }
}

impl From<LinkError> for SessionError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Io(err) => SessionError::LinkUnavailable(err.to_string()),
            LinkError::Timeout => SessionError::Timeout,
            LinkError::Closed => SessionError::LinkClosed,
        }
    }
}

/// The combined outcome of a [`crate::Group`] operation: every member
/// that failed, alongside its index in the group.
#[derive(Debug, Clone)]
pub struct GroupError {
    pub failures: Vec<(usize, SessionError)>,
}

impl fmt::Display for GroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of the group's members failed: ", self.failures.len())?;
        for (i, (index, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "member {index}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for GroupError {}
