use core::fmt;

/// Failure to make sense of bytes coming off the wire.
///
/// Both variants are fatal to a session (spec.md §7): there is no
/// resynchronization primitive in ALUP, so a caller that sees either of
/// these must tear the link down rather than try to keep parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The expected sync marker wasn't where it should be, or the
    /// buffer ran out before a fixed-size field could be read.
    Framing(&'static str),
    /// The trailing CRC-16 didn't match the bytes it covers.
    CrcMismatch { expected: u16, actual: u16 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Framing(reason) => write!(f, "framing error: {reason}"),
            DecodeError::CrcMismatch { expected, actual } => {
                write!(f, "CRC mismatch: expected {expected:#06x}, computed {actual:#06x}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Failure to encode a [`crate::WireFrame`].
///
/// Distinct from [`DecodeError`] because encoding never observes the
/// wire, only caller-provided values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// `colors.len() * 3` doesn't fit in the 16-bit `bodyLength` field.
    BodyTooLarge { len: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::BodyTooLarge { len } => {
                write!(f, "frame body of {len} colors exceeds the maximum encodable length")
            }
        }
    }
}

impl std::error::Error for EncodeError {}
