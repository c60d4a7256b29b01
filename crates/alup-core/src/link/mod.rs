mod serial;
mod tcp;

use std::time::Instant;

pub use serial::SerialLink;
pub use tcp::{TcpLink, DEFAULT_PORT};

use crate::error::LinkError;

/// A bidirectional byte stream to a controller. Framing and encoding
/// live above this trait (spec.md §2) — a `Link` only ever moves raw
/// bytes.
///
/// Implementations are owned exclusively by one [`crate::Session`]: the
/// session's writer lock serializes every `write`, and only the
/// session's background reader thread ever calls `read`.
pub trait Link: Send {
    /// Reads up to `buf.len()` bytes, blocking until at least one byte
    /// is available or `deadline` passes. Returns `Ok(0)` on a timeout,
    /// never an error for that case — only hard I/O failure or a
    /// link that has already been closed are errors.
    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize, LinkError>;

    /// Writes the entirety of `buf`, blocking as needed, failing with
    /// [`LinkError::Timeout`] if it cannot finish before `deadline`.
    fn write_all(&mut self, buf: &[u8], deadline: Instant) -> Result<(), LinkError>;

    /// Ensures any buffered output has actually reached the wire.
    fn flush(&mut self) -> Result<(), LinkError>;

    /// Tears the link down. Idempotent.
    fn close(&mut self) -> Result<(), LinkError>;

    /// Produces an independent handle onto the same underlying stream,
    /// so the session's reader thread can own the inbound half while the
    /// writer lock continues to guard the outbound half (spec.md §5).
    fn try_clone(&self) -> Result<Box<dyn Link>, LinkError>;
}

pub(crate) fn remaining(deadline: Instant) -> std::time::Duration {
    deadline.saturating_duration_since(Instant::now())
}
