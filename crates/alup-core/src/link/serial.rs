use std::io::{self, ErrorKind, Read, Write};
use std::time::Instant;

use serialport::{ClearBuffer, SerialPort};

use super::remaining;
use crate::error::LinkError;
use crate::link::Link;

/// A [`Link`] over a serial port, 8N1 (spec.md §6).
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Opens `path` at `baud` and discards whatever the controller's boot
    /// banner already dumped into the OS receive buffer, so the
    /// handshake parser starts at a clean frame boundary (spec.md §6).
    pub fn open(path: &str, baud: u32) -> Result<Self, LinkError> {
        let mut port = serialport::new(path, baud)
            .timeout(std::time::Duration::from_millis(50))
            .open()
            .map_err(|err| LinkError::Io(io::Error::new(ErrorKind::Other, err.to_string())))?;

        port.clear(ClearBuffer::All)
            .map_err(|err| LinkError::Io(io::Error::new(ErrorKind::Other, err.to_string())))?;

        log::debug!("serial link open on {path} at {baud} baud");
        Ok(SerialLink { port })
    }
}

impl Link for SerialLink {
    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize, LinkError> {
        let timeout = remaining(deadline);
        if timeout.is_zero() {
            return Ok(0);
        }
        set_timeout(&mut self.port, timeout.min(std::time::Duration::from_millis(250)))?;

        match self.port.read(buf) {
            // With a timeout set, a real "nothing arrived yet" always
            // surfaces as `TimedOut` below; `Ok(0)` only happens if the
            // port itself has gone away.
            Ok(0) => Err(LinkError::Closed),
            Ok(n) => Ok(n),
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(LinkError::Io(err)),
        }
    }

    fn write_all(&mut self, buf: &[u8], deadline: Instant) -> Result<(), LinkError> {
        let timeout = remaining(deadline);
        if timeout.is_zero() {
            return Err(LinkError::Timeout);
        }
        set_timeout(&mut self.port, timeout)?;
        self.port.write_all(buf).map_err(|err| match err.kind() {
            ErrorKind::TimedOut => LinkError::Timeout,
            _ => LinkError::Io(err),
        })
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        self.port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        // Dropping `Box<dyn SerialPort>` closes the underlying descriptor;
        // there is nothing else to do explicitly.
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Link>, LinkError> {
        let cloned = self
            .port
            .try_clone()
            .map_err(|err| LinkError::Io(io::Error::new(ErrorKind::Other, err.to_string())))?;
        Ok(Box::new(SerialLink { port: cloned }))
    }
}

fn set_timeout(port: &mut Box<dyn SerialPort>, timeout: std::time::Duration) -> Result<(), LinkError> {
    port.set_timeout(timeout)
        .map_err(|err| LinkError::Io(io::Error::new(ErrorKind::Other, err.to_string())))
}
