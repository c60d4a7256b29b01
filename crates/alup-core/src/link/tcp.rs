use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use super::remaining;
use crate::error::LinkError;
use crate::link::Link;

/// Default TCP port a controller listens on (spec.md §6).
pub const DEFAULT_PORT: u16 = 5012;

/// A [`Link`] over a plain TCP socket, `TCP_NODELAY` set so a frame's
/// bytes leave in one segment instead of waiting on Nagle's algorithm
/// (spec.md §6).
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    pub fn connect(host: &str, port: u16, deadline: Instant) -> Result<Self, LinkError> {
        let addr = format!("{host}:{port}");
        let socket_addr = addr
            .parse()
            .or_else(|_| {
                use std::net::ToSocketAddrs;
                addr.to_socket_addrs()?.next().ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no address"))
            })
            .map_err(LinkError::Io)?;

        let stream = TcpStream::connect_timeout(&socket_addr, remaining(deadline))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(std::time::Duration::from_millis(250)))?;
        stream.set_write_timeout(Some(remaining(deadline).max(std::time::Duration::from_millis(1))))?;

        log::debug!("tcp link connected to {addr}");
        Ok(TcpLink { stream })
    }
}

impl Link for TcpLink {
    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize, LinkError> {
        let timeout = remaining(deadline);
        if timeout.is_zero() {
            return Ok(0);
        }
        self.stream.set_read_timeout(Some(timeout.min(std::time::Duration::from_millis(250))))?;
        match self.stream.read(buf) {
            // `TcpStream::read` returning `Ok(0)` always means the peer
            // closed its write half — a timeout with no data surfaces as
            // `WouldBlock`/`TimedOut` below, never as `Ok(0)`.
            Ok(0) => Err(LinkError::Closed),
            Ok(n) => Ok(n),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(err) => Err(LinkError::Io(err)),
        }
    }

    fn write_all(&mut self, buf: &[u8], deadline: Instant) -> Result<(), LinkError> {
        let timeout = remaining(deadline);
        if timeout.is_zero() {
            return Err(LinkError::Timeout);
        }
        self.stream.set_write_timeout(Some(timeout))?;
        self.stream.write_all(buf).map_err(|err| match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => LinkError::Timeout,
            _ => LinkError::Io(err),
        })
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        self.stream.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.stream.shutdown(std::net::Shutdown::Both).or_else(|err| match err.kind() {
            ErrorKind::NotConnected => Ok(()),
            _ => Err(err),
        })?;
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Link>, LinkError> {
        Ok(Box::new(TcpLink { stream: self.stream.try_clone()? }))
    }
}
