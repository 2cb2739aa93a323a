//! Blocking TCP transport to the bridge.
//!
//! The bridge protocol has no length prefix and no terminator on responses.
//! A response is considered complete when one of these happens:
//!
//! - the peer closes the connection (zero-byte read),
//! - a read returns fewer bytes than the read buffer,
//! - the readiness wait times out after some data already arrived.
//!
//! The first wait uses the caller's idle timeout; once data has arrived the
//! wait drops to [`FOLLOW_UP_TIMEOUT`]. A timeout before any data arrives is
//! a [`BridgeError::Timeout`].

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::BridgeError;

/// Size of the fixed read buffer.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Readiness wait once the first bytes of a response have arrived.
pub const FOLLOW_UP_TIMEOUT: Duration = Duration::from_millis(500);

/// Sends one request and returns the raw response bytes.
///
/// Each call uses its own connection; implementations hold configuration
/// only, so a transport can be shared between threads.
pub trait Transport: Send + Sync {
    /// Connect, write `payload`, then read until the response is complete.
    fn send(
        &self,
        payload: &[u8],
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Vec<u8>, BridgeError>;

    /// `host:port` of the peer, for logs and errors.
    fn address(&self) -> String;
}

/// Production transport over `std::net::TcpStream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketTransport {
    host: String,
    port: u16,
}

impl SocketTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn connection_error(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::Connection {
            address: self.address(),
            message: message.into(),
        }
    }

    /// Try every resolved address in turn, each bounded by `timeout`.
    fn connect(&self, timeout: Duration) -> Result<TcpStream, BridgeError> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connection_error(format!("cannot resolve host: {e}")))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(self.connection_error(match last_error {
            Some(e) => e.to_string(),
            None => "host resolved to no address".to_string(),
        }))
    }
}

impl Transport for SocketTransport {
    fn send(
        &self,
        payload: &[u8],
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Vec<u8>, BridgeError> {
        let mut stream = self.connect(connect_timeout)?;
        let io_error = |e: std::io::Error| self.connection_error(e.to_string());

        stream
            .set_write_timeout(Some(connect_timeout))
            .map_err(io_error)?;
        stream.write_all(payload).map_err(io_error)?;
        stream.flush().map_err(io_error)?;

        let mut response = Vec::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut wait = idle_timeout;

        loop {
            // A zero read timeout is rejected by the OS.
            stream
                .set_read_timeout(Some(wait.max(Duration::from_millis(1))))
                .map_err(io_error)?;

            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&buf[..n]);
                    wait = FOLLOW_UP_TIMEOUT;
                    if n < READ_BUFFER_SIZE {
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if response.is_empty() {
                        return Err(BridgeError::Timeout {
                            address: self.address(),
                            timeout: idle_timeout,
                        });
                    }
                    break;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_error(e)),
            }
        }

        debug!(
            address = %self.address(),
            sent = payload.len(),
            received = response.len(),
            "Bridge exchange complete"
        );
        Ok(response)
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
