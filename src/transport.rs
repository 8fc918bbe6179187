//! TCP transport (consumed collaborator, §6): a byte-stream abstraction the
//! core drives without requiring TLS — Companion runs plaintext on the wire,
//! with AEAD applied by this crate itself post-Pair-Verify.

use crate::HapError;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Minimal connect/send/recv contract a [`crate::Session`] needs from its
/// transport. Implemented here for plain TCP; tests substitute an in-memory
/// duplex pipe (see `StreamTransport::from_stream`).
pub trait Transport: crate::ReadWrite {}
impl<T: crate::ReadWrite> Transport for T {}

/// A byte-stream transport wrapping any [`Transport`], framed the way
/// [`crate::Session`] expects: send raw bytes, receive whatever chunk is
/// currently available.
///
/// Generic over the underlying stream so the same send/recv contract backs
/// both a real `TcpStream` and, in tests, one half of a `tokio::io::duplex`
/// pipe standing in for the Apple TV side of the connection.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
}

impl<S: Transport> StreamTransport<S> {
    #[must_use]
    pub fn from_stream(stream: S) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), HapError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Read whatever is currently available, up to a generous internal
    /// buffer. Returns `Err(TransportClosed)` if the peer shut down cleanly
    /// with zero bytes.
    pub async fn recv(&mut self) -> Result<Vec<u8>, HapError> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Err(HapError::TransportClosed);
        }
        buf.truncate(n);
        Ok(buf)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Shut down the write half, signalling the peer this side is done.
    /// Best-effort: used to tear down a cancelled or poisoned session.
    pub async fn shutdown(&mut self) -> Result<(), HapError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl StreamTransport<TcpStream> {
    pub async fn connect(host: Ipv4Addr, port: u16, connect_timeout: Duration) -> Result<Self, HapError> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| HapError::Timeout)??;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }
}

/// Default TCP-backed transport.
pub type TcpTransport = StreamTransport<TcpStream>;
