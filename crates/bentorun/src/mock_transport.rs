//! Mock client sockets for testing.
//!
//! These are used internally by the test suite and are not part of the public API.

use std::io;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::DuplexStream;
use tokio::io::ReadBuf;

/// A duplex socket whose write side breaks after a fixed number of bytes.
///
/// Bytes within the budget reach the peer; the write that exhausts it is cut
/// short and every later write fails with `BrokenPipe`, like a client that
/// vanished mid-frame.
pub struct FailingStream {
    inner: DuplexStream,
    budget: usize,
}

impl FailingStream {
    pub fn new(inner: DuplexStream, budget: usize) -> Self {
        Self { inner, budget }
    }

    /// A connected pair: the failing server side and a plain client side.
    pub fn pair(budget: usize) -> (Self, DuplexStream) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        (Self::new(server, budget), client)
    }
}

impl AsyncRead for FailingStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FailingStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.budget == 0 {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock socket broken")));
        }
        let len = buf.len().min(self.budget);
        match Pin::new(&mut self.inner).poll_write(cx, &buf[..len]) {
            Poll::Ready(Ok(n)) => {
                self.budget -= n;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
