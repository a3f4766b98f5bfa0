//! Buffered peekable connection.
//!
//! Every accepted socket is wrapped in a [`PeekableStream`] before any
//! protocol decision is made. All sniffers (TLS record, HTTP verb,
//! Minecraft handshake) share the same growable peek buffer, so bytes
//! inspected during classification are replayed to whichever runtime ends
//! up owning the connection.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Result of a peek: the available prefix and whether the stream hit EOF
/// before delivering the requested amount.
#[derive(Debug, Clone, Copy)]
pub struct Peeked<'a> {
    pub bytes: &'a [u8],
    pub eof: bool,
}

/// Adapter over a stream socket adding a cumulative, non-consuming `peek`.
///
/// Peeked bytes accumulate in a single growable buffer owned by the
/// connection; reads drain the buffer before touching the socket. The write
/// side passes straight through.
pub struct PeekableStream<S> {
    io: S,
    buf: Vec<u8>,
    pos: usize,
}

impl<S> PeekableStream<S> {
    pub fn new(io: S) -> Self {
        Self {
            io,
            buf: Vec::new(),
            pos: 0,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.io
    }

    pub fn into_inner(self) -> S {
        self.io
    }

    fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl<S: AsyncRead + Unpin> PeekableStream<S> {
    /// Return the next `n` bytes without consuming them.
    ///
    /// Repeated peeks return the same prefix; a larger peek grows the buffer
    /// by reading from the socket. When the stream ends before `n` bytes are
    /// available the partial prefix is returned with `eof` set, so callers
    /// can decide whether a short frame is acceptable.
    pub async fn peek(&mut self, n: usize) -> io::Result<Peeked<'_>> {
        while self.buffered() < n {
            let mut chunk = [0u8; 4096];
            let read = self.io.read(&mut chunk).await?;
            if read == 0 {
                return Ok(Peeked {
                    bytes: &self.buf[self.pos..],
                    eof: true,
                });
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
        Ok(Peeked {
            bytes: &self.buf[self.pos..self.pos + n],
            eof: false,
        })
    }
}

impl PeekableStream<TcpStream> {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.io.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.io.peer_addr()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos < self.buf.len() {
            let this = &mut *self;
            let available = &this.buf[this.pos..];
            let to_copy = available.len().min(out.remaining());
            out.put_slice(&available[..to_copy]);
            this.pos += to_copy;
            if this.pos == this.buf.len() {
                this.buf.clear();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.io).poll_read(cx, out)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

/// Shared seat for a connection while rule predicates inspect it.
///
/// Rule evaluation needs a non-consuming peek bound into the TCP context,
/// but the connection must afterwards move into whichever runtime claims
/// it. The seat holds the stream behind an async mutex; `take` reclaims
/// exclusive ownership once the routing decision is made.
#[derive(Clone)]
pub struct SharedConn {
    inner: Arc<Mutex<Option<PeekableStream<TcpStream>>>>,
}

impl SharedConn {
    pub fn new(stream: PeekableStream<TcpStream>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(stream))),
        }
    }

    /// Peek up to `n` bytes, copied out of the connection buffer. Returns a
    /// shorter buffer when the stream ended early.
    pub async fn peek(&self, n: usize) -> io::Result<Bytes> {
        let mut guard = self.inner.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let peeked = stream.peek(n).await?;
        Ok(Bytes::copy_from_slice(peeked.bytes))
    }

    pub async fn addrs(&self) -> io::Result<(SocketAddr, SocketAddr)> {
        let guard = self.inner.lock().await;
        let stream = guard
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        Ok((stream.local_addr()?, stream.peer_addr()?))
    }

    /// Reclaim the stream. Later peeks through this seat fail.
    pub async fn take(&self) -> Option<PeekableStream<TcpStream>> {
        self.inner.lock().await.take()
    }
}

/// A buffered connection promoted to its TCP form, handed to TCP services.
pub struct TcpConn {
    stream: PeekableStream<TcpStream>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TcpConn {
    pub fn new(stream: PeekableStream<TcpStream>) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            local_addr,
            peer_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn into_stream(self) -> PeekableStream<TcpStream> {
        self.stream
    }
}

impl AsyncRead for TcpConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, out)
    }
}

impl AsyncWrite for TcpConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn peek_is_idempotent_and_cumulative() {
        let (mut client, server) = duplex(64);
        client.write_all(b"hello world").await.unwrap();

        let mut stream = PeekableStream::new(server);
        let first = stream.peek(5).await.unwrap();
        assert_eq!(first.bytes, b"hello");
        assert!(!first.eof);

        // Same prefix on a repeated peek of the same size.
        let again = stream.peek(5).await.unwrap();
        assert_eq!(again.bytes, b"hello");

        // A larger peek extends the window but keeps the prefix.
        let more = stream.peek(11).await.unwrap();
        assert_eq!(more.bytes, b"hello world");
    }

    #[tokio::test]
    async fn read_drains_peeked_bytes_first() {
        let (mut client, server) = duplex(64);
        client.write_all(b"abcdef").await.unwrap();
        drop(client);

        let mut stream = PeekableStream::new(server);
        assert_eq!(stream.peek(4).await.unwrap().bytes, b"abcd");

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[tokio::test]
    async fn short_stream_reports_eof_with_partial_buffer() {
        let (mut client, server) = duplex(64);
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let mut stream = PeekableStream::new(server);
        let peeked = stream.peek(10).await.unwrap();
        assert_eq!(peeked.bytes, b"abc");
        assert!(peeked.eof);
    }

    #[tokio::test]
    async fn writes_pass_through_unbuffered() {
        let (mut client, server) = duplex(64);
        let mut stream = PeekableStream::new(server);
        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
