//! Integration tests for the byte relay.
//!
//! Streams are in-memory duplex pairs plus small hand-rolled failing
//! endpoints, so every test runs without sockets.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, duplex},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tunneld_core::relay::{RELAY_BUFFER_FLOOR, run_pair};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relay_preserves_bytes_and_order() {
    let (mut client, accepted) = duplex(64);
    let (target, mut backend) = duplex(64);
    let relay = tokio::spawn(run_pair(accepted, target, RELAY_BUFFER_FLOOR, CancellationToken::new()));

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();
        client
    });

    let mut received = vec![0u8; expected.len()];
    backend.read_exact(&mut received).await.unwrap();
    assert_eq!(received, expected);

    // The client half-closing ends the pair: the backend sees EOF and the
    // relay tasks wind down.
    let trailing = backend.read(&mut [0u8; 8]).await.unwrap();
    assert_eq!(trailing, 0);
    timeout(Duration::from_secs(2), relay).await.unwrap().unwrap();

    let mut client = writer.await.unwrap();
    let closed = client.read(&mut [0u8; 8]).await.unwrap();
    assert_eq!(closed, 0, "client side should be closed after wind-down");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_error_ends_both_directions() {
    let (target, mut backend) = duplex(64);
    let relay = tokio::spawn(run_pair(BrokenReader, target, RELAY_BUFFER_FLOOR, CancellationToken::new()));

    // The upstream read fails immediately; the whole pair must wind down
    // without the backend doing anything.
    timeout(Duration::from_secs(2), relay).await.unwrap().unwrap();
    let eof = backend.read(&mut [0u8; 8]).await.unwrap();
    assert_eq!(eof, 0, "backend should observe a closed stream");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn truncated_write_ends_both_directions() {
    let (mut client, accepted) = duplex(64);
    let relay = tokio::spawn(run_pair(accepted, TruncatingWriter, RELAY_BUFFER_FLOOR, CancellationToken::new()));

    client.write_all(b"doomed bytes").await.unwrap();
    timeout(Duration::from_secs(2), relay).await.unwrap().unwrap();

    let eof = client.read(&mut [0u8; 8]).await.unwrap();
    assert_eq!(eof, 0, "client side should be closed after the write failure");
}

/// Endpoint whose reads always fail; writes are accepted.
struct BrokenReader;

impl AsyncRead for BrokenReader {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
    }
}

impl AsyncWrite for BrokenReader {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Endpoint that truncates every write to zero bytes and never yields reads.
struct TruncatingWriter;

impl AsyncRead for TruncatingWriter {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for TruncatingWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(0))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
