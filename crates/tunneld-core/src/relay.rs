//! Bidirectional byte relay.
//!
//! A relay pair is two independent one-directional pump tasks over the split
//! halves of two connected streams. Either pump ending (read EOF, read
//! error, or write error; a truncated write surfaces as `WriteZero`) cancels
//! the pair token and shuts its write half down, which winds the peer pump
//! down within one buffer-sized step. Relay failures are connection-scoped:
//! they are logged and never escalate to the owning tunnel.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Smallest relay buffer the engine will operate with.
pub const RELAY_BUFFER_FLOOR: usize = 4 * 1024;

/// Environment variable consulted once at process start for the relay
/// buffer size.
pub const RELAY_BUFFER_ENV: &str = "TUNNELD_RELAY_BUFFER_SIZE";

/// Read the relay buffer size from the environment, clamped to the floor.
pub fn buffer_size_from_env() -> usize {
    effective_buffer_size(std::env::var(RELAY_BUFFER_ENV).ok().as_deref())
}

/// Clamp a configured buffer size: unparseable or below-floor values yield
/// the floor, anything at or above it is used as-is.
pub fn effective_buffer_size(configured: Option<&str>) -> usize {
    let requested = configured.and_then(|value| value.trim().parse::<usize>().ok()).unwrap_or(0);
    requested.max(RELAY_BUFFER_FLOOR)
}

/// Direction tag carried by each pump, for diagnostic detail only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowDirection {
    /// Accepted side towards the forward target.
    Upstream,
    /// Forward target back towards the accepted side.
    Downstream,
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowDirection::Upstream => f.write_str("upstream"),
            FlowDirection::Downstream => f.write_str("downstream"),
        }
    }
}

/// Relay bytes between two connected streams until either direction ends.
///
/// `accepted` is the stream handed out by the listener, `target` the stream
/// opened towards the forward target. Returns once both pump tasks have
/// finished; both streams are closed by then.
pub async fn run_pair<A, T>(accepted: A, target: T, buffer: usize, pair: CancellationToken)
where
    A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (accepted_read, accepted_write) = tokio::io::split(accepted);
    let (target_read, target_write) = tokio::io::split(target);
    let upstream = tokio::spawn(pump(accepted_read, target_write, buffer, FlowDirection::Upstream, pair.clone()));
    let downstream = tokio::spawn(pump(target_read, accepted_write, buffer, FlowDirection::Downstream, pair));
    let _ = upstream.await;
    let _ = downstream.await;
}

async fn pump<R, W>(mut src: R, mut dst: W, buffer: usize, direction: FlowDirection, pair: CancellationToken)
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut buf = vec![0u8; buffer];
    let outcome: std::io::Result<()> = async {
        loop {
            let read = tokio::select! {
                _ = pair.cancelled() => return Ok(()),
                read = src.read(&mut buf) => read?,
            };
            if read == 0 {
                return Ok(());
            }
            dst.write_all(&buf[..read]).await?;
            trace!(direction = %direction, written = read, "relayed bytes");
        }
    }
    .await;

    // Either side ending winds down the whole pair.
    pair.cancel();
    let _ = dst.shutdown().await;
    match outcome {
        Ok(()) => debug!(direction = %direction, "relay ended"),
        Err(err) => debug!(direction = %direction, error = %err, "relay ended with error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_floor_values_clamp_up() {
        assert_eq!(effective_buffer_size(Some("100")), RELAY_BUFFER_FLOOR);
        assert_eq!(effective_buffer_size(Some("0")), RELAY_BUFFER_FLOOR);
    }

    #[test]
    fn at_or_above_floor_is_honored() {
        assert_eq!(effective_buffer_size(Some("4096")), 4096);
        assert_eq!(effective_buffer_size(Some("8192")), 8192);
    }

    #[test]
    fn unparseable_or_absent_values_yield_the_floor() {
        assert_eq!(effective_buffer_size(Some("lots")), RELAY_BUFFER_FLOOR);
        assert_eq!(effective_buffer_size(Some("")), RELAY_BUFFER_FLOOR);
        assert_eq!(effective_buffer_size(None), RELAY_BUFFER_FLOOR);
    }
}
