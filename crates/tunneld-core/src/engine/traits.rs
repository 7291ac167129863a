use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{credentials::Credential, error::TunnelResult};

/// Trait for streams carried by a relay pair.
pub trait StreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> StreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type alias for boxed relay streams.
pub type ByteStream = Box<dyn StreamIo>;

/// Trait for establishing SSH connections from a credential.
///
/// The engine is generic over this seam so the full supervisory state
/// machine can be driven by in-memory sessions in tests.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: TunnelSession;

    /// Dial and authenticate, bounded by the credential's dial timeout.
    async fn connect(&self, credential: &Credential) -> TunnelResult<Self::Session>;
}

/// Trait for live SSH connections that can carry forwards.
///
/// Clones share the underlying connection; `close` tears it down for every
/// clone.
#[async_trait]
pub trait TunnelSession: Clone + Send + Sync + 'static {
    type Listener: RemoteListener;

    /// Open a stream to `target` through the connection (local forwards).
    async fn open_target(&self, target: &str) -> TunnelResult<ByteStream>;

    /// Bind a listener on the remote side (remote forwards). At most one
    /// listener per session; the session's listen-cycle owns it.
    async fn listen_remote(&self, listen_at: &str) -> TunnelResult<Self::Listener>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

/// Trait for remote-bound listeners accepting forwarded connections.
#[async_trait]
pub trait RemoteListener: Send + 'static {
    /// Wait for the next forwarded connection. Fails once the underlying
    /// connection is gone.
    async fn accept(&mut self) -> TunnelResult<ByteStream>;
}
