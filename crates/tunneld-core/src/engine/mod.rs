//! The forwarding engine: one supervisory task per tunnel descriptor, each
//! running the connect, listen, accept, teardown, retry cycle until shutdown
//! is requested.

mod ssh;
mod traits;

pub use ssh::SshConnector;
pub use traits::{ByteStream, Connector, RemoteListener, StreamIo, TunnelSession};

use std::{sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    error::{TunnelError, TunnelResult},
    registry::{Direction, TunnelDescriptor},
    relay,
};

/// Pause between listen-cycles of one tunnel, so a persistently failing
/// tunnel retries steadily instead of spinning.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Timeout for direct dials of the forward target (remote forwards).
const TARGET_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// What happens to in-flight relay pairs when their tunnel winds down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RelayPolicy {
    /// Cancel in-flight connections; shutdown stays prompt.
    #[default]
    Abort,
    /// Let in-flight connections run to completion; shutdown waits for them.
    Drain,
}

/// Engine-wide tunables, read once at process start.
#[derive(Clone, Copy, Debug)]
pub struct EngineSettings {
    /// Relay buffer size in bytes; already clamped to the floor.
    pub relay_buffer: usize,
    pub relay_policy: RelayPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            relay_buffer: relay::RELAY_BUFFER_FLOOR,
            relay_policy: RelayPolicy::default(),
        }
    }
}

/// The forwarding engine.
///
/// Owns the shutdown token and the set of supervisory tasks; tunnels are
/// fully independent failure domains and share nothing else.
pub struct Engine<C: Connector> {
    connector: Arc<C>,
    settings: EngineSettings,
    token: CancellationToken,
    supervisors: JoinSet<()>,
}

impl<C: Connector> Engine<C> {
    pub fn new(connector: C, settings: EngineSettings) -> Self {
        Self {
            connector: Arc::new(connector),
            settings,
            token: CancellationToken::new(),
            supervisors: JoinSet::new(),
        }
    }

    /// Launch one supervisory task per descriptor.
    ///
    /// Fails without spawning anything when `descriptors` is empty. Must be
    /// called from within a Tokio runtime.
    pub fn startup(&mut self, descriptors: Vec<TunnelDescriptor>) -> TunnelResult<()> {
        if descriptors.is_empty() {
            return Err(TunnelError::NoTunnels);
        }
        let count = descriptors.len();
        for descriptor in descriptors {
            let supervisor = Supervisor {
                connector: Arc::clone(&self.connector),
                token: self.token.clone(),
                settings: self.settings,
                descriptor,
            };
            self.supervisors.spawn(supervisor.run());
        }
        info!(tunnels = count, "forwarding engine started");
        Ok(())
    }

    /// Request shutdown and block until every supervisory task has
    /// terminated and released its connection and listener.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        while self.supervisors.join_next().await.is_some() {}
        info!("forwarding engine stopped");
    }
}

/// Per-tunnel supervisory state machine.
struct Supervisor<C: Connector> {
    connector: Arc<C>,
    token: CancellationToken,
    settings: EngineSettings,
    descriptor: TunnelDescriptor,
}

impl<C: Connector> Supervisor<C> {
    async fn run(self) {
        let span = info_span!(
            "tunnel",
            service = %self.descriptor.service,
            direction = %self.descriptor.direction,
        );
        self.supervise().instrument(span).await
    }

    async fn supervise(self) {
        info!(
            listen = %self.descriptor.listen_at,
            forward = %self.descriptor.forward_to,
            "tunnel supervision started"
        );
        let mut relays = JoinSet::new();
        while !self.token.is_cancelled() {
            if let Err(err) = self.cycle(&mut relays).await {
                warn!(error = %err, "listen cycle failed");
            }
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = sleep(RETRY_PAUSE) => {}
            }
        }
        self.wind_down(relays).await;
        info!("tunnel supervision stopped");
    }

    /// One listen-cycle: dial, listen, accept until failure or shutdown.
    /// The session is released on every exit path before the next cycle.
    async fn cycle(&self, relays: &mut JoinSet<()>) -> TunnelResult<()> {
        let credential = &self.descriptor.credential;
        info!(alias = %credential.alias, address = %credential.address, "ssh dial");
        let session = tokio::select! {
            _ = self.token.cancelled() => return Ok(()),
            session = self.connector.connect(credential) => session?,
        };
        let served = match self.descriptor.direction {
            Direction::Local => self.serve_local(&session, relays).await,
            Direction::Remote => self.serve_remote(&session, relays).await,
        };
        session.close().await;
        served
    }

    async fn serve_local(&self, session: &C::Session, relays: &mut JoinSet<()>) -> TunnelResult<()> {
        let listen_at = &self.descriptor.listen_at;
        let listener = TcpListener::bind(listen_at.as_str())
            .await
            .map_err(|source| TunnelError::BindFailed {
                address: listen_at.clone(),
                source,
            })?;
        info!(listen = %listen_at, "local listener ready");
        loop {
            reap_finished(relays);
            let (stream, peer) = tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            debug!(peer = %peer, "accepted connection");
            stream.set_nodelay(true).ok();
            let session = session.clone();
            let target = self.descriptor.forward_to.clone();
            let buffer = self.settings.relay_buffer;
            let pair = self.pair_token();
            relays.spawn(async move {
                match session.open_target(&target).await {
                    Ok(upstream) => relay::run_pair(stream, upstream, buffer, pair).await,
                    Err(err) => warn!(target = %target, error = %err, "target dial through tunnel failed"),
                }
            });
        }
    }

    async fn serve_remote(&self, session: &C::Session, relays: &mut JoinSet<()>) -> TunnelResult<()> {
        let listen_at = &self.descriptor.listen_at;
        let mut listener = session.listen_remote(listen_at).await?;
        info!(listen = %listen_at, "remote listener ready");
        loop {
            reap_finished(relays);
            let stream = tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            debug!("accepted forwarded connection");
            let target = self.descriptor.forward_to.clone();
            let buffer = self.settings.relay_buffer;
            let pair = self.pair_token();
            relays.spawn(async move {
                match timeout(TARGET_DIAL_TIMEOUT, TcpStream::connect(target.as_str())).await {
                    Ok(Ok(local)) => {
                        local.set_nodelay(true).ok();
                        relay::run_pair(stream, local, buffer, pair).await;
                    }
                    Ok(Err(source)) => {
                        let err = TunnelError::ConnectionFailed { address: target, source };
                        warn!(error = %err, "target dial failed");
                    }
                    Err(_) => warn!(target = %target, "target dial timed out"),
                }
            });
        }
    }

    fn pair_token(&self) -> CancellationToken {
        match self.settings.relay_policy {
            RelayPolicy::Abort => self.token.child_token(),
            RelayPolicy::Drain => CancellationToken::new(),
        }
    }

    async fn wind_down(&self, mut relays: JoinSet<()>) {
        if relays.is_empty() {
            return;
        }
        match self.settings.relay_policy {
            RelayPolicy::Abort => debug!(connections = relays.len(), "winding down in-flight connections"),
            RelayPolicy::Drain => info!(connections = relays.len(), "draining in-flight connections"),
        }
        while relays.join_next().await.is_some() {}
    }
}

/// Drop handles of relay pairs that already finished, so a long-lived
/// accept loop does not accumulate them.
fn reap_finished(relays: &mut JoinSet<()>) {
    while relays.try_join_next().is_some() {}
}
