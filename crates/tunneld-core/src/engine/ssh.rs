use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{
    Channel, Disconnect,
    client::{self, Handle, Msg},
    keys::{PrivateKeyWithHashAlg, PublicKey},
};
use secrecy::ExposeSecret;
use tokio::{
    sync::{Mutex, mpsc},
    time::timeout,
};
use tracing::{debug, info, warn};

use super::traits::{ByteStream, Connector, RemoteListener, TunnelSession};
use crate::{
    credentials::Credential,
    error::{TunnelError, TunnelResult},
};

/// SSH-backed connector used by the daemon.
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, credential: &Credential) -> TunnelResult<SshSession> {
        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
        let handler = TunnelHandler {
            forwarded: forwarded_tx,
        };
        let address = credential.address.clone();
        let mut handle = timeout(
            credential.dial_timeout,
            client::connect(self.config.clone(), address.as_str(), handler),
        )
        .await
        .map_err(|_| TunnelError::DialTimeout {
            address: address.clone(),
            seconds: credential.dial_timeout.as_secs(),
        })??;
        authenticate(&mut handle, credential).await?;
        Ok(SshSession {
            handle: Arc::new(Mutex::new(handle)),
            forwarded: Arc::new(Mutex::new(Some(forwarded_rx))),
        })
    }
}

/// Attempt the credential's auth methods in their fixed order: password
/// first, then each configured signer.
async fn authenticate(handle: &mut Handle<TunnelHandler>, credential: &Credential) -> TunnelResult<()> {
    match handle
        .authenticate_password(credential.user.clone(), credential.password.expose_secret().to_string())
        .await
    {
        Ok(result) if result.success() => {
            debug!(method = "password", "authentication succeeded");
            return Ok(());
        }
        Ok(_) => debug!(method = "password", "authentication rejected by server"),
        Err(err) => warn!(method = "password", error = %err, "authentication attempt failed"),
    }

    let rsa_hint = handle.best_supported_rsa_hash().await.unwrap_or(None).flatten();
    for signer in &credential.signers {
        let hash_alg = if signer.algorithm().is_rsa() { rsa_hint } else { None };
        let key = PrivateKeyWithHashAlg::new(Arc::clone(signer), hash_alg);
        match handle.authenticate_publickey(credential.user.clone(), key).await {
            Ok(result) if result.success() => {
                debug!(method = "publickey", "authentication succeeded");
                return Ok(());
            }
            Ok(_) => debug!(method = "publickey", "authentication rejected by server"),
            Err(err) => warn!(method = "publickey", error = %err, "authentication attempt failed"),
        }
    }

    Err(TunnelError::AuthRejected {
        user: credential.user.clone(),
        address: credential.address.clone(),
    })
}

/// Client handler: accepts any host key (the credential policy) and routes
/// forwarded-tcpip channels to the session's remote listener.
struct TunnelHandler {
    forwarded: mpsc::UnboundedSender<Channel<Msg>>,
}

impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!(
            bound = %format!("{connected_address}:{connected_port}"),
            origin = %format!("{originator_address}:{originator_port}"),
            "forwarded connection opened"
        );
        // A gone receiver means the listen-cycle is over; dropping the
        // channel closes it.
        let _ = self.forwarded.send(channel);
        Ok(())
    }
}

/// A live, authenticated SSH connection. Clones share the connection.
#[derive(Clone)]
pub struct SshSession {
    handle: Arc<Mutex<Handle<TunnelHandler>>>,
    forwarded: Arc<Mutex<Option<mpsc::UnboundedReceiver<Channel<Msg>>>>>,
}

#[async_trait]
impl TunnelSession for SshSession {
    type Listener = ForwardedChannels;

    async fn open_target(&self, target: &str) -> TunnelResult<ByteStream> {
        let (host, port) = split_host_port(target)?;
        let channel = self
            .handle
            .lock()
            .await
            .channel_open_direct_tcpip(host, port.into(), "127.0.0.1", 0)
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn listen_remote(&self, listen_at: &str) -> TunnelResult<ForwardedChannels> {
        let (host, port) = split_host_port(listen_at)?;
        let receiver = self
            .forwarded
            .lock()
            .await
            .take()
            .ok_or_else(|| TunnelError::Other("remote listener already taken for this connection".into()))?;
        let assigned = self.handle.lock().await.tcpip_forward(host, port.into()).await?;
        if assigned != 0 && assigned != u32::from(port) {
            info!(requested = port, assigned, "server bound a different listen port");
        }
        Ok(ForwardedChannels { receiver })
    }

    async fn close(&self) {
        let handle = self.handle.lock().await;
        let _ = handle.disconnect(Disconnect::ByApplication, "", "").await;
    }
}

/// Remote-bound listener: the stream of forwarded-tcpip channels the server
/// opens for our listen address.
pub struct ForwardedChannels {
    receiver: mpsc::UnboundedReceiver<Channel<Msg>>,
}

#[async_trait]
impl RemoteListener for ForwardedChannels {
    async fn accept(&mut self) -> TunnelResult<ByteStream> {
        let channel = self.receiver.recv().await.ok_or(TunnelError::ConnectionClosed)?;
        Ok(Box::new(channel.into_stream()))
    }
}

/// Split `host:port`, tolerating bracketed IPv6 hosts.
fn split_host_port(address: &str) -> TunnelResult<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| TunnelError::InvalidListenAddress(address.to_string()))?;
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| TunnelError::InvalidListenAddress(address.to_string()))?;
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_host_port() {
        assert_eq!(split_host_port("0.0.0.0:8022").unwrap(), ("0.0.0.0".to_string(), 8022));
    }

    #[test]
    fn splits_bracketed_ipv6() {
        assert_eq!(split_host_port("[::1]:1080").unwrap(), ("::1".to_string(), 1080));
    }

    #[test]
    fn rejects_missing_or_bad_port() {
        assert!(split_host_port("localhost").is_err());
        assert!(split_host_port("localhost:http").is_err());
    }
}
