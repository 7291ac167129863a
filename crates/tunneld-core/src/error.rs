use thiserror::Error;

/// Errors that can occur while resolving configuration or running tunnels
#[derive(Error, Debug)]
pub enum TunnelError {
    /// No credential record yielded a usable authentication method
    #[error("no usable ssh credentials were resolved")]
    NoCredentials,

    /// No tunnel record survived validation
    #[error("no runnable tunnels were configured")]
    NoTunnels,

    /// Listen address could not be split into host and port
    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),

    /// SSH dial did not complete within the credential's timeout
    #[error("ssh dial to {address} timed out after {seconds}s")]
    DialTimeout { address: String, seconds: u64 },

    /// Server rejected every configured authentication method
    #[error("authentication rejected for {user}@{address}")]
    AuthRejected { user: String, address: String },

    /// Network binding failed
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Forward-target dial failed
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The SSH connection went away under an active listener
    #[error("ssh connection closed")]
    ConnectionClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for tunnel operations
pub type TunnelResult<T> = Result<T, TunnelError>;
