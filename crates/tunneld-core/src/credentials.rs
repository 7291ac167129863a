use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use russh::keys::{self, PrivateKey};
use secrecy::SecretString;
use tracing::{error, warn};
use tunneld_types::CredentialRecord;

use crate::error::{TunnelError, TunnelResult};

/// Connection-establishment timeout applied to every SSH dial.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// How server host keys are verified.
///
/// Only accept-any is implemented: tunnels are expected to run unattended
/// against operator-controlled endpoints, so the daemon never blocks on an
/// unknown fingerprint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    #[default]
    AcceptAny,
}

/// Resolved SSH parameters for one alias.
///
/// Immutable after construction and shared by reference across every tunnel
/// descriptor referencing the alias; safe for concurrent dials.
pub struct Credential {
    /// Alias the record was configured under.
    pub alias: String,
    /// SSH server address (`host:port`).
    pub address: String,
    /// Login user.
    pub user: String,
    /// Password, attempted before public keys. May be empty.
    pub password: SecretString,
    /// Parsed private-key signers, attempted in configured order.
    pub signers: Vec<Arc<PrivateKey>>,
    /// Dial timeout, fixed at [`DIAL_TIMEOUT`].
    pub dial_timeout: Duration,
    /// Host-key verification policy.
    pub host_keys: HostKeyPolicy,
}

impl Credential {
    pub fn new(alias: String, address: String, user: String, password: String, signers: Vec<Arc<PrivateKey>>) -> Self {
        Self {
            alias,
            address,
            user,
            password: SecretString::new(password.into_boxed_str()),
            signers,
            dial_timeout: DIAL_TIMEOUT,
            host_keys: HostKeyPolicy::AcceptAny,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("alias", &self.alias)
            .field("address", &self.address)
            .field("user", &self.user)
            .field("signers", &self.signers.len())
            .finish_non_exhaustive()
    }
}

/// Resolve raw credential records into ready-to-dial credentials, keyed by
/// alias.
///
/// Keys that fail to resolve or parse are skipped individually; a record is
/// dropped only when it ends up with neither a password nor a signer. An
/// empty result is a startup failure.
pub fn resolve(records: &[CredentialRecord]) -> TunnelResult<HashMap<String, Arc<Credential>>> {
    let mut resolved = HashMap::new();
    for record in records {
        let signers = load_signers(&record.auth.keys);
        if signers.is_empty() && record.auth.pass.is_empty() {
            warn!(alias = %record.alias, "credential has no usable auth method; skipping");
            continue;
        }
        resolved.insert(
            record.alias.clone(),
            Arc::new(Credential::new(
                record.alias.clone(),
                record.address.clone(),
                record.user.clone(),
                record.auth.pass.clone(),
                signers,
            )),
        );
    }
    if resolved.is_empty() {
        return Err(TunnelError::NoCredentials);
    }
    Ok(resolved)
}

fn load_signers(paths: &[String]) -> Vec<Arc<PrivateKey>> {
    let mut signers = Vec::with_capacity(paths.len());
    for raw in paths {
        match load_signer(raw) {
            Ok(key) => signers.push(Arc::new(key)),
            Err(err) => error!(path = %raw, error = %err, "ssh key skipped"),
        }
    }
    signers
}

fn load_signer(raw: &str) -> TunnelResult<PrivateKey> {
    let path = resolve_key_path(raw)?;
    keys::load_secret_key(&path, None).map_err(|err| TunnelError::Other(format!("{}: {err}", path.display())))
}

/// Resolve a configured key path; relative paths live under `~/.ssh`.
fn resolve_key_path(raw: &str) -> TunnelResult<PathBuf> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return Ok(path);
    }
    dirs::home_dir()
        .map(|home| home.join(".ssh").join(&path))
        .ok_or_else(|| TunnelError::Other("unable to determine home directory".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunneld_types::AuthRecord;

    fn record(alias: &str, pass: &str, keys: Vec<String>) -> CredentialRecord {
        CredentialRecord {
            alias: alias.into(),
            address: "bastion:22".into(),
            user: "ops".into(),
            auth: AuthRecord { pass: pass.into(), keys },
        }
    }

    #[test]
    fn password_only_record_is_included() {
        let resolved = resolve(&[record("jump", "hunter2", Vec::new())]).unwrap();
        let credential = &resolved["jump"];
        assert_eq!(credential.alias, "jump");
        assert_eq!(credential.dial_timeout, DIAL_TIMEOUT);
        assert!(credential.signers.is_empty());
    }

    #[test]
    fn record_without_any_method_is_dropped() {
        let records = [record("jump", "hunter2", Vec::new()), record("bare", "", Vec::new())];
        let resolved = resolve(&records).unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(!resolved.contains_key("bare"));
    }

    #[test]
    fn unreadable_key_is_skipped_but_password_keeps_record() {
        let resolved = resolve(&[record("jump", "hunter2", vec!["/nonexistent/key".into()])]).unwrap();
        assert!(resolved["jump"].signers.is_empty());
    }

    #[test]
    fn garbage_key_without_password_drops_record() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("tunneld-bad-key-{}", std::process::id()));
        std::fs::write(&path, b"not a private key").unwrap();
        let result = resolve(&[record("jump", "", vec![path.to_string_lossy().into_owned()])]);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(TunnelError::NoCredentials)));
    }

    #[test]
    fn empty_input_is_a_startup_failure() {
        assert!(matches!(resolve(&[]), Err(TunnelError::NoCredentials)));
    }

    #[test]
    fn relative_key_paths_resolve_under_dot_ssh() {
        let resolved = resolve_key_path("id_ed25519").unwrap();
        assert!(resolved.ends_with(".ssh/id_ed25519"));
        let absolute = resolve_key_path("/etc/keys/id").unwrap();
        assert_eq!(absolute, PathBuf::from("/etc/keys/id"));
    }
}
