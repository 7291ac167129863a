//! Shared configuration record types for tunneld.
//!
//! These structs are intentionally dependency-light so they can be reused by
//! the config loader and the engine without pulling in protocol
//! implementations. They mirror the on-disk JSON schema; validation and
//! enrichment (direction mapping, credential resolution) happen in
//! `tunneld-core`.

use serde::{Deserialize, Serialize};

/// Top-level configuration file contents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Tunnel definitions, in file order.
    #[serde(default)]
    pub tunnel: Vec<TunnelRecord>,
    /// SSH endpoint definitions referenced by alias.
    #[serde(default, rename = "sshConfig")]
    pub ssh_config: Vec<CredentialRecord>,
}

/// One configured tunnel, prior to validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRecord {
    /// Human-readable service label, used for log correlation only.
    #[serde(default)]
    pub service: String,
    /// Forward direction: `"local"` or `"remote"`.
    #[serde(default)]
    pub direction: String,
    /// Listen address (`host:port`), bound locally or on the remote host
    /// depending on direction.
    #[serde(default)]
    pub listen_at: String,
    /// Address accepted connections are forwarded to.
    #[serde(default)]
    pub forward_to: String,
    /// Alias of the credential record carrying SSH parameters.
    #[serde(default)]
    pub ssh_alias: String,
}

/// One SSH endpoint with its authentication material, prior to resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Alias tunnels reference this record by.
    #[serde(default)]
    pub alias: String,
    /// SSH server address (`host:port`).
    #[serde(default)]
    pub address: String,
    /// Login user.
    #[serde(default)]
    pub user: String,
    /// Authentication material.
    #[serde(default)]
    pub auth: AuthRecord,
}

/// Raw authentication material for one SSH endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    /// Password, attempted before public keys. May be empty.
    #[serde(default)]
    pub pass: String,
    /// Private key paths; relative paths resolve against `~/.ssh`.
    #[serde(default)]
    pub keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_full_config() {
        let raw = r#"{
            "tunnel": [
                {"service": "pg", "direction": "local", "listenAt": "127.0.0.1:15432",
                 "forwardTo": "db.internal:5432", "sshAlias": "jump"}
            ],
            "sshConfig": [
                {"alias": "jump", "address": "bastion:22", "user": "ops",
                 "auth": {"pass": "hunter2", "keys": ["id_ed25519"]}}
            ]
        }"#;
        let conf: ConfigFile = serde_json::from_str(raw).unwrap();
        assert_eq!(conf.tunnel.len(), 1);
        assert_eq!(conf.tunnel[0].direction, "local");
        assert_eq!(conf.tunnel[0].listen_at, "127.0.0.1:15432");
        assert_eq!(conf.ssh_config[0].auth.keys, vec!["id_ed25519".to_string()]);
    }

    #[test]
    fn missing_fields_default() {
        let conf: ConfigFile = serde_json::from_str(r#"{"tunnel": [{}]}"#).unwrap();
        assert_eq!(conf.tunnel[0].service, "");
        assert!(conf.ssh_config.is_empty());
    }
}
