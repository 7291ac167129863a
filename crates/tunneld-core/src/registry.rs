use std::{collections::HashMap, fmt, sync::Arc};

use tracing::warn;
use tunneld_types::TunnelRecord;

use crate::{
    credentials::Credential,
    error::{TunnelError, TunnelResult},
};

/// Forward direction of a tunnel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Listen on the local host; dial the target through the SSH connection.
    Local,
    /// Listen on the remote host over the SSH connection; dial the target
    /// directly from the local host.
    Remote,
}

impl Direction {
    /// Map the configured direction string; anything but `"local"` or
    /// `"remote"` is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Direction::Local),
            "remote" => Some(Direction::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Local => f.write_str("local"),
            Direction::Remote => f.write_str("remote"),
        }
    }
}

/// A validated, immutable tunnel definition.
///
/// Exactly one descriptor exists per configured tunnel; it is owned by its
/// supervisory task for the task's lifetime.
#[derive(Clone, Debug)]
pub struct TunnelDescriptor {
    /// Service label, used for log correlation.
    pub service: String,
    pub direction: Direction,
    /// Listen address (`host:port`).
    pub listen_at: String,
    /// Forward-target address (`host:port`).
    pub forward_to: String,
    /// Resolved SSH parameters.
    pub credential: Arc<Credential>,
}

/// Validate tunnel records against the resolved credential map.
///
/// Records with an unknown direction or an unresolved alias are dropped
/// individually; order is preserved and duplicates are allowed (each gets
/// its own supervisory task). An empty result is a startup failure: the
/// engine must never be started with zero tunnels.
pub fn build(records: &[TunnelRecord], credentials: &HashMap<String, Arc<Credential>>) -> TunnelResult<Vec<TunnelDescriptor>> {
    let mut descriptors = Vec::with_capacity(records.len());
    for record in records {
        let Some(direction) = Direction::parse(&record.direction) else {
            warn!(service = %record.service, direction = %record.direction, "unknown tunnel direction; skipping");
            continue;
        };
        let Some(credential) = credentials.get(&record.ssh_alias) else {
            warn!(service = %record.service, alias = %record.ssh_alias, "tunnel references unknown ssh alias; skipping");
            continue;
        };
        descriptors.push(TunnelDescriptor {
            service: record.service.clone(),
            direction,
            listen_at: record.listen_at.clone(),
            forward_to: record.forward_to.clone(),
            credential: Arc::clone(credential),
        });
    }
    if descriptors.is_empty() {
        return Err(TunnelError::NoTunnels);
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> HashMap<String, Arc<Credential>> {
        let mut map = HashMap::new();
        map.insert(
            "jump".to_string(),
            Arc::new(Credential::new(
                "jump".into(),
                "bastion:22".into(),
                "ops".into(),
                "hunter2".into(),
                Vec::new(),
            )),
        );
        map
    }

    fn record(service: &str, direction: &str, alias: &str) -> TunnelRecord {
        TunnelRecord {
            service: service.into(),
            direction: direction.into(),
            listen_at: "127.0.0.1:15432".into(),
            forward_to: "db.internal:5432".into(),
            ssh_alias: alias.into(),
        }
    }

    #[test]
    fn maps_both_directions() {
        let records = [record("a", "local", "jump"), record("b", "remote", "jump")];
        let descriptors = build(&records, &credentials()).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].direction, Direction::Local);
        assert_eq!(descriptors[1].direction, Direction::Remote);
    }

    #[test]
    fn unknown_direction_drops_record() {
        let records = [record("a", "local", "jump"), record("b", "bogus", "jump")];
        let descriptors = build(&records, &credentials()).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].service, "a");
    }

    #[test]
    fn unknown_alias_drops_record() {
        let records = [record("a", "local", "jump"), record("b", "remote", "other")];
        let descriptors = build(&records, &credentials()).unwrap();
        assert_eq!(descriptors.len(), 1);
    }

    #[test]
    fn duplicates_are_kept_in_order() {
        let records = [record("a", "local", "jump"), record("a", "local", "jump")];
        let descriptors = build(&records, &credentials()).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert!(Arc::ptr_eq(&descriptors[0].credential, &descriptors[1].credential));
    }

    #[test]
    fn empty_result_is_a_startup_failure() {
        let records = [record("a", "bogus", "jump")];
        assert!(matches!(build(&records, &credentials()), Err(TunnelError::NoTunnels)));
        assert!(matches!(build(&[], &credentials()), Err(TunnelError::NoTunnels)));
    }
}
