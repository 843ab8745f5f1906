//! Access control between peers.
//!
//! Two questions are answered here. Who is asking: a user name and password
//! checked against the configured users. May the data flow: a user may pull
//! a volume from us only if the volume's `allow` list names it, and we
//! accept entries for a volume only from relays in its `pullFrom` list.
//!
//! Passwords are never compared directly. Each configured password is kept
//! as an HMAC-SHA256 tag under a key generated at startup, and a presented
//! password is tagged the same way and verified in constant time.

use crate::config::NodeConfig;
use crate::error::{SyncError, SyncResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Which way entries move relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Entries fetched from a relay into a local volume.
    Incoming,
    /// Entries served from a local volume to a pulling peer.
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => f.write_str("receive"),
            Direction::Outgoing => f.write_str("serve"),
        }
    }
}

/// Who a data flow is with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// An authenticated inbound user.
    User(String),
    /// A configured relay, by alias.
    Relay(String),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::User(name) => write!(f, "user {name}"),
            Identity::Relay(alias) => write!(f, "relay {alias}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct VolumeAcl {
    allow: BTreeSet<String>,
    pull_from: BTreeSet<String>,
}

/// Authenticates users and authorizes data flows per volume.
pub struct AccessGate {
    key: [u8; 32],
    users: HashMap<String, [u8; 32]>,
    volumes: HashMap<String, VolumeAcl>,
}

impl fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGate")
            .field("users", &self.users.keys().collect::<BTreeSet<_>>())
            .field("volumes", &self.volumes.keys().collect::<BTreeSet<_>>())
            .finish()
    }
}

impl AccessGate {
    /// Builds the gate from a validated configuration.
    pub fn from_config(config: &NodeConfig) -> SyncResult<Self> {
        let mut gate = Self {
            key: rand::random(),
            users: HashMap::new(),
            volumes: HashMap::new(),
        };
        for user in &config.users {
            let tag = gate.tag(&user.password)?;
            gate.users.insert(user.name.clone(), tag);
        }
        for (name, volume) in &config.volumes {
            gate.volumes.insert(
                name.clone(),
                VolumeAcl {
                    allow: volume.allow.iter().cloned().collect(),
                    pull_from: volume.pull_from.iter().cloned().collect(),
                },
            );
        }
        Ok(gate)
    }

    fn mac(&self, password: &str) -> SyncResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|err| SyncError::config(format!("cannot key password MAC: {err}")))?;
        mac.update(password.as_bytes());
        Ok(mac)
    }

    fn tag(&self, password: &str) -> SyncResult<[u8; 32]> {
        Ok(self.mac(password)?.finalize().into_bytes().into())
    }

    /// Checks a user name and password.
    ///
    /// Unknown users cost the same as a wrong password.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AuthFailure`] on any mismatch.
    pub fn authenticate(&self, name: &str, password: &str) -> SyncResult<Identity> {
        let mac = self.mac(password)?;
        let verified = match self.users.get(name) {
            Some(expected) => mac.verify_slice(expected).is_ok(),
            None => {
                let _ = mac.verify_slice(&[0u8; 32]);
                false
            }
        };
        if verified {
            Ok(Identity::User(name.to_string()))
        } else {
            Err(SyncError::AuthFailure {
                peer: name.to_string(),
                reason: "invalid user name or password".to_string(),
            })
        }
    }

    /// Checks that `identity` may move entries of `volume` in `direction`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Denied`] if the flow is not configured,
    /// including every flow on a volume this node does not have.
    pub fn authorize(
        &self,
        identity: &Identity,
        volume: &str,
        direction: Direction,
    ) -> SyncResult<()> {
        let allowed = self.volumes.get(volume).is_some_and(|acl| {
            match (identity, direction) {
                (Identity::User(name), Direction::Outgoing) => acl.allow.contains(name),
                (Identity::Relay(alias), Direction::Incoming) => acl.pull_from.contains(alias),
                _ => false,
            }
        });
        if allowed {
            Ok(())
        } else {
            Err(SyncError::Denied {
                identity: identity.to_string(),
                volume: volume.to_string(),
                direction: direction.to_string(),
            })
        }
    }

    /// Users allowed to pull `volume`.
    pub fn allowed_users(&self, volume: &str) -> Vec<String> {
        self.volumes
            .get(volume)
            .map(|acl| acl.allow.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Relays `volume` pulls from.
    pub fn pull_sources(&self, volume: &str) -> Vec<String> {
        self.volumes
            .get(volume)
            .map(|acl| acl.pull_from.iter().cloned().collect())
            .unwrap_or_default()
    }
}
