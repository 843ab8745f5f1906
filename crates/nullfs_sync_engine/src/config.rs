//! Node configuration.
//!
//! Loaded from YAML with camelCase keys:
//!
//! ```yaml
//! name: node-a
//! port: 7400
//! users:
//!   - { name: node-b, password: secret-b }
//! relayNodes:
//!   upstream: { address: "http://10.0.0.2:7400/", auth: { name: node-a, password: secret-a } }
//! volumes:
//!   photos:
//!     store: { kind: local, root: ./photos }
//!     allow: [node-b]
//!     pullFrom: [upstream]
//! ```

use crate::error::{SyncError, SyncResult};
use nullfs_storage::StoreConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A name and secret, used both to accept inbound peers and to present
/// ourselves to relays.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// User name.
    pub name: String,
    /// Secret. An absent password is the empty string.
    #[serde(default)]
    pub password: String,
}

impl Credential {
    /// Creates a credential.
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A peer this node pulls from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayNode {
    /// Base URL of the relay's pull endpoint.
    pub address: String,
    /// Credential presented to the relay.
    pub auth: Credential,
}

/// One synchronized volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    /// Backend holding the volume's files.
    pub store: StoreConfig,
    /// Users allowed to pull this volume from us.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Relay aliases this volume pulls from.
    #[serde(default)]
    pub pull_from: Vec<String>,
}

impl VolumeConfig {
    /// Creates a volume with no peers.
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            allow: Vec::new(),
            pull_from: Vec::new(),
        }
    }

    /// Lets `user` pull this volume.
    #[must_use]
    pub fn allow(mut self, user: impl Into<String>) -> Self {
        self.allow.push(user.into());
        self
    }

    /// Pulls this volume from `relay`.
    #[must_use]
    pub fn pull_from(mut self, relay: impl Into<String>) -> Self {
        self.pull_from.push(relay.into());
        self
    }
}

/// Complete configuration of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Node name, stamped on every locally originated entry.
    pub name: String,
    /// Listen address.
    #[serde(default = "default_address")]
    pub address: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding journals, cursors and blobs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Seconds between sync cycles of a volume.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    /// Seconds to wait for one pull request.
    #[serde(default = "default_pull_timeout_secs")]
    pub pull_timeout_secs: u64,
    /// Payloads larger than this travel as content hashes.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,
    /// Compact journals every this many cycles. Zero disables compaction.
    #[serde(default = "default_compact_every")]
    pub compact_every: u64,
    /// Credentials accepted from inbound peers.
    #[serde(default)]
    pub users: Vec<Credential>,
    /// Relays by alias.
    #[serde(default)]
    pub relay_nodes: BTreeMap<String, RelayNode>,
    /// Volumes by name.
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeConfig>,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7400
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_refresh_secs() -> u64 {
    5
}

fn default_pull_timeout_secs() -> u64 {
    30
}

fn default_inline_threshold() -> usize {
    64 * 1024
}

fn default_compact_every() -> u64 {
    100
}

impl NodeConfig {
    /// Creates a configuration with defaults and no peers or volumes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: default_address(),
            port: default_port(),
            data_dir: default_data_dir(),
            refresh_secs: default_refresh_secs(),
            pull_timeout_secs: default_pull_timeout_secs(),
            inline_threshold: default_inline_threshold(),
            compact_every: default_compact_every(),
            users: Vec::new(),
            relay_nodes: BTreeMap::new(),
            volumes: BTreeMap::new(),
        }
    }

    /// Parses and validates YAML.
    pub fn from_yaml(yaml: &str) -> SyncResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|err| SyncError::config(format!("invalid YAML: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub async fn load(path: &Path) -> SyncResult<Self> {
        let yaml = tokio::fs::read_to_string(path).await.map_err(|err| {
            SyncError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Checks cross references and limits.
    pub fn validate(&self) -> SyncResult<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::config("node name is empty"));
        }
        if self.refresh_secs < 1 {
            return Err(SyncError::config("refreshSecs must be at least 1"));
        }
        if self.pull_timeout_secs < 1 {
            return Err(SyncError::config("pullTimeoutSecs must be at least 1"));
        }

        let mut users = BTreeSet::new();
        for user in &self.users {
            if user.name.is_empty() {
                return Err(SyncError::config("user with empty name"));
            }
            if !users.insert(user.name.as_str()) {
                return Err(SyncError::config(format!("duplicate user {:?}", user.name)));
            }
        }

        for (alias, relay) in &self.relay_nodes {
            reqwest::Url::parse(&relay.address).map_err(|err| {
                SyncError::config(format!(
                    "relay {alias:?} has invalid address {:?}: {err}",
                    relay.address
                ))
            })?;
        }

        for (name, volume) in &self.volumes {
            if !is_valid_volume_name(name) {
                return Err(SyncError::config(format!("invalid volume name {name:?}")));
            }
            for alias in &volume.pull_from {
                if !self.relay_nodes.contains_key(alias) {
                    return Err(SyncError::config(format!(
                        "volume {name:?} pulls from unknown relay {alias:?}"
                    )));
                }
            }
            for user in &volume.allow {
                if !users.contains(user.as_str()) {
                    return Err(SyncError::config(format!(
                        "volume {name:?} allows unknown user {user:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Interval between sync cycles.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    /// Per-request pull timeout.
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    /// `address:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Looks up a relay by alias.
    pub fn relay(&self, alias: &str) -> SyncResult<&RelayNode> {
        self.relay_nodes
            .get(alias)
            .ok_or_else(|| SyncError::config(format!("unknown relay {alias:?}")))
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Sets the refresh interval in seconds.
    #[must_use]
    pub fn with_refresh_secs(mut self, secs: u64) -> Self {
        self.refresh_secs = secs;
        self
    }

    /// Sets the inline threshold.
    #[must_use]
    pub fn with_inline_threshold(mut self, bytes: usize) -> Self {
        self.inline_threshold = bytes;
        self
    }

    /// Sets the compaction period in cycles.
    #[must_use]
    pub fn with_compact_every(mut self, cycles: u64) -> Self {
        self.compact_every = cycles;
        self
    }

    /// Accepts `user` with `password`.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.push(Credential::new(user, password));
        self
    }

    /// Adds a relay.
    #[must_use]
    pub fn with_relay(
        mut self,
        alias: impl Into<String>,
        address: impl Into<String>,
        auth: Credential,
    ) -> Self {
        self.relay_nodes.insert(
            alias.into(),
            RelayNode {
                address: address.into(),
                auth,
            },
        );
        self
    }

    /// Adds a volume.
    #[must_use]
    pub fn with_volume(mut self, name: impl Into<String>, volume: VolumeConfig) -> Self {
        self.volumes.insert(name.into(), volume);
        self
    }
}

/// Volume names double as directory names under the data directory.
fn is_valid_volume_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: node-a
address: 127.0.0.1
port: 7401
dataDir: /var/lib/nullfs
refreshSecs: 10
users:
  - { name: node-b, password: secret-b }
  - { name: guest }
relayNodes:
  upstream: { address: "http://10.0.0.2:7400/", auth: { name: node-a, password: secret-a } }
volumes:
  photos:
    store: { kind: local, root: ./photos }
    allow: [node-b]
    pullFrom: [upstream]
  scratch:
    store: { kind: memory }
"#;

    #[test]
    fn parses_sample() {
        let config = NodeConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.name, "node-a");
        assert_eq!(config.listen_addr(), "127.0.0.1:7401");
        assert_eq!(config.refresh_interval(), Duration::from_secs(10));
        assert_eq!(config.pull_timeout(), Duration::from_secs(30));
        assert_eq!(config.inline_threshold, 64 * 1024);
        assert_eq!(config.users[1].password, "");
        assert_eq!(
            config.relay_nodes["upstream"].auth,
            Credential::new("node-a", "secret-a")
        );

        let photos = &config.volumes["photos"];
        assert_eq!(
            photos.store,
            StoreConfig::Local {
                root: PathBuf::from("./photos")
            }
        );
        assert_eq!(photos.pull_from, vec!["upstream"]);
        assert_eq!(config.volumes["scratch"].store, StoreConfig::Memory);
    }

    #[test]
    fn rejects_dangling_references() {
        let unknown_relay = NodeConfig::new("a")
            .with_volume("v", VolumeConfig::new(StoreConfig::Memory).pull_from("nowhere"));
        assert!(unknown_relay.validate().is_err());

        let unknown_user =
            NodeConfig::new("a").with_volume("v", VolumeConfig::new(StoreConfig::Memory).allow("x"));
        assert!(unknown_user.validate().is_err());

        let duplicate = NodeConfig::new("a").with_user("u", "1").with_user("u", "2");
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn rejects_bad_limits_and_names() {
        assert!(NodeConfig::new("a").with_refresh_secs(0).validate().is_err());
        assert!(NodeConfig::new(" ").validate().is_err());
        assert!(NodeConfig::new("a")
            .with_volume("../etc", VolumeConfig::new(StoreConfig::Memory))
            .validate()
            .is_err());
        assert!(NodeConfig::new("a")
            .with_relay("r", "not a url", Credential::new("a", "b"))
            .validate()
            .is_err());
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let debug = format!("{:?}", Credential::new("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
