//! A complete node: volumes, their sync loops and the relay service.

use crate::access::AccessGate;
use crate::config::{NodeConfig, RelayNode};
use crate::error::{SyncError, SyncResult};
use crate::http::HttpConnector;
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::relay::RelayService;
use crate::state::{CycleReport, VolumeSync};
use crate::status::StatusBoard;
use crate::transport::PeerConnector;
use nullfs_journal::{JournalOptions, VolumeState};
use nullfs_protocol::{NodeInfo, RelaySummary};
use nullfs_storage::{open_store, StoreAdapter};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Builds the connector for a relay alias.
pub type ConnectorFactory =
    Arc<dyn Fn(&str, &RelayNode) -> SyncResult<Arc<dyn PeerConnector>> + Send + Sync>;

/// Assembles a [`Node`] from its configuration.
pub struct NodeBuilder {
    config: NodeConfig,
    stores: HashMap<String, Arc<dyn StoreAdapter>>,
    connectors: Option<ConnectorFactory>,
    journal_options: JournalOptions,
    ephemeral: bool,
}

impl NodeBuilder {
    /// Starts from `config`.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            stores: HashMap::new(),
            connectors: None,
            journal_options: JournalOptions::default(),
            ephemeral: false,
        }
    }

    /// Uses `store` for `volume` instead of opening the configured one.
    #[must_use]
    pub fn with_store(mut self, volume: impl Into<String>, store: Arc<dyn StoreAdapter>) -> Self {
        self.stores.insert(volume.into(), store);
        self
    }

    /// Replaces the HTTP connector with `factory`.
    #[must_use]
    pub fn with_connector_factory(
        mut self,
        factory: impl Fn(&str, &RelayNode) -> SyncResult<Arc<dyn PeerConnector>> + Send + Sync + 'static,
    ) -> Self {
        self.connectors = Some(Arc::new(factory));
        self
    }

    /// Sets journal options.
    #[must_use]
    pub fn with_journal_options(mut self, options: JournalOptions) -> Self {
        self.journal_options = options;
        self
    }

    /// Keeps journals, cursors and blobs in memory instead of `dataDir`.
    #[must_use]
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    /// Opens every volume and wires the node together.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, a volume directory locked by another
    /// process, a corrupted journal or a store that cannot be opened.
    pub async fn build(mut self) -> SyncResult<Node> {
        self.config.validate()?;
        let config = self.config;
        let gate = Arc::new(AccessGate::from_config(&config)?);
        let status = StatusBoard::new();

        let mut opened = Vec::with_capacity(config.volumes.len());
        for (name, volume) in &config.volumes {
            let state = if self.ephemeral {
                VolumeState::in_memory(name, &config.name)
            } else {
                let data_dir = config.data_dir.clone();
                let (name, node) = (name.clone(), config.name.clone());
                let options = self.journal_options.clone();
                tokio::task::spawn_blocking(move || {
                    VolumeState::open(&data_dir, &name, &node, options)
                })
                .await
                .map_err(|err| SyncError::Task(err.to_string()))??
            };
            let store = match self.stores.remove(name) {
                Some(store) => store,
                None => open_store(&volume.store).await?,
            };
            info!(
                volume = %name,
                store = store.kind(),
                entries = state.journal.len(),
                pending = state.journal.pending().len(),
                "volume opened"
            );
            opened.push((state, store));
        }

        let relay = Arc::new(RelayService::new(
            config.name.clone(),
            Arc::clone(&gate),
            opened.iter().map(|(state, _)| state.clone()),
        ));

        let timeout = config.pull_timeout();
        let factory: ConnectorFactory = match self.connectors {
            Some(factory) => factory,
            None => Arc::new(
                move |alias: &str, relay: &RelayNode| -> SyncResult<Arc<dyn PeerConnector>> {
                    Ok(Arc::new(HttpConnector::new(alias, relay, timeout)?))
                },
            ),
        };

        let mut volumes = Vec::with_capacity(opened.len());
        for (state, store) in opened {
            let name = state.volume().to_string();
            let mut sync = VolumeSync::new(state, store, Arc::clone(&gate), status.clone())
                .with_inline_threshold(config.inline_threshold)
                .with_compact_every(config.compact_every);
            if let Some(volume) = config.volumes.get(&name) {
                for alias in &volume.pull_from {
                    let relay_node = config.relay(alias)?;
                    sync = sync.with_relay(factory(alias, relay_node)?);
                }
            }
            volumes.push(Arc::new(sync));
        }

        Ok(Node {
            config,
            relay,
            status,
            volumes,
        })
    }
}

/// A running null.fs node.
pub struct Node {
    config: NodeConfig,
    relay: Arc<RelayService>,
    status: StatusBoard,
    volumes: Vec<Arc<VolumeSync>>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.config.name)
            .field("volumes", &self.volumes)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Starts building a node from `config`.
    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration the node was built from.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The service answering pulls from downstream peers.
    pub fn relay_service(&self) -> Arc<RelayService> {
        Arc::clone(&self.relay)
    }

    /// Shared status of every volume.
    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Sync controllers, in volume order.
    pub fn volumes(&self) -> &[Arc<VolumeSync>] {
        &self.volumes
    }

    /// The controller of `volume`.
    pub fn volume(&self, volume: &str) -> Option<&Arc<VolumeSync>> {
        self.volumes.iter().find(|sync| sync.volume() == volume)
    }

    /// Public description served at `/v1/info`.
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            name: self.config.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            relays: self
                .config
                .relay_nodes
                .iter()
                .map(|(alias, relay)| RelaySummary {
                    alias: alias.clone(),
                    address: relay.address.clone(),
                })
                .collect(),
            volumes: self.relay.volumes(),
        }
    }

    /// Applies entries left pending by a previous run.
    pub async fn recover(&self) -> RecoveryReport {
        RecoveryManager::new(self.volumes.iter().cloned())
            .recover()
            .await
    }

    /// Runs one cycle of every volume, one after another.
    pub async fn sync_once(&self) -> BTreeMap<String, SyncResult<CycleReport>> {
        let mut reports = BTreeMap::new();
        for sync in &self.volumes {
            reports.insert(sync.volume().to_string(), sync.run_cycle().await);
        }
        reports
    }

    /// Spawns one sync loop per volume. The loops stop when `cancel` fires.
    pub fn spawn_loops(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let refresh = self.config.refresh_interval();
        self.volumes
            .iter()
            .map(|sync| tokio::spawn(Arc::clone(sync).run(refresh, cancel.child_token())))
            .collect()
    }

    /// Runs every volume loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let handles = self.spawn_loops(&cancel);
        info!(node = %self.config.name, volumes = handles.len(), "sync loops running");
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "sync loop panicked");
            }
        }
    }
}
