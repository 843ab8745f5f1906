//! Multi-node tests for the sync engine.
//!
//! Nodes are wired together in process: each relay address `mem://<node>/`
//! resolves to that node's relay service through a shared [`Mesh`].

use async_trait::async_trait;
use bytes::Bytes;
use nullfs_journal::{BlobStore, CursorStore, JournalOptions, VolumeJournal, VolumeState};
use nullfs_protocol::{Content, JournalEntry, Operation, PullResponse, VersionStamp};
use nullfs_storage::{MemoryLog, MemoryStore, StoreAdapter, StoreConfig, StorePath};
use nullfs_sync_engine::{
    AccessGate, Credential, ErrorKind, InProcessConnector, Node, NodeConfig, PeerConnector,
    RelayNode, RelayService, StatusBoard, SyncError, SyncResult, SyncState, VolumeConfig,
    VolumeSync,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const VOLUME: &str = "docs";

fn password(user: &str) -> String {
    format!("{user}-secret")
}

fn path(p: &str) -> StorePath {
    StorePath::parse(p).unwrap()
}

/// Relay services of every node in the test, by node name.
#[derive(Clone, Default)]
struct Mesh {
    relays: Arc<Mutex<HashMap<String, Arc<RelayService>>>>,
    cut: Arc<Mutex<HashSet<(String, String)>>>,
}

impl Mesh {
    /// Configuration of `name` serving `downstream` and pulling `upstream`.
    fn config(name: &str, downstream: &[&str], upstream: &[&str]) -> NodeConfig {
        let mut volume = VolumeConfig::new(StoreConfig::Memory);
        let mut config = NodeConfig::new(name);
        for user in downstream {
            config = config.with_user(*user, password(user));
            volume = volume.allow(*user);
        }
        for relay in upstream {
            config = config.with_relay(
                *relay,
                format!("mem://{relay}/"),
                Credential::new(name, password(name)),
            );
            volume = volume.pull_from(*relay);
        }
        config.with_volume(VOLUME, volume)
    }

    async fn node(&self, name: &str, downstream: &[&str], upstream: &[&str]) -> (Node, MemoryStore) {
        self.build(Self::config(name, downstream, upstream)).await
    }

    async fn build(&self, config: NodeConfig) -> (Node, MemoryStore) {
        let store = MemoryStore::new();
        let mesh = self.clone();
        let local = config.name.clone();
        let node = Node::builder(config)
            .ephemeral()
            .with_store(VOLUME, Arc::new(store.clone()))
            .with_connector_factory(move |alias: &str, relay: &RelayNode| {
                let link: Arc<dyn PeerConnector> = Arc::new(MeshLink {
                    mesh: mesh.clone(),
                    from: local.clone(),
                    alias: alias.to_string(),
                    target: relay
                        .address
                        .trim_start_matches("mem://")
                        .trim_end_matches('/')
                        .to_string(),
                    credential: relay.auth.clone(),
                });
                Ok(link)
            })
            .build()
            .await
            .unwrap();
        self.relays
            .lock()
            .insert(node.name().to_string(), node.relay_service());
        (node, store)
    }

    /// Makes `alias` unreachable from `from`.
    fn cut(&self, from: &str, alias: &str) {
        self.cut.lock().insert((from.to_string(), alias.to_string()));
    }

    fn heal(&self, from: &str, alias: &str) {
        self.cut.lock().remove(&(from.to_string(), alias.to_string()));
    }
}

/// A connector resolving its relay on every call.
struct MeshLink {
    mesh: Mesh,
    from: String,
    alias: String,
    target: String,
    credential: Credential,
}

impl MeshLink {
    fn connect(&self) -> SyncResult<InProcessConnector> {
        let unreachable = || SyncError::Network {
            relay: self.alias.clone(),
            message: "connection refused".to_string(),
        };
        if self
            .mesh
            .cut
            .lock()
            .contains(&(self.from.clone(), self.alias.clone()))
        {
            return Err(unreachable());
        }
        let relay = self
            .mesh
            .relays
            .lock()
            .get(&self.target)
            .cloned()
            .ok_or_else(unreachable)?;
        Ok(InProcessConnector::new(
            self.alias.clone(),
            relay,
            self.credential.clone(),
        ))
    }
}

#[async_trait]
impl PeerConnector for MeshLink {
    fn relay(&self) -> &str {
        &self.alias
    }

    async fn pull(&self, volume: &str, since: Option<VersionStamp>) -> SyncResult<PullResponse> {
        self.connect()?.pull(volume, since).await
    }

    async fn fetch_blob(&self, volume: &str, hash: &str) -> SyncResult<Bytes> {
        self.connect()?.fetch_blob(volume, hash).await
    }
}

async fn cycle(node: &Node) {
    let reports = node.sync_once().await;
    for (volume, report) in reports {
        let report = report.unwrap();
        assert!(report.is_clean(), "{volume}: {:?}", report.errors);
    }
}

#[tokio::test]
async fn changes_propagate_across_two_hops() {
    let mesh = Mesh::default();
    let (a, a_store) = mesh
        .build(Mesh::config("A", &["B"], &[]).with_inline_threshold(16))
        .await;
    let (b, _) = mesh
        .build(Mesh::config("B", &["C"], &["A"]).with_inline_threshold(16))
        .await;
    let (c, c_store) = mesh.node("C", &[], &["B"]).await;

    let big = Bytes::from(vec![7u8; 1024]);
    a_store.put(&path("notes/small.txt"), Bytes::from_static(b"hi")).await.unwrap();
    a_store.put(&path("notes/big.bin"), big.clone()).await.unwrap();

    cycle(&a).await;
    cycle(&b).await;
    cycle(&c).await;

    let files = c_store.contents();
    assert_eq!(files["notes/small.txt"], Bytes::from_static(b"hi"));
    assert_eq!(files["notes/big.bin"], big);

    // C never talked to A, yet the entries keep their origin.
    let journal = &c.volume(VOLUME).unwrap().volume_state().journal;
    let winner = journal.winner("notes/big.bin").unwrap();
    assert_eq!(winner.stamp.origin, "A");
    assert!(journal.pending().is_empty());
}

#[tokio::test]
async fn an_unreachable_relay_does_not_block_the_others() {
    let mesh = Mesh::default();
    let (x, x_store) = mesh.node("X", &["E"], &[]).await;
    let (y, y_store) = mesh.node("Y", &["E"], &[]).await;
    let (e, e_store) = mesh.node("E", &[], &["X", "Y"]).await;

    x_store.put(&path("from-x"), Bytes::from_static(b"x")).await.unwrap();
    y_store.put(&path("from-y"), Bytes::from_static(b"y")).await.unwrap();
    cycle(&x).await;
    cycle(&y).await;

    mesh.cut("E", "X");
    let report = e.sync_once().await.remove(VOLUME).unwrap().unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind(), ErrorKind::Network);
    assert_eq!(report.fetched["Y"], 1);
    assert!(e_store.contents().contains_key("from-y"));
    assert!(!e_store.contents().contains_key("from-x"));

    let sync = e.volume(VOLUME).unwrap();
    assert!(sync.volume_state().cursors.relay_cursor("X").is_none());
    assert!(sync.disabled_relays().is_empty());
    let status = e.status().get(VOLUME).unwrap();
    assert!(status.relays["X"].last_error.is_some());
    assert!(status.relays["Y"].last_error.is_none());

    mesh.heal("E", "X");
    cycle(&e).await;
    assert_eq!(e_store.len(), 2);
    assert_eq!(
        sync.volume_state().cursors.relay_cursor("X"),
        Some(VersionStamp::new("X", 1))
    );
}

#[tokio::test]
async fn concurrent_writes_converge_on_the_greater_origin() {
    let mesh = Mesh::default();
    let (a, a_store) = mesh.node("A", &["B"], &["B"]).await;
    let (b, b_store) = mesh.node("B", &["A"], &["A"]).await;

    a_store.put(&path("a.txt"), Bytes::from_static(b"X")).await.unwrap();
    b_store.put(&path("a.txt"), Bytes::from_static(b"Y")).await.unwrap();

    // Both writes get counter 1; the tie goes to the greater origin.
    for _ in 0..2 {
        cycle(&a).await;
        cycle(&b).await;
    }
    assert_eq!(a_store.contents()["a.txt"], Bytes::from_static(b"Y"));
    assert_eq!(b_store.contents()["a.txt"], Bytes::from_static(b"Y"));

    for node in [&a, &b] {
        let winner = node
            .volume(VOLUME)
            .unwrap()
            .volume_state()
            .journal
            .winner("a.txt")
            .unwrap();
        assert_eq!(winner.stamp, VersionStamp::new("B", 1));
    }
}

#[tokio::test]
async fn later_delete_wins_over_earlier_write() {
    let mesh = Mesh::default();
    let (a, a_store) = mesh.node("A", &["B"], &["B"]).await;
    let (b, b_store) = mesh.node("B", &["A"], &["A"]).await;

    a_store.put(&path("doc"), Bytes::from_static(b"v1")).await.unwrap();
    cycle(&a).await;
    cycle(&b).await;
    assert!(b_store.contents().contains_key("doc"));

    b_store.delete(&path("doc")).await.unwrap();
    cycle(&b).await;
    cycle(&a).await;
    assert!(a_store.is_empty());

    // The tombstone is not resurrected by another round.
    cycle(&b).await;
    cycle(&a).await;
    assert!(a_store.is_empty());
    assert!(b_store.is_empty());
}

#[tokio::test]
async fn local_writes_are_stamped_after_everything_seen() {
    let mesh = Mesh::default();
    let (b, b_store) = mesh.node("B", &["L"], &[]).await;
    let (l, l_store) = mesh.node("L", &[], &["B"]).await;

    for i in 0..9 {
        b_store
            .put(&path(&format!("f{i}")), Bytes::from(format!("{i}")))
            .await
            .unwrap();
    }
    cycle(&b).await;
    cycle(&l).await;
    assert_eq!(l_store.len(), 9);

    l_store.put(&path("mine"), Bytes::from_static(b"m")).await.unwrap();
    cycle(&l).await;
    let journal = &l.volume(VOLUME).unwrap().volume_state().journal;
    assert_eq!(
        journal.winner("mine").unwrap().stamp,
        VersionStamp::new("L", 10)
    );
}

#[tokio::test]
async fn bad_credentials_disable_only_that_relay() {
    let mesh = Mesh::default();
    let (x, x_store) = mesh.node("X", &["E"], &[]).await;
    let (y, y_store) = mesh.node("Y", &["E"], &[]).await;
    let config = Mesh::config("E", &[], &["X", "Y"]).with_relay(
        "X",
        "mem://X/",
        Credential::new("E", "not-the-password"),
    );
    let (e, e_store) = mesh.build(config).await;

    x_store.put(&path("from-x"), Bytes::from_static(b"x")).await.unwrap();
    y_store.put(&path("from-y"), Bytes::from_static(b"y")).await.unwrap();
    cycle(&x).await;
    cycle(&y).await;

    let report = e.sync_once().await.remove(VOLUME).unwrap().unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind(), ErrorKind::Auth);
    let sync = e.volume(VOLUME).unwrap();
    assert_eq!(sync.disabled_relays(), vec!["X".to_string()]);

    y_store.put(&path("more-y"), Bytes::from_static(b"y2")).await.unwrap();
    cycle(&y).await;
    cycle(&e).await;
    let files = e_store.contents();
    assert!(files.contains_key("more-y"));
    assert!(!files.contains_key("from-x"));
    assert!(e.status().get(VOLUME).unwrap().relays["X"].disabled);
}

#[tokio::test]
async fn a_user_outside_the_allow_list_is_refused() {
    let mesh = Mesh::default();
    let (hub, hub_store) = mesh.node("hub", &["friend"], &[]).await;
    let config = Mesh::config("stranger", &[], &["hub"]);
    let (stranger, stranger_store) = mesh.build(config).await;

    hub_store.put(&path("secret"), Bytes::from_static(b"s")).await.unwrap();
    cycle(&hub).await;

    let report = stranger.sync_once().await.remove(VOLUME).unwrap().unwrap();
    assert_eq!(report.errors[0].kind(), ErrorKind::Auth);
    assert!(stranger_store.is_empty());
}

#[tokio::test]
async fn entries_left_pending_by_a_crash_are_applied_once() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let files = dir.path().join("files");

    // A previous run journaled the entry but died before applying it.
    {
        let state =
            VolumeState::open(&data_dir, VOLUME, "B", JournalOptions::default()).unwrap();
        state
            .journal
            .append_remote(vec![JournalEntry::new(
                VOLUME,
                "a.txt",
                Operation::Update,
                Content::Inline(Bytes::from_static(b"from A")),
                VersionStamp::new("A", 7),
            )])
            .unwrap();
    }

    let config = NodeConfig::new("B").with_data_dir(&data_dir).with_volume(
        VOLUME,
        VolumeConfig::new(StoreConfig::Local {
            root: files.clone(),
        }),
    );
    let node = Node::builder(config.clone()).build().await.unwrap();
    let recovery = node.recover().await;
    assert!(recovery.is_complete());
    assert_eq!(recovery.volumes[0].reapplied, 1);

    let sync = node.volume(VOLUME).unwrap();
    assert_eq!(
        sync.store().get(&path("a.txt")).await.unwrap(),
        Bytes::from_static(b"from A")
    );

    // The applied file is not journaled again as a local change.
    let report = node.sync_once().await.remove(VOLUME).unwrap().unwrap();
    assert_eq!(report.scanned.total(), 0);
    assert_eq!(sync.volume_state().journal.len(), 1);
    drop(node);

    // Nothing is left to recover after a clean restart.
    let node = Node::builder(config).build().await.unwrap();
    let recovery = node.recover().await;
    assert_eq!(recovery.volumes[0].found_pending, 0);
}

#[tokio::test]
async fn a_journal_write_failure_halts_the_volume() {
    let log = MemoryLog::new();
    let switch = log.failure_switch();
    let journal =
        VolumeJournal::with_backend(Box::new(log), VOLUME, "N", JournalOptions::default()).unwrap();
    let state = VolumeState::from_parts(journal, CursorStore::in_memory(), BlobStore::in_memory());
    let store = MemoryStore::new();
    let status = StatusBoard::new();
    let gate = Arc::new(AccessGate::from_config(&NodeConfig::new("N")).unwrap());
    let sync = VolumeSync::new(state, Arc::new(store.clone()), gate, status.clone());

    store.put(&path("ok"), Bytes::from_static(b"1")).await.unwrap();
    assert!(sync.run_cycle().await.unwrap().is_clean());

    switch.store(true, Ordering::SeqCst);
    store.put(&path("lost"), Bytes::from_static(b"2")).await.unwrap();
    assert!(matches!(sync.run_cycle().await, Err(SyncError::Halted(_))));
    assert!(sync.is_halted());

    let volume = status.get(VOLUME).unwrap();
    assert!(volume.halted);
    assert_eq!(volume.state, SyncState::Halted);
    assert_eq!(volume.last_error.unwrap().kind, ErrorKind::WriteFailure);

    // A halted volume stays halted even once the disk recovers.
    switch.store(false, Ordering::SeqCst);
    assert!(matches!(sync.run_cycle().await, Err(SyncError::Halted(_))));
    assert_eq!(sync.volume_state().journal.len(), 1);
}

#[tokio::test]
async fn node_info_describes_relays_and_volumes() {
    let mesh = Mesh::default();
    let (node, _) = mesh.node("E", &[], &["X"]).await;
    let info = node.node_info();
    assert_eq!(info.name, "E");
    assert_eq!(info.volumes, vec![VOLUME.to_string()]);
    assert_eq!(info.relays.len(), 1);
    assert_eq!(info.relays[0].alias, "X");
    assert_eq!(info.relays[0].address, "mem://X/");
}
