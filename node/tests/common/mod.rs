#![allow(dead_code)]

use notary_kernel::{CommitRequest, Party, SecureHash, StateRef};
use notary_node::backends::persistent::PersistentSettings;
use notary_node::backends::retry::Backoff;
use notary_node::backends::{InMemoryProvider, PersistentProvider};
use notary_node::bft::{self, BftHandle, BftNode, BftProvider, BftReplica, BftRouter, BftTransport, KeyedSigner, ReplyDesk};
use notary_node::clock::{Clock, ManualClock};
use notary_node::config::{BftSettings, NodeId, RaftSettings};
use notary_node::provider::UniquenessProvider;
use notary_node::raft::{LocalRoutes, MemoryRouter, MemoryStorage, RaftHandle, RaftNode, RaftProvider, RaftStorage, Role};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const START_TIME: u64 = 1_700_000_000_000;
pub const BFT_SECRET: &str = "integration-secret";
pub const BFT_CLIENT: NodeId = 100;

pub fn tx(n: u32) -> SecureHash {
    SecureHash::hash_of(&n.to_le_bytes())
}

pub fn state(issuer: u32, index: u32) -> StateRef {
    StateRef::new(SecureHash::hash_of(&[b"issue".as_slice(), &issuer.to_le_bytes()].concat()), index)
}

pub fn party() -> Party {
    Party::new("O=Alice,L=London,C=GB")
}

pub fn spend(inputs: Vec<StateRef>, id: SecureHash) -> CommitRequest {
    CommitRequest::new(inputs, id, party())
}

pub fn fast_raft() -> RaftSettings {
    RaftSettings {
        tick_interval: Duration::from_millis(10),
        election_ticks: (8, 16),
        heartbeat_ticks: 2,
        snapshot_threshold: 1_000,
        max_entries_per_append: 64,
        proposal_timeout: Duration::from_secs(2),
        max_redirects: 20,
    }
}

pub fn fast_bft() -> BftSettings {
    BftSettings {
        view_change_timeout: Duration::from_millis(300),
        request_timeout: Duration::from_secs(10),
        reply_quorum: None,
        tick_interval: Duration::from_millis(10),
        max_clock_skew: Duration::from_secs(5),
        shared_secret: BFT_SECRET.to_string(),
    }
}

pub struct RaftCluster {
    pub router: MemoryRouter,
    pub handles: BTreeMap<NodeId, RaftHandle>,
    pub provider: Arc<RaftProvider>,
    pub clock: Arc<ManualClock>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RaftCluster {
    pub fn start(n: u64, settings: RaftSettings) -> Self {
        Self::start_with(n, settings, |_| Box::new(MemoryStorage))
    }

    pub fn start_with(n: u64, settings: RaftSettings, storage: impl Fn(NodeId) -> Box<dyn RaftStorage>) -> Self {
        let members: Vec<NodeId> = (1..=n).collect();
        let router = MemoryRouter::new();
        let clock = Arc::new(ManualClock::new(START_TIME));
        let cancel = CancellationToken::new();
        let mut handles = BTreeMap::new();
        let mut tasks = Vec::new();

        for id in &members {
            let (handle, task) = RaftNode::start(
                *id,
                &members,
                settings.clone(),
                storage(*id),
                Arc::new(router.clone()),
                clock.clone(),
                cancel.child_token(),
            )
            .unwrap();
            router.register(handle.clone());
            handles.insert(*id, handle);
            tasks.push(task);
        }

        let routes = Arc::new(LocalRoutes::new(handles.values().cloned()));
        let provider = Arc::new(RaftProvider::new(routes, settings));
        Self { router, handles, provider, clock, cancel, tasks }
    }

    /// Wait until some node reports itself leader, skipping `except`.
    pub async fn leader_except(&self, except: &[NodeId]) -> NodeId {
        for _ in 0..500 {
            for (id, handle) in &self.handles {
                if except.contains(id) {
                    continue;
                }
                if let Ok(status) = handle.status().await {
                    if status.role == Role::Leader {
                        return *id;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no raft leader elected");
    }

    pub async fn leader(&self) -> NodeId {
        self.leader_except(&[]).await
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for RaftCluster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct BftCluster {
    pub router: BftRouter,
    pub handles: BTreeMap<NodeId, BftHandle>,
    pub provider: Arc<BftProvider>,
    pub clock: Arc<ManualClock>,
    cancel: CancellationToken,
}

impl BftCluster {
    pub fn start(n: u64, settings: BftSettings) -> Self {
        Self::start_with(n, settings, |router| Arc::new(router) as Arc<dyn BftTransport>)
    }

    /// Like `start`, with every replica sending through `wrap(router)`.
    pub fn start_with(n: u64, settings: BftSettings, wrap: impl Fn(BftRouter) -> Arc<dyn BftTransport>) -> Self {
        let members: Vec<NodeId> = (1..=n).collect();
        let f = (members.len() - 1) / 3;
        let router = BftRouter::new();
        let clock = Arc::new(ManualClock::new(START_TIME));
        let cancel = CancellationToken::new();
        let transport = wrap(router.clone());
        let mut handles = BTreeMap::new();

        for id in &members {
            let signer = Arc::new(KeyedSigner::new(*id, &settings.shared_secret));
            let replica = BftReplica::new(*id, &members, f, signer, bft::timeout_ticks(&settings))
                .with_max_clock_skew(settings.max_clock_skew.as_millis() as u64);
            let (handle, _task) = BftNode::start(
                replica,
                transport.clone(),
                clock.clone(),
                settings.tick_interval,
                cancel.child_token(),
            );
            router.register_replica(handle.clone());
            handles.insert(*id, handle);
        }

        let desk = ReplyDesk::new();
        router.register_desk(BFT_CLIENT, desk.clone());
        let provider = Arc::new(BftProvider::new(
            Arc::new(KeyedSigner::new(BFT_CLIENT, &settings.shared_secret)),
            members,
            f,
            transport,
            desk,
            settings,
        ));
        Self { router, handles, provider, clock, cancel }
    }
}

impl Drop for BftCluster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One backend under test with whatever keeps it alive.
pub struct Backend {
    pub name: &'static str,
    pub provider: Arc<dyn UniquenessProvider>,
    pub clock: Arc<ManualClock>,
    _dir: Option<TempDir>,
    _raft: Option<RaftCluster>,
    _bft: Option<BftCluster>,
}

pub const BACKENDS: [&str; 4] = ["in_memory", "persistent", "raft", "bft"];

impl Backend {
    pub fn new(name: &'static str) -> Self {
        match name {
            "in_memory" => {
                let clock = Arc::new(ManualClock::new(START_TIME));
                let provider = Arc::new(InMemoryProvider::new(clock.clone()));
                Self { name, provider, clock, _dir: None, _raft: None, _bft: None }
            }
            "persistent" => {
                let dir = tempfile::tempdir().unwrap();
                let clock = Arc::new(ManualClock::new(START_TIME));
                let provider = Arc::new(open_sqlite(dir.path().join("notary.sqlite"), "worker-a", clock.clone()));
                Self { name, provider, clock, _dir: Some(dir), _raft: None, _bft: None }
            }
            "raft" => {
                let cluster = RaftCluster::start(3, fast_raft());
                let provider = cluster.provider.clone();
                let clock = cluster.clock.clone();
                Self { name, provider, clock, _dir: None, _raft: Some(cluster), _bft: None }
            }
            "bft" => {
                let cluster = BftCluster::start(4, fast_bft());
                let provider = cluster.provider.clone();
                let clock = cluster.clock.clone();
                Self { name, provider, clock, _dir: None, _raft: None, _bft: Some(cluster) }
            }
            other => panic!("unknown backend {}", other),
        }
    }
}

pub fn open_sqlite(path: PathBuf, worker: &str, clock: Arc<dyn Clock>) -> PersistentProvider {
    let settings = PersistentSettings {
        path,
        worker_name: worker.to_string(),
        batch_size: 16,
        batch_timeout: Duration::from_millis(2),
        backoff: Backoff::new(Duration::from_millis(5), 5),
    };
    PersistentProvider::open(settings, clock).unwrap()
}
