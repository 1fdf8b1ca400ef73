// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Wiring a node together from its `NodeConfig`.

use crate::audit::RequestLog;
use crate::backends::persistent::PersistentSettings;
use crate::backends::retry::Backoff;
use crate::backends::{InMemoryProvider, PersistentProvider};
use crate::bft::{self, BftHttpTransport, BftNode, BftProvider, BftReplica, KeyedSigner, ReplyDesk};
use crate::cache::UnspentStatesCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendKind, ClusterConfig, ConfigError, NodeConfig, NodeId};
use crate::errors::ProviderError;
use crate::network::PeerClient;
use crate::provider::UniquenessProvider;
use crate::raft::{FileStorage, HttpTransport, MemoryStorage, PeerRoutes, RaftError, RaftNode, RaftProvider, RaftStorage};
use crate::server::{AppState, BftEndpoint};
use crate::service::NotaryService;
use notary_persistence::PersistenceError;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Raft error: {0}")]
    Raft(#[from] RaftError),
    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),
}

/// A started node: router state plus the background tasks it owns.
pub struct NodeRuntime {
    pub state: AppState,
    pub tasks: Vec<JoinHandle<()>>,
}

fn peer_clients(cluster: &ClusterConfig, auth_token: &Option<String>) -> BTreeMap<NodeId, PeerClient> {
    cluster
        .peers()
        .map(|(id, url)| (id, PeerClient::new(url, auth_token.clone())))
        .collect()
}

/// Build the configured backend and the service in front of it. Replica
/// tasks stop when `cancel` fires.
pub fn start(cfg: &NodeConfig, cancel: CancellationToken) -> Result<NodeRuntime, StartupError> {
    cfg.validate()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut tasks = Vec::new();
    let mut raft_handle = None;
    let mut bft_endpoint = None;
    let mut request_log = None;

    let provider: Arc<dyn UniquenessProvider> = match cfg.backend {
        BackendKind::InMemory => Arc::new(InMemoryProvider::new(clock.clone())),
        BackendKind::Persistent => {
            let path = cfg.database_path().ok_or(ConfigError::MissingDataDir(cfg.backend))?;
            let settings = PersistentSettings {
                path,
                worker_name: cfg.node_name.clone(),
                batch_size: cfg.batch_size,
                batch_timeout: cfg.batch_timeout,
                backoff: Backoff::new(cfg.backoff_base, cfg.max_db_retries),
            };
            Arc::new(PersistentProvider::open(settings, clock.clone())?)
        }
        BackendKind::Raft => {
            let cluster = cfg.cluster.as_ref().ok_or(ConfigError::MissingCluster(cfg.backend))?;
            let storage: Box<dyn RaftStorage> = match &cfg.data_dir {
                Some(dir) => Box::new(FileStorage::new(dir.join("raft"))?),
                None => Box::new(MemoryStorage),
            };
            let peers = peer_clients(cluster, &cfg.auth_token);
            let transport = Arc::new(HttpTransport::new(peers.clone()));
            let (handle, task) = RaftNode::start(
                cluster.node_id,
                &cluster.ids(),
                cfg.raft.clone(),
                storage,
                transport,
                clock.clone(),
                cancel.child_token(),
            )?;
            tasks.push(task);
            raft_handle = Some(handle.clone());

            let routes = Arc::new(PeerRoutes::new(handle, peers));
            Arc::new(RaftProvider::new(routes, cfg.raft.clone()))
        }
        BackendKind::Bft => {
            let cluster = cfg.cluster.as_ref().ok_or(ConfigError::MissingCluster(cfg.backend))?;
            let desk = ReplyDesk::new();
            let signer = Arc::new(KeyedSigner::new(cluster.node_id, &cfg.bft.shared_secret));
            let transport = Arc::new(BftHttpTransport::new(
                cluster.node_id,
                peer_clients(cluster, &cfg.auth_token),
                desk.clone(),
            ));

            let replica = BftReplica::new(
                cluster.node_id,
                &cluster.ids(),
                cluster.max_faulty,
                signer.clone(),
                bft::timeout_ticks(&cfg.bft),
            )
            .with_max_clock_skew(cfg.bft.max_clock_skew.as_millis() as u64);
            let (handle, task) =
                BftNode::start(replica, transport.clone(), clock.clone(), cfg.bft.tick_interval, cancel.child_token());
            transport.attach_replica(handle.clone());
            tasks.push(task);
            bft_endpoint = Some(BftEndpoint { replica: handle, desk: desk.clone() });

            // Replicas keep no request log of their own
            request_log = Some(Arc::new(match &cfg.data_dir {
                Some(dir) => RequestLog::open(dir.join("request_log.bin"), cfg.node_name.clone())?,
                None => RequestLog::in_memory(cfg.node_name.clone()),
            }));

            Arc::new(BftProvider::new(
                signer,
                cluster.ids(),
                cluster.max_faulty,
                transport,
                desk,
                cfg.bft.clone(),
            ))
        }
    };

    let mut service = NotaryService::new(provider).with_clock(clock);
    if let Some(capacity) = cfg.cache_capacity {
        service = service.with_cache(Arc::new(UnspentStatesCache::new(capacity)));
    }
    if let Some(log) = request_log {
        service = service.with_request_log(log);
    }

    tracing::info!(node = %cfg.node_name, backend = ?cfg.backend, "Notary service ready");

    let mut state = AppState::new(Arc::new(service), cfg.node_name.clone());
    state.raft = raft_handle;
    state.bft = bft_endpoint;
    Ok(NodeRuntime { state, tasks })
}
