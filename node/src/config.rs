// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub type NodeId = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Backend {0:?} requires a cluster member list")]
    MissingCluster(BackendKind),
    #[error("Node {0} is not in the member list")]
    UnknownSelf(NodeId),
    #[error("BFT needs at least {required} replicas to tolerate {f} faults, got {actual}")]
    TooFewReplicas { required: usize, f: usize, actual: usize },
    #[error("Backend {0:?} requires a data directory")]
    MissingDataDir(BackendKind),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    InMemory,
    Persistent,
    Raft,
    Bft,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => Ok(BackendKind::InMemory),
            "persistent" | "sqlite" => Ok(BackendKind::Persistent),
            "raft" => Ok(BackendKind::Raft),
            "bft" => Ok(BackendKind::Bft),
            _ => Err(ConfigError::InvalidValue { key: "NOTARY_BACKEND", value: s.to_string() }),
        }
    }
}

/// Static cluster membership. Members never change at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub node_id: NodeId,
    /// Node id → base HTTP URL.
    pub members: BTreeMap<NodeId, String>,
    /// Byzantine faults tolerated (BFT only).
    pub max_faulty: usize,
}

impl ClusterConfig {
    pub fn peers(&self) -> impl Iterator<Item = (NodeId, &str)> + '_ {
        self.members
            .iter()
            .filter(move |(id, _)| **id != self.node_id)
            .map(|(id, url)| (*id, url.as_str()))
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.members.keys().copied().collect()
    }

    /// Parse `1=http://a:3000,2=http://b:3000`.
    pub fn parse_members(raw: &str) -> Result<BTreeMap<NodeId, String>, ConfigError> {
        let mut members = BTreeMap::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (id, url) = part.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: "NOTARY_MEMBERS",
                value: part.to_string(),
            })?;
            let id: NodeId = id.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "NOTARY_MEMBERS",
                value: part.to_string(),
            })?;
            members.insert(id, url.trim().trim_end_matches('/').to_string());
        }
        Ok(members)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftSettings {
    pub tick_interval: Duration,
    /// Election timeout range, in ticks.
    pub election_ticks: (u32, u32),
    pub heartbeat_ticks: u32,
    /// Applied entries between snapshots.
    pub snapshot_threshold: u64,
    pub max_entries_per_append: usize,
    pub proposal_timeout: Duration,
    /// Attempts a client makes while chasing the leader.
    pub max_redirects: u32,
}

impl Default for RaftSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            election_ticks: (10, 20),
            heartbeat_ticks: 2,
            snapshot_threshold: 1_000,
            max_entries_per_append: 64,
            proposal_timeout: Duration::from_secs(5),
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BftSettings {
    /// Primary silence tolerated before a replica votes for a view change.
    pub view_change_timeout: Duration,
    /// How long a client waits for a reply quorum.
    pub request_timeout: Duration,
    /// Reply quorum override. Defaults to ⌊(n+f)/2⌋+1.
    pub reply_quorum: Option<usize>,
    pub tick_interval: Duration,
    /// Largest gap between the primary's proposed time and a backup's clock.
    pub max_clock_skew: Duration,
    /// Key material every replica derives its message key from.
    pub shared_secret: String,
}

impl Default for BftSettings {
    fn default() -> Self {
        Self {
            view_change_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            reply_quorum: None,
            tick_interval: Duration::from_millis(50),
            max_clock_skew: Duration::from_secs(5),
            shared_secret: "notary-bft".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    pub auth_token: Option<String>,
    /// Worker name written into request log rows.
    pub node_name: String,
    pub backend: BackendKind,
    pub data_dir: Option<PathBuf>,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_db_retries: u32,
    pub backoff_base: Duration,
    pub cache_capacity: Option<usize>,
    pub cluster: Option<ClusterConfig>,
    pub raft: RaftSettings,
    pub bft: BftSettings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            auth_token: None,
            node_name: "notary-0".to_string(),
            backend: BackendKind::InMemory,
            data_dir: None,
            batch_size: 32,
            batch_timeout: Duration::from_millis(2),
            max_db_retries: 5,
            backoff_base: Duration::from_millis(20),
            cache_capacity: None,
            cluster: None,
            raft: RaftSettings::default(),
            bft: BftSettings::default(),
        }
    }
}

fn parse<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

impl NodeConfig {
    /// Defaults overridden by `NOTARY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = NodeConfig::default();

        if let Some(v) = lookup("NOTARY_BIND_ADDR") {
            cfg.bind_addr = parse("NOTARY_BIND_ADDR", v)?;
        }
        if let Some(v) = lookup("NOTARY_AUTH_TOKEN").filter(|v| !v.is_empty()) {
            cfg.auth_token = Some(v);
        }
        if let Some(v) = lookup("NOTARY_NODE_NAME") {
            cfg.node_name = v;
        }
        if let Some(v) = lookup("NOTARY_BACKEND") {
            cfg.backend = v.parse()?;
        }
        if let Some(v) = lookup("NOTARY_DATA_DIR") {
            cfg.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("NOTARY_BATCH_SIZE") {
            cfg.batch_size = parse("NOTARY_BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("NOTARY_BATCH_TIMEOUT_MS") {
            cfg.batch_timeout = Duration::from_millis(parse("NOTARY_BATCH_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("NOTARY_DB_RETRIES") {
            cfg.max_db_retries = parse("NOTARY_DB_RETRIES", v)?;
        }
        if let Some(v) = lookup("NOTARY_BACKOFF_MS") {
            cfg.backoff_base = Duration::from_millis(parse("NOTARY_BACKOFF_MS", v)?);
        }
        if let Some(v) = lookup("NOTARY_CACHE_CAPACITY") {
            let capacity: usize = parse("NOTARY_CACHE_CAPACITY", v)?;
            cfg.cache_capacity = (capacity > 0).then_some(capacity);
        }
        if let Some(v) = lookup("NOTARY_SNAPSHOT_THRESHOLD") {
            cfg.raft.snapshot_threshold = parse("NOTARY_SNAPSHOT_THRESHOLD", v)?;
        }

        if let Some(v) = lookup("NOTARY_BFT_SECRET").filter(|v| !v.is_empty()) {
            cfg.bft.shared_secret = v;
        }
        if let Some(v) = lookup("NOTARY_VIEW_CHANGE_TIMEOUT_MS") {
            cfg.bft.view_change_timeout = Duration::from_millis(parse("NOTARY_VIEW_CHANGE_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("NOTARY_BFT_MAX_SKEW_MS") {
            cfg.bft.max_clock_skew = Duration::from_millis(parse("NOTARY_BFT_MAX_SKEW_MS", v)?);
        }

        if let Some(raw) = lookup("NOTARY_MEMBERS") {
            let members = ClusterConfig::parse_members(&raw)?;
            let node_id = match lookup("NOTARY_NODE_ID") {
                Some(v) => parse("NOTARY_NODE_ID", v)?,
                None => return Err(ConfigError::Invalid("NOTARY_NODE_ID must be set with NOTARY_MEMBERS".into())),
            };
            let max_faulty = match lookup("NOTARY_MAX_FAULTY") {
                Some(v) => parse("NOTARY_MAX_FAULTY", v)?,
                None => members.len().saturating_sub(1) / 3,
            };
            cfg.cluster = Some(ClusterConfig { node_id, members, max_faulty });
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        let (lo, hi) = self.raft.election_ticks;
        if lo == 0 || lo > hi || self.raft.heartbeat_ticks >= lo {
            return Err(ConfigError::Invalid(format!(
                "election ticks {}..{} must exceed heartbeat ticks {}",
                lo, hi, self.raft.heartbeat_ticks
            )));
        }

        match self.backend {
            BackendKind::InMemory => {}
            BackendKind::Persistent => {
                if self.data_dir.is_none() {
                    return Err(ConfigError::MissingDataDir(self.backend));
                }
            }
            BackendKind::Raft | BackendKind::Bft => {
                let cluster = self.cluster.as_ref().ok_or(ConfigError::MissingCluster(self.backend))?;
                if !cluster.members.contains_key(&cluster.node_id) {
                    return Err(ConfigError::UnknownSelf(cluster.node_id));
                }
                if self.backend == BackendKind::Bft {
                    let required = 3 * cluster.max_faulty + 1;
                    if cluster.members.len() < required {
                        return Err(ConfigError::TooFewReplicas {
                            required,
                            f: cluster.max_faulty,
                            actual: cluster.members.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("notary.sqlite"))
    }
}
