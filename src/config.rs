use crate::types::NodeId;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CLOSE_INTERVAL_MS: u64 = 600;
const DEFAULT_TARGET_STALENESS_MS: u64 = 3_000;
const DEFAULT_FULL_REFRESH_EVERY: u32 = 16;
const DEFAULT_ENTRIES_PER_NODE: usize = 8;
const DEFAULT_SUBSCRIPTION_QUEUE_DEPTH: usize = 8;
const DEFAULT_SHARD_COUNT: usize = 16;
const DEFAULT_BACKOFF_BASE_MS: u64 = 250;
const DEFAULT_BACKOFF_MAX_MS: u64 = 8_000;
const DEFAULT_FULL_RESYNC_FAILURES: u32 = 10;

/// Tuning knobs for the closed-timestamp subsystem.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Identity of the local node.
    pub node: NodeId,
    /// Cadence of the close-and-publish cycle.
    pub close_interval_ms: u64,
    /// How far behind the clock the close target trails. Lower values close
    /// fresher timestamps but race more writes.
    pub target_staleness_ms: u64,
    /// A full entry is resent every this many cycles even without a reason.
    pub full_refresh_every: u32,
    /// Entries retained per node before the oldest is evicted.
    pub entries_per_node: usize,
    /// Depth of each subscriber's outbound queue. Overflow supersedes the
    /// queued entries, since only the latest closed timestamp matters.
    pub subscription_queue_depth: usize,
    /// Number of tracker shards; track/release contend per shard, the close
    /// snapshot touches each briefly.
    pub shard_count: usize,
    /// First reconnect delay; doubles per consecutive failure.
    pub backoff_base_ms: u64,
    /// Reconnect delay ceiling.
    pub backoff_max_ms: u64,
    /// Consecutive dial failures after which the pool forces a full resync.
    pub full_resync_failures: u32,
    /// When false, full entries are trimmed to ranges with registered
    /// interest (plus blocked ranges) to bound entry size.
    pub publish_all_ranges: bool,
    /// Base endpoints of known peers, keyed by node.
    pub peers: BTreeMap<NodeId, String>,
    /// Shared secret expected from subscribing peers, when set.
    pub shared_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeId(0),
            close_interval_ms: DEFAULT_CLOSE_INTERVAL_MS,
            target_staleness_ms: DEFAULT_TARGET_STALENESS_MS,
            full_refresh_every: DEFAULT_FULL_REFRESH_EVERY,
            entries_per_node: DEFAULT_ENTRIES_PER_NODE,
            subscription_queue_depth: DEFAULT_SUBSCRIPTION_QUEUE_DEPTH,
            shard_count: DEFAULT_SHARD_COUNT,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            full_resync_failures: DEFAULT_FULL_RESYNC_FAILURES,
            publish_all_ranges: true,
            peers: BTreeMap::new(),
            shared_secret: None,
        }
    }
}

impl Config {
    /// Creates a config for the given local node with default knobs.
    pub fn for_node(node: NodeId) -> Self {
        Self {
            node,
            ..Self::default()
        }
    }

    pub fn close_interval(&self) -> Duration {
        Duration::from_millis(self.close_interval_ms)
    }

    pub fn target_staleness_ns(&self) -> u64 {
        self.target_staleness_ms.saturating_mul(1_000_000)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Rejects knob combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.close_interval_ms == 0 {
            return Err(ConfigError::ZeroKnob("close_interval_ms"));
        }
        if self.full_refresh_every == 0 {
            return Err(ConfigError::ZeroKnob("full_refresh_every"));
        }
        if self.entries_per_node == 0 {
            return Err(ConfigError::ZeroKnob("entries_per_node"));
        }
        if self.subscription_queue_depth == 0 {
            return Err(ConfigError::ZeroKnob("subscription_queue_depth"));
        }
        if self.shard_count == 0 {
            return Err(ConfigError::ZeroKnob("shard_count"));
        }
        if self.backoff_base_ms == 0 {
            return Err(ConfigError::ZeroKnob("backoff_base_ms"));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::BackoffCeilingBelowBase {
                base_ms: self.backoff_base_ms,
                max_ms: self.backoff_max_ms,
            });
        }
        if self.peers.contains_key(&self.node) {
            return Err(ConfigError::SelfPeer(self.node));
        }
        Ok(())
    }
}

/// Validation failures for [`Config`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config knob {0} must be non-zero")]
    ZeroKnob(&'static str),
    #[error("backoff_max_ms {max_ms} is below backoff_base_ms {base_ms}")]
    BackoffCeilingBelowBase { base_ms: u64, max_ms: u64 },
    #[error("peer table must not contain the local node {0}")]
    SelfPeer(NodeId),
}
