//! Cluster management using Chitchat.
//!
//! Each node publishes its own contribution to every window counter as a
//! key in its gossiped node state. A counter's value is the sum of the
//! contributions of all live nodes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chitchat::transport::UdpTransport;
use chitchat::{
    spawn_chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

const COUNTER_PREFIX: &str = "counter|";

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to start cluster: {0}")]
    StartError(String),
    #[error("Failed to shut down cluster: {0}")]
    ShutdownError(String),
}

/// Configuration for the cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Unique node identifier.
    pub node_id: String,
    /// The address to listen on for gossip.
    pub listen_addr: SocketAddr,
    /// The address to advertise to other nodes.
    pub advertise_addr: SocketAddr,
    /// Seed nodes to bootstrap cluster membership.
    pub seed_nodes: Vec<String>,
    /// Cluster identifier (nodes must have matching cluster IDs).
    pub cluster_id: String,
    /// How often to gossip with peers.
    pub gossip_interval: Duration,
    /// Grace period before considering a dead node's state deletable.
    pub dead_node_grace_period: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let default_addr = SocketAddr::from(([0, 0, 0, 0], 7946));
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            listen_addr: default_addr,
            advertise_addr: default_addr,
            seed_nodes: Vec::new(),
            cluster_id: "turnstile".to_string(),
            gossip_interval: Duration::from_millis(100),
            dead_node_grace_period: Duration::from_secs(3600),
        }
    }
}

/// Key identifying one window of one rate limit counter in the cluster state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    /// The request key being limited.
    pub key: String,
    /// Epoch milliseconds at which the window closes.
    pub window_reset_at: u64,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(key: &str, window_reset_at: u64) -> Self {
        Self {
            key: key.to_string(),
            window_reset_at,
        }
    }

    /// Convert to a chitchat key string.
    /// Format: "counter|{key}|{window_reset_at}"
    pub fn to_chitchat_key(&self) -> String {
        format!("{}{}|{}", COUNTER_PREFIX, self.key, self.window_reset_at)
    }

    /// Parse from a chitchat key string.
    pub fn from_chitchat_key(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(COUNTER_PREFIX)?;

        // Split from the right so request keys may contain the delimiter
        let (key, window) = rest.rsplit_once('|')?;
        let window_reset_at: u64 = window.parse().ok()?;

        Some(Self {
            key: key.to_string(),
            window_reset_at,
        })
    }
}

/// The cluster handle for distributed state management.
pub struct Cluster {
    /// Our node ID.
    node_id: String,
    /// Chitchat handle.
    handle: ChitchatHandle,
    /// Configuration the node was started with.
    config: ClusterConfig,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("node_id", &self.node_id)
            .field("config", &self.config)
            .finish()
    }
}

impl Cluster {
    /// Create and start a new cluster node.
    pub async fn start(config: ClusterConfig) -> Result<Self, ClusterError> {
        info!(
            node_id = %config.node_id,
            listen_addr = %config.listen_addr,
            advertise_addr = %config.advertise_addr,
            seed_nodes = ?config.seed_nodes,
            cluster_id = %config.cluster_id,
            "Starting cluster node"
        );

        let chitchat_id = ChitchatId {
            node_id: config.node_id.clone(),
            generation_id: 0,
            gossip_advertise_addr: config.advertise_addr,
        };

        let chitchat_config = ChitchatConfig {
            chitchat_id,
            cluster_id: config.cluster_id.clone(),
            gossip_interval: config.gossip_interval,
            listen_addr: config.listen_addr,
            seed_nodes: config.seed_nodes.clone(),
            failure_detector_config: FailureDetectorConfig {
                initial_interval: config.gossip_interval,
                ..Default::default()
            },
            marked_for_deletion_grace_period: config.dead_node_grace_period,
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let transport = UdpTransport;
        let handle = spawn_chitchat(chitchat_config, Vec::new(), &transport)
            .await
            .map_err(|e| ClusterError::StartError(e.to_string()))?;

        info!("Cluster node started successfully");

        Ok(Self {
            node_id: config.node_id.clone(),
            handle,
            config,
        })
    }

    /// Get our node ID.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Get the configuration this node was started with.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Get the chitchat handle for direct access.
    pub fn chitchat(&self) -> Arc<Mutex<chitchat::Chitchat>> {
        self.handle.chitchat()
    }

    /// Increment a counter and return the total across all nodes.
    ///
    /// This sets our local contribution for the counter key and reads
    /// all other nodes' contributions to compute the total. The read and
    /// write happen under the chitchat lock, so concurrent increments on
    /// this node never lose updates.
    pub async fn increment_counter(&self, key: &CounterKey, amount: u64) -> u64 {
        let chitchat_key = key.to_chitchat_key();
        let chitchat_arc = self.handle.chitchat();
        let mut chitchat = chitchat_arc.lock().await;

        let current_local = Self::local_value(&mut chitchat, &chitchat_key);
        let new_local = current_local.saturating_add(amount);
        chitchat.self_node_state().set(&chitchat_key, new_local.to_string());

        debug!(
            key = %chitchat_key,
            local_value = new_local,
            "Incremented local counter"
        );

        Self::sum_counter(&chitchat, &chitchat_key)
    }

    /// Take back up to `amount` from our own contribution to a counter.
    ///
    /// Returns whether anything was taken back. Other nodes' contributions are
    /// never modified.
    pub async fn release_counter(&self, key: &CounterKey, amount: u64) -> bool {
        let chitchat_key = key.to_chitchat_key();
        let chitchat_arc = self.handle.chitchat();
        let mut chitchat = chitchat_arc.lock().await;

        let current_local = Self::local_value(&mut chitchat, &chitchat_key);
        if current_local == 0 {
            return false;
        }

        let new_local = current_local.saturating_sub(amount);
        chitchat.self_node_state().set(&chitchat_key, new_local.to_string());
        true
    }

    /// Delete our contributions for the given counters.
    pub async fn remove_counters(&self, keys: &[CounterKey]) {
        if keys.is_empty() {
            return;
        }

        let chitchat_arc = self.handle.chitchat();
        let mut chitchat = chitchat_arc.lock().await;
        let node_state = chitchat.self_node_state();
        for key in keys {
            node_state.delete(&key.to_chitchat_key());
        }

        debug!(count = keys.len(), "Removed local counters");
    }

    /// Get the total count for a key across all nodes.
    pub async fn get_count(&self, key: &CounterKey) -> u64 {
        let chitchat_key = key.to_chitchat_key();
        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;
        Self::sum_counter(&chitchat, &chitchat_key)
    }

    fn local_value(chitchat: &mut chitchat::Chitchat, key: &str) -> u64 {
        chitchat
            .self_node_state()
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Sum a counter across all live nodes, ourselves included.
    fn sum_counter(chitchat: &chitchat::Chitchat, key: &str) -> u64 {
        let mut total: u64 = 0;

        for node_id in chitchat.live_nodes() {
            if let Some(node_state) = chitchat.node_state(node_id) {
                if let Some(value) = node_state.get(key) {
                    if let Ok(count) = value.parse::<u64>() {
                        total = total.saturating_add(count);
                    }
                }
            }
        }

        total
    }

    /// Get the number of live nodes in the cluster.
    pub async fn live_node_count(&self) -> usize {
        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;
        chitchat.live_nodes().count()
    }

    /// Get the IDs of all live nodes.
    pub async fn live_nodes(&self) -> Vec<String> {
        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;
        chitchat
            .live_nodes()
            .map(|id| id.node_id.clone())
            .collect()
    }

    /// Shutdown the cluster node gracefully.
    pub async fn shutdown(self) -> Result<(), ClusterError> {
        info!(node_id = %self.node_id, "Shutting down cluster node");
        self.handle
            .shutdown()
            .await
            .map_err(|e| ClusterError::ShutdownError(format!("{:?}", e)))?;
        Ok(())
    }
}
