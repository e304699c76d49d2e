//! Peer mesh networking module using Chitchat.
//!
//! Turnstile nodes share window counters through gossip so that a quota can
//! be enforced across several instances behind a load balancer.

mod cluster;

pub use cluster::{Cluster, ClusterConfig, ClusterError, CounterKey};
