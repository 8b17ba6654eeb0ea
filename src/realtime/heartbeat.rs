use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

/// Configuration for node liveness timeouts
#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    /// Silence after which a node is considered gone
    pub timeout: Duration,
    /// How often the sweeper looks for silent nodes
    pub sweep_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

/// Stats for heartbeat monitoring
#[derive(Clone, Debug, Default, Serialize)]
pub struct HeartbeatStats {
    /// Number of nodes being monitored
    pub monitored_nodes: usize,
    /// Total heartbeats received
    pub total_beats: u64,
    /// Total timeouts detected
    pub total_timeouts: u64,
}

/// Per-node heartbeat state
struct NodeHeartbeat {
    last_beat: Instant,
    alive: bool,
}

/// Tracks when each node last sent a heartbeat and detects silent ones.
///
/// Keys are external node ids. A node enters the monitor on its first beat
/// and leaves it when its connection closes.
#[derive(Default)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    nodes: Arc<DashMap<String, NodeHeartbeat>>,
    total_beats: AtomicU64,
    total_timeouts: AtomicU64,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            nodes: Arc::new(DashMap::new()),
            total_beats: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Record a heartbeat from a node
    pub fn beat(&self, node_id: &str) {
        self.nodes.insert(
            node_id.to_string(),
            NodeHeartbeat {
                last_beat: Instant::now(),
                alive: true,
            },
        );
        self.total_beats.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop monitoring a node
    pub fn unregister(&self, node_id: &str) -> bool {
        self.nodes.remove(node_id).is_some()
    }

    /// Check for timed-out nodes.
    /// Returns the nodes that crossed the timeout since the previous check;
    /// a silent node is reported once, until it beats again.
    pub fn check_timeouts(&self) -> Vec<String> {
        let now = Instant::now();
        let timeout = self.config.timeout;
        let mut timed_out = Vec::new();

        for mut entry in self.nodes.iter_mut() {
            let node = entry.value_mut();
            if node.alive && now.saturating_duration_since(node.last_beat) >= timeout {
                node.alive = false;
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                timed_out.push(entry.key().clone());
            }
        }

        timed_out
    }

    /// Check if a node is alive
    pub fn is_alive(&self, node_id: &str) -> bool {
        self.nodes.get(node_id).map(|n| n.alive).unwrap_or(false)
    }

    /// Time since the node's last heartbeat
    pub fn silence(&self, node_id: &str) -> Option<Duration> {
        self.nodes
            .get(node_id)
            .map(|n| Instant::now().saturating_duration_since(n.last_beat))
    }

    /// Get monitor statistics
    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            monitored_nodes: self.nodes.len(),
            total_beats: self.total_beats.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatConfig {
            timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn silent_node_times_out_once() {
        let monitor = monitor();
        monitor.beat("7");
        monitor.beat("8");

        tokio::time::advance(Duration::from_secs(6)).await;
        monitor.beat("8");
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(monitor.check_timeouts(), vec!["7".to_string()]);
        assert!(monitor.check_timeouts().is_empty());
        assert!(!monitor.is_alive("7"));
        assert!(monitor.is_alive("8"));
        assert_eq!(monitor.stats().total_timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn beat_revives_a_timed_out_node() {
        let monitor = monitor();
        monitor.beat("7");
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(monitor.check_timeouts().len(), 1);

        monitor.beat("7");
        assert!(monitor.is_alive("7"));
        assert_eq!(monitor.silence("7"), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn unregister_forgets_node() {
        let monitor = monitor();
        monitor.beat("7");
        assert!(monitor.unregister("7"));
        assert!(!monitor.unregister("7"));
        assert_eq!(monitor.node_count(), 0);
    }
}
