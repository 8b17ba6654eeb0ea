//! Wiring of the coordination services around a chosen pair of stores.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::database::{MemoryStore, NodeStore, PgStore};
use crate::errors::CoreResult;
use crate::realtime::{
    HeartbeatMonitor, LivenessTracker, MemoryPresence, PresenceStore, RedisPresence,
    ViewerSessions,
};
use crate::registry::NodeRegistry;
use crate::stream_router::RouterClient;
use crate::sync::{NodeClient, TopologySynchronizer};
use crate::viewer::ViewerService;

/// Every service of a running instance, sharing one registry.
#[derive(Clone)]
pub struct Application {
    pub config: AppConfig,
    pub registry: NodeRegistry,
    pub liveness: Arc<LivenessTracker>,
    pub viewers: ViewerService,
    pub synchronizer: Arc<TopologySynchronizer>,
    presence: Arc<dyn PresenceStore>,
}

/// Handles of the periodic tasks started by [`Application::spawn_background`].
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Application {
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn NodeStore>,
        presence: Arc<dyn PresenceStore>,
        nodes: Arc<dyn NodeClient>,
    ) -> Self {
        let registry = NodeRegistry::new(store);
        let monitor = Arc::new(HeartbeatMonitor::new(config.liveness.clone()));
        let liveness = Arc::new(LivenessTracker::new(registry.clone(), monitor));
        let router = Arc::new(RouterClient::new(config.router.clone()));

        let viewers = ViewerService::new(
            registry.clone(),
            ViewerSessions::new(presence.clone(), config.viewer.session_ttl),
            config.router.clone(),
        );
        let synchronizer = Arc::new(TopologySynchronizer::new(
            registry.clone(),
            liveness.clone(),
            nodes,
            router,
            config.sync.clone(),
        ));

        Self {
            config,
            registry,
            liveness,
            viewers,
            synchronizer,
            presence,
        }
    }

    /// Postgres for the registry, Redis for viewer sessions.
    pub async fn connect(config: AppConfig) -> CoreResult<Self> {
        let store = PgStore::connect(&config.database).await?;
        store.ensure_schema().await?;
        let presence = RedisPresence::connect(&config.redis)?;
        let nodes = Arc::new(config.sync.node_client());
        info!("connected to postgres and redis");
        Ok(Self::assemble(config, Arc::new(store), Arc::new(presence), nodes))
    }

    /// Process-local stores; state is lost on exit.
    pub fn in_memory(config: AppConfig) -> Self {
        let nodes = Arc::new(config.sync.node_client());
        Self::assemble(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryPresence::new()),
            nodes,
        )
    }

    /// Registers configured seed nodes that are not known yet. Returns how
    /// many were created.
    pub async fn seed_nodes(&self) -> CoreResult<usize> {
        let mut created = 0;
        for node in &self.config.seed_nodes {
            if self.registry.find_by_external_id(&node.external_id).await?.is_some() {
                debug!(external_id = %node.external_id, "seed node already registered");
                continue;
            }
            self.registry.create_node(node.clone()).await?;
            created += 1;
        }
        if created > 0 {
            info!(created, "seed nodes registered");
        }
        Ok(created)
    }

    /// Starts the liveness sweeper and the presence janitor.
    pub fn spawn_background(&self) -> BackgroundTasks {
        BackgroundTasks {
            handles: vec![self.liveness.clone().spawn_sweeper(), self.spawn_presence_janitor()],
        }
    }

    /// Purges expired viewer sessions once per session TTL.
    fn spawn_presence_janitor(&self) -> JoinHandle<()> {
        let presence = self.presence.clone();
        let period = self.config.viewer.session_ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match presence.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "expired viewer sessions purged"),
                    Err(e) => warn!(error = %e, "viewer session purge failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewNode, NodeStatus};

    #[tokio::test]
    async fn in_memory_services_share_one_registry() {
        let app = Application::in_memory(AppConfig::default());
        app.registry
            .create_node(NewNode {
                name: "N1".into(),
                external_id: "7".into(),
                direct_ip: Some("127.0.0.1".into()),
                hostname: None,
            })
            .await
            .unwrap();

        app.liveness.record_heartbeat("7").await.unwrap().unwrap();
        let node = app.registry.node_by_external_id("7").await.unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert!(app.viewers.list_viewers("7").await.unwrap().viewers.is_empty());
    }

    #[tokio::test]
    async fn seed_nodes_are_created_once() {
        let config = AppConfig {
            seed_nodes: vec![
                NewNode {
                    name: "yard".into(),
                    external_id: "7".into(),
                    direct_ip: Some("127.0.0.1".into()),
                    hostname: None,
                },
                NewNode {
                    name: "dock".into(),
                    external_id: "8".into(),
                    direct_ip: None,
                    hostname: Some("dock.tailnet".into()),
                },
            ],
            ..AppConfig::default()
        };
        let app = Application::in_memory(config);

        assert_eq!(app.seed_nodes().await.unwrap(), 2);
        assert_eq!(app.seed_nodes().await.unwrap(), 0);

        let dock = app.registry.node_by_external_id("8").await.unwrap();
        assert_eq!(dock.reachable_address(), Some("dock.tailnet"));
        assert_eq!(dock.status, NodeStatus::Offline);
        app.liveness.record_heartbeat("7").await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn background_janitor_purges_abandoned_sessions() {
        let presence = MemoryPresence::new();
        let app = Application::assemble(
            AppConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(presence.clone()),
            Arc::new(AppConfig::default().sync.node_client()),
        );
        let ttl = app.config.viewer.session_ttl;
        presence.set_with_ttl("node:a:viewer:1", ttl).await.unwrap();

        let tasks = app.spawn_background();
        tokio::time::sleep(ttl * 3).await;
        tasks.abort();

        assert_eq!(presence.evict_expired(), 0);
        assert!(presence.is_empty());
    }
}
