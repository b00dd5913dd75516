//! Periodic cluster health monitor
//!
//! Every interval each registered cluster is probed concurrently: connect
//! with its system credentials and ping the connection, both bounded by
//! the resolver timeout. A slow cluster delays only its own result.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::clusters::open_resolver;
use super::ServiceContext;
use crate::db::schemas::{Cluster, ClusterHealth};
use crate::db::Page;
use crate::types::Result;

#[derive(Debug, Clone, Copy)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
    /// Wait before the first cycle
    pub initial_delay: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(10),
        }
    }
}

/// Probe one cluster. Never fails; failures become an unhealthy record.
pub(crate) async fn probe_cluster(ctx: &ServiceContext, cluster: &Cluster) -> ClusterHealth {
    let outcome = match open_resolver(ctx, cluster).await {
        Ok(resolver) => resolver.ping().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match outcome {
        Ok(()) => ClusterHealth::reachable(Utc::now()),
        Err(reason) => {
            debug!(cluster = %cluster.name, "Health probe failed: {}", reason);
            ClusterHealth::unreachable(Utc::now(), reason)
        }
    }
}

/// Write a probe result to the health fields only.
///
/// Shares the cluster's write lock with edits, so neither side can
/// restore a stale copy of the other's fields.
pub(crate) async fn record_health(
    ctx: &ServiceContext,
    cluster_id: &str,
    health: ClusterHealth,
) -> Result<Cluster> {
    let _guard = ctx.write_locks.lock(cluster_id).await;
    Ok(ctx.stores.cluster_health.update_health(cluster_id, &health).await?)
}

pub struct HealthMonitor {
    ctx: ServiceContext,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(ctx: ServiceContext, config: HealthMonitorConfig) -> Self {
        Self { ctx, config }
    }

    /// Probe every cluster once; returns (healthy, unhealthy)
    pub async fn run_cycle(&self) -> (usize, usize) {
        let clusters = match self.ctx.stores.clusters.list(Page::all()).await {
            Ok(clusters) => clusters,
            Err(e) => {
                error!("Health cycle could not list clusters: {}", e);
                return (0, 0);
            }
        };

        let probes = clusters.iter().map(|cluster| async move {
            let health = probe_cluster(&self.ctx, cluster).await;
            let healthy = health.healthy;
            // The cluster may have been deleted while the probe ran
            if let Err(e) = record_health(&self.ctx, &cluster.id, health).await {
                warn!(cluster = %cluster.name, "Failed to record cluster health: {}", e);
            }
            healthy
        });
        let results = join_all(probes).await;

        let healthy = results.iter().filter(|ok| **ok).count();
        let unhealthy = results.len() - healthy;
        info!(
            healthy = healthy,
            unhealthy = unhealthy,
            "Completed cluster health cycle"
        );
        (healthy, unhealthy)
    }

    /// Run cycles until `shutdown` changes or its sender is dropped
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            initial_delay_secs = self.config.initial_delay.as_secs(),
            "Cluster health monitor started"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(self.config.initial_delay) => {}
                _ = shutdown.changed() => {
                    info!("Cluster health monitor stopped");
                    return;
                }
            }

            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                tokio::select! {
                    _ = self.run_cycle() => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!("Cluster health monitor stopped");
        })
    }
}
