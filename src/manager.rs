//! Fleet manager
//!
//! Owns every component, builds them from a [`FleetConfig`] and runs their
//! background loops under one cancellation token.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::FleetConfig;
use crate::error::FleetResult;
use crate::failover::FailoverController;
use crate::fleet::{FleetRegistry, GlobalStats, Server};
use crate::health::{GlobalHealthStatus, HealthMonitor, HttpProber, Prober};
use crate::multi_region::MultiRegionCoordinator;
use crate::scaling::{ScalingController, ScalingMetrics};

/// Point-in-time view of the whole fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSummary {
    pub stats: GlobalStats,
    pub health: GlobalHealthStatus,
    pub scaling: ScalingMetrics,
    pub failover_policies: usize,
    pub failed_over: usize,
}

pub struct FleetManager {
    registry: Arc<FleetRegistry>,
    monitor: Arc<HealthMonitor>,
    scaling: Arc<ScalingController>,
    failover: Arc<FailoverController>,
    coordinator: Arc<MultiRegionCoordinator>,
    cancel: Mutex<CancellationToken>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl FleetManager {
    /// Build a manager whose health monitor probes over HTTP
    pub fn from_config(config: &FleetConfig) -> FleetResult<Self> {
        Self::from_config_with_prober(config, Arc::new(HttpProber::new()))
    }

    /// Build a manager and replay every entry of `config` into it.
    ///
    /// Entries are applied in dependency order; the first unknown reference
    /// aborts construction.
    pub fn from_config_with_prober(
        config: &FleetConfig,
        prober: Arc<dyn Prober>,
    ) -> FleetResult<Self> {
        let registry = Arc::new(FleetRegistry::new(config.registry_config()));
        let manager = Self {
            monitor: Arc::new(HealthMonitor::with_prober(
                registry.clone(),
                config.health_config(),
                prober,
            )),
            scaling: Arc::new(ScalingController::new(
                registry.clone(),
                config.scaling_config(),
            )),
            failover: Arc::new(FailoverController::new(
                registry.clone(),
                config.failover_config(),
            )),
            coordinator: Arc::new(MultiRegionCoordinator::new(registry.clone())),
            registry,
            cancel: Mutex::new(CancellationToken::new()),
            loops: Mutex::new(Vec::new()),
        };

        manager.apply(config)?;
        info!(
            "Fleet loaded: {} regions, {} servers, {} probes",
            config.regions.len(),
            config.server_count(),
            manager.monitor.probe_count()
        );
        Ok(manager)
    }

    fn apply(&self, config: &FleetConfig) -> FleetResult<()> {
        for entry in &config.regions {
            self.registry.register_region(
                &entry.name,
                &entry.continent,
                entry.latitude,
                entry.longitude,
                entry.priority,
            );
        }

        for entry in &config.regions {
            for server in &entry.servers {
                self.registry.register_server(
                    &server.id,
                    &entry.name,
                    &server.endpoint,
                    server.port,
                    server.weight,
                    server.capacity,
                )?;
            }
        }

        for entry in &config.regions {
            for server in entry.servers.iter().filter(|s| s.probe) {
                self.monitor.register_probe(server.to_probe(&config.health))?;
            }
        }

        for entry in &config.scaling_policies {
            self.scaling.create_scaling_policy(entry.to_policy())?;
        }

        for entry in &config.failover_policies {
            self.failover.create_failover_policy(entry.to_policy())?;
        }

        for entry in &config.disaster_recovery_plans {
            self.failover.create_disaster_recovery_plan(entry.to_plan())?;
        }

        for entry in &config.data_centers {
            self.coordinator.register_data_center(entry.to_data_center());
        }

        for entry in &config.deployments {
            self.coordinator.create_deployment_config(entry.to_config());
        }

        for entry in &config.latencies {
            self.coordinator
                .update_latency_matrix(&entry.from, &entry.to, entry.ms);
        }

        Ok(())
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn scaling(&self) -> &Arc<ScalingController> {
        &self.scaling
    }

    pub fn failover(&self) -> &Arc<FailoverController> {
        &self.failover
    }

    pub fn coordinator(&self) -> &Arc<MultiRegionCoordinator> {
        &self.coordinator
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the health, scaling and failover loops.
    ///
    /// Returns the number of loops started; loops that are already running
    /// are left alone.
    pub fn start(&self) -> usize {
        let cancel = {
            let mut cancel = self.cancel.lock();
            if cancel.is_cancelled() {
                *cancel = CancellationToken::new();
            }
            cancel.clone()
        };

        let started: Vec<JoinHandle<()>> = [
            self.monitor.start(cancel.clone()),
            self.scaling.start(cancel.clone()),
            self.failover.start(cancel),
        ]
        .into_iter()
        .flatten()
        .collect();

        let count = started.len();
        self.loops.lock().extend(started);
        info!("Fleet manager started {} loops", count);
        count
    }

    /// Stop all loops and wait for them to exit. A cycle already in flight
    /// finishes first.
    pub async fn shutdown(&self) {
        self.cancel.lock().cancel();

        let loops = std::mem::take(&mut *self.loops.lock());
        debug!("Waiting for {} loops to stop", loops.len());
        for handle in loops {
            if let Err(e) = handle.await {
                error!("Fleet loop failed during shutdown: {}", e);
            }
        }
        info!("Fleet manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running() || self.scaling.is_running() || self.failover.is_running()
    }

    // =========================================================================
    // Fleet operations
    // =========================================================================

    /// Remove a server from routing and stop probing it
    pub fn decommission_server(&self, server_id: &str) -> FleetResult<Server> {
        let server = self.registry.deregister_server(server_id)?;
        self.monitor.remove_probe(server_id);
        info!("Server decommissioned: {} ({})", server.id, server.region);
        Ok(server)
    }

    /// Remove a region with every server in it, their probes, the region's
    /// scaling policy and each failover policy naming it. Returns the removed
    /// servers.
    pub fn decommission_region(&self, name: &str) -> FleetResult<Vec<Server>> {
        let servers = self.registry.deregister_region(name)?;
        for server in &servers {
            self.monitor.remove_probe(&server.id);
        }
        let scaling_removed = self.scaling.remove_scaling_policy(name).is_some();
        let failover_removed = self.failover.remove_policies_for_region(name);

        info!(
            "Region decommissioned: {} ({} servers, scaling policy: {}, {} failover policies)",
            name,
            servers.len(),
            if scaling_removed { "removed" } else { "none" },
            failover_removed.len()
        );
        Ok(servers)
    }

    pub fn summary(&self) -> FleetSummary {
        let keys = self.failover.policy_keys();
        let failed_over = keys
            .iter()
            .filter_map(|key| self.failover.failover_status(key).ok())
            .filter(|status| status.is_failed_over)
            .count();

        FleetSummary {
            stats: self.registry.global_stats(),
            health: self.monitor.global_health_status(),
            scaling: self.scaling.scaling_metrics(),
            failover_policies: keys.len(),
            failed_over,
        }
    }
}
