//! Multi-Region Coordinator
//!
//! Keeps data-center inventory, deployment layouts and a sparse region
//! latency matrix, and answers traffic-distribution and region-selection
//! queries. It only reads the fleet registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use super::geo::haversine_km;
use super::model::{
    DataCenter, DataCenterTier, DeploymentStrategy, MultiRegionConfig, ReplicationMode,
    StrategyProfile,
};
use crate::error::{FleetError, FleetResult};
use crate::fleet::{percent, FleetRegistry};

/// Health of one active region as seen by the registry
#[derive(Debug, Clone, Serialize)]
pub struct RegionHealth {
    pub name: String,
    pub healthy_servers: usize,
    pub total_servers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiRegionStatus {
    pub config_name: String,
    pub strategy: DeploymentStrategy,
    pub active_regions: Vec<String>,
    pub data_residency_region: String,
    pub disaster_recovery_region: String,
    pub replication_mode: ReplicationMode,
    pub total_data_centers: usize,
    pub total_capacity: u64,
    pub total_servers: u64,
    pub traffic_distribution: BTreeMap<String, f64>,
    pub latency_target_ms: u32,
    pub cost_optimization: bool,
    /// Registry view of each active region; regions the registry does not know are omitted
    pub regions: Vec<RegionHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataCenterStatus {
    pub id: String,
    pub name: String,
    pub location: String,
    pub provider: String,
    pub region: String,
    pub tier: DataCenterTier,
    pub is_primary: bool,
    pub is_active: bool,
    pub capacity: u32,
    pub current_servers: u32,
    /// `current * 100 / capacity`
    pub utilization: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentComparison {
    pub strategies: BTreeMap<DeploymentStrategy, StrategyProfile>,
    pub total_configs: usize,
    pub total_data_centers: usize,
}

pub struct MultiRegionCoordinator {
    registry: Arc<FleetRegistry>,
    data_centers: RwLock<HashMap<String, DataCenter>>,
    deployments: RwLock<HashMap<String, MultiRegionConfig>>,
    /// from -> to -> milliseconds
    latencies: RwLock<HashMap<String, HashMap<String, u32>>>,
}

impl MultiRegionCoordinator {
    pub fn new(registry: Arc<FleetRegistry>) -> Self {
        Self {
            registry,
            data_centers: RwLock::new(HashMap::new()),
            deployments: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Register or replace a data center
    pub fn register_data_center(&self, dc: DataCenter) {
        info!(
            "Data center registered: {} ({}) in {}, capacity={}, tier={:?}",
            dc.id, dc.provider, dc.location, dc.capacity, dc.tier
        );
        self.data_centers.write().insert(dc.id.clone(), dc);
    }

    /// Record how many servers a data center currently hosts
    pub fn update_data_center_load(&self, id: &str, current_count: u32) -> FleetResult<()> {
        let mut data_centers = self.data_centers.write();
        let dc = data_centers
            .get_mut(id)
            .ok_or_else(|| FleetError::DataCenterNotFound(id.to_string()))?;
        dc.current_count = current_count;
        debug!("Data center {} now hosts {}/{} servers", id, current_count, dc.capacity);
        Ok(())
    }

    pub fn data_center_status(&self, id: &str) -> FleetResult<DataCenterStatus> {
        let data_centers = self.data_centers.read();
        let dc = data_centers
            .get(id)
            .ok_or_else(|| FleetError::DataCenterNotFound(id.to_string()))?;

        Ok(DataCenterStatus {
            id: dc.id.clone(),
            name: dc.name.clone(),
            location: dc.location.clone(),
            provider: dc.provider.clone(),
            region: dc.region.clone(),
            tier: dc.tier,
            is_primary: dc.is_primary,
            is_active: dc.is_active,
            capacity: dc.capacity,
            current_servers: dc.current_count,
            utilization: percent(dc.current_count as u64, dc.capacity as u64),
            created_at: dc.created_at,
        })
    }

    /// Create or replace a deployment configuration
    pub fn create_deployment_config(&self, config: MultiRegionConfig) {
        info!(
            "Deployment config created: {} (strategy: {}, regions: {:?}, target latency: {}ms)",
            config.name, config.strategy, config.active_regions, config.latency_target_ms
        );
        self.deployments.write().insert(config.name.clone(), config);
    }

    pub fn deployment_config(&self, name: &str) -> FleetResult<MultiRegionConfig> {
        self.deployments
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FleetError::DeploymentNotFound(name.to_string()))
    }

    // =========================================================================
    // Latency
    // =========================================================================

    pub fn update_latency_matrix(&self, from: &str, to: &str, latency_ms: u32) {
        self.latencies
            .write()
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), latency_ms);
        debug!("Latency updated: {} -> {} = {}ms", from, to, latency_ms);
    }

    /// Measured latency, 0 when the pair is unknown
    pub fn latency(&self, from: &str, to: &str) -> u32 {
        self.latencies
            .read()
            .get(from)
            .and_then(|row| row.get(to))
            .copied()
            .unwrap_or(0)
    }

    pub fn latency_matrix(&self) -> BTreeMap<String, BTreeMap<String, u32>> {
        self.latencies
            .read()
            .iter()
            .map(|(from, row)| {
                let row = row.iter().map(|(to, ms)| (to.clone(), *ms)).collect();
                (from.clone(), row)
            })
            .collect()
    }

    // =========================================================================
    // Traffic decisions
    // =========================================================================

    /// Traffic percentage per active region under the config's strategy
    pub fn optimize_traffic_distribution(&self, config_name: &str) -> FleetResult<BTreeMap<String, f64>> {
        let config = self.deployment_config(config_name)?;
        let distribution = config.strategy.distribute(&config.active_regions);
        info!("Traffic distribution for {}: {:?}", config_name, distribution);
        Ok(distribution)
    }

    /// Region that should serve a client from `client_region`.
    ///
    /// The client's own region wins if active; otherwise the active region
    /// with the lowest known latency, falling back to the first active region.
    pub fn select_region_for_request(&self, client_region: &str, config_name: &str) -> FleetResult<String> {
        let config = self.deployment_config(config_name)?;

        if config.active_regions.iter().any(|r| r == client_region) {
            return Ok(client_region.to_string());
        }

        let nearest = config
            .active_regions
            .iter()
            .map(|r| (r, self.latency(client_region, r)))
            .filter(|(_, ms)| *ms > 0)
            .min_by_key(|(_, ms)| *ms)
            .map(|(r, _)| r.clone());

        nearest
            .or_else(|| config.active_regions.first().cloned())
            .ok_or_else(|| {
                FleetError::PreconditionFailed(format!("deployment {} has no active regions", config_name))
            })
    }

    /// Great-circle distance in kilometers
    pub fn calculate_geometric_distance(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        haversine_km(lat1, lon1, lat2, lon2)
    }

    /// Closest active registry region to a point, with its distance in km
    pub fn nearest_region(&self, latitude: f64, longitude: f64) -> Option<(String, f64)> {
        self.registry
            .region_coordinates()
            .into_iter()
            .map(|(name, lat, lon)| (name, haversine_km(latitude, longitude, lat, lon)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    pub fn multi_region_status(&self, config_name: &str) -> FleetResult<MultiRegionStatus> {
        let config = self.deployment_config(config_name)?;

        let (total_data_centers, total_capacity, total_servers) = self
            .data_centers
            .read()
            .values()
            .filter(|dc| dc.is_active)
            .fold((0, 0u64, 0u64), |(n, cap, cur), dc| {
                (n + 1, cap + dc.capacity as u64, cur + dc.current_count as u64)
            });

        let regions = config
            .active_regions
            .iter()
            .filter_map(|r| self.registry.region_stats(r))
            .map(|stats| RegionHealth {
                name: stats.name,
                healthy_servers: stats.healthy_servers,
                total_servers: stats.total_servers,
            })
            .collect();

        Ok(MultiRegionStatus {
            traffic_distribution: config.strategy.distribute(&config.active_regions),
            config_name: config.name,
            strategy: config.strategy,
            active_regions: config.active_regions,
            data_residency_region: config.data_residency_region,
            disaster_recovery_region: config.disaster_recovery_region,
            replication_mode: config.replication_mode,
            total_data_centers,
            total_capacity,
            total_servers,
            latency_target_ms: config.latency_target_ms,
            cost_optimization: config.cost_optimization,
            regions,
        })
    }

    pub fn deployment_comparison(&self) -> DeploymentComparison {
        let strategies = [
            DeploymentStrategy::ActiveActive,
            DeploymentStrategy::ActivePassive,
            DeploymentStrategy::ActiveWarm,
        ]
        .into_iter()
        .filter_map(|s| s.profile().map(|p| (s, p)))
        .collect();

        DeploymentComparison {
            strategies,
            total_configs: self.deployments.read().len(),
            total_data_centers: self.data_centers.read().len(),
        }
    }
}
