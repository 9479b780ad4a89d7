//! Fleet Registry - the canonical set of regions and servers
//!
//! The registry is responsible for:
//! - Region and server registration (and deregistration)
//! - Live metrics and health flags per server
//! - Server selection for inbound requests
//! - Session affinity bindings
//!
//! Every read of fleet state takes the shared lock and every mutation takes
//! the exclusive lock. The controllers never hold their own copies of server
//! or region records; they go through this API.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::server::{Region, Server, ServerMetrics};
use super::session::{SessionStore, DEFAULT_AFFINITY_TTL};
use super::stats::{percent, GlobalStats, RegionStats, ServerStats, Totals};
use super::strategy::{self, LoadBalancingStrategy};
use crate::error::{FleetError, FleetResult};

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub strategy: LoadBalancingStrategy,
    pub session_affinity: bool,
    pub affinity_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            session_affinity: true,
            affinity_ttl: DEFAULT_AFFINITY_TTL,
        }
    }
}

#[derive(Debug, Default)]
struct FleetState {
    regions: HashMap<String, Region>,
    servers: HashMap<String, Server>,
    /// Server ids in registration order, for a stable fleet-wide candidate order
    server_order: Vec<String>,
    strategy: LoadBalancingStrategy,
    session_affinity: bool,
    affinity_ttl: Duration,
}

impl FleetState {
    /// Healthy servers of the preferred region, else healthy servers fleet-wide
    fn healthy_candidates(&self, preferred_region: Option<&str>) -> Vec<&Server> {
        if let Some(region) = preferred_region.and_then(|name| self.regions.get(name)) {
            let preferred: Vec<&Server> = region
                .servers
                .iter()
                .filter_map(|id| self.servers.get(id))
                .filter(|s| s.is_healthy)
                .collect();
            if !preferred.is_empty() {
                return preferred;
            }
        }

        self.server_order
            .iter()
            .filter_map(|id| self.servers.get(id))
            .filter(|s| s.is_healthy)
            .collect()
    }

    fn priority_of(&self, region: &str) -> i32 {
        self.regions
            .get(region)
            .map(|r| r.priority)
            .unwrap_or(i32::MAX)
    }

    fn detach_server(&mut self, server_id: &str) -> Option<Server> {
        let server = self.servers.remove(server_id)?;
        if let Some(region) = self.regions.get_mut(&server.region) {
            region.servers.retain(|id| id != server_id);
        }
        self.server_order.retain(|id| id != server_id);
        Some(server)
    }
}

/// Multi-region server registry and traffic router
#[derive(Debug)]
pub struct FleetRegistry {
    state: RwLock<FleetState>,
    sessions: SessionStore,
    round_robin_cursor: AtomicUsize,
}

impl Default for FleetRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl FleetRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            state: RwLock::new(FleetState {
                strategy: config.strategy,
                session_affinity: config.session_affinity,
                affinity_ttl: config.affinity_ttl,
                ..Default::default()
            }),
            sessions: SessionStore::new(),
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a region, overwriting the attributes of an existing one.
    ///
    /// Re-registering keeps the region's current server membership.
    pub fn register_region(
        &self,
        name: &str,
        continent: &str,
        latitude: f64,
        longitude: f64,
        priority: i32,
    ) -> Region {
        let mut state = self.state.write();
        let mut region = Region::new(name, continent, latitude, longitude, priority);
        if let Some(existing) = state.regions.remove(name) {
            debug!("Region {} re-registered, keeping {} servers", name, existing.servers.len());
            region.servers = existing.servers;
            region.created_at = existing.created_at;
        }
        state.regions.insert(name.to_string(), region.clone());

        info!("Region registered: {} (priority: {})", name, priority);
        region
    }

    /// Register a server into an existing region.
    ///
    /// Reusing an id replaces the previous record and moves it to `region`.
    pub fn register_server(
        &self,
        id: &str,
        region: &str,
        endpoint: &str,
        port: u16,
        weight: u32,
        capacity: u32,
    ) -> FleetResult<Server> {
        let mut state = self.state.write();

        if !state.regions.contains_key(region) {
            return Err(FleetError::RegionNotFound(region.to_string()));
        }

        if state.detach_server(id).is_some() {
            debug!("Server {} re-registered", id);
            self.sessions.purge_server(id);
        }

        let server = Server::new(id, region, endpoint, port, weight, capacity);
        state.servers.insert(id.to_string(), server.clone());
        state.server_order.push(id.to_string());
        if let Some(r) = state.regions.get_mut(region) {
            r.servers.push(id.to_string());
        }

        info!(
            "Server registered: {} in {} (capacity: {} req/s)",
            id, region, capacity
        );
        Ok(server)
    }

    /// Remove a server and every affinity binding pointing at it
    pub fn deregister_server(&self, id: &str) -> FleetResult<Server> {
        let server = self
            .state
            .write()
            .detach_server(id)
            .ok_or_else(|| FleetError::ServerNotFound(id.to_string()))?;

        let dropped = self.sessions.purge_server(id);
        info!("Server deregistered: {} ({} sessions dropped)", id, dropped);
        Ok(server)
    }

    /// Remove a region together with all of its servers
    pub fn deregister_region(&self, name: &str) -> FleetResult<Vec<Server>> {
        let mut state = self.state.write();
        let region = state
            .regions
            .remove(name)
            .ok_or_else(|| FleetError::RegionNotFound(name.to_string()))?;

        let mut removed = Vec::with_capacity(region.servers.len());
        for id in &region.servers {
            if let Some(server) = state.servers.remove(id) {
                self.sessions.purge_server(id);
                removed.push(server);
            }
        }
        state.server_order.retain(|id| !region.servers.contains(id));

        info!("Region deregistered: {} ({} servers removed)", name, removed.len());
        Ok(removed)
    }

    // =========================================================================
    // Request routing
    // =========================================================================

    /// Pick a server for an inbound request.
    ///
    /// A still-healthy affinity binding wins outright. Otherwise the healthy
    /// servers of `preferred_region` are the candidates, falling back to every
    /// healthy server in the fleet, and the configured strategy picks one.
    pub fn select_server(
        &self,
        client_ip: &str,
        session_id: Option<&str>,
        preferred_region: Option<&str>,
    ) -> FleetResult<Server> {
        let state = self.state.read();
        let session_id = session_id.filter(|s| !s.is_empty());
        let affinity = state.session_affinity;

        if let (true, Some(sid)) = (affinity, session_id) {
            if let Some(server_id) = self.sessions.lookup(sid, state.affinity_ttl) {
                match state.servers.get(&server_id) {
                    Some(server) if server.is_healthy => {
                        debug!("Using session affinity: {} -> {}", sid, server_id);
                        return Ok(server.clone());
                    }
                    _ => {
                        self.sessions.remove(sid);
                    }
                }
            }
        }

        let candidates = state.healthy_candidates(preferred_region.filter(|r| !r.is_empty()));
        if candidates.is_empty() {
            warn!("No healthy servers available for client {}", client_ip);
            return Err(FleetError::NoHealthyServers);
        }

        let mut rng = rand::thread_rng();
        let selected = match state.strategy {
            LoadBalancingStrategy::RoundRobin => {
                strategy::select_round_robin(&candidates, &self.round_robin_cursor)
            }
            LoadBalancingStrategy::LeastLoaded => strategy::select_least_loaded(&candidates),
            LoadBalancingStrategy::Fastest => strategy::select_fastest(&candidates),
            LoadBalancingStrategy::Geo => {
                strategy::select_geo(&candidates, |r| state.priority_of(r), &mut rng)
            }
            LoadBalancingStrategy::Weighted => strategy::select_weighted(&candidates, &mut rng),
        }
        .ok_or(FleetError::NoHealthyServers)?;

        if let (true, Some(sid)) = (affinity, session_id) {
            self.sessions.bind(sid, &selected.id);
        }

        debug!(
            "Selected server {} for {} (strategy: {})",
            selected.id, client_ip, state.strategy
        );
        Ok(selected.clone())
    }

    // =========================================================================
    // Metrics and health
    // =========================================================================

    /// Overwrite a server's metrics with a fresh sample
    pub fn update_server_metrics(&self, id: &str, metrics: ServerMetrics) -> FleetResult<()> {
        let mut state = self.state.write();
        let server = state
            .servers
            .get_mut(id)
            .ok_or_else(|| FleetError::ServerNotFound(id.to_string()))?;

        server.apply_metrics(&metrics);
        debug!(
            "Updated metrics: {} (load: {}/{}, response: {:?}, error: {:.2}%)",
            id,
            metrics.current_load,
            server.capacity,
            metrics.response_time,
            metrics.error_rate * 100.0
        );
        Ok(())
    }

    /// Set a server's health flag. Returns whether the flag changed.
    ///
    /// Turning a server unhealthy drops the sessions bound to it.
    pub fn set_server_health(&self, id: &str, healthy: bool) -> FleetResult<bool> {
        let changed = {
            let mut state = self.state.write();
            let server = state
                .servers
                .get_mut(id)
                .ok_or_else(|| FleetError::ServerNotFound(id.to_string()))?;
            let changed = server.is_healthy != healthy;
            server.is_healthy = healthy;
            changed
        };

        if changed {
            if healthy {
                info!("Server {} marked as healthy", id);
            } else {
                let dropped = self.sessions.purge_server(id);
                warn!("Server {} marked as unhealthy ({} sessions dropped)", id, dropped);
            }
        }
        Ok(changed)
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn set_strategy(&self, strategy: LoadBalancingStrategy) {
        self.state.write().strategy = strategy;
        info!("Load balancing strategy changed to: {}", strategy);
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.state.read().strategy
    }

    pub fn set_session_affinity(&self, enabled: bool, ttl: Duration) {
        let mut state = self.state.write();
        state.session_affinity = enabled;
        state.affinity_ttl = ttl;
        info!("Session affinity {} (ttl: {:?})", if enabled { "enabled" } else { "disabled" }, ttl);
    }

    /// Drop affinity bindings older than the configured TTL
    pub fn cleanup_expired_sessions(&self) -> usize {
        let ttl = self.state.read().affinity_ttl;
        let removed = self.sessions.purge_expired(ttl);
        debug!("Cleaned up {} expired sessions", removed);
        removed
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn server(&self, id: &str) -> Option<Server> {
        self.state.read().servers.get(id).cloned()
    }

    pub fn region(&self, name: &str) -> Option<Region> {
        self.state.read().regions.get(name).cloned()
    }

    pub fn contains_region(&self, name: &str) -> bool {
        self.state.read().regions.contains_key(name)
    }

    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().regions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of servers registered in a region, `None` for an unknown region
    pub fn region_server_count(&self, name: &str) -> Option<usize> {
        self.state.read().regions.get(name).map(|r| r.servers.len())
    }

    /// All server ids in registration order
    pub fn server_ids(&self) -> Vec<String> {
        self.state.read().server_order.clone()
    }

    /// (name, latitude, longitude) of every active region
    pub fn region_coordinates(&self) -> Vec<(String, f64, f64)> {
        let state = self.state.read();
        let mut coords: Vec<_> = state
            .regions
            .values()
            .filter(|r| r.is_active)
            .map(|r| (r.name.clone(), r.latitude, r.longitude))
            .collect();
        coords.sort_by(|a, b| a.0.cmp(&b.0));
        coords
    }

    pub fn server_stats(&self, id: &str) -> Option<ServerStats> {
        self.state.read().servers.get(id).map(ServerStats::from)
    }

    pub fn region_stats(&self, name: &str) -> Option<RegionStats> {
        let state = self.state.read();
        let region = state.regions.get(name)?;

        let mut totals = Totals::default();
        for server in region.servers.iter().filter_map(|id| state.servers.get(id)) {
            totals.add(server);
        }
        Some(RegionStats::new(region, &totals))
    }

    pub fn global_stats(&self) -> GlobalStats {
        let state = self.state.read();

        let mut totals = Totals::default();
        for server in state.servers.values() {
            totals.add(server);
        }

        GlobalStats {
            strategy: state.strategy,
            total_regions: state.regions.len(),
            total_servers: totals.servers,
            healthy_servers: totals.healthy,
            total_load: totals.load,
            total_capacity: totals.capacity,
            utilization: percent(totals.load, totals.capacity),
            avg_response_ms: totals.avg_response_ms(),
            active_sessions: self.sessions.len(),
            session_affinity: state.session_affinity,
        }
    }
}
