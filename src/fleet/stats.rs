//! Read-only aggregates served to the reporting boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::server::{Region, Server};
use super::strategy::LoadBalancingStrategy;

/// Integer percentage, 0 when `whole` is 0
pub(crate) fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        0
    } else {
        part * 100 / whole
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub id: String,
    pub region: String,
    pub endpoint: String,
    pub port: u16,
    pub is_healthy: bool,
    pub current_load: u32,
    pub capacity: u32,
    pub utilization: u64,
    pub response_time_ms: u64,
    pub error_rate: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub health_score: u32,
    pub last_health_check: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&Server> for ServerStats {
    fn from(server: &Server) -> Self {
        Self {
            id: server.id.clone(),
            region: server.region.clone(),
            endpoint: server.endpoint.clone(),
            port: server.port,
            is_healthy: server.is_healthy,
            current_load: server.current_load,
            capacity: server.capacity,
            utilization: server.utilization().unwrap_or(0),
            response_time_ms: server.response_time.as_millis() as u64,
            error_rate: server.error_rate,
            cpu_usage: server.cpu_usage,
            memory_usage: server.memory_usage,
            health_score: server.health_score(),
            last_health_check: server.last_health_check,
            created_at: server.created_at,
        }
    }
}

/// Running totals over a set of servers
#[derive(Debug, Default)]
pub(crate) struct Totals {
    pub servers: usize,
    pub healthy: usize,
    pub load: u64,
    pub capacity: u64,
    pub response_ms: u64,
}

impl Totals {
    pub fn add(&mut self, server: &Server) {
        self.servers += 1;
        if server.is_healthy {
            self.healthy += 1;
        }
        self.load += server.current_load as u64;
        self.capacity += server.capacity as u64;
        self.response_ms += server.response_time.as_millis() as u64;
    }

    pub fn avg_response_ms(&self) -> u64 {
        if self.servers == 0 {
            0
        } else {
            self.response_ms / self.servers as u64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionStats {
    pub name: String,
    pub continent: String,
    pub priority: i32,
    pub is_active: bool,
    pub total_servers: usize,
    pub healthy_servers: usize,
    pub total_load: u64,
    pub total_capacity: u64,
    /// `total_load * 100 / total_capacity`
    pub utilization: u64,
    pub avg_response_ms: u64,
}

impl RegionStats {
    pub(crate) fn new(region: &Region, totals: &Totals) -> Self {
        Self {
            name: region.name.clone(),
            continent: region.continent.clone(),
            priority: region.priority,
            is_active: region.is_active,
            total_servers: totals.servers,
            healthy_servers: totals.healthy,
            total_load: totals.load,
            total_capacity: totals.capacity,
            utilization: percent(totals.load, totals.capacity),
            avg_response_ms: totals.avg_response_ms(),
        }
    }

    /// `healthy * 100 / total`, 0 for an empty region
    pub fn health_percentage(&self) -> u64 {
        percent(self.healthy_servers as u64, self.total_servers as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub strategy: LoadBalancingStrategy,
    pub total_regions: usize,
    pub total_servers: usize,
    pub healthy_servers: usize,
    pub total_load: u64,
    pub total_capacity: u64,
    pub utilization: u64,
    pub avg_response_ms: u64,
    pub active_sessions: usize,
    pub session_affinity: bool,
}
