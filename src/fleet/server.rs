//! Region and Server records held by the fleet registry

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named geographic grouping of servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// Registry key
    pub name: String,
    pub continent: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Lower number = preferred by geo selection
    pub priority: i32,
    pub is_active: bool,
    /// Member server ids in registration order
    pub servers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Region {
    pub fn new(
        name: impl Into<String>,
        continent: impl Into<String>,
        latitude: f64,
        longitude: f64,
        priority: i32,
    ) -> Self {
        Self {
            name: name.into(),
            continent: continent.into(),
            latitude,
            longitude,
            priority,
            is_active: true,
            servers: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A single application server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Unique across the fleet
    pub id: String,
    /// Name of the owning region
    pub region: String,
    /// Hostname or IP
    pub endpoint: String,
    pub port: u16,
    /// Relative weight for weighted selection
    pub weight: u32,
    /// Max requests per second
    pub capacity: u32,
    /// Current requests per second
    pub current_load: u32,
    pub is_healthy: bool,
    pub response_time: Duration,
    /// Fraction of failed requests, 0.0 - 1.0
    pub error_rate: f64,
    /// Percent, 0 - 100
    pub cpu_usage: f64,
    /// Percent, 0 - 100
    pub memory_usage: f64,
    pub last_health_check: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Server {
    pub fn new(
        id: impl Into<String>,
        region: impl Into<String>,
        endpoint: impl Into<String>,
        port: u16,
        weight: u32,
        capacity: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            region: region.into(),
            endpoint: endpoint.into(),
            port,
            weight,
            capacity,
            current_load: 0,
            is_healthy: true,
            response_time: Duration::ZERO,
            error_rate: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            last_health_check: now,
            created_at: now,
        }
    }

    /// Base URL the gateway forwards to
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.endpoint, self.port)
    }

    /// `current_load * 100 / capacity`, or `None` for a zero-capacity server
    pub fn utilization(&self) -> Option<u64> {
        if self.capacity == 0 {
            None
        } else {
            Some(self.current_load as u64 * 100 / self.capacity as u64)
        }
    }

    /// Composite 0-100 score derived from the last reported metrics.
    ///
    /// Starts at 100, loses the error rate in percent, and loses 5 (above 80%)
    /// or 10 (above 90%) each for CPU and memory pressure.
    pub fn health_score(&self) -> u32 {
        let mut score = 100i64 - (self.error_rate * 100.0) as i64;
        score -= pressure_penalty(self.cpu_usage);
        score -= pressure_penalty(self.memory_usage);
        score.clamp(0, 100) as u32
    }

    pub(crate) fn apply_metrics(&mut self, metrics: &ServerMetrics) {
        self.current_load = metrics.current_load;
        self.response_time = metrics.response_time;
        self.error_rate = metrics.error_rate;
        self.cpu_usage = metrics.cpu_usage;
        self.memory_usage = metrics.memory_usage;
        self.last_health_check = Utc::now();
    }
}

fn pressure_penalty(usage: f64) -> i64 {
    if usage > 90.0 {
        10
    } else if usage > 80.0 {
        5
    } else {
        0
    }
}

/// A metrics sample reported by the external collection agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub current_load: u32,
    pub response_time: Duration,
    pub error_rate: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

impl ServerMetrics {
    /// A sample carrying only load and response time
    pub fn load(current_load: u32, response_time: Duration) -> Self {
        Self {
            current_load,
            response_time,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url() {
        let server = Server::new("web-1", "us-east", "10.0.0.5", 8080, 1, 100);
        assert_eq!(server.url(), "http://10.0.0.5:8080");
        assert!(server.is_healthy);
    }

    #[test]
    fn test_utilization() {
        let mut server = Server::new("web-1", "us-east", "10.0.0.5", 8080, 1, 200);
        server.current_load = 50;
        assert_eq!(server.utilization(), Some(25));

        server.capacity = 0;
        assert_eq!(server.utilization(), None);
    }

    #[test]
    fn test_health_score() {
        let mut server = Server::new("web-1", "us-east", "10.0.0.5", 8080, 1, 100);
        assert_eq!(server.health_score(), 100);

        server.error_rate = 0.05;
        server.cpu_usage = 85.0;
        server.memory_usage = 95.0;
        assert_eq!(server.health_score(), 80);

        server.error_rate = 2.0;
        assert_eq!(server.health_score(), 0);
    }

    #[test]
    fn test_apply_metrics() {
        let mut server = Server::new("web-1", "us-east", "10.0.0.5", 8080, 1, 100);
        let before = server.last_health_check;
        server.apply_metrics(&ServerMetrics {
            current_load: 40,
            response_time: Duration::from_millis(120),
            error_rate: 0.01,
            cpu_usage: 55.0,
            memory_usage: 60.0,
        });
        assert_eq!(server.current_load, 40);
        assert_eq!(server.response_time, Duration::from_millis(120));
        assert!(server.last_health_check >= before);
    }
}
