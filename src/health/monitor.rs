//! Health Monitor - active probing of every registered server
//!
//! Each cycle fans out one probe per registered `HealthProbe`, records every
//! outcome and tracks consecutive failures per server:
//! - a success resets the counter and, if it was non-zero, marks the server healthy
//! - a failure increments it, and at `max_consecutive_failures` marks the server unhealthy
//!
//! Failure counters and results are guarded independently of the registry
//! lock, so a burst of probe results never queues behind registry writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::probe::{normalize_path, HealthCheckResult, HealthProbe, HttpProber, Prober};
use crate::error::{FleetError, FleetResult};
use crate::events::{EventLog, HEALTH_LOG_CAPACITY};
use crate::fleet::FleetRegistry;
use crate::ticker::spawn_periodic;

/// Configuration for the health monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Time between probe cycles
    pub check_interval: Duration,
    /// Default per-probe timeout
    pub check_timeout: Duration,
    /// Consecutive failures before a server is marked unhealthy
    pub max_consecutive_failures: u32,
    /// Number of probe results retained
    pub history_capacity: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
            max_consecutive_failures: 3,
            history_capacity: HEALTH_LOG_CAPACITY,
        }
    }
}

/// Health view of a single probed server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub server_id: String,
    pub consecutive_failures: u32,
    pub health_percentage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<HealthCheckResult>,
}

/// Fleet-wide health over the most recent check interval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalHealthStatus {
    pub total_servers: usize,
    pub healthy_checks: usize,
    pub unhealthy_checks: usize,
    pub avg_response_ms: u64,
    pub total_checks: usize,
    pub is_running: bool,
}

pub struct HealthMonitor {
    registry: Arc<FleetRegistry>,
    prober: Arc<dyn Prober>,
    config: HealthMonitorConfig,
    probes: RwLock<HashMap<String, HealthProbe>>,
    failures: Mutex<HashMap<String, u32>>,
    results: EventLog<HealthCheckResult>,
    running: AtomicBool,
}

impl HealthMonitor {
    /// Monitor that probes over HTTP
    pub fn new(registry: Arc<FleetRegistry>, config: HealthMonitorConfig) -> Self {
        Self::with_prober(registry, config, Arc::new(HttpProber::new()))
    }

    pub fn with_prober(
        registry: Arc<FleetRegistry>,
        config: HealthMonitorConfig,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            registry,
            prober,
            results: EventLog::new(config.history_capacity),
            config,
            probes: RwLock::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    // =========================================================================
    // Probe registration
    // =========================================================================

    /// Register a GET probe expecting 200 with the monitor's default timeout
    pub fn register_health_probe(
        &self,
        server_id: &str,
        endpoint: &str,
        port: u16,
        path: &str,
    ) -> FleetResult<()> {
        self.register_probe(HealthProbe::new(
            server_id,
            endpoint,
            port,
            path,
            self.config.check_timeout,
        ))
    }

    /// Register (or replace) the probe for `probe.server_id`.
    ///
    /// Replacing a probe keeps the failure counter. A server that is already
    /// unhealthy starts with a non-zero counter so its next success restores it.
    pub fn register_probe(&self, mut probe: HealthProbe) -> FleetResult<()> {
        let server = match self.registry.server(&probe.server_id) {
            Some(server) => server,
            None => return Err(FleetError::ServerNotFound(probe.server_id)),
        };
        probe.path = normalize_path(probe.path);

        info!("Health probe registered: {} -> {}", probe.server_id, probe.url());
        {
            let mut failures = self.failures.lock();
            let count = failures.entry(probe.server_id.clone()).or_insert(0);
            if !server.is_healthy {
                *count = (*count).max(1);
            }
        }
        self.probes.write().insert(probe.server_id.clone(), probe);
        Ok(())
    }

    /// Stop probing a server. Returns the removed probe.
    pub fn remove_probe(&self, server_id: &str) -> Option<HealthProbe> {
        let removed = self.probes.write().remove(server_id);
        self.failures.lock().remove(server_id);
        if removed.is_some() {
            info!("Health probe removed: {}", server_id);
        }
        removed
    }

    pub fn registered_probe(&self, server_id: &str) -> Option<HealthProbe> {
        self.probes.read().get(server_id).cloned()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.read().len()
    }

    // =========================================================================
    // Probing
    // =========================================================================

    /// Probe every registered server once, concurrently. Returns the results.
    pub async fn run_cycle(&self) -> Vec<HealthCheckResult> {
        let probes: Vec<HealthProbe> = self.probes.read().values().cloned().collect();

        if probes.is_empty() {
            trace!("No servers to probe");
            return Vec::new();
        }

        debug!("Probing {} servers", probes.len());

        let results = join_all(probes.iter().map(|probe| self.check_server(probe))).await;

        for result in &results {
            self.results.push(result.clone());
            self.apply_result(&result.server_id, result.is_healthy);
        }

        results
    }

    async fn check_server(&self, probe: &HealthProbe) -> HealthCheckResult {
        let start = Instant::now();
        let outcome = timeout(probe.timeout, self.prober.probe(probe)).await;
        let response_time = start.elapsed();

        let (is_healthy, status_code, error) = match outcome {
            Ok(Ok(status)) if status == probe.expected_status => (true, Some(status), None),
            Ok(Ok(status)) => (
                false,
                Some(status),
                Some(format!(
                    "Unexpected status code: {} (expected {})",
                    status, probe.expected_status
                )),
            ),
            Ok(Err(e)) => (false, None, Some(e)),
            Err(_) => (false, None, Some("Timeout".to_string())),
        };

        if let Some(e) = &error {
            debug!("Probe {} failed: {}", probe.server_id, e);
        }

        HealthCheckResult {
            server_id: probe.server_id.clone(),
            timestamp: Utc::now(),
            is_healthy,
            response_time,
            status_code,
            error,
        }
    }

    fn apply_result(&self, server_id: &str, healthy: bool) {
        let flip = {
            let mut failures = self.failures.lock();
            let count = failures.entry(server_id.to_string()).or_insert(0);
            if healthy {
                let recovering = *count > 0;
                *count = 0;
                recovering.then_some(true)
            } else {
                *count += 1;
                (*count >= self.config.max_consecutive_failures).then_some(false)
            }
        };

        if let Some(healthy) = flip {
            if let Err(e) = self.registry.set_server_health(server_id, healthy) {
                warn!("Cannot update health for {}: {}", server_id, e);
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Share of retained results for this server that were healthy.
    ///
    /// 100 when no result has been recorded yet.
    pub fn calculate_health_percentage(&self, server_id: &str) -> u32 {
        let (healthy, total) = self.results.fold((0u64, 0u64), |(healthy, total), r| {
            if r.server_id == server_id {
                (healthy + r.is_healthy as u64, total + 1)
            } else {
                (healthy, total)
            }
        });

        if total == 0 {
            100
        } else {
            (healthy * 100 / total) as u32
        }
    }

    pub fn health_status(&self, server_id: &str) -> FleetResult<HealthStatus> {
        if !self.probes.read().contains_key(server_id) {
            return Err(FleetError::ServerNotFound(server_id.to_string()));
        }

        let consecutive_failures = self.failures.lock().get(server_id).copied().unwrap_or(0);

        Ok(HealthStatus {
            server_id: server_id.to_string(),
            consecutive_failures,
            health_percentage: self.calculate_health_percentage(server_id),
            last_check: self.results.last_matching(|r| r.server_id == server_id),
        })
    }

    /// The newest `limit` results for a server, oldest first
    pub fn health_history(&self, server_id: &str, limit: usize) -> Vec<HealthCheckResult> {
        self.results
            .recent_matching(limit, |r| r.server_id == server_id)
    }

    /// Aggregate over results newer than one check interval before the latest
    pub fn global_health_status(&self) -> GlobalHealthStatus {
        let mut status = GlobalHealthStatus {
            total_servers: self.probe_count(),
            total_checks: self.results.len(),
            is_running: self.is_running(),
            ..Default::default()
        };

        let Some(latest) = self.results.last_matching(|_| true) else {
            return status;
        };
        let window = chrono::Duration::from_std(self.config.check_interval)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let since = latest.timestamp - window;

        let (healthy, unhealthy, response) =
            self.results
                .fold((0usize, 0usize, Duration::ZERO), |(h, u, rt), r| {
                    if r.timestamp < since {
                        (h, u, rt)
                    } else if r.is_healthy {
                        (h + 1, u, rt + r.response_time)
                    } else {
                        (h, u + 1, rt + r.response_time)
                    }
                });

        status.healthy_checks = healthy;
        status.unhealthy_checks = unhealthy;
        let checks = (healthy + unhealthy) as u32;
        if checks > 0 {
            status.avg_response_ms = (response / checks).as_millis() as u64;
        }
        status
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the probe loop. Returns `None` if it is already running.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Health monitor already running");
            return None;
        }

        let monitor = Arc::clone(self);
        let ticker = spawn_periodic(
            "Health monitor",
            self.config.check_interval,
            cancel,
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.run_cycle().await;
                }
            },
        );

        let monitor = Arc::clone(self);
        Some(tokio::spawn(async move {
            if let Err(e) = ticker.await {
                error!("Health monitor loop failed: {}", e);
            }
            monitor.running.store(false, Ordering::SeqCst);
        }))
    }
}
