//! Active health monitoring
//!
//! Probes each registered server on a fixed interval and flips its health
//! flag in the fleet registry once the consecutive-failure threshold is
//! crossed.

mod monitor;
mod probe;

pub use monitor::{GlobalHealthStatus, HealthMonitor, HealthMonitorConfig, HealthStatus};
pub use probe::{HealthCheckResult, HealthProbe, HttpMethod, HttpProber, Prober};
