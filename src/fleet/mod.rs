//! Fleet registry and traffic router
//!
//! Holds regions, servers, live metrics and session affinity, and picks a
//! server for each inbound request.

mod registry;
mod server;
mod session;
mod stats;
mod strategy;

pub use registry::{FleetRegistry, RegistryConfig};
pub use server::{Region, Server, ServerMetrics};
pub use session::{SessionBinding, SessionStore, DEFAULT_AFFINITY_TTL};
pub use stats::{GlobalStats, RegionStats, ServerStats};
pub(crate) use stats::percent;
pub use strategy::{
    select_fastest, select_geo, select_least_loaded, select_round_robin, select_weighted,
    LoadBalancingStrategy,
};
