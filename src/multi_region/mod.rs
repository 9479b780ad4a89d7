//! Multi-region deployment coordination

mod coordinator;
mod geo;
mod model;

pub use coordinator::{
    DataCenterStatus, DeploymentComparison, MultiRegionCoordinator, MultiRegionStatus,
    RegionHealth,
};
pub use geo::{haversine_km, EARTH_RADIUS_KM};
pub use model::{
    DataCenter, DataCenterTier, DeploymentStrategy, MultiRegionConfig, ReplicationMode,
    StrategyProfile,
};
