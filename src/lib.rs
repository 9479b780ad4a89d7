pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod failover;
pub mod fleet;
pub mod health;
pub mod manager;
pub mod multi_region;
pub mod scaling;
pub mod ticker;

pub use error::{FleetError, FleetResult};
pub use manager::{FleetManager, FleetSummary};
