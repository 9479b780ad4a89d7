//! Error taxonomy shared by every fleet component.

use thiserror::Error;

/// Errors returned by the registry, the controllers and the coordinator.
///
/// Health-probe failures never surface here: they are recorded as data and
/// only become visible as a health flip on the registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
    #[error("Region '{0}' not found")]
    RegionNotFound(String),

    #[error("Server '{0}' not found")]
    ServerNotFound(String),

    #[error("Scaling policy for region '{0}' not found")]
    ScalingPolicyNotFound(String),

    #[error("Failover policy '{0}' not found")]
    FailoverPolicyNotFound(String),

    #[error("Disaster recovery plan '{0}' not found")]
    RecoveryPlanNotFound(String),

    #[error("Data center '{0}' not found")]
    DataCenterNotFound(String),

    #[error("Deployment config '{0}' not found")]
    DeploymentNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("No healthy servers available")]
    NoHealthyServers,

    #[error("Invalid {0}: {1}")]
    Invalid(&'static str, String),
}

impl FleetError {
    /// Whether this error refers to an unknown key.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FleetError::RegionNotFound(_)
                | FleetError::ServerNotFound(_)
                | FleetError::ScalingPolicyNotFound(_)
                | FleetError::FailoverPolicyNotFound(_)
                | FleetError::RecoveryPlanNotFound(_)
                | FleetError::DataCenterNotFound(_)
                | FleetError::DeploymentNotFound(_)
        )
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
