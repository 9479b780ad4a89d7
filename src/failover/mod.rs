//! Region failover, failback and disaster recovery plans

mod controller;
mod policy;

pub use controller::{FailoverConfig, FailoverController, DEFAULT_REPLICATION_LAG};
pub use policy::{
    policy_key, DisasterRecoveryPlan, FailoverEvent, FailoverPolicy, FailoverPolicyStatus,
    FailoverStatus, DEFAULT_MAX_REPLICATION_LAG,
};
