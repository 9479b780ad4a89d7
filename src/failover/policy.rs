//! Failover policies, events and disaster recovery plans

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};

/// Replication lag tolerated before a failover is refused
pub const DEFAULT_MAX_REPLICATION_LAG: Duration = Duration::from_secs(5);

/// A primary/secondary region pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverPolicy {
    pub name: String,
    pub primary_region: String,
    pub secondary_region: String,
    /// Fail over when primary health drops strictly below this percentage
    pub health_threshold: u32,
    /// Upper bound on the cutover settle time
    pub failover_timeout: Duration,
    pub automatic: bool,
    pub max_replication_lag: Duration,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl FailoverPolicy {
    pub fn new(
        name: impl Into<String>,
        primary_region: impl Into<String>,
        secondary_region: impl Into<String>,
        health_threshold: u32,
        failover_timeout: Duration,
        automatic: bool,
    ) -> Self {
        Self {
            name: name.into(),
            primary_region: primary_region.into(),
            secondary_region: secondary_region.into(),
            health_threshold,
            failover_timeout,
            automatic,
            max_replication_lag: DEFAULT_MAX_REPLICATION_LAG,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Store key: `{primary}-{secondary}`
    pub fn key(&self) -> String {
        policy_key(&self.primary_region, &self.secondary_region)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.primary_region.is_empty() || self.secondary_region.is_empty() {
            return Err(invalid("primary and secondary regions are required"));
        }
        if self.primary_region == self.secondary_region {
            return Err(invalid(format!(
                "primary and secondary region are both '{}'",
                self.primary_region
            )));
        }
        if self.health_threshold > 100 {
            return Err(invalid(format!(
                "health_threshold ({}) exceeds 100",
                self.health_threshold
            )));
        }
        Ok(())
    }
}

pub fn policy_key(primary: &str, secondary: &str) -> String {
    format!("{}-{}", primary, secondary)
}

fn invalid(reason: impl Into<String>) -> FleetError {
    FleetError::Invalid("failover policy", reason.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

/// A recorded region switch, or an attempt at one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub id: Uuid,
    pub policy_key: String,
    pub timestamp: DateTime<Utc>,
    pub from_region: String,
    pub to_region: String,
    pub reason: String,
    pub automatic: bool,
    /// Replication lag of the target region when deciding
    pub replication_lag_ms: u64,
    pub status: FailoverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FailoverEvent {
    pub(crate) fn new(
        policy_key: &str,
        from_region: &str,
        to_region: &str,
        reason: &str,
        automatic: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy_key: policy_key.to_string(),
            timestamp: Utc::now(),
            from_region: from_region.to_string(),
            to_region: to_region.to_string(),
            reason: reason.to_string(),
            automatic,
            replication_lag_ms: 0,
            status: FailoverStatus::Initiated,
            error: None,
        }
    }

    pub(crate) fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = FailoverStatus::Failed;
        self.error = Some(error.into());
        self
    }

    pub(crate) fn completed(mut self) -> Self {
        self.status = FailoverStatus::Completed;
        self
    }
}

/// Read model for a policy and where its traffic currently goes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverPolicyStatus {
    pub policy_key: String,
    pub policy_name: String,
    pub primary_region: String,
    pub secondary_region: String,
    pub current_primary: String,
    pub is_failed_over: bool,
    pub automatic: bool,
    pub health_threshold: u32,
    pub is_active: bool,
    /// Stage of a switch currently underway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<FailoverStatus>,
}

/// Recovery objectives and backup contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterRecoveryPlan {
    pub name: String,
    /// Recovery time objective
    pub rto: Duration,
    /// Recovery point objective
    pub rpo: Duration,
    pub backup_frequency: Duration,
    pub backup_retention: Duration,
    pub replication_enabled: bool,
    pub replication_targets: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DisasterRecoveryPlan {
    pub fn validate(&self) -> FleetResult<()> {
        let invalid = |reason: String| FleetError::Invalid("disaster recovery plan", reason);

        if self.name.is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if self.rto.is_zero() || self.rpo.is_zero() {
            return Err(invalid("RTO and RPO must be positive".into()));
        }
        if self.rpo > self.rto {
            return Err(invalid(format!(
                "RPO ({:?}) exceeds RTO ({:?})",
                self.rpo, self.rto
            )));
        }
        if self.backup_frequency.is_zero() {
            return Err(invalid("backup frequency must be positive".into()));
        }
        if self.backup_retention < self.backup_frequency {
            return Err(invalid(format!(
                "backup retention ({:?}) is shorter than backup frequency ({:?})",
                self.backup_retention, self.backup_frequency
            )));
        }
        if self.replication_enabled && self.replication_targets.is_empty() {
            return Err(invalid("replication enabled without targets".into()));
        }
        Ok(())
    }
}
