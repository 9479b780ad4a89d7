//! Fleet file document
//!
//! A fleet file describes the routing and loop tuning plus every region,
//! server, policy, plan, data center, deployment and latency sample the
//! manager should start with. YAML is the canonical format; JSON parses too.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::failover::{
    DisasterRecoveryPlan, FailoverConfig, FailoverPolicy, DEFAULT_MAX_REPLICATION_LAG,
};
use crate::fleet::{LoadBalancingStrategy, RegistryConfig, DEFAULT_AFFINITY_TTL};
use crate::health::{HealthMonitorConfig, HealthProbe, HttpMethod};
use crate::multi_region::{
    DataCenter, DataCenterTier, DeploymentStrategy, MultiRegionConfig, ReplicationMode,
};
use crate::scaling::{ScalingConfig, ScalingPolicy};

/// Errors that can occur when parsing or validating a fleet file
#[derive(Error, Debug)]
pub enum FleetConfigError {
    #[error("Fleet file parse error: {0}")]
    ParseError(String),

    #[error("Duplicate region: '{0}'")]
    DuplicateRegion(String),

    #[error("Duplicate server id: '{0}'")]
    DuplicateServer(String),

    #[error("Duplicate scaling policy for region '{0}'")]
    DuplicateScalingPolicy(String),

    #[error("Region '{0}' referenced by {1} is not defined")]
    UndefinedRegion(String, String),

    #[error("Invalid {0}: {1}")]
    InvalidValue(String, String),
}

// ============================================================================
// Tuning sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub strategy: LoadBalancingStrategy,
    pub session_affinity: bool,
    pub affinity_ttl_secs: u64,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            session_affinity: true,
            affinity_ttl_secs: DEFAULT_AFFINITY_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub interval_secs: u64,
    pub timeout_ms: u64,
    pub max_consecutive_failures: u32,
    /// Probe path for servers that do not set their own
    pub path: String,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_ms: 5_000,
            max_consecutive_failures: 3,
            path: "/health".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingSection {
    pub evaluation_interval_secs: u64,
}

impl Default for ScalingSection {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSection {
    pub evaluation_interval_secs: u64,
    pub settle_delay_ms: u64,
}

impl Default for FailoverSection {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 30,
            settle_delay_ms: 1_000,
        }
    }
}

// ============================================================================
// Fleet entries
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: String,
    pub endpoint: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Overrides `health.path`
    #[serde(default)]
    pub health_path: Option<String>,
    /// Register a health probe for this server
    #[serde(default = "default_true")]
    pub probe: bool,
    /// Probe method, GET when unset
    #[serde(default)]
    pub health_method: Option<HttpMethod>,
    /// Status a healthy server answers with, 200 when unset
    #[serde(default)]
    pub expected_status: Option<u16>,
    /// Overrides `health.timeout_ms`
    #[serde(default)]
    pub health_timeout_ms: Option<u64>,
}

impl ServerEntry {
    /// The probe for this server, filling unset fields from the health section
    pub fn to_probe(&self, health: &HealthSection) -> HealthProbe {
        let mut probe = HealthProbe::new(
            &self.id,
            &self.endpoint,
            self.port,
            self.health_path.as_deref().unwrap_or(&health.path),
            Duration::from_millis(self.health_timeout_ms.unwrap_or(health.timeout_ms)),
        );
        if let Some(method) = self.health_method {
            probe.method = method;
        }
        if let Some(status) = self.expected_status {
            probe.expected_status = status;
        }
        probe
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionEntry {
    pub name: String,
    #[serde(default)]
    pub continent: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingPolicyEntry {
    pub region: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: u32,
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: u32,
    #[serde(default = "default_one")]
    pub scale_up_quantity: u32,
    #[serde(default = "default_one")]
    pub scale_down_quantity: u32,
    #[serde(default = "default_one")]
    pub min_instances: u32,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl ScalingPolicyEntry {
    pub fn to_policy(&self) -> ScalingPolicy {
        ScalingPolicy {
            region: self.region.clone(),
            name: self
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-autoscale", self.region)),
            scale_up_threshold: self.scale_up_threshold,
            scale_down_threshold: self.scale_down_threshold,
            scale_up_quantity: self.scale_up_quantity,
            scale_down_quantity: self.scale_down_quantity,
            min_instances: self.min_instances,
            max_instances: self.max_instances,
            cooldown: Duration::from_secs(self.cooldown_secs),
            ..ScalingPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverPolicyEntry {
    pub name: String,
    pub primary_region: String,
    pub secondary_region: String,
    #[serde(default = "default_health_threshold")]
    pub health_threshold: u32,
    #[serde(default = "default_failover_timeout_secs")]
    pub failover_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub automatic: bool,
    #[serde(default = "default_max_replication_lag_ms")]
    pub max_replication_lag_ms: u64,
}

impl FailoverPolicyEntry {
    pub fn to_policy(&self) -> FailoverPolicy {
        let mut policy = FailoverPolicy::new(
            &self.name,
            &self.primary_region,
            &self.secondary_region,
            self.health_threshold,
            Duration::from_secs(self.failover_timeout_secs),
            self.automatic,
        );
        policy.max_replication_lag = Duration::from_millis(self.max_replication_lag_ms);
        policy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlanEntry {
    pub name: String,
    pub rto_secs: u64,
    pub rpo_secs: u64,
    pub backup_frequency_secs: u64,
    pub backup_retention_secs: u64,
    #[serde(default)]
    pub replication_enabled: bool,
    #[serde(default)]
    pub replication_targets: Vec<String>,
}

impl RecoveryPlanEntry {
    pub fn to_plan(&self) -> DisasterRecoveryPlan {
        DisasterRecoveryPlan {
            name: self.name.clone(),
            rto: Duration::from_secs(self.rto_secs),
            rpo: Duration::from_secs(self.rpo_secs),
            backup_frequency: Duration::from_secs(self.backup_frequency_secs),
            backup_retention: Duration::from_secs(self.backup_retention_secs),
            replication_enabled: self.replication_enabled,
            replication_targets: self.replication_targets.clone(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCenterEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub provider: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: u32,
    #[serde(default)]
    pub current_count: u32,
    #[serde(default)]
    pub tier: DataCenterTier,
    #[serde(default)]
    pub is_primary: bool,
}

impl DataCenterEntry {
    pub fn to_data_center(&self) -> DataCenter {
        DataCenter {
            id: self.id.clone(),
            name: self.name.clone(),
            location: self.location.clone(),
            provider: self.provider.clone(),
            region: self.region.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            capacity: self.capacity,
            current_count: self.current_count,
            tier: self.tier,
            is_primary: self.is_primary,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentEntry {
    pub name: String,
    pub active_regions: Vec<String>,
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    #[serde(default)]
    pub data_residency_region: String,
    #[serde(default)]
    pub disaster_recovery_region: String,
    #[serde(default)]
    pub cost_optimization: bool,
    #[serde(default)]
    pub latency_target_ms: u32,
    #[serde(default)]
    pub replication_mode: ReplicationMode,
}

impl DeploymentEntry {
    pub fn to_config(&self) -> MultiRegionConfig {
        let mut config =
            MultiRegionConfig::new(&self.name, self.active_regions.clone(), self.strategy);
        config.data_residency_region = self.data_residency_region.clone();
        config.disaster_recovery_region = self.disaster_recovery_region.clone();
        config.cost_optimization = self.cost_optimization;
        config.latency_target_ms = self.latency_target_ms;
        config.replication_mode = self.replication_mode;
        config
    }
}

/// One directed latency sample between two regions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyEntry {
    pub from: String,
    pub to: String,
    pub ms: u32,
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

fn default_weight() -> u32 {
    1
}

fn default_capacity() -> u32 {
    100
}

fn default_scale_up_threshold() -> u32 {
    80
}

fn default_scale_down_threshold() -> u32 {
    20
}

fn default_max_instances() -> u32 {
    10
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_health_threshold() -> u32 {
    50
}

fn default_failover_timeout_secs() -> u64 {
    30
}

fn default_max_replication_lag_ms() -> u64 {
    DEFAULT_MAX_REPLICATION_LAG.as_millis() as u64
}

// ============================================================================
// Document
// ============================================================================

/// The complete fleet file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub scaling: ScalingSection,
    #[serde(default)]
    pub failover: FailoverSection,
    #[serde(default)]
    pub regions: Vec<RegionEntry>,
    #[serde(default)]
    pub scaling_policies: Vec<ScalingPolicyEntry>,
    #[serde(default)]
    pub failover_policies: Vec<FailoverPolicyEntry>,
    #[serde(default)]
    pub disaster_recovery_plans: Vec<RecoveryPlanEntry>,
    #[serde(default)]
    pub data_centers: Vec<DataCenterEntry>,
    #[serde(default)]
    pub deployments: Vec<DeploymentEntry>,
    #[serde(default)]
    pub latencies: Vec<LatencyEntry>,
}

impl FleetConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            strategy: self.routing.strategy,
            session_affinity: self.routing.session_affinity,
            affinity_ttl: Duration::from_secs(self.routing.affinity_ttl_secs),
        }
    }

    pub fn health_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            check_interval: Duration::from_secs(self.health.interval_secs),
            check_timeout: Duration::from_millis(self.health.timeout_ms),
            max_consecutive_failures: self.health.max_consecutive_failures,
            ..HealthMonitorConfig::default()
        }
    }

    pub fn scaling_config(&self) -> ScalingConfig {
        ScalingConfig {
            evaluation_interval: Duration::from_secs(self.scaling.evaluation_interval_secs),
            ..ScalingConfig::default()
        }
    }

    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            evaluation_interval: Duration::from_secs(self.failover.evaluation_interval_secs),
            settle_delay: Duration::from_millis(self.failover.settle_delay_ms),
            ..FailoverConfig::default()
        }
    }

    pub fn server_count(&self) -> usize {
        self.regions.iter().map(|r| r.servers.len()).sum()
    }
}

impl FromStr for FleetConfig {
    type Err = FleetConfigError;

    /// Parse and validate
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config = parse_fleet_config(s)?;
        validate_fleet_config(&config)?;
        Ok(config)
    }
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Parse a YAML (or JSON) string into a FleetConfig.
/// This is a pure function - no I/O.
pub fn parse_fleet_config(content: &str) -> Result<FleetConfig, FleetConfigError> {
    serde_yaml::from_str(content).map_err(|e| FleetConfigError::ParseError(e.to_string()))
}

/// Validate a fleet config for consistency.
/// This is a pure function - no I/O.
pub fn validate_fleet_config(config: &FleetConfig) -> Result<(), FleetConfigError> {
    if config.health.interval_secs == 0 {
        return Err(invalid("health", "interval_secs must be positive"));
    }
    if config.health.timeout_ms == 0 {
        return Err(invalid("health", "timeout_ms must be positive"));
    }
    if config.health.max_consecutive_failures == 0 {
        return Err(invalid("health", "max_consecutive_failures must be positive"));
    }
    if config.scaling.evaluation_interval_secs == 0 {
        return Err(invalid("scaling", "evaluation_interval_secs must be positive"));
    }
    if config.failover.evaluation_interval_secs == 0 {
        return Err(invalid("failover", "evaluation_interval_secs must be positive"));
    }

    // Regions and servers
    let mut regions = HashSet::new();
    let mut servers = HashSet::new();
    for region in &config.regions {
        if region.name.is_empty() {
            return Err(invalid("region", "name must not be empty"));
        }
        if !regions.insert(region.name.as_str()) {
            return Err(FleetConfigError::DuplicateRegion(region.name.clone()));
        }
        for server in &region.servers {
            if server.id.is_empty() {
                return Err(invalid("server", "id must not be empty"));
            }
            if server.port == 0 {
                return Err(invalid(
                    "server",
                    &format!("'{}' has port 0", server.id),
                ));
            }
            if server
                .expected_status
                .is_some_and(|status| !(100..=599).contains(&status))
            {
                return Err(invalid(
                    "server",
                    &format!("'{}' expects a status outside 100-599", server.id),
                ));
            }
            if server.health_timeout_ms == Some(0) {
                return Err(invalid(
                    "server",
                    &format!("'{}' has health_timeout_ms 0", server.id),
                ));
            }
            if !servers.insert(server.id.as_str()) {
                return Err(FleetConfigError::DuplicateServer(server.id.clone()));
            }
        }
    }

    let require_region = |name: &str, referrer: String| {
        if regions.contains(name) {
            Ok(())
        } else {
            Err(FleetConfigError::UndefinedRegion(name.to_string(), referrer))
        }
    };

    // Policies
    let mut scaled = HashSet::new();
    for entry in &config.scaling_policies {
        require_region(&entry.region, "scaling policy".to_string())?;
        if !scaled.insert(entry.region.as_str()) {
            return Err(FleetConfigError::DuplicateScalingPolicy(entry.region.clone()));
        }
        entry
            .to_policy()
            .validate()
            .map_err(|e| invalid("scaling policy", &e.to_string()))?;
    }

    for entry in &config.failover_policies {
        let referrer = format!("failover policy '{}'", entry.name);
        require_region(&entry.primary_region, referrer.clone())?;
        require_region(&entry.secondary_region, referrer)?;
        entry
            .to_policy()
            .validate()
            .map_err(|e| invalid("failover policy", &e.to_string()))?;
    }

    for entry in &config.disaster_recovery_plans {
        for target in &entry.replication_targets {
            require_region(target, format!("recovery plan '{}'", entry.name))?;
        }
        entry
            .to_plan()
            .validate()
            .map_err(|e| invalid("disaster recovery plan", &e.to_string()))?;
    }

    // Coordinator entries live in their own namespace
    let mut data_centers = HashSet::new();
    for entry in &config.data_centers {
        if entry.id.is_empty() {
            return Err(invalid("data center", "id must not be empty"));
        }
        if !data_centers.insert(entry.id.as_str()) {
            return Err(invalid(
                "data center",
                &format!("duplicate id '{}'", entry.id),
            ));
        }
    }

    for entry in &config.deployments {
        if entry.name.is_empty() {
            return Err(invalid("deployment", "name must not be empty"));
        }
    }

    Ok(())
}

fn invalid(what: &str, reason: &str) -> FleetConfigError {
    FleetConfigError::InvalidValue(what.to_string(), reason.to_string())
}
