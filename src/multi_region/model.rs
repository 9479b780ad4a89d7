//! Data centers and multi-region deployment configurations

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How traffic is spread over a deployment's active regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStrategy {
    ActiveActive,
    ActivePassive,
    ActiveWarm,
    /// Unset or unrecognized; distributes like active-active
    #[default]
    #[serde(other)]
    Unspecified,
}

impl DeploymentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStrategy::ActiveActive => "active-active",
            DeploymentStrategy::ActivePassive => "active-passive",
            DeploymentStrategy::ActiveWarm => "active-warm",
            DeploymentStrategy::Unspecified => "unspecified",
        }
    }

    /// Percentage of traffic per region, in `regions` order
    pub fn distribute(&self, regions: &[String]) -> BTreeMap<String, f64> {
        let mut distribution: BTreeMap<String, f64> =
            regions.iter().map(|r| (r.clone(), 0.0)).collect();
        if regions.is_empty() {
            return distribution;
        }

        match self {
            DeploymentStrategy::ActivePassive => {
                distribution.insert(regions[0].clone(), 100.0);
            }
            DeploymentStrategy::ActiveWarm => {
                if let [first, second, ..] = regions {
                    distribution.insert(first.clone(), 80.0);
                    distribution.insert(second.clone(), 20.0);
                } else {
                    distribution.insert(regions[0].clone(), 100.0);
                }
            }
            DeploymentStrategy::ActiveActive | DeploymentStrategy::Unspecified => {
                let share = 100.0 / regions.len() as f64;
                for region in regions {
                    distribution.insert(region.clone(), share);
                }
            }
        }
        distribution
    }

    /// Qualitative trade-offs of a named strategy
    pub fn profile(&self) -> Option<StrategyProfile> {
        let profile = match self {
            DeploymentStrategy::ActiveActive => StrategyProfile {
                redundancy: "Very High",
                cost: "Very High",
                complexity: "Very High",
                rto: "Seconds",
                benefits: "Perfect load distribution, high availability",
            },
            DeploymentStrategy::ActivePassive => StrategyProfile {
                redundancy: "High",
                cost: "Medium",
                complexity: "Medium",
                rto: "Minutes",
                benefits: "Cost efficient, simpler to manage",
            },
            DeploymentStrategy::ActiveWarm => StrategyProfile {
                redundancy: "High",
                cost: "Medium-High",
                complexity: "Medium",
                rto: "Seconds-Minutes",
                benefits: "Balance between cost and availability",
            },
            DeploymentStrategy::Unspecified => return None,
        };
        Some(profile)
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStrategy {
    type Err = std::convert::Infallible;

    /// Unknown names map to `Unspecified`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "active-active" => DeploymentStrategy::ActiveActive,
            "active-passive" => DeploymentStrategy::ActivePassive,
            "active-warm" => DeploymentStrategy::ActiveWarm,
            _ => DeploymentStrategy::Unspecified,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyProfile {
    pub redundancy: &'static str,
    pub cost: &'static str,
    pub complexity: &'static str,
    pub rto: &'static str,
    pub benefits: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    Sync,
    #[default]
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCenterTier {
    Premium,
    #[default]
    Standard,
    Budget,
}

/// A physical data center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCenter {
    pub id: String,
    pub name: String,
    /// City, country
    pub location: String,
    pub provider: String,
    /// Provider region, e.g. `eu-west-1`
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Maximum number of servers
    pub capacity: u32,
    pub current_count: u32,
    pub tier: DataCenterTier,
    /// Holds the data-residency copy
    pub is_primary: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Region-level deployment layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiRegionConfig {
    pub name: String,
    /// Ordered; the first region is the primary for passive and warm strategies
    pub active_regions: Vec<String>,
    pub data_residency_region: String,
    pub disaster_recovery_region: String,
    pub strategy: DeploymentStrategy,
    pub cost_optimization: bool,
    /// Target P99 latency
    pub latency_target_ms: u32,
    pub replication_mode: ReplicationMode,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl MultiRegionConfig {
    pub fn new(
        name: impl Into<String>,
        active_regions: Vec<String>,
        strategy: DeploymentStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            active_regions,
            data_residency_region: String::new(),
            disaster_recovery_region: String::new(),
            strategy,
            cost_optimization: false,
            latency_target_ms: 0,
            replication_mode: ReplicationMode::Async,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
