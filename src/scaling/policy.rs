//! Scaling policies and the threshold decision
//!
//! The decision is a pure function of the policy, the region's current
//! instance count and its utilization. Cooldown is tracked by the controller.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};

/// Per-region scaling thresholds and bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Region this policy governs (one policy per region)
    pub region: String,
    pub name: String,
    /// Scale up when utilization is strictly above this percentage
    pub scale_up_threshold: u32,
    /// Scale down when utilization is strictly below this percentage
    pub scale_down_threshold: u32,
    pub scale_up_quantity: u32,
    pub scale_down_quantity: u32,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Minimum time between two decisions for the region
    pub cooldown: Duration,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            region: String::new(),
            name: String::new(),
            scale_up_threshold: 80,
            scale_down_threshold: 20,
            scale_up_quantity: 1,
            scale_down_quantity: 1,
            min_instances: 1,
            max_instances: 10,
            cooldown: Duration::from_secs(300),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

impl ScalingPolicy {
    /// Reject bounds and thresholds that cannot produce a stable policy
    pub fn validate(&self) -> FleetResult<()> {
        if self.region.is_empty() {
            return Err(invalid("region must not be empty"));
        }
        if self.min_instances > self.max_instances {
            return Err(invalid(format!(
                "min_instances ({}) exceeds max_instances ({})",
                self.min_instances, self.max_instances
            )));
        }
        validate_thresholds(self.scale_up_threshold, self.scale_down_threshold)
    }
}

pub(crate) fn validate_thresholds(up: u32, down: u32) -> FleetResult<()> {
    if up > 100 {
        return Err(invalid(format!("scale_up_threshold ({}) exceeds 100", up)));
    }
    if down >= up {
        return Err(invalid(format!(
            "scale_down_threshold ({}) must be below scale_up_threshold ({})",
            down, up
        )));
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> FleetError {
    FleetError::Invalid("scaling policy", reason.into())
}

/// Scaling decision for one region
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingDecision {
    /// No change needed
    NoChange,
    /// Scale up to the target number of instances
    ScaleUp { target_instances: u32, reason: String },
    /// Scale down to the target number of instances
    ScaleDown { target_instances: u32, reason: String },
}

/// Decide whether a region should grow or shrink.
///
/// Targets are clamped to `[min_instances, max_instances]`, and a decision
/// that would not move the count in its own direction is a no-op.
pub fn evaluate_scaling(policy: &ScalingPolicy, current: u32, utilization: u64) -> ScalingDecision {
    let min = policy.min_instances;
    let max = policy.max_instances;

    if utilization > policy.scale_up_threshold as u64 {
        let target = current.saturating_add(policy.scale_up_quantity).min(max).max(min);
        if target <= current {
            return ScalingDecision::NoChange;
        }
        return ScalingDecision::ScaleUp {
            target_instances: target,
            reason: format!(
                "High utilization ({}%) exceeded threshold ({}%)",
                utilization, policy.scale_up_threshold
            ),
        };
    }

    if utilization < policy.scale_down_threshold as u64 && current > min {
        let target = current.saturating_sub(policy.scale_down_quantity).min(max).max(min);
        if target >= current {
            return ScalingDecision::NoChange;
        }
        return ScalingDecision::ScaleDown {
            target_instances: target,
            reason: format!(
                "Low utilization ({}%) below threshold ({}%)",
                utilization, policy.scale_down_threshold
            ),
        };
    }

    ScalingDecision::NoChange
}

/// Cooldown bookkeeping for one region
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CooldownState {
    last_scaled: Option<Instant>,
}

impl CooldownState {
    pub fn record(&mut self) {
        self.last_scaled = Some(Instant::now());
    }

    /// Whether the cooldown has elapsed (always true before the first decision)
    pub fn can_scale(&self, cooldown: Duration) -> bool {
        self.last_scaled
            .map(|t| t.elapsed() >= cooldown)
            .unwrap_or(true)
    }

    pub fn remaining(&self, cooldown: Duration) -> Duration {
        self.last_scaled
            .map(|t| cooldown.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingAction::ScaleUp => f.write_str("scale-up"),
            ScalingAction::ScaleDown => f.write_str("scale-down"),
        }
    }
}

/// A recorded scaling decision, to be enacted by the provisioning layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub id: Uuid,
    pub region: String,
    pub timestamp: DateTime<Utc>,
    pub action: ScalingAction,
    pub from_count: u32,
    pub to_count: u32,
    pub reason: String,
    /// Region utilization observed when deciding
    pub utilization: u64,
}

impl ScalingEvent {
    /// Build the event for an actionable decision; `None` for `NoChange`
    pub(crate) fn from_decision(
        region: &str,
        current: u32,
        utilization: u64,
        decision: ScalingDecision,
    ) -> Option<Self> {
        let (action, to_count, reason) = match decision {
            ScalingDecision::NoChange => return None,
            ScalingDecision::ScaleUp { target_instances, reason } => {
                (ScalingAction::ScaleUp, target_instances, reason)
            }
            ScalingDecision::ScaleDown { target_instances, reason } => {
                (ScalingAction::ScaleDown, target_instances, reason)
            }
        };

        Some(Self {
            id: Uuid::new_v4(),
            region: region.to_string(),
            timestamp: Utc::now(),
            action,
            from_count: current,
            to_count,
            reason,
            utilization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ScalingPolicy {
        ScalingPolicy {
            region: "us-east".into(),
            name: "us-east-web".into(),
            scale_up_threshold: 80,
            scale_down_threshold: 20,
            scale_up_quantity: 1,
            scale_down_quantity: 1,
            min_instances: 2,
            max_instances: 5,
            cooldown: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(policy().validate().is_ok());

        let mut p = policy();
        p.min_instances = 6;
        assert!(p.validate().is_err());

        let mut p = policy();
        p.scale_down_threshold = 80;
        assert!(p.validate().is_err());

        let mut p = policy();
        p.scale_up_threshold = 120;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_scale_up_capped_at_max() {
        let mut p = policy();
        p.scale_up_quantity = 3;
        match evaluate_scaling(&p, 4, 95) {
            ScalingDecision::ScaleUp { target_instances, .. } => assert_eq!(target_instances, 5),
            other => panic!("expected scale up, got {:?}", other),
        }
        assert_eq!(evaluate_scaling(&p, 5, 95), ScalingDecision::NoChange);
    }

    #[test]
    fn test_scale_down_floored_at_min() {
        let mut p = policy();
        p.scale_down_quantity = 4;
        match evaluate_scaling(&p, 4, 5) {
            ScalingDecision::ScaleDown { target_instances, .. } => assert_eq!(target_instances, 2),
            other => panic!("expected scale down, got {:?}", other),
        }
        assert_eq!(evaluate_scaling(&p, 2, 5), ScalingDecision::NoChange);
    }

    #[test]
    fn test_between_thresholds_is_no_change() {
        assert_eq!(evaluate_scaling(&policy(), 3, 50), ScalingDecision::NoChange);
        assert_eq!(evaluate_scaling(&policy(), 3, 80), ScalingDecision::NoChange);
        assert_eq!(evaluate_scaling(&policy(), 3, 20), ScalingDecision::NoChange);
    }

    #[test]
    fn test_targets_stay_within_bounds() {
        let p = policy();
        for current in 0..8u32 {
            for utilization in [0u64, 10, 50, 90, 150] {
                let target = match evaluate_scaling(&p, current, utilization) {
                    ScalingDecision::NoChange => continue,
                    ScalingDecision::ScaleUp { target_instances, .. } => target_instances,
                    ScalingDecision::ScaleDown { target_instances, .. } => target_instances,
                };
                assert!(
                    (p.min_instances..=p.max_instances).contains(&target),
                    "current {} utilization {} -> {}",
                    current,
                    utilization,
                    target
                );
            }
        }
    }

    #[test]
    fn test_cooldown_state() {
        let mut state = CooldownState::default();
        assert!(state.can_scale(Duration::from_secs(60)));

        state.record();
        assert!(!state.can_scale(Duration::from_secs(60)));
        assert!(state.can_scale(Duration::ZERO));
        assert!(state.remaining(Duration::from_secs(60)) > Duration::from_secs(59));
    }

    #[test]
    fn test_event_from_decision() {
        let decision = evaluate_scaling(&policy(), 2, 90);
        let event = ScalingEvent::from_decision("us-east", 2, 90, decision).unwrap();
        assert_eq!(event.action, ScalingAction::ScaleUp);
        assert_eq!((event.from_count, event.to_count), (2, 3));
        assert!(event.reason.contains("90%"));

        assert!(ScalingEvent::from_decision("us-east", 2, 50, ScalingDecision::NoChange).is_none());
    }
}
