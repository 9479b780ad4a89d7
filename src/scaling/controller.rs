//! Scaling Controller - periodic threshold evaluation per region
//!
//! On every cycle each active policy is checked against the region's live
//! server count and utilization from the fleet registry. Decisions are
//! recorded and broadcast; enacting them is left to the provisioning layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::policy::{
    evaluate_scaling, validate_thresholds, CooldownState, ScalingAction, ScalingEvent,
    ScalingPolicy,
};
use crate::error::{FleetError, FleetResult};
use crate::events::{EventLog, EVENT_LOG_CAPACITY};
use crate::fleet::FleetRegistry;
use crate::ticker::spawn_periodic;

/// Buffered events per subscriber before lagging ones start missing events
const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct ScalingConfig {
    pub evaluation_interval: Duration,
    pub event_capacity: usize,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(60),
            event_capacity: EVENT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingMetrics {
    pub is_running: bool,
    pub total_policies: usize,
    pub total_events: usize,
    pub scale_up_count: usize,
    pub scale_down_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionScalingMetrics {
    pub region: String,
    pub policy_name: String,
    pub is_active: bool,
    pub scale_up_threshold: u32,
    pub scale_down_threshold: u32,
    pub min_instances: u32,
    pub max_instances: u32,
    pub scale_up_count: usize,
    pub scale_down_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scaling: Option<DateTime<Utc>>,
    pub cooldown_remaining: Duration,
}

pub struct ScalingController {
    registry: Arc<FleetRegistry>,
    config: ScalingConfig,
    policies: RwLock<HashMap<String, ScalingPolicy>>,
    cooldowns: Mutex<HashMap<String, CooldownState>>,
    events: EventLog<ScalingEvent>,
    notifier: broadcast::Sender<ScalingEvent>,
    running: AtomicBool,
}

impl ScalingController {
    pub fn new(registry: Arc<FleetRegistry>, config: ScalingConfig) -> Self {
        let (notifier, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            registry,
            events: EventLog::new(config.event_capacity),
            config,
            policies: RwLock::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            notifier,
            running: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Policy management
    // =========================================================================

    /// Create or replace the policy for `policy.region`
    pub fn create_scaling_policy(&self, policy: ScalingPolicy) -> FleetResult<()> {
        policy.validate()?;
        if !self.registry.contains_region(&policy.region) {
            return Err(FleetError::RegionNotFound(policy.region));
        }

        info!(
            "Scaling policy created: {} for {} (up: {}%, down: {}%, instances: {}-{})",
            policy.name,
            policy.region,
            policy.scale_up_threshold,
            policy.scale_down_threshold,
            policy.min_instances,
            policy.max_instances
        );
        self.policies.write().insert(policy.region.clone(), policy);
        Ok(())
    }

    /// Replace the thresholds of an existing policy
    pub fn update_scaling_policy(&self, region: &str, up: u32, down: u32) -> FleetResult<()> {
        let mut policies = self.policies.write();
        let policy = policies
            .get_mut(region)
            .ok_or_else(|| FleetError::ScalingPolicyNotFound(region.to_string()))?;

        validate_thresholds(up, down)?;
        policy.scale_up_threshold = up;
        policy.scale_down_threshold = down;

        info!("Updated policy for {}: up={}%, down={}%", region, up, down);
        Ok(())
    }

    pub fn set_policy_active(&self, region: &str, active: bool) -> FleetResult<()> {
        let mut policies = self.policies.write();
        let policy = policies
            .get_mut(region)
            .ok_or_else(|| FleetError::ScalingPolicyNotFound(region.to_string()))?;
        policy.is_active = active;

        info!(
            "Scaling policy for {} {}",
            region,
            if active { "activated" } else { "deactivated" }
        );
        Ok(())
    }

    /// Drop a region's policy along with its cooldown
    pub fn remove_scaling_policy(&self, region: &str) -> Option<ScalingPolicy> {
        let removed = self.policies.write().remove(region);
        self.cooldowns.lock().remove(region);
        if removed.is_some() {
            info!("Scaling policy removed for {}", region);
        }
        removed
    }

    pub fn scaling_policy(&self, region: &str) -> Option<ScalingPolicy> {
        self.policies.read().get(region).cloned()
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate every active policy once. Returns the events emitted.
    pub fn evaluate_all(&self) -> Vec<ScalingEvent> {
        let policies: Vec<ScalingPolicy> = self
            .policies
            .read()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();

        policies
            .iter()
            .filter_map(|policy| self.evaluate_region(policy))
            .collect()
    }

    fn evaluate_region(&self, policy: &ScalingPolicy) -> Option<ScalingEvent> {
        debug!("Evaluating region: {}", policy.region);

        let Some(stats) = self.registry.region_stats(&policy.region) else {
            warn!("Region {} not found, skipping scaling evaluation", policy.region);
            return None;
        };
        let current = stats.total_servers as u32;
        let utilization = stats.utilization;

        let event = {
            let mut cooldowns = self.cooldowns.lock();
            let cooldown = cooldowns.entry(policy.region.clone()).or_default();
            if !cooldown.can_scale(policy.cooldown) {
                debug!("Region {} in cooldown", policy.region);
                return None;
            }

            let decision = evaluate_scaling(policy, current, utilization);
            let event = ScalingEvent::from_decision(&policy.region, current, utilization, decision)?;
            cooldown.record();
            event
        };

        match event.action {
            ScalingAction::ScaleUp => info!(
                "SCALE UP: {}: {} -> {} instances (utilization: {}%)",
                event.region, event.from_count, event.to_count, utilization
            ),
            ScalingAction::ScaleDown => info!(
                "SCALE DOWN: {}: {} -> {} instances (utilization: {}%)",
                event.region, event.from_count, event.to_count, utilization
            ),
        }

        self.events.push(event.clone());
        // No subscribers is fine
        let _ = self.notifier.send(event.clone());
        Some(event)
    }

    /// Receive every scaling event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ScalingEvent> {
        self.notifier.subscribe()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The newest `limit` events, oldest first, optionally for one region
    pub fn scaling_events(&self, region: Option<&str>, limit: usize) -> Vec<ScalingEvent> {
        self.events
            .recent_matching(limit, |e| region.map_or(true, |r| e.region == r))
    }

    pub fn scaling_metrics(&self) -> ScalingMetrics {
        let (ups, downs) = self.count_actions(None);
        ScalingMetrics {
            is_running: self.is_running(),
            total_policies: self.policies.read().len(),
            total_events: self.events.len(),
            scale_up_count: ups,
            scale_down_count: downs,
        }
    }

    pub fn region_scaling_metrics(&self, region: &str) -> Option<RegionScalingMetrics> {
        let policy = self.scaling_policy(region)?;
        let cooldown = self
            .cooldowns
            .lock()
            .get(region)
            .copied()
            .unwrap_or_default();
        let (ups, downs) = self.count_actions(Some(region));

        Some(RegionScalingMetrics {
            region: region.to_string(),
            policy_name: policy.name,
            is_active: policy.is_active,
            scale_up_threshold: policy.scale_up_threshold,
            scale_down_threshold: policy.scale_down_threshold,
            min_instances: policy.min_instances,
            max_instances: policy.max_instances,
            scale_up_count: ups,
            scale_down_count: downs,
            last_scaling: self
                .events
                .last_matching(|e| e.region == region)
                .map(|e| e.timestamp),
            cooldown_remaining: cooldown.remaining(policy.cooldown),
        })
    }

    fn count_actions(&self, region: Option<&str>) -> (usize, usize) {
        self.events.fold((0, 0), |(ups, downs), e| {
            if region.is_some_and(|r| e.region != r) {
                return (ups, downs);
            }
            match e.action {
                ScalingAction::ScaleUp => (ups + 1, downs),
                ScalingAction::ScaleDown => (ups, downs + 1),
            }
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the evaluation loop. Returns `None` if it is already running.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Scaling controller already running");
            return None;
        }

        let controller = Arc::clone(self);
        let ticker = spawn_periodic(
            "Scaling controller",
            self.config.evaluation_interval,
            cancel,
            move || {
                let controller = controller.clone();
                async move {
                    controller.evaluate_all();
                }
            },
        );

        let controller = Arc::clone(self);
        Some(tokio::spawn(async move {
            if let Err(e) = ticker.await {
                error!("Scaling controller loop failed: {}", e);
            }
            controller.running.store(false, Ordering::SeqCst);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::ServerMetrics;

    fn setup(servers: usize) -> (Arc<FleetRegistry>, ScalingController) {
        let registry = Arc::new(FleetRegistry::default());
        registry.register_region("us-east", "North America", 40.7, -74.0, 1);
        for i in 0..servers {
            registry
                .register_server(&format!("web-{}", i), "us-east", "10.0.0.1", 8080, 1, 100)
                .unwrap();
        }
        let controller = ScalingController::new(registry.clone(), ScalingConfig::default());
        (registry, controller)
    }

    fn policy(cooldown: Duration) -> ScalingPolicy {
        ScalingPolicy {
            region: "us-east".into(),
            name: "web".into(),
            min_instances: 2,
            max_instances: 5,
            cooldown,
            ..Default::default()
        }
    }

    fn set_load(registry: &FleetRegistry, load: u32) {
        for id in registry.server_ids() {
            registry
                .update_server_metrics(&id, ServerMetrics::load(load, Duration::from_millis(10)))
                .unwrap();
        }
    }

    #[test]
    fn test_policy_requires_known_region() {
        let (_, controller) = setup(2);
        let mut p = policy(Duration::ZERO);
        p.region = "mars".into();
        assert!(controller.create_scaling_policy(p).unwrap_err().is_not_found());
    }

    #[test]
    fn test_policy_validation_rejected() {
        let (_, controller) = setup(2);
        let mut p = policy(Duration::ZERO);
        p.min_instances = 9;
        assert!(matches!(
            controller.create_scaling_policy(p),
            Err(FleetError::Invalid(..))
        ));
        assert!(controller.scaling_policy("us-east").is_none());
    }

    #[test]
    fn test_update_policy() {
        let (_, controller) = setup(2);
        assert!(controller
            .update_scaling_policy("us-east", 90, 10)
            .unwrap_err()
            .is_not_found());

        controller.create_scaling_policy(policy(Duration::ZERO)).unwrap();
        controller.update_scaling_policy("us-east", 90, 10).unwrap();
        let p = controller.scaling_policy("us-east").unwrap();
        assert_eq!((p.scale_up_threshold, p.scale_down_threshold), (90, 10));

        assert!(controller.update_scaling_policy("us-east", 10, 90).is_err());
    }

    #[test]
    fn test_scale_up_event() {
        let (registry, controller) = setup(2);
        controller.create_scaling_policy(policy(Duration::ZERO)).unwrap();
        set_load(&registry, 90);

        let events = controller.evaluate_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, ScalingAction::ScaleUp);
        assert_eq!((events[0].from_count, events[0].to_count), (2, 3));
        assert_eq!(events[0].utilization, 90);
    }

    #[test]
    fn test_cooldown_limits_to_one_event() {
        let (registry, controller) = setup(2);
        controller
            .create_scaling_policy(policy(Duration::from_secs(600)))
            .unwrap();
        set_load(&registry, 95);

        assert_eq!(controller.evaluate_all().len(), 1);
        assert!(controller.evaluate_all().is_empty());
        assert_eq!(controller.scaling_events(Some("us-east"), 10).len(), 1);

        let metrics = controller.region_scaling_metrics("us-east").unwrap();
        assert_eq!(metrics.scale_up_count, 1);
        assert!(metrics.cooldown_remaining > Duration::ZERO);
        assert!(metrics.last_scaling.is_some());
    }

    #[test]
    fn test_no_change_does_not_arm_cooldown() {
        let (registry, controller) = setup(2);
        controller
            .create_scaling_policy(policy(Duration::from_secs(600)))
            .unwrap();
        set_load(&registry, 50);
        assert!(controller.evaluate_all().is_empty());

        set_load(&registry, 95);
        assert_eq!(controller.evaluate_all().len(), 1);
    }

    #[test]
    fn test_inactive_policy_skipped() {
        let (registry, controller) = setup(2);
        controller.create_scaling_policy(policy(Duration::ZERO)).unwrap();
        controller.set_policy_active("us-east", false).unwrap();
        set_load(&registry, 95);
        assert!(controller.evaluate_all().is_empty());
        assert!(controller.set_policy_active("mars", true).is_err());
    }

    #[test]
    fn test_remove_policy_clears_cooldown() {
        let (registry, controller) = setup(2);
        controller
            .create_scaling_policy(policy(Duration::from_secs(300)))
            .unwrap();
        set_load(&registry, 95);
        assert_eq!(controller.evaluate_all().len(), 1);

        assert!(controller.remove_scaling_policy("us-east").is_some());
        assert!(controller.remove_scaling_policy("us-east").is_none());
        assert!(controller.scaling_policy("us-east").is_none());
        assert!(controller.evaluate_all().is_empty());

        // A fresh policy is not held back by the old cooldown
        controller
            .create_scaling_policy(policy(Duration::from_secs(300)))
            .unwrap();
        assert_eq!(controller.evaluate_all().len(), 1);
    }

    #[test]
    fn test_scale_down_not_below_min() {
        let (registry, controller) = setup(2);
        controller.create_scaling_policy(policy(Duration::ZERO)).unwrap();
        set_load(&registry, 5);
        assert!(controller.evaluate_all().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let (registry, controller) = setup(2);
        controller.create_scaling_policy(policy(Duration::ZERO)).unwrap();
        let mut rx = controller.subscribe();
        set_load(&registry, 90);

        controller.evaluate_all();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.to_count, 3);
    }

    #[test]
    fn test_scaling_metrics() {
        let (registry, controller) = setup(3);
        controller.create_scaling_policy(policy(Duration::ZERO)).unwrap();
        set_load(&registry, 90);
        controller.evaluate_all();
        set_load(&registry, 5);
        controller.evaluate_all();

        let metrics = controller.scaling_metrics();
        assert_eq!(metrics.total_policies, 1);
        assert_eq!(metrics.total_events, 2);
        assert_eq!((metrics.scale_up_count, metrics.scale_down_count), (1, 1));
        assert!(!metrics.is_running);
        assert!(controller.region_scaling_metrics("eu-west").is_none());
    }
}
