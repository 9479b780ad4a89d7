//! Failover Controller - region-level failover and failback
//!
//! Each policy pairs a primary with a secondary region and tracks which of
//! the two currently serves traffic. A switch goes through:
//! 1. Claiming the policy (concurrent switches on the same key conflict)
//! 2. Checking the target's replication lag against the policy bound
//! 3. Waiting a bounded settle delay
//! 4. Verifying the target region has a healthy server
//! 5. Recording the event and flipping the current primary

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::policy::{
    DisasterRecoveryPlan, FailoverEvent, FailoverPolicy, FailoverPolicyStatus, FailoverStatus,
};
use crate::error::{FleetError, FleetResult};
use crate::events::{EventLog, EVENT_LOG_CAPACITY};
use crate::fleet::FleetRegistry;
use crate::ticker::spawn_periodic;

/// Lag assumed for a region that never reported one
pub const DEFAULT_REPLICATION_LAG: Duration = Duration::from_millis(100);

const FAILBACK_REASON: &str = "Primary region recovered";

#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub evaluation_interval: Duration,
    /// Cutover settle time, further bounded by each policy's timeout
    pub settle_delay: Duration,
    pub default_replication_lag: Duration,
    pub event_capacity: usize,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(30),
            settle_delay: Duration::from_secs(1),
            default_replication_lag: DEFAULT_REPLICATION_LAG,
            event_capacity: EVENT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
struct PolicyEntry {
    policy: FailoverPolicy,
    current_primary: String,
    transition: Option<FailoverStatus>,
}

/// Clears a policy's transition marker on every exit path
struct TransitionGuard<'a> {
    policies: &'a RwLock<HashMap<String, PolicyEntry>>,
    key: &'a str,
}

impl TransitionGuard<'_> {
    fn advance(&self, status: FailoverStatus) {
        if let Some(entry) = self.policies.write().get_mut(self.key) {
            entry.transition = Some(status);
        }
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.policies.write().get_mut(self.key) {
            entry.transition = None;
        }
    }
}

pub struct FailoverController {
    registry: Arc<FleetRegistry>,
    config: FailoverConfig,
    policies: RwLock<HashMap<String, PolicyEntry>>,
    plans: RwLock<HashMap<String, DisasterRecoveryPlan>>,
    replication_lag: RwLock<HashMap<String, Duration>>,
    events: EventLog<FailoverEvent>,
    running: AtomicBool,
}

impl FailoverController {
    pub fn new(registry: Arc<FleetRegistry>, config: FailoverConfig) -> Self {
        Self {
            registry,
            events: EventLog::new(config.event_capacity),
            config,
            policies: RwLock::new(HashMap::new()),
            plans: RwLock::new(HashMap::new()),
            replication_lag: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Policies and plans
    // =========================================================================

    /// Create or replace a policy. Returns its key.
    ///
    /// Replacing a policy keeps the region currently serving its traffic.
    pub fn create_failover_policy(&self, policy: FailoverPolicy) -> FleetResult<String> {
        policy.validate()?;
        for region in [&policy.primary_region, &policy.secondary_region] {
            if !self.registry.contains_region(region) {
                return Err(FleetError::RegionNotFound(region.clone()));
            }
        }

        let key = policy.key();
        let mut policies = self.policies.write();
        if policies.get(&key).is_some_and(|e| e.transition.is_some()) {
            return Err(FleetError::Conflict(format!(
                "failover in progress for {}",
                key
            )));
        }

        let current_primary = policies
            .get(&key)
            .map(|e| e.current_primary.clone())
            .unwrap_or_else(|| policy.primary_region.clone());

        info!(
            "Failover policy created: {} ({} -> {}, auto: {}, threshold: {}%)",
            policy.name,
            policy.primary_region,
            policy.secondary_region,
            policy.automatic,
            policy.health_threshold
        );
        policies.insert(
            key.clone(),
            PolicyEntry {
                policy,
                current_primary,
                transition: None,
            },
        );
        Ok(key)
    }

    pub fn failover_policy(&self, key: &str) -> Option<FailoverPolicy> {
        self.policies.read().get(key).map(|e| e.policy.clone())
    }

    pub fn policy_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.policies.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove every policy with `region` on either side. Returns the removed keys.
    ///
    /// A policy with a transition in flight is deactivated instead, so no
    /// further automatic failover starts from it.
    pub fn remove_policies_for_region(&self, region: &str) -> Vec<String> {
        let mut policies = self.policies.write();
        let mut removed = Vec::new();

        policies.retain(|key, entry| {
            let policy = &mut entry.policy;
            if policy.primary_region != region && policy.secondary_region != region {
                return true;
            }
            if entry.transition.is_some() {
                warn!("Failover policy {} is mid-transition, deactivating", key);
                policy.is_active = false;
                return true;
            }
            removed.push(key.clone());
            false
        });

        removed.sort();
        for key in &removed {
            info!("Failover policy removed: {}", key);
        }
        removed
    }

    pub fn create_disaster_recovery_plan(&self, plan: DisasterRecoveryPlan) -> FleetResult<()> {
        plan.validate()?;
        if let Some(region) = plan
            .replication_targets
            .iter()
            .find(|r| !self.registry.contains_region(r))
        {
            return Err(FleetError::RegionNotFound(region.clone()));
        }

        info!(
            "DR plan created: {} (RTO: {:?}, RPO: {:?})",
            plan.name, plan.rto, plan.rpo
        );
        self.plans.write().insert(plan.name.clone(), plan);
        Ok(())
    }

    pub fn disaster_recovery_status(&self, name: &str) -> FleetResult<DisasterRecoveryPlan> {
        self.plans
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FleetError::RecoveryPlanNotFound(name.to_string()))
    }

    // =========================================================================
    // Replication lag
    // =========================================================================

    /// Record the replication lag reported for a region
    pub fn update_replication_lag(&self, region: &str, lag: Duration) {
        debug!("Replication lag for {}: {:?}", region, lag);
        self.replication_lag.write().insert(region.to_string(), lag);
    }

    pub fn replication_lag(&self, region: &str) -> Duration {
        self.replication_lag
            .read()
            .get(region)
            .copied()
            .unwrap_or(self.config.default_replication_lag)
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Primary-region health percentage, `None` if the region is unknown
    fn primary_health(&self, policy: &FailoverPolicy) -> Option<u64> {
        self.registry
            .region_stats(&policy.primary_region)
            .map(|stats| stats.health_percentage())
    }

    /// Whether an automatic policy's primary has dropped below its threshold
    pub fn evaluate_failover_needed(&self, key: &str) -> FleetResult<bool> {
        let policy = self
            .failover_policy(key)
            .ok_or_else(|| FleetError::FailoverPolicyNotFound(key.to_string()))?;

        if !policy.automatic {
            return Ok(false);
        }

        let Some(health) = self.primary_health(&policy) else {
            warn!(
                "Primary region {} of {} not found",
                policy.primary_region, key
            );
            return Ok(false);
        };

        debug!(
            "Health check: {} = {}% (threshold: {}%)",
            policy.primary_region, health, policy.health_threshold
        );
        Ok(health < policy.health_threshold as u64)
    }

    /// Switch a policy's traffic from its primary to its secondary region
    pub async fn initiate_failover(
        &self,
        key: &str,
        automatic: bool,
        reason: &str,
    ) -> FleetResult<FailoverEvent> {
        let (policy, from, guard) = self.claim(key, |entry| {
            if entry.current_primary == entry.policy.secondary_region {
                Err(FleetError::Conflict(format!(
                    "{} already failed over to {}",
                    key, entry.policy.secondary_region
                )))
            } else {
                Ok(())
            }
        })?;
        let to = policy.secondary_region.clone();

        warn!(
            "Initiating failover: {} -> {} (automatic: {}, reason: {})",
            from, to, automatic, reason
        );
        let mut event = FailoverEvent::new(key, &from, &to, reason, automatic);

        let lag = self.replication_lag(&to);
        event.replication_lag_ms = lag.as_millis() as u64;
        if lag > policy.max_replication_lag {
            let message = format!(
                "Replication lag too high: {:?} > {:?}",
                lag, policy.max_replication_lag
            );
            warn!("Failover {} refused: {}", key, message);
            self.events.push(event.failed(&message));
            return Err(FleetError::PreconditionFailed(message));
        }

        guard.advance(FailoverStatus::InProgress);
        self.settle(&policy, &from, &to).await;

        let healthy = self
            .registry
            .region_stats(&to)
            .map(|stats| stats.healthy_servers)
            .unwrap_or(0);
        if healthy == 0 {
            let message = format!("No healthy servers in secondary region {}", to);
            error!("Failover {} failed: {}", key, message);
            self.events.push(event.failed(&message));
            return Err(FleetError::PreconditionFailed(message));
        }

        let event = event.completed();
        self.events.push(event.clone());
        self.set_current_primary(key, &to);

        info!("Failover completed: traffic now routed to {}", to);
        Ok(event)
    }

    /// Return a failed-over policy's traffic to its primary region
    pub async fn initiate_failback(&self, key: &str) -> FleetResult<FailoverEvent> {
        let (policy, from, guard) = self.claim(key, |entry| {
            if entry.current_primary == entry.policy.primary_region {
                Err(FleetError::Conflict(format!(
                    "{} already on primary region {}",
                    key, entry.policy.primary_region
                )))
            } else {
                Ok(())
            }
        })?;
        let to = policy.primary_region.clone();

        let healthy = self
            .registry
            .region_stats(&to)
            .map(|stats| stats.healthy_servers)
            .unwrap_or(0);
        if healthy == 0 {
            return Err(FleetError::PreconditionFailed(format!(
                "Primary region {} not healthy",
                to
            )));
        }

        info!("Initiating failback: {} -> {}", from, to);
        guard.advance(FailoverStatus::InProgress);
        self.settle(&policy, &from, &to).await;

        let mut event = FailoverEvent::new(key, &from, &to, FAILBACK_REASON, false);
        event.replication_lag_ms = self.replication_lag(&to).as_millis() as u64;
        let event = event.completed();
        self.events.push(event.clone());
        self.set_current_primary(key, &to);

        info!("Failback completed: traffic now routed to {}", to);
        Ok(event)
    }

    /// Mark a policy as switching, after `check` accepts its current state
    fn claim<'a>(
        &'a self,
        key: &'a str,
        check: impl FnOnce(&PolicyEntry) -> FleetResult<()>,
    ) -> FleetResult<(FailoverPolicy, String, TransitionGuard<'a>)> {
        let mut policies = self.policies.write();
        let entry = policies
            .get_mut(key)
            .ok_or_else(|| FleetError::FailoverPolicyNotFound(key.to_string()))?;

        if entry.transition.is_some() {
            return Err(FleetError::Conflict(format!(
                "failover already in progress for {}",
                key
            )));
        }
        check(entry)?;

        entry.transition = Some(FailoverStatus::Initiated);
        let claimed = (entry.policy.clone(), entry.current_primary.clone());
        drop(policies);

        Ok((
            claimed.0,
            claimed.1,
            TransitionGuard {
                policies: &self.policies,
                key,
            },
        ))
    }

    async fn settle(&self, policy: &FailoverPolicy, from: &str, to: &str) {
        let delay = self.config.settle_delay.min(policy.failover_timeout);
        info!("Switching traffic from {} to {} (settle: {:?})", from, to, delay);
        tokio::time::sleep(delay).await;
    }

    fn set_current_primary(&self, key: &str, region: &str) {
        if let Some(entry) = self.policies.write().get_mut(key) {
            entry.current_primary = region.to_string();
        }
    }

    /// Fail over every active automatic policy whose primary is degraded
    pub async fn evaluate_all(&self) -> Vec<FailoverEvent> {
        let candidates: Vec<(String, FailoverPolicy)> = self
            .policies
            .read()
            .iter()
            .filter(|(_, e)| {
                e.policy.is_active
                    && e.policy.automatic
                    && e.transition.is_none()
                    && e.current_primary == e.policy.primary_region
            })
            .map(|(k, e)| (k.clone(), e.policy.clone()))
            .collect();

        let mut completed = Vec::new();
        for (key, policy) in candidates {
            match self.evaluate_failover_needed(&key) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!("Skipping {}: {}", key, e);
                    continue;
                }
            }

            let health = self.primary_health(&policy).unwrap_or(0);
            let reason = format!(
                "Primary region health {}% below threshold {}%",
                health, policy.health_threshold
            );
            match self.initiate_failover(&key, true, &reason).await {
                Ok(event) => completed.push(event),
                Err(e) => warn!("Automatic failover for {} failed: {}", key, e),
            }
        }
        completed
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn failover_status(&self, key: &str) -> FleetResult<FailoverPolicyStatus> {
        let policies = self.policies.read();
        let entry = policies
            .get(key)
            .ok_or_else(|| FleetError::FailoverPolicyNotFound(key.to_string()))?;
        let policy = &entry.policy;

        Ok(FailoverPolicyStatus {
            policy_key: key.to_string(),
            policy_name: policy.name.clone(),
            primary_region: policy.primary_region.clone(),
            secondary_region: policy.secondary_region.clone(),
            current_primary: entry.current_primary.clone(),
            is_failed_over: entry.current_primary != policy.primary_region,
            automatic: policy.automatic,
            health_threshold: policy.health_threshold,
            is_active: policy.is_active,
            transition: entry.transition,
        })
    }

    /// The newest `limit` events, oldest first
    pub fn failover_history(&self, limit: usize) -> Vec<FailoverEvent> {
        self.events.recent(limit)
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
            debug!("Failover controller already running");
            return None;
        }

        let controller = Arc::clone(self);
        let ticker = spawn_periodic(
            "Failover controller",
            self.config.evaluation_interval,
            cancel,
            move || {
                let controller = controller.clone();
                async move {
                    controller.evaluate_all().await;
                }
            },
        );

        let controller = Arc::clone(self);
        Some(tokio::spawn(async move {
            if let Err(e) = ticker.await {
                error!("Failover controller loop failed: {}", e);
            }
            controller.running.store(false, Ordering::SeqCst);
        }))
    }
}
