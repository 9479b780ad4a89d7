//! End-to-end fleet scenarios driven through the fleet manager
//!
//! Fleets are built from YAML the same way the binary builds them. Health
//! probes go through a scripted prober so scenarios can fail servers at will.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::sleep;

use fleetguard::config::FleetConfig;
use fleetguard::failover::{policy_key, FailoverStatus};
use fleetguard::fleet::ServerMetrics;
use fleetguard::health::{HealthProbe, Prober};
use fleetguard::scaling::ScalingAction;
use fleetguard::{FleetError, FleetManager};

/// Prober that fails every server in its `down` set
#[derive(Default)]
struct ScriptedProber {
    down: RwLock<HashSet<String>>,
}

impl ScriptedProber {
    fn fail(&self, ids: &[&str]) {
        let mut down = self.down.write();
        down.extend(ids.iter().map(|id| id.to_string()));
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, probe: &HealthProbe) -> Result<u16, String> {
        if self.down.read().contains(&probe.server_id) {
            Ok(503)
        } else {
            Ok(200)
        }
    }
}

fn build(yaml: &str) -> (FleetManager, Arc<ScriptedProber>) {
    let config: FleetConfig = yaml.parse().expect("valid fleet file");
    let prober = Arc::new(ScriptedProber::default());
    let manager = FleetManager::from_config_with_prober(&config, prober.clone())
        .expect("fleet builds");
    (manager, prober)
}

fn set_load(manager: &FleetManager, ids: &[&str], load: u32) {
    for id in ids {
        manager
            .registry()
            .update_server_metrics(id, ServerMetrics::load(load, Duration::from_millis(20)))
            .unwrap();
    }
}

// ============================================================================
// Scaling
// ============================================================================

const US_EAST: &str = r#"
regions:
  - name: us-east
    continent: north-america
    latitude: 39.0
    longitude: -77.5
    servers:
      - { id: use-1, endpoint: 10.0.0.1, port: 8080, capacity: 100 }
      - { id: use-2, endpoint: 10.0.0.2, port: 8080, capacity: 100 }
scaling_policies:
  - region: us-east
    scale_up_threshold: 80
    scale_down_threshold: 20
    min_instances: 2
    max_instances: 5
    cooldown_secs: 0
"#;

#[tokio::test]
async fn test_us_east_scale_up_then_down() {
    let (manager, _) = build(US_EAST);
    let mut events = manager.scaling().subscribe();

    // 90% utilization across the region
    set_load(&manager, &["use-1", "use-2"], 90);
    let emitted = manager.scaling().evaluate_all();

    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].action, ScalingAction::ScaleUp);
    assert_eq!((emitted[0].from_count, emitted[0].to_count), (2, 3));
    assert_eq!(emitted[0].utilization, 90);

    let received = events.recv().await.unwrap();
    assert_eq!(received.id, emitted[0].id);

    // The new instance comes online and load drops to 10%
    manager
        .registry()
        .register_server("use-3", "us-east", "10.0.0.3", 8080, 1, 100)
        .unwrap();
    set_load(&manager, &["use-1", "use-2", "use-3"], 10);
    let emitted = manager.scaling().evaluate_all();

    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].action, ScalingAction::ScaleDown);
    assert_eq!((emitted[0].from_count, emitted[0].to_count), (3, 2));

    let metrics = manager.scaling().scaling_metrics();
    assert_eq!(metrics.scale_up_count, 1);
    assert_eq!(metrics.scale_down_count, 1);
    assert_eq!(manager.scaling().scaling_events(Some("us-east"), 10).len(), 2);
}

#[tokio::test]
async fn test_scaling_respects_bounds_and_cooldown() {
    let yaml = US_EAST.replace("cooldown_secs: 0", "cooldown_secs: 300");
    let (manager, _) = build(&yaml);

    // At the minimum with low load: nothing to do, cooldown stays unarmed
    set_load(&manager, &["use-1", "use-2"], 5);
    assert!(manager.scaling().evaluate_all().is_empty());

    set_load(&manager, &["use-1", "use-2"], 95);
    assert_eq!(manager.scaling().evaluate_all().len(), 1);

    // Still hot, but inside the cooldown window
    assert!(manager.scaling().evaluate_all().is_empty());

    let region = manager.scaling().region_scaling_metrics("us-east").unwrap();
    assert_eq!(region.scale_up_count, 1);
    assert!(region.last_scaling.is_some());
    assert!(region.cooldown_remaining > Duration::from_secs(290));
}

// ============================================================================
// Failover
// ============================================================================

const EUROPE: &str = r#"
failover:
  settle_delay_ms: 10
regions:
  - name: eu-west
    continent: europe
    latitude: 53.3
    longitude: -6.3
    servers:
      - { id: euw-1, endpoint: 10.1.0.1, port: 8080 }
      - { id: euw-2, endpoint: 10.1.0.2, port: 8080 }
      - { id: euw-3, endpoint: 10.1.0.3, port: 8080 }
      - { id: euw-4, endpoint: 10.1.0.4, port: 8080 }
      - { id: euw-5, endpoint: 10.1.0.5, port: 8080 }
      - { id: euw-6, endpoint: 10.1.0.6, port: 8080 }
  - name: eu-central
    continent: europe
    latitude: 50.1
    longitude: 8.7
    servers:
      - { id: euc-1, endpoint: 10.2.0.1, port: 8080 }
      - { id: euc-2, endpoint: 10.2.0.2, port: 8080 }
failover_policies:
  - name: eu-primary
    primary_region: eu-west
    secondary_region: eu-central
    health_threshold: 50
    automatic: true
"#;

const DEGRADED: [&str; 4] = ["euw-3", "euw-4", "euw-5", "euw-6"];

fn degrade_eu_west(manager: &FleetManager) {
    for id in DEGRADED {
        manager.registry().set_server_health(id, false).unwrap();
    }
}

#[tokio::test]
async fn test_eu_failover_and_failback() {
    let (manager, _) = build(EUROPE);
    let failover = manager.failover();
    let key = policy_key("eu-west", "eu-central");

    assert!(!failover.evaluate_failover_needed(&key).unwrap());

    // 2 of 6 healthy
    degrade_eu_west(&manager);
    assert!(failover.evaluate_failover_needed(&key).unwrap());

    failover.update_replication_lag("eu-central", Duration::from_millis(50));
    let event = failover
        .initiate_failover(&key, true, "eu-west degraded")
        .await
        .unwrap();

    assert_eq!(event.status, FailoverStatus::Completed);
    assert_eq!(event.from_region, "eu-west");
    assert_eq!(event.to_region, "eu-central");
    assert_eq!(event.replication_lag_ms, 50);

    let status = failover.failover_status(&key).unwrap();
    assert!(status.is_failed_over);
    assert_eq!(status.current_primary, "eu-central");
    assert!(status.transition.is_none());
    assert_eq!(manager.summary().failed_over, 1);

    // A second failover is a conflict
    let err = failover.initiate_failover(&key, false, "again").await.unwrap_err();
    assert!(matches!(err, FleetError::Conflict(_)));

    // Recover and return
    for id in DEGRADED {
        manager.registry().set_server_health(id, true).unwrap();
    }
    let event = failover.initiate_failback(&key).await.unwrap();
    assert_eq!(event.to_region, "eu-west");
    assert!(!event.automatic);

    assert!(!failover.failover_status(&key).unwrap().is_failed_over);
    assert_eq!(failover.failover_history(10).len(), 2);
}

#[tokio::test]
async fn test_failover_refused_on_replication_lag() {
    let (manager, _) = build(EUROPE);
    let failover = manager.failover();
    let key = policy_key("eu-west", "eu-central");

    degrade_eu_west(&manager);
    failover.update_replication_lag("eu-central", Duration::from_secs(6));

    let err = failover
        .initiate_failover(&key, true, "eu-west degraded")
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::PreconditionFailed(_)));

    let status = failover.failover_status(&key).unwrap();
    assert!(!status.is_failed_over);
    assert!(status.transition.is_none());

    let history = failover.failover_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, FailoverStatus::Failed);
    assert!(history[0].error.is_some());
}

#[tokio::test]
async fn test_automatic_failover_runs_once() {
    let (manager, _) = build(EUROPE);
    degrade_eu_west(&manager);

    let completed = manager.failover().evaluate_all().await;
    assert_eq!(completed.len(), 1);
    assert!(completed[0].automatic);

    // Already failed over
    assert!(manager.failover().evaluate_all().await.is_empty());
}

#[tokio::test]
async fn test_background_loops_fail_over_unhealthy_region() {
    let yaml = EUROPE.replace(
        "failover:\n  settle_delay_ms: 10\n",
        "health:\n  interval_secs: 1\n  max_consecutive_failures: 1\n\
         failover:\n  evaluation_interval_secs: 1\n  settle_delay_ms: 10\n",
    );
    let (manager, prober) = build(&yaml);
    prober.fail(&DEGRADED);

    assert_eq!(manager.start(), 3);
    sleep(Duration::from_millis(1_500)).await;
    manager.shutdown().await;

    let key = policy_key("eu-west", "eu-central");
    assert!(!manager.registry().server("euw-4").unwrap().is_healthy);
    assert!(manager.registry().server("euw-1").unwrap().is_healthy);
    assert!(manager.failover().failover_status(&key).unwrap().is_failed_over);

    let summary = manager.summary();
    assert_eq!(summary.stats.healthy_servers, 4);
    assert!(summary.health.total_checks >= 8);
    assert!(!summary.health.is_running);
}

// ============================================================================
// Multi-region
// ============================================================================

const GLOBAL: &str = r#"
regions:
  - { name: r1, latitude: 40.7, longitude: -74.0 }
  - { name: r2, latitude: 51.5, longitude: -0.1 }
  - { name: r3, latitude: 35.7, longitude: 139.7 }
deployments:
  - name: worldwide
    active_regions: [r1, r2, r3]
    strategy: active-warm
  - name: pair
    active_regions: [r1, r2]
    strategy: active-active
latencies:
  - { from: r3, to: r1, ms: 160 }
  - { from: r3, to: r2, ms: 220 }
"#;

#[test]
fn test_active_warm_distribution() {
    let (manager, _) = build(GLOBAL);
    let distribution = manager
        .coordinator()
        .optimize_traffic_distribution("worldwide")
        .unwrap();

    assert_eq!(distribution["r1"], 80.0);
    assert_eq!(distribution["r2"], 20.0);
    assert_eq!(distribution["r3"], 0.0);

    let pair = manager
        .coordinator()
        .optimize_traffic_distribution("pair")
        .unwrap();
    assert_eq!(pair["r1"], 50.0);
    assert_eq!(pair["r2"], 50.0);
}

#[test]
fn test_region_selection_for_requests() {
    let (manager, _) = build(GLOBAL);
    let coordinator = manager.coordinator();

    assert_eq!(coordinator.select_region_for_request("r2", "pair").unwrap(), "r2");
    // r3 is not in the pair; r1 is the lower-latency choice
    assert_eq!(coordinator.select_region_for_request("r3", "pair").unwrap(), "r1");

    // A client near Tokyo is closest to r3
    let (nearest, km) = coordinator.nearest_region(35.0, 139.0).unwrap();
    assert_eq!(nearest, "r3");
    assert!(km < 200.0);

    let err = coordinator
        .optimize_traffic_distribution("missing")
        .unwrap_err();
    assert!(err.is_not_found());
}
