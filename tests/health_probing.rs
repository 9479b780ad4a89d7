//! Integration tests for health probing against thin HTTP servers
//!
//! Each test starts one or more axum servers on free local ports that act as
//! the health endpoints of fleet servers, then drives the health monitor
//! against them over real HTTP.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use fleetguard::fleet::{FleetRegistry, LoadBalancingStrategy, RegistryConfig};
use fleetguard::health::{HealthMonitor, HealthMonitorConfig, HealthProbe, HttpMethod};

/// Find an available port for testing
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to address")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// State for a health endpoint that can be switched between up and down
#[derive(Debug, Clone)]
struct HealthServerState {
    up: Arc<AtomicBool>,
    call_count: Arc<AtomicUsize>,
}

/// Handler: 200 when up, 500 when down
async fn health_handler(State(state): State<HealthServerState>) -> StatusCode {
    state.call_count.fetch_add(1, Ordering::SeqCst);
    if state.up.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Handler that answers long after any reasonable probe timeout
async fn slow_handler() -> StatusCode {
    sleep(Duration::from_secs(2)).await;
    StatusCode::OK
}

async fn serve(port: u16, app: Router) {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind health server");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    sleep(Duration::from_millis(50)).await;
}

/// Start a switchable health server on `/health`
async fn start_health_server(port: u16) -> HealthServerState {
    let state = HealthServerState {
        up: Arc::new(AtomicBool::new(true)),
        call_count: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ping", post(health_handler))
        .with_state(state.clone());

    serve(port, app).await;
    state
}

async fn start_slow_server(port: u16) {
    let app = Router::new().route("/health", get(slow_handler));
    serve(port, app).await;
}

fn registry_with_region() -> Arc<FleetRegistry> {
    let registry = Arc::new(FleetRegistry::new(RegistryConfig {
        strategy: LoadBalancingStrategy::RoundRobin,
        session_affinity: false,
        ..Default::default()
    }));
    registry.register_region("local", "test", 0.0, 0.0, 1);
    registry
}

fn monitor_config() -> HealthMonitorConfig {
    HealthMonitorConfig {
        check_interval: Duration::from_millis(100),
        check_timeout: Duration::from_millis(500),
        max_consecutive_failures: 3,
        ..Default::default()
    }
}

// ============================================================================
// Single probe cycles
// ============================================================================

#[tokio::test]
async fn test_healthy_endpoint() {
    let port = find_available_port();
    let server = start_health_server(port).await;

    let registry = registry_with_region();
    registry
        .register_server("srv-1", "local", "127.0.0.1", port, 1, 100)
        .unwrap();

    let monitor = HealthMonitor::new(registry.clone(), monitor_config());
    monitor
        .register_health_probe("srv-1", "127.0.0.1", port, "/health")
        .unwrap();

    let results = monitor.run_cycle().await;

    assert_eq!(results.len(), 1);
    assert!(results[0].is_healthy);
    assert_eq!(results[0].status_code, Some(200));
    assert!(results[0].error.is_none());
    assert_eq!(server.call_count.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.calculate_health_percentage("srv-1"), 100);
}

#[tokio::test]
async fn test_failure_threshold_and_recovery() {
    let port_a = find_available_port();
    let server_a = start_health_server(port_a).await;
    let port_b = find_available_port();
    let _server_b = start_health_server(port_b).await;

    let registry = registry_with_region();
    registry
        .register_server("srv-a", "local", "127.0.0.1", port_a, 1, 100)
        .unwrap();
    registry
        .register_server("srv-b", "local", "127.0.0.1", port_b, 1, 100)
        .unwrap();

    let monitor = HealthMonitor::new(registry.clone(), monitor_config());
    monitor
        .register_health_probe("srv-a", "127.0.0.1", port_a, "/health")
        .unwrap();
    monitor
        .register_health_probe("srv-b", "127.0.0.1", port_b, "/health")
        .unwrap();

    server_a.up.store(false, Ordering::SeqCst);

    // Two failures stay under the threshold
    for _ in 0..2 {
        monitor.run_cycle().await;
    }
    assert!(registry.server("srv-a").unwrap().is_healthy);
    assert_eq!(monitor.health_status("srv-a").unwrap().consecutive_failures, 2);

    // The third flips it
    monitor.run_cycle().await;
    assert!(!registry.server("srv-a").unwrap().is_healthy);

    let last = monitor.health_status("srv-a").unwrap().last_check.unwrap();
    assert_eq!(last.status_code, Some(500));
    assert!(!last.is_healthy);

    // Routing avoids the unhealthy server
    for _ in 0..10 {
        let picked = registry.select_server("10.0.0.1", None, None).unwrap();
        assert_eq!(picked.id, "srv-b");
    }

    // Further failures do not change anything
    monitor.run_cycle().await;
    assert!(!registry.server("srv-a").unwrap().is_healthy);

    // One success restores it
    server_a.up.store(true, Ordering::SeqCst);
    monitor.run_cycle().await;
    assert!(registry.server("srv-a").unwrap().is_healthy);
    assert_eq!(monitor.health_status("srv-a").unwrap().consecutive_failures, 0);

    // 4 failures out of 5 checks
    assert_eq!(monitor.calculate_health_percentage("srv-a"), 20);
    assert_eq!(monitor.calculate_health_percentage("srv-b"), 100);
    assert_eq!(monitor.health_history("srv-a", 10).len(), 5);
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Nothing listens on this port
    let port = find_available_port();

    let registry = registry_with_region();
    registry
        .register_server("srv-1", "local", "127.0.0.1", port, 1, 100)
        .unwrap();

    let monitor = HealthMonitor::new(registry, monitor_config());
    monitor
        .register_health_probe("srv-1", "127.0.0.1", port, "/health")
        .unwrap();

    let results = monitor.run_cycle().await;

    assert!(!results[0].is_healthy);
    assert!(results[0].status_code.is_none());
    assert!(results[0].error.is_some());
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let port = find_available_port();
    start_slow_server(port).await;

    let registry = registry_with_region();
    registry
        .register_server("srv-1", "local", "127.0.0.1", port, 1, 100)
        .unwrap();

    let monitor = HealthMonitor::new(registry, monitor_config());
    monitor
        .register_probe(HealthProbe::new(
            "srv-1",
            "127.0.0.1",
            port,
            "/health",
            Duration::from_millis(100),
        ))
        .unwrap();

    let results = monitor.run_cycle().await;

    assert!(!results[0].is_healthy);
    assert!(results[0].status_code.is_none());
    assert!(results[0].response_time < Duration::from_secs(1));
}

#[tokio::test]
async fn test_probe_method_and_expected_status() {
    let port = find_available_port();
    let server = start_health_server(port).await;

    let registry = registry_with_region();
    registry
        .register_server("srv-1", "local", "127.0.0.1", port, 1, 100)
        .unwrap();

    let monitor = HealthMonitor::new(registry, monitor_config());

    let mut probe = HealthProbe::new("srv-1", "127.0.0.1", port, "ping", Duration::from_secs(1));
    probe.method = HttpMethod::Post;
    monitor.register_probe(probe.clone()).unwrap();

    let results = monitor.run_cycle().await;
    assert!(results[0].is_healthy);

    // A 200 is unhealthy when another status is expected
    probe.expected_status = 204;
    monitor.register_probe(probe).unwrap();

    let results = monitor.run_cycle().await;
    assert!(!results[0].is_healthy);
    assert_eq!(results[0].status_code, Some(200));
    assert_eq!(server.call_count.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Background loop
// ============================================================================

#[tokio::test]
async fn test_monitor_loop_probes_until_cancelled() {
    let port = find_available_port();
    let server = start_health_server(port).await;

    let registry = registry_with_region();
    registry
        .register_server("srv-1", "local", "127.0.0.1", port, 1, 100)
        .unwrap();

    let monitor = Arc::new(HealthMonitor::new(registry.clone(), monitor_config()));
    monitor
        .register_health_probe("srv-1", "127.0.0.1", port, "/health")
        .unwrap();

    let cancel = CancellationToken::new();
    let handle = monitor.start(cancel.clone()).unwrap();
    assert!(monitor.is_running());
    assert!(monitor.start(cancel.clone()).is_none());

    server.up.store(false, Ordering::SeqCst);
    sleep(Duration::from_millis(600)).await;

    cancel.cancel();
    handle.await.unwrap();
    assert!(!monitor.is_running());

    let calls = server.call_count.load(Ordering::SeqCst);
    assert!(calls >= 3, "only {} probes ran", calls);
    assert!(!registry.server("srv-1").unwrap().is_healthy);

    // No probes after cancellation
    sleep(Duration::from_millis(250)).await;
    assert_eq!(server.call_count.load(Ordering::SeqCst), calls);

    let global = monitor.global_health_status();
    assert_eq!(global.total_servers, 1);
    assert!(global.unhealthy_checks >= 1);
    assert!(!global.is_running);
}
