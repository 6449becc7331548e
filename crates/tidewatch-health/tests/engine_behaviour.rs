//! Health engine behaviour tests.
//!
//! Drives the public operations against an in-memory store and the scripted
//! in-memory runtime: counters, thresholds, recovery gating, single-flight,
//! scheduling and uptime.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

use tidewatch_health::{HealthEngine, HealthError, MonitorConfig};
use tidewatch_runtime::{InMemoryRuntime, RuntimeUnit, UnitState};
use tidewatch_state::*;

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn config() -> MonitorConfig {
    MonitorConfig {
        restart_grace: "0s".to_string(),
        probe_grace: "200ms".to_string(),
        ..MonitorConfig::default()
    }
}

fn test_host() -> MonitoredHost {
    MonitoredHost {
        id: "host-1".to_string(),
        name: "edge".to_string(),
        endpoint: "unix:///var/run/docker.sock".to_string(),
        status: HostStatus::Online,
        consecutive_failures: 0,
        last_health_check: None,
        last_failure: None,
    }
}

fn test_app(id: &str, threshold: u32) -> MonitoredApplication {
    MonitoredApplication {
        id: id.to_string(),
        name: "shop".to_string(),
        host_id: "host-1".to_string(),
        image: "shop:1".to_string(),
        mode: ExecutionMode::Standalone {
            container_name: None,
        },
        health_url: None,
        domain: None,
        port: None,
        check_interval_secs: 30,
        check_timeout_secs: 5,
        failure_threshold: threshold,
        auto_recovery: true,
        consecutive_failures: 0,
        last_checked_at: None,
    }
}

fn setup(apps: &[MonitoredApplication]) -> (HealthEngine, Arc<InMemoryRuntime>) {
    setup_with(apps, config())
}

fn setup_with(apps: &[MonitoredApplication], config: MonitorConfig) -> (HealthEngine, Arc<InMemoryRuntime>) {
    let store = StateStore::open_in_memory().unwrap();
    store.put_host(&test_host()).unwrap();
    for app in apps {
        store.put_application(app).unwrap();
    }
    let runtime = Arc::new(InMemoryRuntime::new());
    let engine = HealthEngine::new(store, runtime.clone(), config);
    (engine, runtime)
}

fn failures(engine: &HealthEngine, app_id: &str) -> u32 {
    engine
        .store()
        .get_application(app_id)
        .unwrap()
        .unwrap()
        .consecutive_failures
}

// ── Counters and thresholds ───────────────────────────────────────

#[tokio::test]
async fn recovery_fires_exactly_at_threshold() {
    let (engine, rt) = setup(&[test_app("app-1", 3)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Exited));

    for expected in 1..=2 {
        let eval = engine.check_application("app-1").await.unwrap();
        assert_eq!(eval.record.status, HealthStatus::Unhealthy);
        assert_eq!(eval.consecutive_failures, expected);
        assert!(eval.recovery.is_none());
    }

    let eval = engine.check_application("app-1").await.unwrap();
    assert_eq!(eval.consecutive_failures, 3);
    let outcome = eval.recovery.expect("recovery dispatched").await.unwrap();
    assert!(outcome.success, "{}", outcome.detail);

    assert_eq!(rt.call_count("stop_unit"), 1);
    assert_eq!(rt.call_count("start_unit"), 1);
    assert_eq!(failures(&engine, "app-1"), 0);

    let eval = engine.check_application("app-1").await.unwrap();
    assert_eq!(eval.record.status, HealthStatus::Healthy);
    assert_eq!(eval.consecutive_failures, 0);
}

#[tokio::test]
async fn every_check_persists_one_record() {
    let (engine, rt) = setup(&[test_app("app-1", 10)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Running));

    for _ in 0..4 {
        engine.check_application("app-1").await.unwrap();
    }
    let history = engine.get_history("app-1", 100).unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|w| w[0].id > w[1].id));
    assert!(engine.store().get_application("app-1").unwrap().unwrap().last_checked_at.is_some());
}

#[tokio::test]
async fn unknown_never_triggers_recovery() {
    let (engine, rt) = setup(&[test_app("app-1", 1)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Exited));
    rt.set_outage(true);

    for expected in 1..=3 {
        let eval = engine.check_application("app-1").await.unwrap();
        assert_eq!(eval.record.status, HealthStatus::Unknown);
        assert_eq!(eval.consecutive_failures, expected);
        assert!(eval.recovery.is_none());
    }
    assert_eq!(rt.call_count("stop_unit"), 0);
    assert_eq!(rt.call_count("start_unit"), 0);
}

#[tokio::test]
async fn degraded_counts_but_does_not_recover() {
    let mut app = test_app("app-1", 1);
    app.mode = ExecutionMode::ClusteredService {
        service_id: "shop_web".to_string(),
        desired_replicas: 3,
    };
    let (engine, rt) = setup(&[app]);
    rt.set_service("host-1", "shop_web", 1, 3);

    let eval = engine.check_application("app-1").await.unwrap();
    assert_eq!(eval.record.status, HealthStatus::Degraded);
    assert_eq!(eval.record.detail.as_deref(), Some("only 1/3 replicas running"));
    assert_eq!(eval.consecutive_failures, 1);
    assert!(eval.recovery.is_none());
    assert_eq!(rt.call_count("force_update_service"), 0);
}

#[tokio::test]
async fn auto_recovery_disabled_never_recovers() {
    let mut app = test_app("app-1", 1);
    app.auto_recovery = false;
    let (engine, rt) = setup(&[app]);

    let eval = engine.check_application("app-1").await.unwrap();
    assert_eq!(eval.record.status, HealthStatus::Unhealthy);
    assert!(eval.recovery.is_none());
    assert_eq!(rt.call_count("list_units"), 1);
}

#[tokio::test]
async fn failed_recovery_leaves_counter_and_retries_next_crossing() {
    let (engine, rt) = setup(&[test_app("app-1", 1)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Exited));
    rt.set_fail_start(true);

    let eval = engine.check_application("app-1").await.unwrap();
    let outcome = eval.recovery.unwrap().await.unwrap();
    assert!(!outcome.success);
    assert_eq!(failures(&engine, "app-1"), 1);

    let eval = engine.check_application("app-1").await.unwrap();
    assert_eq!(eval.consecutive_failures, 2);
    assert!(eval.recovery.is_some());
}

#[tokio::test]
async fn clustered_recovery_forces_update_with_image() {
    let mut app = test_app("app-1", 2);
    app.mode = ExecutionMode::ClusteredService {
        service_id: "shop_web".to_string(),
        desired_replicas: 2,
    };
    let (engine, rt) = setup(&[app]);
    rt.set_service("host-1", "shop_web", 0, 2);

    assert!(engine.check_application("app-1").await.unwrap().recovery.is_none());
    let eval = engine.check_application("app-1").await.unwrap();
    assert!(eval.recovery.unwrap().await.unwrap().success);
    assert_eq!(rt.service("host-1", "shop_web").unwrap().running, 2);
    assert_eq!(failures(&engine, "app-1"), 0);
}

#[tokio::test]
async fn manual_recovery_bypasses_counter() {
    let (engine, rt) = setup(&[test_app("app-1", 5)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop-web-1", UnitState::Dead));

    let outcome = engine.attempt_recovery("app-1").await.unwrap();
    assert!(outcome.success);
    assert_eq!(rt.unit_state("host-1", "c1"), Some(UnitState::Running));
}

// ── Strategy precedence ───────────────────────────────────────────

#[tokio::test]
async fn http_beats_tcp_on_every_evaluation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    // The TCP target is a closed port: choosing it would be Unhealthy.
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_port = closed.local_addr().unwrap().port();
    drop(closed);

    let mut app = test_app("app-1", 1);
    app.health_url = Some(format!("http://{addr}/healthz"));
    app.domain = Some("127.0.0.1".to_string());
    app.port = Some(closed_port);
    let (engine, rt) = setup(&[app]);

    for _ in 0..3 {
        let eval = engine.check_application("app-1").await.unwrap();
        assert_eq!(eval.record.status, HealthStatus::Healthy);
        assert_eq!(eval.record.status_code.as_deref(), Some("200"));
    }
    assert_eq!(rt.call_count("list_units"), 0);
}

#[tokio::test]
async fn tcp_probe_used_without_url() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut app = test_app("app-1", 1);
    app.domain = Some("127.0.0.1".to_string());
    app.port = Some(listener.local_addr().unwrap().port());
    let (engine, _rt) = setup(&[app]);

    let eval = engine.check_application("app-1").await.unwrap();
    assert_eq!(eval.record.status, HealthStatus::Healthy);
    assert_eq!(eval.record.status_code.as_deref(), Some("tcp"));
}

// ── Single-flight and scheduling ──────────────────────────────────

#[tokio::test]
async fn concurrent_checks_of_one_app_never_overlap() {
    let (engine, rt) = setup(&[test_app("app-1", 1)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Running));
    rt.set_latency(Duration::from_millis(100));

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.check_application("app-1").await })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.check_application("app-1").await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(rt.max_concurrent_calls(), 1);
    assert_eq!(engine.get_history("app-1", 10).unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_threshold_crossings_dispatch_one_recovery() {
    let (engine, rt) = setup(&[test_app("app-1", 1)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Exited));
    rt.set_latency(Duration::from_millis(50));

    let first = engine.check_application("app-1").await.unwrap();
    let first_recovery = first.recovery.expect("first crossing recovers");
    // Recovery is still stopping the container; this crossing must not start another.
    let second = engine.check_application("app-1").await.unwrap();
    assert_eq!(second.record.status, HealthStatus::Unhealthy);
    assert!(second.recovery.is_none());

    assert!(first_recovery.await.unwrap().success);
    assert_eq!(rt.call_count("stop_unit"), 1);
    assert_eq!(rt.call_count("start_unit"), 1);
}

#[tokio::test]
async fn scheduler_skips_target_still_being_evaluated() {
    let (engine, rt) = setup(&[test_app("app-1", 5)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Running));
    rt.set_latency(Duration::from_millis(300));

    let direct = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.check_application("app-1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = engine.monitor().monitor_all_applications().await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.skipped_busy, 1);
    assert_eq!(report.completed(), 0);

    direct.await.unwrap().unwrap();
    assert_eq!(engine.get_history("app-1", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn pass_evaluates_only_due_applications() {
    let mut fresh = test_app("fresh", 3);
    fresh.check_interval_secs = 3600;
    fresh.last_checked_at = Some(now());
    let mut stale = test_app("stale", 3);
    stale.last_checked_at = Some(now() - 120);
    let never = test_app("never", 3);

    let (engine, rt) = setup(&[fresh, stale, never]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Running));

    let report = engine.monitor().monitor_all_applications().await.unwrap();
    assert_eq!(report.due, 2);
    assert_eq!(report.completed(), 2);
    assert!(engine.get_history("fresh", 10).unwrap().is_empty());
    assert_eq!(engine.get_history("stale", 10).unwrap().len(), 1);
    assert_eq!(engine.get_history("never", 10).unwrap().len(), 1);

    // Everything was just checked; the next pass has nothing to do.
    let report = engine.monitor().monitor_all_applications().await.unwrap();
    assert_eq!(report.due, 0);
}

#[tokio::test]
async fn application_pass_returns_a_record_per_due_application() {
    let mut fresh = test_app("fresh", 3);
    fresh.check_interval_secs = 3600;
    fresh.last_checked_at = Some(now());
    let apps = [test_app("app-a", 3), test_app("app-b", 3), test_app("app-c", 3), fresh];
    let (engine, rt) = setup(&apps);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Running));

    let records = engine.monitor_all_applications().await.unwrap();
    let mut owners: Vec<_> = records.iter().map(|r| r.target.clone()).collect();
    owners.sort_by(|a, b| a.id().cmp(b.id()));
    assert_eq!(
        owners,
        ["app-a", "app-b", "app-c"]
            .map(|id| CheckTarget::Application(id.to_string()))
            .to_vec()
    );
    for record in &records {
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(engine.get_history(record.target.id(), 10).unwrap(), vec![record.clone()]);
    }

    assert!(engine.monitor_all_applications().await.unwrap().is_empty());
}

#[tokio::test]
async fn host_pass_returns_a_record_per_due_host() {
    let (engine, rt) = setup(&[]);
    let mut down = test_host();
    down.id = "host-2".to_string();
    engine.store().put_host(&down).unwrap();
    rt.set_host_reachable("host-2", false);

    let mut records = engine.monitor_all_hosts().await.unwrap();
    records.sort_by(|a, b| a.target.id().cmp(b.target.id()));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].target, CheckTarget::Host("host-1".to_string()));
    assert_eq!(records[0].status, HealthStatus::Healthy);
    assert_eq!(records[1].target, CheckTarget::Host("host-2".to_string()));
    assert_eq!(records[1].status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn direct_check_returns_the_committed_record() {
    let (engine, rt) = setup(&[test_app("app-1", 3)]);
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Paused));

    let record = engine.check_application_health("app-1").await.unwrap();
    assert_eq!(record.status, HealthStatus::Degraded);
    assert_eq!(engine.get_history("app-1", 10).unwrap(), vec![record]);
}

#[tokio::test]
async fn concurrency_is_bounded_by_permits() {
    let apps: Vec<_> = (0..6).map(|i| test_app(&format!("app-{i}"), 5)).collect();
    let (engine, rt) = setup_with(
        &apps,
        MonitorConfig {
            max_concurrent_checks: 2,
            ..config()
        },
    );
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Running));
    rt.set_latency(Duration::from_millis(30));

    let report = engine.monitor().monitor_all_applications().await.unwrap();
    assert_eq!(report.completed(), 6);
    assert!(rt.max_concurrent_calls() <= 2);
}

#[tokio::test]
async fn shutdown_aborts_in_flight_pass() {
    let (tx, rx) = watch::channel(false);
    let (engine, rt) = setup(&[test_app("app-1", 1)]);
    let engine = engine.with_shutdown(rx);
    rt.set_latency(Duration::from_secs(3));

    let pass = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.monitor().monitor_all_applications().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(1), pass)
        .await
        .expect("pass stopped promptly")
        .unwrap()
        .unwrap();
    assert_eq!(report.completed(), 0);
    assert!(engine.get_history("app-1", 10).unwrap().is_empty());
    assert_eq!(failures(&engine, "app-1"), 0);
}

#[tokio::test]
async fn run_loop_checks_until_shutdown() {
    let mut app = test_app("app-1", 5);
    app.check_interval_secs = 0;
    let (engine, rt) = setup_with(
        &[app],
        MonitorConfig {
            tick_interval: "20ms".to_string(),
            ..config()
        },
    );
    rt.add_unit("host-1", RuntimeUnit::new("c1", "shop", UnitState::Running));

    let (tx, rx) = watch::channel(false);
    let run = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(rx).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("monitor stopped")
        .unwrap();

    assert!(engine.get_history("app-1", 100).unwrap().len() >= 2);
    assert_eq!(engine.get_host_history("host-1", 10).unwrap().len(), 1);
}

// ── Hosts ─────────────────────────────────────────────────────────

#[tokio::test]
async fn host_goes_offline_after_threshold_and_recovers() {
    let (engine, rt) = setup(&[]);
    rt.set_host_reachable("host-1", false);

    for _ in 0..2 {
        let record = engine.check_host_health("host-1").await.unwrap();
        assert_eq!(record.status, HealthStatus::Unhealthy);
    }
    let host = engine.store().get_host("host-1").unwrap().unwrap();
    assert_eq!(host.status, HostStatus::Online);

    engine.check_host_health("host-1").await.unwrap();
    let host = engine.store().get_host("host-1").unwrap().unwrap();
    assert_eq!(host.status, HostStatus::Offline);
    assert_eq!(host.consecutive_failures, 3);
    assert!(host.last_failure.is_some());

    rt.set_host_reachable("host-1", true);
    let record = engine.check_host_health("host-1").await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    let host = engine.store().get_host("host-1").unwrap().unwrap();
    assert_eq!(host.status, HostStatus::Online);
    assert_eq!(host.consecutive_failures, 0);

    let history = engine.get_host_history("host-1", 10).unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].status, HealthStatus::Healthy);
}

#[tokio::test]
async fn host_pass_respects_interval() {
    let (engine, _rt) = setup(&[]);

    let report = engine.monitor().monitor_all_hosts().await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.completed(), 1);

    let report = engine.monitor().monitor_all_hosts().await.unwrap();
    assert_eq!(report.due, 0);
}

#[tokio::test]
async fn missing_host_makes_runtime_probe_unknown() {
    let mut app = test_app("app-1", 1);
    app.host_id = "host-gone".to_string();
    let (engine, _rt) = setup(&[app]);

    let eval = engine.check_application("app-1").await.unwrap();
    assert_eq!(eval.record.status, HealthStatus::Unknown);
    assert!(eval.recovery.is_none());
}

// ── History and errors ────────────────────────────────────────────

#[tokio::test]
async fn uptime_over_trailing_window() {
    let (engine, _rt) = setup(&[test_app("app-1", 1)]);
    assert_eq!(engine.get_uptime("app-1", Duration::from_secs(3600)).unwrap(), 100.0);

    let t = now();
    for (status, age) in [
        (HealthStatus::Healthy, 40),
        (HealthStatus::Healthy, 30),
        (HealthStatus::Unhealthy, 20),
        (HealthStatus::Degraded, 10),
        (HealthStatus::Unhealthy, 7200),
    ] {
        engine
            .store()
            .append_health_check(HealthCheckRecord::new(
                CheckTarget::Application("app-1".to_string()),
                status,
                3,
                t - age,
            ))
            .unwrap();
    }
    assert_eq!(engine.get_uptime("app-1", Duration::from_secs(3600)).unwrap(), 50.0);
}

#[tokio::test]
async fn history_and_uptime_stay_with_their_own_application() {
    let (engine, _rt) = setup(&[test_app("web", 3), test_app("web:10", 3), test_app("web-2", 3)]);
    let t = now();
    let append = |id: &str, status: HealthStatus, age: u64| {
        engine
            .store()
            .append_health_check(HealthCheckRecord::new(
                CheckTarget::Application(id.to_string()),
                status,
                3,
                t - age,
            ))
            .unwrap();
    };
    append("web", HealthStatus::Healthy, 30);
    append("web:10", HealthStatus::Unhealthy, 20);
    append("web:10", HealthStatus::Unhealthy, 15);
    append("web-2", HealthStatus::Degraded, 10);

    let history = engine.get_history("web", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].target, CheckTarget::Application("web".to_string()));
    assert_eq!(engine.get_uptime("web", Duration::from_secs(3600)).unwrap(), 100.0);

    assert_eq!(engine.get_history("web:10", 10).unwrap().len(), 2);
    assert_eq!(engine.get_uptime("web:10", Duration::from_secs(3600)).unwrap(), 0.0);
}

#[tokio::test]
async fn unknown_ids_are_reported() {
    let (engine, _rt) = setup(&[]);
    assert!(matches!(
        engine.check_application_health("ghost").await,
        Err(HealthError::ApplicationNotFound(_))
    ));
    assert!(matches!(
        engine.check_host_health("ghost").await,
        Err(HealthError::HostNotFound(_))
    ));
    assert!(matches!(
        engine.attempt_recovery("ghost").await,
        Err(HealthError::ApplicationNotFound(_))
    ));
    assert!(matches!(
        engine.get_uptime("ghost", Duration::from_secs(60)),
        Err(HealthError::ApplicationNotFound(_))
    ));
}
