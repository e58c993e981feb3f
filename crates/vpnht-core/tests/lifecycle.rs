//! End-to-end lifecycle tests over real listeners.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use pretty_assertions::assert_eq;
use tokio::sync::{oneshot, watch};

use vpnht_config::TickerPolicy;
use vpnht_core::builtin::InMemorySessions;
use vpnht_core::ipc::{DefaultRoutes, TransportError};
use vpnht_core::pidfile::PidFileError;
use vpnht_core::{
    BestEffort, BoundAddress, ControlClient, Daemon, LifecyclePhase, RunningDaemon, ServiceError,
    ShutdownReport, TeardownStep, Termination,
};
use vpnht_test_utils::{
    FakeCollaborators, RecordingSession, RecordingWatcher, StopBehavior, TestEnv,
};

fn default_routes() -> DefaultRoutes {
    DefaultRoutes::new(Arc::new(InMemorySessions::new()), false)
}

/// Serve in the background; the returned sender triggers shutdown.
fn serve(
    running: RunningDaemon,
) -> (
    oneshot::Sender<Termination>,
    tokio::task::JoinHandle<Result<ShutdownReport, ServiceError>>,
) {
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(running.serve_until(async move {
        rx.await.unwrap_or(Termination::Terminate)
    }));
    (tx, task)
}

#[cfg(unix)]
#[test_log::test(tokio::test)]
async fn test_full_lifecycle_over_domain_socket() {
    let env = TestEnv::new();
    let config = env.builder().unix().build_arc();
    let fakes = FakeCollaborators::new().routes(default_routes());
    let task = fakes.task();

    let running = Daemon::new(config, fakes.build()).start().await.unwrap();
    let socket = env.join("vpnht.sock");
    assert_eq!(running.endpoint(), &BoundAddress::DomainSocket(socket.clone()));
    assert!(socket.exists());
    assert!(env.join("vpnht.pid").exists());

    let client = ControlClient::new(running.endpoint().clone());
    let health = client.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.pid, std::process::id());

    let (stop, served) = serve(running);
    stop.send(Termination::Interrupt).unwrap();
    let report = served.await.unwrap().unwrap();

    assert_eq!(report.signal, Termination::Interrupt);
    assert!(report.is_clean(), "unexpected recoveries: {:?}", report.steps);
    assert!(!socket.exists());
    assert!(!env.join("vpnht.pid").exists());
    assert!(task.started());
    assert!(task.cancelled());
}

#[test_log::test(tokio::test)]
async fn test_full_lifecycle_over_tcp() {
    let env = TestEnv::new();
    let config = env.builder().tcp().build_arc();
    let fakes = FakeCollaborators::new().routes(default_routes());

    let running = Daemon::new(config, fakes.build()).start().await.unwrap();
    let addr = match running.endpoint() {
        BoundAddress::LoopbackTcp(addr) => *addr,
        other => panic!("expected TCP endpoint, got {other}"),
    };
    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0);

    let client = ControlClient::new(running.endpoint().clone());
    let sessions = client.sessions().await.unwrap();
    assert_eq!(sessions.total, 0);

    let (stop, served) = serve(running);
    stop.send(Termination::Terminate).unwrap();
    let report = served.await.unwrap().unwrap();
    assert_eq!(report.outcome(TeardownStep::RemoveEndpoint), Some(&BestEffort::Done));

    // The port is released once shutdown completes.
    assert!(std::net::TcpListener::bind(addr).is_ok());
}

#[tokio::test]
async fn test_every_session_stopped_once_despite_failures() {
    let env = TestEnv::new();
    let config = env.builder().tcp().build_arc();

    let sessions = vec![
        Arc::new(RecordingSession::new("home", StopBehavior::Succeed)),
        Arc::new(RecordingSession::new("office", StopBehavior::Fail)),
        Arc::new(RecordingSession::new("travel", StopBehavior::Panic)),
        Arc::new(RecordingSession::new("backup", StopBehavior::Succeed)),
    ];
    let fakes = sessions
        .iter()
        .fold(FakeCollaborators::new(), |f, s| f.session(Arc::clone(s)));

    let running = Daemon::new(config, fakes.build()).start().await.unwrap();
    let (stop, served) = serve(running);
    stop.send(Termination::Terminate).unwrap();
    let report = served.await.unwrap().unwrap();

    for session in &sessions {
        assert_eq!(session.stop_count(), 1);
    }
    assert_eq!(report.sessions_total, 4);
    assert_eq!(report.sessions_failed, 2);
    assert_eq!(
        report.outcome(TeardownStep::StopSessions),
        Some(&BestEffort::recovered("2 of 4 sessions failed to stop"))
    );
    // A failing session never keeps the PID file around.
    assert_eq!(report.outcome(TeardownStep::ReleasePidFile), Some(&BestEffort::Done));
}

#[cfg(unix)]
#[tokio::test]
async fn test_endpoint_closed_before_sessions_stop() {
    let env = TestEnv::new();
    let config = env.builder().unix().build_arc();
    let socket = env.join("vpnht.sock");

    let daemon_phases: Arc<Mutex<Option<watch::Receiver<LifecyclePhase>>>> =
        Arc::new(Mutex::new(None));
    let socket_gone = Arc::new(AtomicBool::new(false));
    let phase_at_stop = Arc::new(Mutex::new(None));

    let session = {
        let socket = socket.clone();
        let socket_gone = Arc::clone(&socket_gone);
        let daemon_phases = Arc::clone(&daemon_phases);
        let phase_at_stop = Arc::clone(&phase_at_stop);
        Arc::new(
            RecordingSession::new("home", StopBehavior::Succeed).with_hook(move || {
                socket_gone.store(!socket.exists(), Ordering::SeqCst);
                if let Some(rx) = daemon_phases.lock().unwrap().as_ref() {
                    *phase_at_stop.lock().unwrap() = Some(*rx.borrow());
                }
            }),
        )
    };

    let daemon = Daemon::new(config, FakeCollaborators::new().session(session.clone()).build());
    *daemon_phases.lock().unwrap() = Some(daemon.phases());
    let running = daemon.start().await.unwrap();
    assert!(socket.exists());

    let (stop, served) = serve(running);
    stop.send(Termination::Terminate).unwrap();
    served.await.unwrap().unwrap();

    assert_eq!(session.stop_count(), 1);
    assert!(socket_gone.load(Ordering::SeqCst));
    assert_eq!(
        *phase_at_stop.lock().unwrap(),
        Some(LifecyclePhase::EndpointClosed)
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_watcher_starts_after_routes_and_before_bind() {
    let env = TestEnv::new();
    let config = env.builder().unix().build_arc();
    let socket = env.join("vpnht.sock");
    let pid_path = env.join("vpnht.pid");

    let registered = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(Mutex::new(None));

    let routes = {
        let registered = Arc::clone(&registered);
        move |router: Router| {
            registered.store(true, Ordering::SeqCst);
            router
        }
    };
    let watcher = {
        let registered = Arc::clone(&registered);
        let seen = Arc::clone(&seen);
        let socket = socket.clone();
        Arc::new(RecordingWatcher::new().with_hook(move || {
            *seen.lock().unwrap() = Some((
                registered.load(Ordering::SeqCst),
                pid_path.exists(),
                socket.exists(),
            ));
        }))
    };

    let fakes = FakeCollaborators::new()
        .routes(routes)
        .watcher(Arc::clone(&watcher));
    let task = fakes.task();
    let running = Daemon::new(config, fakes.build()).start().await.unwrap();

    // Routes registered and PID file held, endpoint not bound yet.
    assert_eq!(*seen.lock().unwrap(), Some((true, true, false)));
    assert!(watcher.started());
    assert!(!watcher.cancelled());

    let (stop, served) = serve(running);
    stop.send(Termination::Terminate).unwrap();
    served.await.unwrap().unwrap();

    assert!(watcher.cancelled());
    assert!(task.cancelled());
}

#[tokio::test]
async fn test_detached_ticker_survives_shutdown() {
    let env = TestEnv::new();
    let config = env
        .builder()
        .tcp()
        .ticker_policy(TickerPolicy::Detach)
        .build_arc();
    let fakes = FakeCollaborators::new();
    let task = fakes.task();

    let running = Daemon::new(config, fakes.build()).start().await.unwrap();
    let (stop, served) = serve(running);
    tokio::time::sleep(Duration::from_millis(20)).await;
    stop.send(Termination::Terminate).unwrap();
    let report = served.await.unwrap().unwrap();

    assert_eq!(report.outcome(TeardownStep::StopTicker), Some(&BestEffort::Done));
    assert!(task.started());
    assert!(!task.cancelled());
}

#[tokio::test]
async fn test_idle_shutdown_within_grace_budget() {
    let env = TestEnv::new();
    let config = env.builder().tcp().production_windows().build_arc();
    let budget = config.shutdown.total_budget();

    let running = Daemon::new(config, FakeCollaborators::new().build())
        .start()
        .await
        .unwrap();
    let (stop, served) = serve(running);

    let started = std::time::Instant::now();
    stop.send(Termination::Interrupt).unwrap();
    let report = served.await.unwrap().unwrap();
    let wall = started.elapsed();

    // Both fixed waits always elapse; the server window only if needed.
    assert!(report.elapsed >= Duration::from_millis(1000));
    assert!(wall < budget + Duration::from_millis(500), "took {wall:?}");
}

#[test_log::test(tokio::test)]
async fn test_slow_request_forced_closed_after_window() {
    let env = TestEnv::new();
    let config = env.builder().tcp().server_window_ms(200).build_arc();

    let routes = |router: Router| {
        router.route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "finally"
            }),
        )
    };
    let running = Daemon::new(config, FakeCollaborators::new().routes(routes).build())
        .start()
        .await
        .unwrap();

    let client = ControlClient::new(running.endpoint().clone());
    let in_flight = tokio::spawn(async move { client.get("/slow").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (stop, served) = serve(running);
    stop.send(Termination::Terminate).unwrap();
    let report = served.await.unwrap().unwrap();

    assert_eq!(
        report.outcome(TeardownStep::StopServer),
        Some(&BestEffort::recovered("forced close after shutdown window"))
    );
    let response = tokio::time::timeout(Duration::from_secs(2), in_flight)
        .await
        .unwrap()
        .unwrap();
    assert!(response.is_err());
}

#[tokio::test]
async fn test_bind_failure_stops_before_server_and_ticker() {
    let env = TestEnv::new();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let config = env.builder().tcp().tcp_port(port).build_arc();

    let watcher = Arc::new(RecordingWatcher::new());
    let fakes = FakeCollaborators::new().watcher(Arc::clone(&watcher));
    let task = fakes.task();
    let err = Daemon::new(config, fakes.build())
        .start()
        .await
        .err()
        .unwrap();

    match err {
        ServiceError::Transport(TransportError::Bind { source, .. }) => {
            assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse)
        }
        other => panic!("expected bind error, got {other:?}"),
    }
    tokio::task::yield_now().await;
    assert!(!task.started());
    assert!(watcher.cancelled());
    assert!(!env.join("vpnht.pid").exists());
}

#[tokio::test]
async fn test_auth_failure_is_fatal() {
    let env = TestEnv::new();
    let config = env.builder().unix().build_arc();
    let fakes = FakeCollaborators::new().failing_auth();
    let task = fakes.task();

    let err = Daemon::new(config, fakes.build())
        .start()
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ServiceError::Auth(_)));
    assert!(!task.started());
    assert!(!env.join("vpnht.sock").exists());
    assert!(!env.join("vpnht.pid").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_stale_socket_artifact_replaced() {
    let env = TestEnv::new();
    let socket = env.join("vpnht.sock");
    std::fs::write(&socket, "left over from a crash").unwrap();

    let config = env.builder().unix().build_arc();
    let running = Daemon::new(
        config,
        FakeCollaborators::new().routes(default_routes()).build(),
    )
    .start()
    .await
    .unwrap();

    let client = ControlClient::new(running.endpoint().clone());
    assert_eq!(client.health().await.unwrap().status, "ok");

    let (stop, served) = serve(running);
    stop.send(Termination::Terminate).unwrap();
    served.await.unwrap().unwrap();
    assert!(!socket.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_second_instance_refused() {
    let env = TestEnv::new();
    let mut holder = std::process::Command::new("sleep").arg("5").spawn().unwrap();
    std::fs::write(env.join("vpnht.pid"), holder.id().to_string()).unwrap();

    let config = env.builder().tcp().build_arc();
    let result = Daemon::new(config, FakeCollaborators::new().build())
        .start()
        .await;
    holder.kill().ok();
    holder.wait().ok();

    match result {
        Err(ServiceError::PidFile(PidFileError::AlreadyRunning { pid, .. })) => {
            assert_eq!(pid, holder.id())
        }
        Err(other) => panic!("expected AlreadyRunning, got {other:?}"),
        Ok(_) => panic!("second instance started"),
    }
}
