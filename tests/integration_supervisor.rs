#![cfg(unix)]

use clap::Parser;
use kv_sweep::cli::{Args, Command};
use kv_sweep::{
    ControlError, LocalSupervisor, ProcessSupervisor, ReadinessProbe, ServerSpec, ServerState,
    StartParams,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Runs `script` under `/bin/sh`; the script path takes the host slot, so
/// the usual `-k -v -n` arguments land in `$1..`.
fn script_spec(dir: &Path, name: &str, body: &str) -> ServerSpec {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    ServerSpec {
        executable: PathBuf::from("/bin/sh"),
        host: path.to_string_lossy().to_string(),
        params: StartParams {
            key_size: 16,
            value_size: 64,
            threads: 1,
        },
        extra_args: Vec::new(),
    }
}

fn liveness(ms: u64) -> ReadinessProbe {
    ReadinessProbe::Liveness {
        grace: Duration::from_millis(ms),
    }
}

const GRACEFUL: &str = "trap 'exit 0' INT\nwhile true; do sleep 0.05; done\n";
const STUBBORN: &str = "trap '' INT\nwhile true; do sleep 0.05; done\n";

#[tokio::test]
async fn sigint_stops_a_cooperative_server() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = LocalSupervisor::new(liveness(200));

    let mut handle = supervisor
        .spawn(script_spec(dir.path(), "graceful.sh", GRACEFUL))
        .await
        .unwrap();
    supervisor.await_ready(&mut handle).await.unwrap();
    assert_eq!(handle.state(), ServerState::Running);

    let exited = supervisor
        .request_shutdown(&mut handle, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(exited);
    assert_eq!(handle.state(), ServerState::Signaled);

    assert_eq!(supervisor.reap(&mut handle).await.unwrap(), Some(0));
    assert_eq!(handle.state(), ServerState::Reaped);
}

#[tokio::test]
async fn server_ignoring_sigint_is_force_killed() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = LocalSupervisor::new(liveness(200));

    let mut handle = supervisor
        .spawn(script_spec(dir.path(), "stubborn.sh", STUBBORN))
        .await
        .unwrap();
    supervisor.await_ready(&mut handle).await.unwrap();

    let exited = supervisor
        .request_shutdown(&mut handle, Duration::from_millis(300))
        .await
        .unwrap();
    assert!(!exited);

    supervisor.force_kill(&mut handle).await.unwrap();
    // Killed by signal: no exit code
    assert_eq!(supervisor.reap(&mut handle).await.unwrap(), None);
    assert!(handle.is_reaped());
}

#[tokio::test]
async fn shutdown_of_exited_server_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = LocalSupervisor::new(liveness(10));

    let mut handle = supervisor
        .spawn(script_spec(dir.path(), "short.sh", "sleep 0.1\nexit 0\n"))
        .await
        .unwrap();
    supervisor.await_ready(&mut handle).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let exited = supervisor
        .request_shutdown(&mut handle, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(exited);
    supervisor.force_kill(&mut handle).await.unwrap();

    assert_eq!(supervisor.reap(&mut handle).await.unwrap(), Some(0));
    assert_eq!(supervisor.reap(&mut handle).await.unwrap(), Some(0));
    assert!(supervisor
        .request_shutdown(&mut handle, Duration::from_millis(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn server_exiting_before_ready_is_a_spawn_error() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = LocalSupervisor::new(liveness(300));

    let mut handle = supervisor
        .spawn(script_spec(dir.path(), "crash.sh", "exit 3\n"))
        .await
        .unwrap();
    let err = supervisor.await_ready(&mut handle).await.unwrap_err();
    assert!(matches!(err, ControlError::Spawn { .. }), "got {}", err);

    assert_eq!(supervisor.reap(&mut handle).await.unwrap(), Some(3));
}

#[tokio::test]
async fn tcp_probe_waits_for_listener() {
    let service = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = service.local_addr().unwrap().to_string();

    let dir = TempDir::new().unwrap();
    let mut supervisor = LocalSupervisor::new(ReadinessProbe::tcp(address));

    let mut handle = supervisor
        .spawn(script_spec(dir.path(), "graceful.sh", GRACEFUL))
        .await
        .unwrap();
    supervisor.await_ready(&mut handle).await.unwrap();
    assert_eq!(handle.state(), ServerState::Running);

    supervisor
        .request_shutdown(&mut handle, Duration::from_secs(5))
        .await
        .unwrap();
    supervisor.reap(&mut handle).await.unwrap();
}

#[tokio::test]
async fn tcp_probe_gives_up_when_nothing_listens() {
    let address = {
        let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        unused.local_addr().unwrap().to_string()
    };

    let dir = TempDir::new().unwrap();
    let mut supervisor = LocalSupervisor::new(ReadinessProbe::TcpConnect {
        address,
        attempts: 3,
        interval: Duration::from_millis(20),
    });

    let mut handle = supervisor
        .spawn(script_spec(dir.path(), "graceful.sh", GRACEFUL))
        .await
        .unwrap();
    let err = supervisor.await_ready(&mut handle).await.unwrap_err();
    assert!(matches!(err, ControlError::Spawn { .. }), "got {}", err);

    supervisor.force_kill(&mut handle).await.unwrap();
    supervisor.reap(&mut handle).await.unwrap();
}

#[tokio::test]
async fn second_spawn_requires_reap() {
    let dir = TempDir::new().unwrap();
    let spec = script_spec(dir.path(), "graceful.sh", GRACEFUL);
    let mut supervisor = LocalSupervisor::new(liveness(50));

    let mut first = supervisor.spawn(spec.clone()).await.unwrap();
    let err = supervisor.spawn(spec.clone()).await.unwrap_err();
    assert!(matches!(err, ControlError::Process(_)));

    supervisor
        .request_shutdown(&mut first, Duration::from_secs(5))
        .await
        .unwrap();
    supervisor.reap(&mut first).await.unwrap();

    let mut second = supervisor.spawn(spec).await.unwrap();
    supervisor.force_kill(&mut second).await.unwrap();
    supervisor.reap(&mut second).await.unwrap();
}

#[tokio::test]
async fn default_probe_accepts_live_udp_server() {
    // The stock server serves its benchmark port over UDP only
    let service = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = service.local_addr().unwrap().port().to_string();

    let args = Args::parse_from(["kv-sweep", "controller", "127.0.0.1", "--service-port", &port]);
    let Command::Controller(controller) = args.command else {
        panic!("expected controller subcommand");
    };

    let dir = TempDir::new().unwrap();
    let mut supervisor = LocalSupervisor::new(controller.readiness_probe());
    let mut handle = supervisor
        .spawn(script_spec(dir.path(), "graceful.sh", GRACEFUL))
        .await
        .unwrap();
    supervisor.await_ready(&mut handle).await.unwrap();
    assert_eq!(handle.state(), ServerState::Running);

    supervisor
        .request_shutdown(&mut handle, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(supervisor.reap(&mut handle).await.unwrap(), Some(0));
}

#[tokio::test]
async fn tcp_probe_attempts_are_bounded_by_interval() {
    let dir = TempDir::new().unwrap();
    // Non-routable: connects either hang or fail fast depending on the host
    let mut supervisor = LocalSupervisor::new(ReadinessProbe::TcpConnect {
        address: "10.255.255.1:31850".to_string(),
        attempts: 3,
        interval: Duration::from_millis(50),
    });

    let mut handle = supervisor
        .spawn(script_spec(dir.path(), "graceful.sh", GRACEFUL))
        .await
        .unwrap();
    let started = Instant::now();
    let err = supervisor.await_ready(&mut handle).await.unwrap_err();
    assert!(matches!(err, ControlError::Spawn { .. }), "got {}", err);
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());

    supervisor.force_kill(&mut handle).await.unwrap();
    supervisor.reap(&mut handle).await.unwrap();
}
