//! # Process Supervisor
//!
//! Owns the lifecycle of the server-under-test on the Controller host.
//! Exactly one server process exists at a time; its handle moves through
//!
//! ```text
//! Spawned ──await_ready──► Running ──request_shutdown──► Signaled ──reap──► Reaped
//! ```
//!
//! The Controller loop only talks to the `ProcessSupervisor` trait, so the
//! concrete mechanism (process creation API, signal delivery) can be swapped
//! per platform or replaced by a test double.
//!
//! ## Readiness
//!
//! A freshly spawned server is not announced as running until the
//! configured `ReadinessProbe` succeeds. `Liveness` (the Controller default)
//! waits a grace period and confirms the process did not exit; it fits
//! servers whose service port is not TCP. `TcpConnect` retries a connection
//! to the service port, each attempt bounded by the retry interval. Either
//! probe fails fast if the process dies first.
//!
//! ## Benign races
//!
//! A server may end on its own (for example when its benchmark duration
//! elapses) before the shutdown request arrives. `request_shutdown` and
//! `reap` treat that as the normal path, not as an error.

use crate::error::ControlError;
use crate::protocol::StartParams;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

/// Everything needed to launch one server-under-test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub executable: PathBuf,
    /// Positional host argument the server binds to
    pub host: String,
    pub params: StartParams,
    /// Appended verbatim after the generated arguments
    pub extra_args: Vec<String>,
}

impl ServerSpec {
    /// Argument vector: `<host> -k <key> -v <value> -n <threads> [extra...]`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.host.clone(),
            "-k".to_string(),
            self.params.key_size.to_string(),
            "-v".to_string(),
            self.params.value_size.to_string(),
            "-n".to_string(),
            self.params.threads.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Lifecycle state of a server process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Spawned,
    Running,
    Signaled,
    Reaped,
}

/// Controller-owned handle to a spawned server. Never leaves the Controller.
#[derive(Debug)]
pub struct ServerHandle {
    pid: u32,
    spec: ServerSpec,
    state: ServerState,
    exit_code: Option<i32>,
    child: Option<Child>,
}

impl ServerHandle {
    /// A handle without an attached OS child, for supervisors that manage
    /// processes through some other mechanism.
    pub fn detached(pid: u32, spec: ServerSpec) -> Self {
        Self {
            pid,
            spec,
            state: ServerState::Spawned,
            exit_code: None,
            child: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Exit code recorded when the process ended, if it ended normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_reaped(&self) -> bool {
        self.state == ServerState::Reaped
    }

    /// Advance the lifecycle state.
    pub fn mark(&mut self, state: ServerState) {
        self.state = state;
    }

    /// Record the terminal state.
    pub fn mark_reaped(&mut self, exit_code: Option<i32>) {
        self.exit_code = exit_code;
        self.state = ServerState::Reaped;
    }
}

/// How the supervisor decides a spawned server is ready for clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// Retry a TCP connect to the service address
    TcpConnect {
        address: String,
        attempts: u32,
        interval: Duration,
    },
    /// Wait, then confirm the process is still alive
    Liveness { grace: Duration },
}

impl ReadinessProbe {
    /// TCP connect probe with the default attempt budget.
    pub fn tcp(address: impl Into<String>) -> Self {
        ReadinessProbe::TcpConnect {
            address: address.into(),
            attempts: crate::defaults::PROBE_ATTEMPTS,
            interval: crate::defaults::PROBE_INTERVAL,
        }
    }
}

/// Spawn / readiness / shutdown / reap lifecycle of one server process.
#[async_trait]
pub trait ProcessSupervisor: Send {
    /// Launch the server. Fails if a previous server was not reaped.
    async fn spawn(&mut self, spec: ServerSpec) -> Result<ServerHandle, ControlError>;

    /// Block until the server accepts clients or fail with `Spawn`.
    async fn await_ready(&mut self, handle: &mut ServerHandle) -> Result<(), ControlError>;

    /// Ask the server to stop and wait up to `grace`.
    ///
    /// Returns whether the process has exited. A process that already
    /// exited is not an error.
    async fn request_shutdown(
        &mut self,
        handle: &mut ServerHandle,
        grace: Duration,
    ) -> Result<bool, ControlError>;

    /// Forcefully terminate a server that ignored the shutdown request.
    async fn force_kill(&mut self, handle: &mut ServerHandle) -> Result<(), ControlError>;

    /// Wait for the process to exit and release it. Idempotent.
    async fn reap(&mut self, handle: &mut ServerHandle) -> Result<Option<i32>, ControlError>;
}

/// Supervisor backed by local child processes
pub struct LocalSupervisor {
    probe: ReadinessProbe,
    live_pid: Option<u32>,
}

impl LocalSupervisor {
    pub fn new(probe: ReadinessProbe) -> Self {
        Self {
            probe,
            live_pid: None,
        }
    }

    pub fn probe(&self) -> &ReadinessProbe {
        &self.probe
    }

    fn process_error(pid: u32, what: &str, e: std::io::Error) -> ControlError {
        ControlError::Process(format!("{} for server {}: {}", what, pid, e))
    }

    /// Fail with `Spawn` if the server already exited.
    fn ensure_alive(handle: &mut ServerHandle) -> Result<(), ControlError> {
        let pid = handle.pid;
        if let Some(child) = handle.child.as_mut() {
            let status = child
                .try_wait()
                .map_err(|e| Self::process_error(pid, "failed to poll", e))?;
            if let Some(status) = status {
                handle.exit_code = status.code();
                return Err(ControlError::Spawn {
                    executable: handle.spec.executable.clone(),
                    reason: format!("server exited before becoming ready ({})", status),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn spawn(&mut self, spec: ServerSpec) -> Result<ServerHandle, ControlError> {
        if let Some(pid) = self.live_pid {
            return Err(ControlError::Process(format!(
                "cannot spawn a new server while server {} has not been reaped",
                pid
            )));
        }

        let args = spec.args();
        debug!(
            "Spawning server binary: {} {}",
            spec.executable.display(),
            args.join(" ")
        );

        let mut cmd = Command::new(&spec.executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| ControlError::Spawn {
            executable: spec.executable.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| ControlError::Spawn {
            executable: spec.executable.clone(),
            reason: "process exited before its pid could be read".to_string(),
        })?;

        info!("Spawned server pid {} ({:?})", pid, spec.params);
        self.live_pid = Some(pid);

        Ok(ServerHandle {
            pid,
            spec,
            state: ServerState::Spawned,
            exit_code: None,
            child: Some(child),
        })
    }

    async fn await_ready(&mut self, handle: &mut ServerHandle) -> Result<(), ControlError> {
        match self.probe.clone() {
            ReadinessProbe::TcpConnect {
                address,
                attempts,
                interval,
            } => {
                for attempt in 1..=attempts {
                    Self::ensure_alive(handle)?;
                    match timeout(interval, TcpStream::connect(address.as_str())).await {
                        Ok(Ok(_)) => {
                            debug!(
                                "Server {} accepting on {} after {} attempt(s)",
                                handle.pid, address, attempt
                            );
                            handle.state = ServerState::Running;
                            return Ok(());
                        }
                        Ok(Err(e)) => {
                            trace!("Probe {}/{} to {} failed: {}", attempt, attempts, address, e);
                            sleep(interval).await;
                        }
                        Err(_) => {
                            trace!("Probe {}/{} to {} timed out", attempt, attempts, address);
                        }
                    }
                }
                Err(ControlError::Spawn {
                    executable: handle.spec.executable.clone(),
                    reason: format!(
                        "server not accepting connections on {} after {} attempts",
                        address, attempts
                    ),
                })
            }
            ReadinessProbe::Liveness { grace } => {
                sleep(grace).await;
                Self::ensure_alive(handle)?;
                debug!("Server {} alive after {:?}", handle.pid, grace);
                handle.state = ServerState::Running;
                Ok(())
            }
        }
    }

    async fn request_shutdown(
        &mut self,
        handle: &mut ServerHandle,
        grace: Duration,
    ) -> Result<bool, ControlError> {
        if handle.is_reaped() {
            return Ok(true);
        }
        let pid = handle.pid;
        let child = handle.child.as_mut().ok_or_else(|| {
            ControlError::Process(format!("server {} is not owned by this supervisor", pid))
        })?;

        let status = child
            .try_wait()
            .map_err(|e| Self::process_error(pid, "failed to poll", e))?;
        if let Some(status) = status {
            debug!("Server {} already terminated ({})", pid, status);
            handle.exit_code = status.code();
            return Ok(true);
        }

        send_interrupt(child)?;
        handle.state = ServerState::Signaled;
        debug!("Sent SIGINT to server {}", pid);

        match timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(|e| Self::process_error(pid, "failed to wait", e))?;
                handle.exit_code = status.code();
                Ok(true)
            }
            Err(_) => {
                warn!("Server {} still running {:?} after SIGINT", pid, grace);
                Ok(false)
            }
        }
    }

    async fn force_kill(&mut self, handle: &mut ServerHandle) -> Result<(), ControlError> {
        let pid = handle.pid;
        let Some(child) = handle.child.as_mut() else {
            return Ok(());
        };
        let status = child
            .try_wait()
            .map_err(|e| Self::process_error(pid, "failed to poll", e))?;
        if status.is_some() {
            return Ok(());
        }
        match child.start_kill() {
            Ok(()) => {
                warn!("Killed server {}", pid);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(Self::process_error(pid, "failed to kill", e)),
        }
    }

    async fn reap(&mut self, handle: &mut ServerHandle) -> Result<Option<i32>, ControlError> {
        if handle.is_reaped() {
            return Ok(handle.exit_code);
        }
        let pid = handle.pid;
        if let Some(mut child) = handle.child.take() {
            let status = child
                .wait()
                .await
                .map_err(|e| Self::process_error(pid, "failed to reap", e))?;
            handle.exit_code = status.code();
            debug!("Reaped server {} ({})", pid, status);
        }
        handle.state = ServerState::Reaped;
        if self.live_pid == Some(pid) {
            self.live_pid = None;
        }
        Ok(handle.exit_code)
    }
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child) -> Result<(), ControlError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!("Server {} vanished before SIGINT", pid);
            Ok(())
        }
        Err(e) => Err(ControlError::Process(format!(
            "failed to deliver SIGINT to server {}: {}",
            pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) -> Result<(), ControlError> {
    // No graceful interrupt for arbitrary processes here; terminate instead
    match child.start_kill() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(ControlError::Process(format!("failed to stop server: {}", e))),
    }
}
