//! # Controller Loop
//!
//! Runs on the server host. Consumes control messages from the Driver,
//! drives the process supervisor, and answers with acknowledgements.
//!
//! ```text
//!          StartParams                     ClientTerminated
//!   Idle ──────────────► ServerStarting ──► ServerRunning ──────────────► ServerStopping ──► Idle
//!    │  spawn + readiness probe, send ServerRunning        SIGINT + reap, send Ready
//!    │ End
//!    ▼
//!  Terminated
//! ```
//!
//! Any message outside its expected state is a protocol error: the session
//! ends rather than guessing intent. On every error path the live server is
//! torn down and reaped, the Driver is told why with a best-effort `Abort`
//! (unless the connection itself is gone), and the channel is closed.

use crate::channel::{ControlChannel, ControlListener};
use crate::error::ControlError;
use crate::protocol::{ControlMessage, StartParams};
use crate::supervisor::{ProcessSupervisor, ServerHandle, ServerSpec};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Controller-side configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Server-under-test executable
    pub server_executable: PathBuf,
    /// Host argument handed to the server
    pub server_host: String,
    /// Extra arguments appended to every server invocation
    pub server_args: Vec<String>,
    /// Pause between `ClientTerminated` and the shutdown signal
    pub shutdown_delay: Duration,
    /// How long a signalled server may take to exit before it is killed
    pub shutdown_grace: Duration,
}

impl ControllerConfig {
    pub fn new(server_executable: impl Into<PathBuf>, server_host: impl Into<String>) -> Self {
        Self {
            server_executable: server_executable.into(),
            server_host: server_host.into(),
            server_args: Vec::new(),
            shutdown_delay: crate::defaults::SHUTDOWN_DELAY,
            shutdown_grace: crate::defaults::SHUTDOWN_GRACE,
        }
    }

    fn server_spec(&self, params: StartParams) -> ServerSpec {
        ServerSpec {
            executable: self.server_executable.clone(),
            host: self.server_host.clone(),
            params,
            extra_args: self.server_args.clone(),
        }
    }
}

/// Controller state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    ServerStarting,
    ServerRunning,
    ServerStopping,
    Terminated,
}

/// What a finished session did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub servers_started: usize,
    pub servers_killed: usize,
}

/// The Controller loop, generic over how server processes are managed.
pub struct Controller<S: ProcessSupervisor> {
    config: ControllerConfig,
    supervisor: S,
    state: ControllerState,
    current: Option<ServerHandle>,
    stats: ControllerStats,
}

impl<S: ProcessSupervisor> Controller<S> {
    pub fn new(config: ControllerConfig, supervisor: S) -> Self {
        Self {
            config,
            supervisor,
            state: ControllerState::Idle,
            current: None,
            stats: ControllerStats::default(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    /// Accept exactly one Driver connection and run its session.
    pub async fn serve(&mut self, listener: &ControlListener) -> Result<ControllerStats, ControlError> {
        info!(
            "Controller waiting for driver on {}",
            listener.local_addr()?
        );
        let mut channel = listener.accept().await?;
        self.run(&mut channel).await
    }

    /// Run one session to completion. The channel is closed on return.
    pub async fn run<C: ControlChannel + ?Sized>(
        &mut self,
        channel: &mut C,
    ) -> Result<ControllerStats, ControlError> {
        info!("Controller session started with {}", channel.peer());

        let result = self.process_messages(channel).await;

        if let Err(ref e) = result {
            error!("Controller session failed: {}", e);
            self.teardown().await;
            if !e.is_transport() {
                let abort = ControlMessage::Abort {
                    reason: e.to_string(),
                };
                if let Err(send_err) = channel.send(&abort).await {
                    debug!("Could not deliver abort to driver: {}", send_err);
                }
            }
        }

        if let Err(e) = channel.close().await {
            debug!("Error closing control channel: {}", e);
        }

        result.map(|()| {
            info!(
                "Controller session finished: {} server(s) started",
                self.stats.servers_started
            );
            self.stats.clone()
        })
    }

    async fn process_messages<C: ControlChannel + ?Sized>(
        &mut self,
        channel: &mut C,
    ) -> Result<(), ControlError> {
        loop {
            let message = channel.receive().await?;
            debug!("Controller received {} in state {:?}", message, self.state);

            match (self.state, message) {
                (ControllerState::Idle, ControlMessage::StartParams(params)) => {
                    self.start_server(params).await?;
                    channel.send(&ControlMessage::ServerRunning).await?;
                }
                (ControllerState::ServerRunning, ControlMessage::ClientTerminated) => {
                    self.stop_server().await?;
                    channel.send(&ControlMessage::Ready).await?;
                }
                (ControllerState::Idle, ControlMessage::End) => {
                    self.state = ControllerState::Terminated;
                    return Ok(());
                }
                (state, message) => {
                    return Err(ControlError::Protocol(format!(
                        "unexpected {} while {:?}",
                        message, state
                    )));
                }
            }
        }
    }

    async fn start_server(&mut self, params: StartParams) -> Result<(), ControlError> {
        self.state = ControllerState::ServerStarting;
        info!(
            "Starting server: key size {}, value size {}, {} thread(s)",
            params.key_size, params.value_size, params.threads
        );

        let handle = self.supervisor.spawn(self.config.server_spec(params)).await?;
        let handle = self.current.insert(handle);
        self.stats.servers_started += 1;

        self.supervisor.await_ready(handle).await?;

        self.state = ControllerState::ServerRunning;
        info!("Server {} running", handle.pid());
        Ok(())
    }

    async fn stop_server(&mut self) -> Result<(), ControlError> {
        self.state = ControllerState::ServerStopping;

        if !self.config.shutdown_delay.is_zero() {
            sleep(self.config.shutdown_delay).await;
        }

        let mut handle = self
            .current
            .take()
            .ok_or_else(|| ControlError::Process("no server to stop".to_string()))?;
        let result = self.shutdown_and_reap(&mut handle).await;
        if result.is_err() && !handle.is_reaped() {
            self.current = Some(handle);
        }
        result?;

        self.state = ControllerState::Idle;
        Ok(())
    }

    async fn shutdown_and_reap(&mut self, handle: &mut ServerHandle) -> Result<(), ControlError> {
        let exited = self
            .supervisor
            .request_shutdown(handle, self.config.shutdown_grace)
            .await?;
        if !exited {
            warn!(
                "Server {} ignored SIGINT for {:?}, killing it",
                handle.pid(),
                self.config.shutdown_grace
            );
            self.supervisor.force_kill(handle).await?;
            self.stats.servers_killed += 1;
        }

        let exit_code = self.supervisor.reap(handle).await?;
        info!("Server {} stopped (exit code {:?})", handle.pid(), exit_code);
        Ok(())
    }

    /// Best-effort cleanup of the live server on an error path.
    async fn teardown(&mut self) {
        if let Some(mut handle) = self.current.take() {
            warn!("Tearing down server {} after session failure", handle.pid());
            if let Err(e) = self.shutdown_and_reap(&mut handle).await {
                error!("Failed to tear down server {}: {}", handle.pid(), e);
                // kill_on_drop is the last line once the handle is dropped
            }
        }
        self.state = ControllerState::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::protocol::WireFormat;
    use crate::supervisor::ServerState;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records every supervisor call instead of touching processes.
    #[derive(Default, Clone)]
    struct FakeSupervisor {
        calls: Arc<Mutex<Vec<String>>>,
        fail_spawn: bool,
        ignore_interrupt: bool,
    }

    impl FakeSupervisor {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ProcessSupervisor for FakeSupervisor {
        async fn spawn(&mut self, spec: ServerSpec) -> Result<ServerHandle, ControlError> {
            self.log(format!("spawn {}", spec.params.value_size));
            if self.fail_spawn {
                return Err(ControlError::Spawn {
                    executable: spec.executable,
                    reason: "no such file".to_string(),
                });
            }
            Ok(ServerHandle::detached(100, spec))
        }

        async fn await_ready(&mut self, handle: &mut ServerHandle) -> Result<(), ControlError> {
            self.log("ready".to_string());
            handle.mark(ServerState::Running);
            Ok(())
        }

        async fn request_shutdown(
            &mut self,
            handle: &mut ServerHandle,
            _grace: Duration,
        ) -> Result<bool, ControlError> {
            self.log("shutdown".to_string());
            handle.mark(ServerState::Signaled);
            Ok(!self.ignore_interrupt)
        }

        async fn force_kill(&mut self, _handle: &mut ServerHandle) -> Result<(), ControlError> {
            self.log("kill".to_string());
            Ok(())
        }

        async fn reap(&mut self, handle: &mut ServerHandle) -> Result<Option<i32>, ControlError> {
            self.log("reap".to_string());
            handle.mark_reaped(Some(0));
            Ok(Some(0))
        }
    }

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig::new("./server_perf_test", "127.0.0.1");
        config.shutdown_delay = Duration::ZERO;
        config.shutdown_grace = Duration::from_millis(10);
        config
    }

    fn start(value_size: usize) -> ControlMessage {
        ControlMessage::StartParams(StartParams {
            key_size: 8,
            value_size,
            threads: 1,
        })
    }

    #[tokio::test]
    async fn test_full_cycle_then_end() {
        let supervisor = FakeSupervisor::default();
        let mut controller = Controller::new(config(), supervisor.clone());
        let (mut driver, mut remote) = MemoryChannel::pair(WireFormat::Legacy);

        let session = tokio::spawn(async move {
            let stats = controller.run(&mut remote).await;
            (stats, controller.state())
        });

        driver.send(&start(64)).await.unwrap();
        assert_eq!(driver.receive().await.unwrap(), ControlMessage::ServerRunning);
        driver.send(&ControlMessage::ClientTerminated).await.unwrap();
        assert_eq!(driver.receive().await.unwrap(), ControlMessage::Ready);
        driver.send(&ControlMessage::End).await.unwrap();

        let (stats, state) = session.await.unwrap();
        assert_eq!(stats.unwrap().servers_started, 1);
        assert_eq!(state, ControllerState::Terminated);
        assert_eq!(supervisor.calls(), vec!["spawn 64", "ready", "shutdown", "reap"]);

        // Controller closed its side
        assert!(driver.receive().await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_client_terminated_while_idle_is_protocol_error() {
        let supervisor = FakeSupervisor::default();
        let mut controller = Controller::new(config(), supervisor.clone());
        let (mut driver, mut remote) = MemoryChannel::pair(WireFormat::Legacy);

        driver.send(&ControlMessage::ClientTerminated).await.unwrap();
        let err = controller.run(&mut remote).await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));

        // The driver is told why instead of being left waiting
        assert!(matches!(
            driver.receive().await.unwrap(),
            ControlMessage::Abort { .. }
        ));
        assert!(supervisor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_start_while_running_tears_down_server() {
        let supervisor = FakeSupervisor::default();
        let mut controller = Controller::new(config(), supervisor.clone());
        let (mut driver, mut remote) = MemoryChannel::pair(WireFormat::Tagged);

        driver.send(&start(64)).await.unwrap();
        driver.send(&start(256)).await.unwrap();

        let err = controller.run(&mut remote).await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));
        assert_eq!(driver.receive().await.unwrap(), ControlMessage::ServerRunning);
        assert!(matches!(
            driver.receive().await.unwrap(),
            ControlMessage::Abort { .. }
        ));
        // Never two ServerRunning without a Ready, and no leaked server
        assert_eq!(supervisor.calls(), vec!["spawn 64", "ready", "shutdown", "reap"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_replies_with_abort() {
        let supervisor = FakeSupervisor {
            fail_spawn: true,
            ..Default::default()
        };
        let mut controller = Controller::new(config(), supervisor);
        let (mut driver, mut remote) = MemoryChannel::pair(WireFormat::Legacy);

        driver.send(&start(64)).await.unwrap();
        let err = controller.run(&mut remote).await.unwrap_err();
        assert!(matches!(err, ControlError::Spawn { .. }));

        match driver.receive().await.unwrap() {
            ControlMessage::Abort { reason } => assert!(reason.contains("no such file")),
            other => panic!("expected abort, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_unresponsive_server_is_killed() {
        let supervisor = FakeSupervisor {
            ignore_interrupt: true,
            ..Default::default()
        };
        let mut controller = Controller::new(config(), supervisor.clone());
        let (mut driver, mut remote) = MemoryChannel::pair(WireFormat::Legacy);

        driver.send(&start(64)).await.unwrap();
        driver.send(&ControlMessage::ClientTerminated).await.unwrap();
        driver.send(&ControlMessage::End).await.unwrap();

        let stats = controller.run(&mut remote).await.unwrap();
        assert_eq!(stats.servers_killed, 1);
        assert_eq!(
            supervisor.calls(),
            vec!["spawn 64", "ready", "shutdown", "kill", "reap"]
        );
    }

    #[tokio::test]
    async fn test_dropped_driver_reaps_running_server() {
        let supervisor = FakeSupervisor::default();
        let mut controller = Controller::new(config(), supervisor.clone());
        let (mut driver, mut remote) = MemoryChannel::pair(WireFormat::Legacy);

        driver.send(&start(64)).await.unwrap();
        drop(driver);

        let err = controller.run(&mut remote).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(supervisor.calls(), vec!["spawn 64", "ready", "shutdown", "reap"]);
    }
}
