//! # Driver Loop
//!
//! Runs on the client host and owns the sweep. For every test case:
//!
//! 1. send `StartParams` and require `ServerRunning`
//! 2. optionally wait a settling interval
//! 3. run the client benchmark executable and wait for it to exit
//! 4. send `ClientTerminated` and require `Ready`
//!
//! After the last case the Driver sends `End`. Any unexpected reply aborts
//! the whole session; partial sweeps are never resumed. The control channel
//! is closed on every exit path.

use crate::channel::ControlChannel;
use crate::error::ControlError;
use crate::protocol::ControlMessage;
use crate::results::{CaseRecord, SessionRecorder, SessionSummary};
use crate::sweep::TestCase;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// What to do when the client benchmark exits unsuccessfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum ClientFailurePolicy {
    /// Log the failure and move on to the next case
    #[default]
    Continue,
    /// Finish the handshake for this case, send `End`, and fail
    Abort,
}

/// Driver-side configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Extra wait between `ServerRunning` and launching the client
    pub settle_delay: Duration,
    pub failure_policy: ClientFailurePolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            failure_policy: ClientFailurePolicy::Continue,
        }
    }
}

/// Result of one client benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOutcome {
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl ClientOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the client benchmark for one test case and waits for it.
#[async_trait]
pub trait ClientRunner: Send {
    async fn run(&mut self, case: &TestCase) -> Result<ClientOutcome, ControlError>;
}

/// Launches the client benchmark executable as a local child process
#[derive(Debug, Clone)]
pub struct ProcessClientRunner {
    pub executable: PathBuf,
    pub client_host: String,
    pub server_host: String,
}

impl ProcessClientRunner {
    pub fn new(
        executable: impl Into<PathBuf>,
        client_host: impl Into<String>,
        server_host: impl Into<String>,
    ) -> Self {
        Self {
            executable: executable.into(),
            client_host: client_host.into(),
            server_host: server_host.into(),
        }
    }

    /// `<client> <server> -k -v -s -n -p -g -d -i -f -t`
    pub fn args(&self, case: &TestCase) -> Vec<String> {
        vec![
            self.client_host.clone(),
            self.server_host.clone(),
            "-k".to_string(),
            case.key_size().to_string(),
            "-v".to_string(),
            case.value_size().to_string(),
            "-s".to_string(),
            case.max_key_size().to_string(),
            "-n".to_string(),
            case.threads().to_string(),
            "-p".to_string(),
            case.puts().to_string(),
            "-g".to_string(),
            case.gets().to_string(),
            "-d".to_string(),
            case.deletes().to_string(),
            "-i".to_string(),
            case.iterations().to_string(),
            "-f".to_string(),
            case.output().to_string_lossy().to_string(),
            "-t".to_string(),
            case.min_duration().as_millis().to_string(),
        ]
    }
}

#[async_trait]
impl ClientRunner for ProcessClientRunner {
    async fn run(&mut self, case: &TestCase) -> Result<ClientOutcome, ControlError> {
        let args = self.args(case);
        info!("Executing {} {}", self.executable.display(), args.join(" "));

        let start = Instant::now();
        let status = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                ControlError::Process(format!(
                    "failed to run client benchmark {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;

        Ok(ClientOutcome {
            exit_code: status.code(),
            elapsed: start.elapsed(),
        })
    }
}

/// The Driver loop
pub struct Driver<R: ClientRunner> {
    config: DriverConfig,
    runner: R,
    recorder: Option<SessionRecorder>,
    session_id: String,
}

impl<R: ClientRunner> Driver<R> {
    pub fn new(config: DriverConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            recorder: None,
            session_id: crate::utils::generate_session_id(),
        }
    }

    /// Stream a record of every completed case to a report file.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Execute the sweep against the Controller. The channel is closed on
    /// return, whatever the outcome.
    pub async fn run<C: ControlChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        cases: &[TestCase],
    ) -> Result<SessionSummary, ControlError> {
        info!(
            "Driver session {} starting: {} test case(s) against {}",
            self.session_id,
            cases.len(),
            channel.peer()
        );
        let started = Instant::now();
        let mut summary = SessionSummary::new(self.session_id.clone(), cases.len());

        let result = self.execute(channel, cases, &mut summary).await;

        if let Err(e) = channel.close().await {
            debug!("Error closing control channel: {}", e);
        }

        summary.elapsed = started.elapsed();
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.finalize(&summary) {
                warn!("Failed to finalize session report: {}", e);
            }
        }

        match result {
            Ok(()) => {
                info!(
                    "Sweep complete: {} case(s) in {}, {} client failure(s)",
                    summary.completed_cases,
                    crate::utils::format_duration(summary.elapsed),
                    summary.client_failures
                );
                Ok(summary)
            }
            Err(e) => {
                error!(
                    "Sweep aborted after {}/{} case(s): {}",
                    summary.completed_cases,
                    cases.len(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn execute<C: ControlChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        cases: &[TestCase],
        summary: &mut SessionSummary,
    ) -> Result<(), ControlError> {
        for (index, case) in cases.iter().enumerate() {
            info!(
                "[{}] test case {}/{}: {} key={} value={} threads={}",
                crate::utils::create_progress_indicator(index, cases.len(), 20),
                index + 1,
                cases.len(),
                case.workload(),
                case.key_size(),
                case.value_size(),
                case.threads()
            );

            let outcome = self.run_case(channel, case).await?;
            summary.completed_cases += 1;

            if let Some(recorder) = self.recorder.as_mut() {
                let record = CaseRecord::new(index, case, outcome.exit_code, outcome.elapsed);
                if let Err(e) = recorder.record(&record) {
                    warn!("Failed to record test case {}: {}", index, e);
                }
            }

            if !outcome.success() {
                summary.client_failures += 1;
                warn!(
                    "Client benchmark for test case {} exited with {:?}",
                    index, outcome.exit_code
                );
                if self.config.failure_policy == ClientFailurePolicy::Abort {
                    // The controller is idle again, so end the session cleanly
                    channel.send(&ControlMessage::End).await?;
                    return Err(ControlError::ClientFailed {
                        index,
                        exit_code: outcome.exit_code,
                    });
                }
            }
        }

        channel.send(&ControlMessage::End).await?;
        Ok(())
    }

    async fn run_case<C: ControlChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        case: &TestCase,
    ) -> Result<ClientOutcome, ControlError> {
        channel
            .send(&ControlMessage::StartParams(case.start_params()))
            .await?;
        expect(channel, ControlMessage::ServerRunning).await?;

        if !self.config.settle_delay.is_zero() {
            debug!("Settling for {:?}", self.config.settle_delay);
            sleep(self.config.settle_delay).await;
        }

        let outcome = self.runner.run(case).await?;
        debug!(
            "Client exited with {:?} after {}",
            outcome.exit_code,
            crate::utils::format_duration(outcome.elapsed)
        );

        channel.send(&ControlMessage::ClientTerminated).await?;
        expect(channel, ControlMessage::Ready).await?;
        Ok(outcome)
    }
}

/// Receive one message and require it to be `expected`.
async fn expect<C: ControlChannel + ?Sized>(
    channel: &mut C,
    expected: ControlMessage,
) -> Result<(), ControlError> {
    match channel.receive().await? {
        message if message == expected => Ok(()),
        ControlMessage::Abort { reason } => Err(ControlError::RemoteAbort(reason)),
        other => Err(ControlError::unexpected(&expected.to_string(), &other)),
    }
}
