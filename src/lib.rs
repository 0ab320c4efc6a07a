//! # kv-sweep
//!
//! Coordination for distributed key-value micro-benchmarks. Two processes
//! started on different hosts cooperate over one TCP control connection:
//!
//! - **Driver** (client host): generates the sweep of test cases and, for
//!   each one, asks the Controller for a fresh server, runs the client
//!   benchmark locally, and tells the Controller when it is done.
//! - **Controller** (server host): spawns one server-under-test per test
//!   case, confirms it is ready, and tears it down and reaps it on request.
//!
//! The benchmark executables themselves are opaque external programs.
//!
//! ## Architecture Overview
//!
//! - `protocol`: control messages and their two wire encodings
//! - `channel`: the `ControlChannel` abstraction over TCP (and in-memory pairs)
//! - `supervisor`: server process lifecycle behind the `ProcessSupervisor` trait
//! - `controller`: the Controller state machine
//! - `sweep`: test cases, sweep dimensions, campaigns and presets
//! - `driver`: the Driver loop and client launcher
//! - `results`: streamed JSON session reports
//! - `cli`, `logging`, `utils`: command line, tracing setup and helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use kv_sweep::{
//!     Campaign, Driver, DriverConfig, ProcessClientRunner, SweepSettings, TcpControlChannel,
//!     WireFormat,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cases = Campaign::latency(SweepSettings::default()).test_cases()?;
//!     let runner = ProcessClientRunner::new("./client_perf_test", "10.0.0.1", "10.0.0.2");
//!     let mut driver = Driver::new(DriverConfig::default(), runner);
//!
//!     let mut channel = TcpControlChannel::connect("10.0.0.2:31849", WireFormat::Legacy).await?;
//!     let summary = driver.run(&mut channel, &cases).await?;
//!     println!("completed {} case(s)", summary.completed_cases);
//!     Ok(())
//! }
//! ```

/// Command-line interface and configuration
///
/// clap derive arguments for the `driver` and `controller` subcommands,
/// plus conversion into the library's configuration types.
pub mod cli;

/// Control channel abstraction and transports
pub mod channel;

/// The Controller loop
pub mod controller;

/// The Driver loop and client benchmark launcher
pub mod driver;

pub mod error;

/// Tracing subscriber setup and the colorized console formatter
pub mod logging;

/// Control messages and wire formats
pub mod protocol;

/// Session reports
///
/// Streams one JSON record per completed test case and writes a summary
/// with host information for reproducibility.
pub mod results;

/// Server process supervision
pub mod supervisor;

/// Sweep generation
///
/// Expands campaigns (presets or JSON files) into the ordered list of test
/// cases the Driver executes.
pub mod sweep;

pub mod utils;

pub use channel::{ControlChannel, ControlListener, MemoryChannel, TcpControlChannel};
pub use controller::{Controller, ControllerConfig, ControllerState, ControllerStats};
pub use driver::{ClientFailurePolicy, ClientOutcome, ClientRunner, Driver, DriverConfig, ProcessClientRunner};
pub use error::ControlError;
pub use protocol::{ControlMessage, StartParams, WireFormat};
pub use results::{CaseRecord, SessionRecorder, SessionSummary};
pub use supervisor::{LocalSupervisor, ProcessSupervisor, ReadinessProbe, ServerHandle, ServerSpec, ServerState};
pub use sweep::{Campaign, Sweep, SweepError, SweepSettings, TestCase, Workload};

/// The current version of kv-sweep
///
/// Populated from Cargo.toml and recorded in session summaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Ports and timings follow the benchmark's established deployment: the
/// Controller listens on 31849 and the server-under-test serves on 31850.
pub mod defaults {
    use std::time::Duration;

    /// TCP port the Controller listens on for the Driver
    pub const CONTROL_PORT: u16 = 31849;

    /// Port the server-under-test accepts clients on (UDP for the stock
    /// server; only probed with `--probe tcp`)
    pub const SERVICE_PORT: u16 = 31850;

    /// Pause between `ClientTerminated` and signalling the server
    pub const SHUTDOWN_DELAY: Duration = Duration::from_secs(1);

    /// Time a signalled server may take to exit before it is killed
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    /// Readiness probe connect attempts
    pub const PROBE_ATTEMPTS: u32 = 50;

    /// Pause between readiness probe attempts
    pub const PROBE_INTERVAL: Duration = Duration::from_millis(100);

    pub const SERVER_EXECUTABLE: &str = "./server_perf_test";
    pub const CLIENT_EXECUTABLE: &str = "./client_perf_test";

    pub const KEY_SIZE: usize = 16;
    pub const VALUE_SIZE: usize = 512;
    pub const MAX_KEY_SIZE: usize = 0;
    pub const CLIENTS: usize = 1;

    /// Operations of each kind per client thread
    pub const OPS_PER_CLIENT: u64 = 10_000;

    pub const ITERATIONS: u64 = 1;
}
