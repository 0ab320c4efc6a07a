use crate::controller::ControllerConfig;
use crate::driver::{ClientFailurePolicy, DriverConfig};
use crate::protocol::WireFormat;
use crate::supervisor::ReadinessProbe;
use crate::sweep::{Campaign, StandardParams, SweepSettings};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// kv-sweep - Driver and Controller for distributed key-value benchmark sweeps
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// Verbose output (debug level unless RUST_LOG is set)
    #[clap(long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Also write logs to this file
    #[clap(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Control message wire format; both sides must agree
    #[clap(long, value_enum, global = true, default_value_t = WireFormat::Legacy)]
    pub format: WireFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a sweep from the client host
    Driver(DriverArgs),
    /// Launch and retire servers on the server host
    Controller(ControllerArgs),
}

/// Built-in sweep campaigns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum Preset {
    /// Network baseline, thread scaling and per-operation size scaling
    #[default]
    Standard,
    /// Long-running throughput runs
    Throughput,
    /// Put latency across value sizes
    Latency,
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Preset::Standard => write!(f, "standard"),
            Preset::Throughput => write!(f, "throughput"),
            Preset::Latency => write!(f, "latency"),
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DriverArgs {
    /// Address of this host, handed to the client benchmark
    pub client_host: String,

    /// Address of the server host running the Controller
    pub server_host: String,

    /// Controller port
    #[clap(long, default_value_t = crate::defaults::CONTROL_PORT, help_heading = "Connection")]
    pub control_port: u16,

    /// Client benchmark executable
    #[clap(long, default_value = crate::defaults::CLIENT_EXECUTABLE, help_heading = "Connection")]
    pub client: PathBuf,

    /// Built-in campaign to run. `throughput` and `latency` use their own
    /// -s, -i and -t values
    #[clap(long, value_enum, default_value_t = Preset::Standard, help_heading = "Sweep")]
    pub preset: Preset,

    /// JSON campaign file (overrides --preset)
    #[clap(long, help_heading = "Sweep")]
    pub campaign: Option<PathBuf>,

    /// Key size in bytes
    #[clap(short = 'k', default_value_t = crate::defaults::KEY_SIZE, help_heading = "Sweep")]
    pub key_size: usize,

    /// Value size in bytes
    #[clap(short = 'v', default_value_t = crate::defaults::VALUE_SIZE, help_heading = "Sweep")]
    pub value_size: usize,

    /// Maximum key size in bytes
    #[clap(short = 's', default_value_t = crate::defaults::MAX_KEY_SIZE, help_heading = "Sweep")]
    pub max_key_size: usize,

    /// Number of client threads
    #[clap(short = 'n', default_value_t = crate::defaults::CLIENTS, help_heading = "Sweep")]
    pub clients: usize,

    /// Put operations per client
    #[clap(short = 'p', default_value_t = crate::defaults::OPS_PER_CLIENT, help_heading = "Sweep")]
    pub puts: u64,

    /// Get operations per client
    #[clap(short = 'g', default_value_t = crate::defaults::OPS_PER_CLIENT, help_heading = "Sweep")]
    pub gets: u64,

    /// Delete operations per client
    #[clap(short = 'd', default_value_t = crate::defaults::OPS_PER_CLIENT, help_heading = "Sweep")]
    pub deletes: u64,

    /// Client event-loop iterations
    #[clap(short = 'i', default_value_t = crate::defaults::ITERATIONS, help_heading = "Sweep")]
    pub iterations: u64,

    /// Minimum duration of a single test (e.g. "80s", "500ms")
    #[clap(short = 't', value_parser = parse_duration, default_value = "0ms", help_heading = "Sweep")]
    pub min_duration: Duration,

    /// Directory prefixed to every client output file
    #[clap(long, help_heading = "Output")]
    pub output_dir: Option<PathBuf>,

    /// Stream a JSON record of every completed case to this file
    #[clap(long, help_heading = "Output")]
    pub report: Option<PathBuf>,

    /// Print the sweep and exit without connecting
    #[clap(long, default_value_t = false, help_heading = "Output")]
    pub plan: bool,

    /// Wait between ServerRunning and launching the client
    #[clap(long, value_parser = parse_duration, default_value = "0ms", help_heading = "Execution")]
    pub settle: Duration,

    /// What to do when the client benchmark exits unsuccessfully
    #[clap(long, value_enum, default_value_t = ClientFailurePolicy::Continue, help_heading = "Execution")]
    pub on_client_failure: ClientFailurePolicy,
}

impl DriverArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        crate::utils::validate_port(self.control_port)?;
        crate::utils::validate_threads(self.clients)?;
        crate::utils::validate_size("key size", self.key_size)?;
        crate::utils::validate_size("value size", self.value_size)?;
        crate::utils::validate_size("maximum key size", self.max_key_size)?;
        Ok(())
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            max_key_size: self.max_key_size,
            iterations: self.iterations,
            min_duration: self.min_duration,
            output_dir: self.output_dir.clone(),
        }
    }

    pub fn standard_params(&self) -> StandardParams {
        StandardParams {
            key_size: self.key_size,
            value_size: self.value_size,
            clients: self.clients,
            puts_per_client: self.puts,
            gets_per_client: self.gets,
            deletes_per_client: self.deletes,
        }
    }

    /// The campaign file if given, otherwise the selected preset.
    pub fn campaign(&self) -> anyhow::Result<Campaign> {
        if let Some(path) = &self.campaign {
            let mut campaign = Campaign::from_json_file(path)?;
            if self.output_dir.is_some() {
                campaign.settings.output_dir = self.output_dir.clone();
            }
            return Ok(campaign);
        }

        let ignored = self.ignored_by_preset();
        if !ignored.is_empty() {
            warn!(
                "The {} preset uses its own {}; the given values are ignored",
                self.preset,
                ignored.join(", ")
            );
        }

        let settings = self.sweep_settings();
        Ok(match self.preset {
            Preset::Standard => Campaign::standard(settings, &self.standard_params()),
            Preset::Throughput => Campaign::throughput(settings),
            Preset::Latency => Campaign::latency(settings),
        })
    }

    /// Flags set away from their defaults that the selected preset replaces.
    pub fn ignored_by_preset(&self) -> Vec<&'static str> {
        if self.campaign.is_some() || self.preset == Preset::Standard {
            return Vec::new();
        }
        let mut ignored = Vec::new();
        if self.max_key_size != crate::defaults::MAX_KEY_SIZE {
            ignored.push("-s");
        }
        if self.iterations != crate::defaults::ITERATIONS {
            ignored.push("-i");
        }
        if !self.min_duration.is_zero() {
            ignored.push("-t");
        }
        ignored
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            settle_delay: self.settle,
            failure_policy: self.on_client_failure,
        }
    }

    pub fn control_address(&self) -> String {
        format!("{}:{}", self.server_host, self.control_port)
    }
}

/// How the Controller decides a server is ready
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProbeMode {
    /// Wait a grace period and check the process is alive
    Liveness,
    /// Retry a TCP connect to the service port (servers that accept TCP)
    Tcp,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ControllerArgs {
    /// Address to listen on, also handed to the server
    pub host: String,

    /// Port to listen on for the Driver
    #[clap(long, default_value_t = crate::defaults::CONTROL_PORT)]
    pub port: u16,

    /// Server benchmark executable
    #[clap(long, default_value = crate::defaults::SERVER_EXECUTABLE, help_heading = "Server")]
    pub server: PathBuf,

    /// Extra argument appended to every server invocation (repeatable)
    #[clap(long = "server-arg", allow_hyphen_values = true, help_heading = "Server")]
    pub server_args: Vec<String>,

    /// Readiness check after spawning a server
    #[clap(long, value_enum, default_value_t = ProbeMode::Liveness, help_heading = "Readiness")]
    pub probe: ProbeMode,

    /// Service port probed by `--probe tcp`
    #[clap(long, default_value_t = crate::defaults::SERVICE_PORT, help_heading = "Readiness")]
    pub service_port: u16,

    /// Connect attempts before giving up
    #[clap(long, default_value_t = crate::defaults::PROBE_ATTEMPTS, help_heading = "Readiness")]
    pub probe_attempts: u32,

    /// Pause between connect attempts
    #[clap(long, value_parser = parse_duration, default_value = "100ms", help_heading = "Readiness")]
    pub probe_interval: Duration,

    /// Grace period for the liveness probe
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Readiness")]
    pub liveness_grace: Duration,

    /// Pause between ClientTerminated and the shutdown signal
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Shutdown")]
    pub shutdown_delay: Duration,

    /// Time a signalled server gets to exit before it is killed
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Shutdown")]
    pub shutdown_grace: Duration,
}

impl ControllerArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        crate::utils::validate_port(self.port)?;
        crate::utils::validate_port(self.service_port)?;
        if self.probe == ProbeMode::Tcp && self.probe_attempts == 0 {
            anyhow::bail!("--probe-attempts must be at least 1");
        }
        Ok(())
    }

    pub fn readiness_probe(&self) -> ReadinessProbe {
        match self.probe {
            ProbeMode::Tcp => ReadinessProbe::TcpConnect {
                address: self.service_address(),
                attempts: self.probe_attempts,
                interval: self.probe_interval,
            },
            ProbeMode::Liveness => ReadinessProbe::Liveness {
                grace: self.liveness_grace,
            },
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            server_args: self.server_args.clone(),
            shutdown_delay: self.shutdown_delay,
            shutdown_grace: self.shutdown_grace,
            ..ControllerConfig::new(&self.server, &self.host)
        }
    }

    pub fn service_address(&self) -> String {
        format!("{}:{}", self.host, self.service_port)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        "h" => Duration::from_secs_f64(num * 3600.0),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::Sweep;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_driver_flags_mirror_client_flags() {
        let args = Args::parse_from([
            "kv-sweep", "driver", "10.0.0.1", "10.0.0.2", "-k", "32", "-v", "1024", "-n", "4",
            "-p", "10", "-g", "20", "-d", "0", "-t", "80s",
        ]);
        let Command::Driver(driver) = args.command else {
            panic!("expected driver subcommand");
        };
        assert_eq!(driver.key_size, 32);
        assert_eq!(driver.value_size, 1024);
        assert_eq!(driver.clients, 4);
        assert_eq!(driver.min_duration, Duration::from_secs(80));
        assert_eq!(driver.control_address(), "10.0.0.2:31849");
        assert_eq!(args.format, WireFormat::Legacy);
        driver.validate().unwrap();

        let campaign = driver.campaign().unwrap();
        assert_eq!(campaign.sweeps.len(), 3);
        match &campaign.sweeps[1] {
            Sweep::Thread(sweep) => {
                assert_eq!(sweep.total_puts, 40);
                assert_eq!(sweep.total_gets, 80);
                assert_eq!(sweep.total_deletes, 0);
            }
            other => panic!("unexpected sweep {:?}", other),
        }
    }

    #[test]
    fn test_driver_presets() {
        let args = Args::parse_from([
            "kv-sweep", "driver", "a", "b", "--preset", "latency", "--plan",
            "--on-client-failure", "abort", "--settle", "250ms",
        ]);
        let Command::Driver(driver) = args.command else {
            panic!("expected driver subcommand");
        };
        assert!(driver.plan);
        assert_eq!(driver.driver_config().failure_policy, ClientFailurePolicy::Abort);
        assert_eq!(driver.driver_config().settle_delay, Duration::from_millis(250));
        assert_eq!(driver.campaign().unwrap().test_cases().unwrap().len(), 7);
    }

    #[test]
    fn test_preset_reports_replaced_flags() {
        let args = Args::parse_from([
            "kv-sweep", "driver", "a", "b", "--preset", "throughput", "-i", "3", "-t", "10s",
        ]);
        let Command::Driver(driver) = args.command else {
            panic!("expected driver subcommand");
        };
        assert_eq!(driver.ignored_by_preset(), vec!["-i", "-t"]);
        let campaign = driver.campaign().unwrap();
        assert_eq!(campaign.settings.iterations, 1);

        let args = Args::parse_from(["kv-sweep", "driver", "a", "b", "-i", "3", "-t", "10s"]);
        let Command::Driver(driver) = args.command else {
            panic!("expected driver subcommand");
        };
        assert!(driver.ignored_by_preset().is_empty());
    }

    #[test]
    fn test_controller_defaults() {
        let args = Args::parse_from([
            "kv-sweep", "--format", "tagged", "controller", "192.168.1.5",
            "--server-arg", "--numa", "--server-arg", "0",
        ]);
        assert_eq!(args.format, WireFormat::Tagged);
        let Command::Controller(controller) = args.command else {
            panic!("expected controller subcommand");
        };
        controller.validate().unwrap();
        assert_eq!(controller.listen_address(), "192.168.1.5:31849");
        assert_eq!(
            controller.readiness_probe(),
            ReadinessProbe::Liveness {
                grace: Duration::from_secs(1)
            }
        );

        let config = controller.controller_config();
        assert_eq!(config.server_executable, PathBuf::from("./server_perf_test"));
        assert_eq!(config.server_host, "192.168.1.5");
        assert_eq!(config.server_args, vec!["--numa", "0"]);
        assert_eq!(config.shutdown_delay, Duration::from_secs(1));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_liveness_probe_and_port_validation() {
        let args = Args::parse_from([
            "kv-sweep", "controller", "0.0.0.0", "--probe", "liveness", "--liveness-grace",
            "2s", "--port", "80",
        ]);
        let Command::Controller(controller) = args.command else {
            panic!("expected controller subcommand");
        };
        assert_eq!(
            controller.readiness_probe(),
            ReadinessProbe::Liveness {
                grace: Duration::from_secs(2)
            }
        );
        assert!(controller.validate().is_err());
    }

    #[test]
    fn test_tcp_probe_is_opt_in() {
        let args = Args::parse_from([
            "kv-sweep", "controller", "10.0.0.2", "--probe", "tcp", "--service-port", "9000",
        ]);
        let Command::Controller(controller) = args.command else {
            panic!("expected controller subcommand");
        };
        assert_eq!(
            controller.readiness_probe(),
            ReadinessProbe::tcp("10.0.0.2:9000")
        );
    }
}
