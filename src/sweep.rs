//! # Sweep Generator
//!
//! Expands a benchmark campaign into the ordered list of `TestCase`s the
//! Driver executes. A campaign is a list of sweep dimensions that are
//! concatenated, never cross-multiplied:
//!
//! - **Size sweep**: paired key/value size varies, get-only. Used as the
//!   network baseline.
//! - **Thread sweep**: thread count varies at fixed sizes. Each operation
//!   type is measured separately, and by default the configured total is
//!   shared between the threads with integer division. The remainder is
//!   dropped.
//! - **Size-by-operation sweep**: value size varies, and put, get and delete
//!   each get their own single-operation case per size. Operations with a
//!   zero count are left out.
//!
//! Generation is pure: the same campaign always yields the same sequence,
//! so an aborted sweep can be restarted from the top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid campaign configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SweepError {
    #[error("test case has no operations (puts, gets and deletes are all zero)")]
    EmptyWorkload,

    #[error("test case has zero threads")]
    ZeroThreads,

    #[error("{sweep} sweep has an empty {field} list")]
    EmptyList {
        sweep: &'static str,
        field: &'static str,
    },
}

/// A single operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Put,
    Get,
    Delete,
}

/// Shape of the work a test case performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    PutOnly,
    GetOnly,
    DeleteOnly,
    Mixed,
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workload::PutOnly => write!(f, "put"),
            Workload::GetOnly => write!(f, "get"),
            Workload::DeleteOnly => write!(f, "delete"),
            Workload::Mixed => write!(f, "mixed"),
        }
    }
}

/// One fully parameterized benchmark run.
///
/// Operation counts are per client thread, as the client benchmark expects
/// them. Fields are private so every `TestCase` has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    key_size: usize,
    value_size: usize,
    max_key_size: usize,
    threads: usize,
    puts: u64,
    gets: u64,
    deletes: u64,
    iterations: u64,
    #[serde(with = "duration_ms")]
    min_duration: Duration,
    output: PathBuf,
}

/// Parameters shared by every case of a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Upper bound for variable-length keys
    pub max_key_size: usize,
    /// Client event-loop iterations
    pub iterations: u64,
    /// Minimum wall-clock time of each run
    #[serde(with = "duration_ms", rename = "min_duration_ms")]
    pub min_duration: Duration,
    /// Directory prefixed to every output file name
    pub output_dir: Option<PathBuf>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            max_key_size: 0,
            iterations: 1,
            min_duration: Duration::ZERO,
            output_dir: None,
        }
    }
}

/// Builder-style description of a case before validation
#[derive(Debug, Clone, Copy)]
struct CaseShape {
    key_size: usize,
    value_size: usize,
    threads: usize,
    puts: u64,
    gets: u64,
    deletes: u64,
}

impl CaseShape {
    fn single(
        key_size: usize,
        value_size: usize,
        threads: usize,
        operation: Operation,
        count: u64,
    ) -> Self {
        let (puts, gets, deletes) = match operation {
            Operation::Put => (count, 0, 0),
            Operation::Get => (0, count, 0),
            Operation::Delete => (0, 0, count),
        };
        Self {
            key_size,
            value_size,
            threads,
            puts,
            gets,
            deletes,
        }
    }
}

impl TestCase {
    /// Validate and build a test case.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key_size: usize,
        value_size: usize,
        max_key_size: usize,
        threads: usize,
        puts: u64,
        gets: u64,
        deletes: u64,
        iterations: u64,
        min_duration: Duration,
        output: impl Into<PathBuf>,
    ) -> Result<Self, SweepError> {
        if threads == 0 {
            return Err(SweepError::ZeroThreads);
        }
        if puts == 0 && gets == 0 && deletes == 0 {
            return Err(SweepError::EmptyWorkload);
        }
        Ok(Self {
            key_size,
            value_size,
            max_key_size,
            threads,
            puts,
            gets,
            deletes,
            iterations,
            min_duration,
            output: output.into(),
        })
    }

    fn from_shape(
        shape: CaseShape,
        settings: &SweepSettings,
        output: &str,
    ) -> Result<Self, SweepError> {
        let output = match &settings.output_dir {
            Some(dir) => dir.join(output),
            None => PathBuf::from(output),
        };
        Self::new(
            shape.key_size,
            shape.value_size,
            settings.max_key_size,
            shape.threads,
            shape.puts,
            shape.gets,
            shape.deletes,
            settings.iterations,
            settings.min_duration,
            output,
        )
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn puts(&self) -> u64 {
        self.puts
    }

    pub fn gets(&self) -> u64 {
        self.gets
    }

    pub fn deletes(&self) -> u64 {
        self.deletes
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn min_duration(&self) -> Duration {
        self.min_duration
    }

    /// Where the client writes its metrics record. Opaque to the core.
    pub fn output(&self) -> &std::path::Path {
        &self.output
    }

    /// Which single workload shape this case has.
    pub fn workload(&self) -> Workload {
        match (self.puts > 0, self.gets > 0, self.deletes > 0) {
            (true, false, false) => Workload::PutOnly,
            (false, true, false) => Workload::GetOnly,
            (false, false, true) => Workload::DeleteOnly,
            _ => Workload::Mixed,
        }
    }

    /// The part of the case the Controller needs to start a server.
    pub fn start_params(&self) -> crate::protocol::StartParams {
        crate::protocol::StartParams {
            key_size: self.key_size,
            value_size: self.value_size,
            threads: self.threads,
        }
    }
}

/// How a thread sweep turns a configured total into per-thread counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpSplit {
    /// `total / threads`, remainder dropped
    #[default]
    DivideByThreads,
    /// Every thread runs the full total
    PerThread,
}

impl OpSplit {
    pub fn per_thread(&self, total: u64, threads: usize) -> u64 {
        match self {
            OpSplit::DivideByThreads => total / threads as u64,
            OpSplit::PerThread => total,
        }
    }
}

/// Paired key/value size varies, get-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeSweep {
    pub sizes: Vec<usize>,
    pub threads: usize,
    pub gets: u64,
    pub output: String,
}

/// Thread count varies at fixed sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSweep {
    pub key_size: usize,
    pub value_size: usize,
    pub threads: Vec<usize>,
    #[serde(default)]
    pub total_puts: u64,
    #[serde(default)]
    pub total_gets: u64,
    #[serde(default)]
    pub total_deletes: u64,
    #[serde(default)]
    pub split: OpSplit,
    pub output: String,
}

/// Value size varies, one single-operation case per operation and size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeByOperationSweep {
    pub key_size: usize,
    pub value_sizes: Vec<usize>,
    pub threads: usize,
    #[serde(default)]
    pub puts: u64,
    #[serde(default)]
    pub gets: u64,
    #[serde(default)]
    pub deletes: u64,
    #[serde(default = "all_operations")]
    pub operations: Vec<Operation>,
    pub output: String,
}

fn all_operations() -> Vec<Operation> {
    vec![Operation::Put, Operation::Get, Operation::Delete]
}

/// One sweep dimension of a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Sweep {
    Size(SizeSweep),
    Thread(ThreadSweep),
    SizeByOperation(SizeByOperationSweep),
}

impl Sweep {
    pub fn name(&self) -> &'static str {
        match self {
            Sweep::Size(_) => "size",
            Sweep::Thread(_) => "thread",
            Sweep::SizeByOperation(_) => "size-by-operation",
        }
    }

    fn shapes(&self) -> Result<Vec<CaseShape>, SweepError> {
        let name = self.name();
        match self {
            Sweep::Size(s) => {
                non_empty(&s.sizes, name, "sizes")?;
                Ok(s.sizes
                    .iter()
                    .map(|&size| CaseShape::single(size, size, s.threads, Operation::Get, s.gets))
                    .collect())
            }
            Sweep::Thread(s) => {
                non_empty(&s.threads, name, "threads")?;
                let totals = [
                    (Operation::Put, s.total_puts),
                    (Operation::Get, s.total_gets),
                    (Operation::Delete, s.total_deletes),
                ];
                let mut shapes = Vec::new();
                for (operation, total) in totals {
                    if total == 0 {
                        continue;
                    }
                    for &threads in &s.threads {
                        if threads == 0 {
                            return Err(SweepError::ZeroThreads);
                        }
                        let count = s.split.per_thread(total, threads);
                        shapes.push(CaseShape::single(
                            s.key_size,
                            s.value_size,
                            threads,
                            operation,
                            count,
                        ));
                    }
                }
                Ok(shapes)
            }
            Sweep::SizeByOperation(s) => {
                non_empty(&s.value_sizes, name, "value_sizes")?;
                non_empty(&s.operations, name, "operations")?;
                let mut shapes = Vec::new();
                for &operation in &s.operations {
                    let count = match operation {
                        Operation::Put => s.puts,
                        Operation::Get => s.gets,
                        Operation::Delete => s.deletes,
                    };
                    if count == 0 {
                        continue;
                    }
                    for &size in &s.value_sizes {
                        shapes.push(CaseShape::single(s.key_size, size, s.threads, operation, count));
                    }
                }
                Ok(shapes)
            }
        }
    }

    fn output(&self) -> &str {
        match self {
            Sweep::Size(s) => &s.output,
            Sweep::Thread(s) => &s.output,
            Sweep::SizeByOperation(s) => &s.output,
        }
    }

    /// Expand this dimension into validated test cases.
    pub fn test_cases(&self, settings: &SweepSettings) -> Result<Vec<TestCase>, SweepError> {
        let output = self.output();
        self.shapes()?
            .into_iter()
            .map(|shape| TestCase::from_shape(shape, settings, output))
            .collect()
    }
}

fn non_empty<T>(list: &[T], sweep: &'static str, field: &'static str) -> Result<(), SweepError> {
    if list.is_empty() {
        Err(SweepError::EmptyList { sweep, field })
    } else {
        Ok(())
    }
}

/// A complete benchmark campaign: shared settings plus ordered sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(default)]
    pub settings: SweepSettings,
    pub sweeps: Vec<Sweep>,
}

/// Per-client operation counts and sizes the standard preset is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardParams {
    pub key_size: usize,
    pub value_size: usize,
    pub clients: usize,
    pub puts_per_client: u64,
    pub gets_per_client: u64,
    pub deletes_per_client: u64,
}

const STANDARD_SIZES: [usize; 5] = [256, 512, 1024, 2048, 4096];
const STANDARD_THREADS: [usize; 4] = [1, 2, 4, 8];
const THROUGHPUT_SIZES: [usize; 5] = [64, 256, 1024, 2048, 4096];
const LATENCY_SIZES: [usize; 7] = [64, 128, 256, 512, 1024, 2048, 4096];
const LONG_RUN_OPS: u64 = 10_000_000;
const LONG_RUN_MIN_DURATION: Duration = Duration::from_secs(80);

impl Campaign {
    pub fn new(settings: SweepSettings, sweeps: Vec<Sweep>) -> Self {
        Self { settings, sweeps }
    }

    /// Network baseline, thread scaling and per-operation size scaling.
    pub fn standard(settings: SweepSettings, params: &StandardParams) -> Self {
        let clients = params.clients as u64;
        let sweeps = vec![
            Sweep::Size(SizeSweep {
                sizes: STANDARD_SIZES.to_vec(),
                threads: params.clients,
                gets: params.gets_per_client,
                output: "network_test.csv".to_string(),
            }),
            Sweep::Thread(ThreadSweep {
                key_size: params.key_size,
                value_size: params.value_size,
                threads: STANDARD_THREADS.to_vec(),
                total_puts: params.puts_per_client * clients,
                total_gets: params.gets_per_client * clients,
                total_deletes: params.deletes_per_client * clients,
                split: OpSplit::DivideByThreads,
                output: "threads_test.csv".to_string(),
            }),
            Sweep::SizeByOperation(SizeByOperationSweep {
                key_size: params.key_size,
                value_sizes: STANDARD_SIZES.to_vec(),
                threads: params.clients,
                puts: params.puts_per_client,
                gets: params.gets_per_client,
                deletes: params.deletes_per_client,
                operations: all_operations(),
                output: "sizes_test.csv".to_string(),
            }),
        ];
        Self::new(settings, sweeps)
    }

    /// Long-running throughput runs at a fixed operation budget.
    pub fn throughput(settings: SweepSettings) -> Self {
        let settings = SweepSettings {
            max_key_size: 0,
            iterations: 1,
            min_duration: LONG_RUN_MIN_DURATION,
            ..settings
        };
        let sweeps = vec![
            Sweep::Thread(ThreadSweep {
                key_size: 512,
                value_size: 512,
                threads: STANDARD_THREADS.to_vec(),
                total_puts: 0,
                total_gets: LONG_RUN_OPS,
                total_deletes: 0,
                split: OpSplit::PerThread,
                output: "throughput_threads.csv".to_string(),
            }),
            Sweep::Size(SizeSweep {
                sizes: THROUGHPUT_SIZES.to_vec(),
                threads: 6,
                gets: LONG_RUN_OPS,
                output: "throughput_5050.csv".to_string(),
            }),
            Sweep::SizeByOperation(SizeByOperationSweep {
                key_size: 0,
                value_sizes: THROUGHPUT_SIZES.to_vec(),
                threads: 6,
                puts: LONG_RUN_OPS,
                gets: 0,
                deletes: 0,
                operations: vec![Operation::Put],
                output: "throughput_comp_iperf.csv".to_string(),
            }),
        ];
        Self::new(settings, sweeps)
    }

    /// Put latency across value sizes.
    pub fn latency(settings: SweepSettings) -> Self {
        let settings = SweepSettings {
            max_key_size: 0,
            iterations: 1,
            min_duration: LONG_RUN_MIN_DURATION,
            ..settings
        };
        let sweeps = vec![Sweep::SizeByOperation(SizeByOperationSweep {
            key_size: 0,
            value_sizes: LATENCY_SIZES.to_vec(),
            threads: 4,
            puts: LONG_RUN_OPS,
            gets: 0,
            deletes: 0,
            operations: vec![Operation::Put],
            output: "latency.csv".to_string(),
        })];
        Self::new(settings, sweeps)
    }

    /// Load a campaign from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The full ordered sequence of test cases.
    pub fn test_cases(&self) -> Result<Vec<TestCase>, SweepError> {
        let mut cases = Vec::new();
        for sweep in &self.sweeps {
            cases.extend(sweep.test_cases(&self.settings)?);
        }
        Ok(cases)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
