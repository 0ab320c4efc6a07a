//! # Session Reports
//!
//! The Driver records one `CaseRecord` per completed test case. Records are
//! streamed into a JSON array as they complete, so a session that dies
//! half-way still leaves the cases it finished on disk. `finalize` closes
//! the array and writes a `SessionSummary` next to it.

use crate::sweep::{TestCase, Workload};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of one completed test case
#[derive(Debug, Clone, Serialize)]
pub struct CaseRecord {
    pub index: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub workload: Workload,
    pub test_case: TestCase,
    pub client_exit_code: Option<i32>,
    pub client_elapsed: Duration,
}

impl CaseRecord {
    pub fn new(
        index: usize,
        test_case: &TestCase,
        client_exit_code: Option<i32>,
        client_elapsed: Duration,
    ) -> Self {
        Self {
            index,
            timestamp: chrono::Utc::now(),
            workload: test_case.workload(),
            test_case: test_case.clone(),
            client_exit_code,
            client_elapsed,
        }
    }
}

/// Host information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub hostname: Option<String>,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            hostname: std::env::var("HOSTNAME").ok(),
        }
    }
}

/// Totals for one Driver session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub version: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub planned_cases: usize,
    pub completed_cases: usize,
    pub client_failures: usize,
    pub elapsed: Duration,
    pub host: HostInfo,
}

impl SessionSummary {
    pub fn new(session_id: String, planned_cases: usize) -> Self {
        Self {
            session_id,
            version: crate::VERSION.to_string(),
            started_at: chrono::Utc::now(),
            planned_cases,
            completed_cases: 0,
            client_failures: 0,
            elapsed: Duration::ZERO,
            host: HostInfo::default(),
        }
    }
}

/// Streams case records to a JSON report file
pub struct SessionRecorder {
    report_file: PathBuf,
    records_written: usize,
    finalized: bool,
}

impl SessionRecorder {
    /// Create/truncate the report file and open the JSON array.
    pub fn create<P: AsRef<Path>>(report_file: P) -> Result<Self> {
        let report_file = report_file.as_ref().to_path_buf();
        if let Some(parent) = report_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&report_file)?;
        writeln!(file, "[")?;

        debug!("Streaming session report to: {:?}", report_file);
        Ok(Self {
            report_file,
            records_written: 0,
            finalized: false,
        })
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Path of the summary written by `finalize`.
    pub fn summary_file(&self) -> PathBuf {
        self.report_file.with_extension("summary.json")
    }

    /// Append one record.
    pub fn record(&mut self, record: &CaseRecord) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.report_file)?;

        if self.records_written > 0 {
            writeln!(file, ",")?;
        }

        let json = serde_json::to_string_pretty(record)?;
        write!(file, "{}", json)?;
        file.flush()?;

        self.records_written += 1;
        Ok(())
    }

    /// Close the array and write the summary. Only the first call writes.
    pub fn finalize(&mut self, summary: &SessionSummary) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let mut file = OpenOptions::new().append(true).open(&self.report_file)?;
        writeln!(file, "\n]")?;
        file.flush()?;

        let summary_file = self.summary_file();
        std::fs::write(&summary_file, serde_json::to_string_pretty(summary)?)?;

        info!(
            "Session report written to {:?} (summary: {:?})",
            self.report_file, summary_file
        );
        Ok(())
    }
}
