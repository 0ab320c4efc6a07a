//! # Utility Functions and Helper Module
//!
//! Formatters for human-readable output, validation of command-line
//! parameters, and small display helpers used by the sweep planner and the
//! Driver progress log.
//!
//! ## Usage Examples
//!
//! ```rust
//! use kv_sweep::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_bytes(2048), "2.00 KB");
//! validate_port(31849)?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for a Driver session
///
/// The identifier is a UUID v4 string. It tags log lines and the session
/// report so that several sweeps writing into one results directory can be
/// told apart.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// Selects the most appropriate unit based on the magnitude. Durations of
/// a minute or more use a compound `1h 2m 3s` form.
///
/// ## Examples
///
/// ```rust
/// # use kv_sweep::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_nanos(1250)), "1.25μs");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a byte count with binary (1024-based) units
///
/// ```rust
/// # use kv_sweep::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Validate a TCP port number
///
/// Privileged ports (below 1024) are rejected; the control and service
/// ports are expected to be bindable without root.
pub fn validate_port(port: u16) -> Result<()> {
    if port < 1024 {
        anyhow::bail!("Port number {} is too low (below 1024)", port);
    }
    Ok(())
}

/// Validate a client thread count.
pub fn validate_threads(threads: usize) -> Result<()> {
    if threads == 0 {
        anyhow::bail!("Thread count must be greater than 0");
    }
    if threads > 1024 {
        anyhow::bail!("Thread count {} exceeds maximum of 1024", threads);
    }
    Ok(())
}

/// Validate a key or value size in bytes
///
/// Zero is allowed (the client then uses its own default key generation),
/// anything above 16 MB is rejected.
pub fn validate_size(what: &str, size: usize) -> Result<()> {
    const MAX_SIZE: usize = 16 * 1024 * 1024;
    if size > MAX_SIZE {
        anyhow::bail!(
            "{} {} exceeds maximum of {}",
            what,
            format_bytes(size),
            format_bytes(MAX_SIZE)
        );
    }
    Ok(())
}

/// Print a formatted table row
///
/// Each column is left-aligned and padded to its width. Missing widths
/// default to 10.
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    print!("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        print!(" {:width$} |", column, width = width);
    }
    println!();
}

/// Print a table separator
///
/// ```text
/// +-----+--------------+-----+
/// | #   | Workload     | Key |
/// +-----+--------------+-----+
/// ```
pub fn print_table_separator(widths: &[usize]) {
    print!("+");
    for &width in widths {
        print!("{}", "-".repeat(width + 2));
        print!("+");
    }
    println!();
}

/// Create a progress bar-like indicator
///
/// Uses `█` for completed and `░` for remaining progress. A zero total
/// yields a full bar and `current` is capped at `total`.
///
/// ```rust
/// # use kv_sweep::utils::create_progress_indicator;
/// assert_eq!(create_progress_indicator(0, 100, 10), "░░░░░░░░░░");
/// assert_eq!(create_progress_indicator(50, 100, 10), "█████░░░░░");
/// assert_eq!(create_progress_indicator(100, 100, 10), "██████████");
/// ```
pub fn create_progress_indicator(current: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return "█".repeat(width);
    }

    let progress = (current as f64 / total as f64).min(1.0);
    let filled = ((progress * width as f64) as usize).min(width);
    let empty = width - filled;

    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}
