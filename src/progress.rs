//! Progress reporting and final summaries for the CLI
//!
//! A single indicatif spinner line, refreshed at most every 100 ms from the
//! machine's tick callback, plus the printed header/summary around a run.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::OpError;

/// Counters accumulated by the CLI across ticks
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    pub folders_found: u64,
    pub folders_deleted: u64,
    pub files_found: u64,
    pub files_deleted: u64,
    pub bytes_found: u64,
    pub bytes_deleted: u64,
    pub folders_togo: u64,
    pub scanner_errors: u64,
    pub deleter_errors: u64,
}

/// Progress reporter that displays run status on one spinner line
pub struct ProgressReporter {
    bar: ProgressBar,
    one_liner: bool,
    scan_only: bool,
    last_update: Instant,
}

impl ProgressReporter {
    pub fn new(one_liner: bool, scan_only: bool) -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            one_liner,
            scan_only,
            last_update: Instant::now()
                .checked_sub(Duration::from_secs(1))
                .unwrap_or_else(Instant::now),
        }
    }

    /// Refresh the spinner message; throttled unless `force` is set
    pub fn update(&mut self, status: &Status, force: bool) {
        if !force && self.last_update.elapsed() < Duration::from_millis(100) {
            return;
        }
        self.last_update = Instant::now();

        let msg = if self.one_liner {
            let mut msg = format!(
                "{} / {} folders, {} / {} files, {} / {} errors",
                format_number(status.folders_found),
                format_number(status.folders_deleted),
                format_number(status.files_found),
                format_number(status.files_deleted),
                status.scanner_errors,
                status.deleter_errors,
            );
            if status.folders_togo > 0 {
                msg.push_str(&format!(" - {} to go", format_number(status.folders_togo)));
            }
            msg
        } else {
            let mut msg = format!(
                "Found {} folders / {} files ({})",
                format_number(status.folders_found),
                format_number(status.files_found),
                format_size(status.bytes_found, BINARY),
            );
            if !self.scan_only {
                msg.push_str(&format!(
                    " | Deleted {} folders / {} files",
                    format_number(status.folders_deleted),
                    format_number(status.files_deleted),
                ));
            }
            let errors = status.scanner_errors + status.deleter_errors;
            if errors > 0 {
                msg.push_str(&format!(" | {} errors", format_number(errors)));
            }
            if status.folders_togo > 0 {
                msg.push_str(&format!(" | {} to go", format_number(status.folders_togo)));
            }
            msg
        };

        self.bar.set_message(msg);
    }

    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Print a header at the start of a run
pub fn print_header(path: &str, mode: &str, workers: usize) {
    println!();
    println!(
        "{} {}",
        style("zapdir").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Target:").bold(), path);
    println!("  {} {}", style("Mode:").bold(), mode);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!();
}

/// Print the found/deleted table and timing after a run
pub fn print_summary(status: &Status, scan_only: bool, duration: Duration, list_errors_hint: bool) {
    let err_count = status.scanner_errors + status.deleter_errors;

    println!();
    println!(
        "           {:>10}  {:>10}  {:>12}  {:>10}",
        "Folders", "Files", "Bytes", "Errors"
    );
    println!(
        "  Found    {:>10}  {:>10}  {:>12}  {:>10}",
        format_number(status.folders_found),
        format_number(status.files_found),
        format_size(status.bytes_found, BINARY),
        format_number(status.scanner_errors),
    );
    if !scan_only {
        println!(
            "  Deleted  {:>10}  {:>10}  {:>12}  {:>10}",
            format_number(status.folders_deleted),
            format_number(status.files_deleted),
            format_size(status.bytes_deleted, BINARY),
            format_number(status.deleter_errors),
        );
    }
    println!();

    if err_count > 0 && list_errors_hint {
        println!(
            "Completed in {}. To list errors use '--list-errors'.",
            format_elapsed(duration)
        );
    } else {
        println!("Completed in {}.", format_elapsed(duration));
    }
}

/// List accumulated errors, deduplicated and grouped under their code
pub fn print_errors(scanner: &[OpError], deleter: &[OpError]) {
    let mut all: BTreeSet<&OpError> = BTreeSet::new();
    all.extend(scanner);
    all.extend(deleter);

    if all.is_empty() {
        return;
    }

    println!("{}", style("Errors:").yellow().bold());

    let mut current = None;
    for err in all {
        if current != Some(err.code) {
            println!(
                "  Code {} - {}",
                err.code,
                std::io::Error::from_raw_os_error(err.code)
            );
            current = Some(err.code);
        }
        println!("    {} ({})", err.args, err.func);
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Format a duration as a short human-readable string
pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{:.0} ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        let mins = (secs / 60.0).floor();
        format!("{}m {:.0}s", mins, secs - mins * 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250 ms");
        assert_eq!(format_elapsed(Duration::from_secs_f64(2.34)), "2.3s");
        assert_eq!(format_elapsed(Duration::from_secs(95)), "1m 35s");
    }
}
