//! Benchmark output.
//!
//! Supports:
//! - Plain-text summary lines on stdout, one experiment per process
//! - A JSON report carrying platform, config, calibration and raw samples

use crate::driver::{ContentionReport, PingPongReport};
use crate::platform::PlatformInfo;
use crate::timing::CycleCalibration;
use crate::BenchmarkConfig;
use serde::Serialize;
use std::io::{self, Write};

/// Complete record of one experiment invocation
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport<'a, R: Serialize> {
    /// Report version for forward compatibility
    pub version: &'static str,
    /// Timestamp when report was generated
    pub generated_at: String,
    /// Experiment name ("contention" or "ping_pong")
    pub experiment: &'static str,
    pub platform: &'a PlatformInfo,
    pub config: &'a BenchmarkConfig,
    pub calibration: &'a CycleCalibration,
    pub result: &'a R,
}

impl<'a, R: Serialize> ExperimentReport<'a, R> {
    /// Create a new report with current timestamp
    pub fn new(
        experiment: &'static str,
        platform: &'a PlatformInfo,
        config: &'a BenchmarkConfig,
        calibration: &'a CycleCalibration,
        result: &'a R,
    ) -> Self {
        Self {
            version: "1.0.0",
            generated_at: chrono::Utc::now().to_rfc3339(),
            experiment,
            platform,
            config,
            calibration,
            result,
        }
    }

    /// Render as a single JSON line
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ContentionReport {
    /// Write the summary lines
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let summary = &self.summary;
        writeln!(
            out,
            "Reduction: {} of per-operation cost (ns) over {} runs",
            summary.policy.label(),
            summary.count
        )?;
        writeln!(out)?;
        writeln!(
            out,
            "The Interquartile range is {:.0}",
            summary.iqr.unwrap_or_default()
        )?;
        writeln!(out, "The Average of Interquartile range is {:.3}", summary.value)?;

        if self.is_noise_dominated() {
            writeln!(
                out,
                "Note: negative cost means measurement noise exceeds the contention signal"
            )?;
        }
        Ok(())
    }

    /// Print summary to stdout
    pub fn print_summary(&self) -> io::Result<()> {
        self.write_summary(&mut io::stdout().lock())
    }
}

impl PingPongReport {
    /// Write the summary lines
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let summary = &self.summary;
        writeln!(
            out,
            "Reduction: {} of one-way latency (ns) over {} trials",
            summary.policy.label(),
            summary.count
        )?;
        writeln!(out, "The median is {:.0}", summary.value)?;
        writeln!(
            out,
            "Note: one-way latency is estimated as half the measured round trip"
        )?;

        if self.skewed_trials > 0 {
            writeln!(
                out,
                "Note: {} trials excluded for cross-core counter skew",
                self.skewed_trials
            )?;
        }
        Ok(())
    }

    /// Print summary to stdout
    pub fn print_summary(&self) -> io::Result<()> {
        self.write_summary(&mut io::stdout().lock())
    }
}

/// Format duration in human-readable form
pub fn format_duration_ns(ns: f64) -> String {
    let magnitude = ns.abs();
    if magnitude < 1000.0 {
        format!("{:.1} ns", ns)
    } else if magnitude < 1_000_000.0 {
        format!("{:.2} µs", ns / 1000.0)
    } else if magnitude < 1_000_000_000.0 {
        format!("{:.2} ms", ns / 1_000_000.0)
    } else {
        format!("{:.2} s", ns / 1_000_000_000.0)
    }
}
