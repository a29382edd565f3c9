//! Round-robin atomic contention cost.
//!
//! Estimates the per-increment cost of forcing a counter's cache line to
//! migrate between cores on every operation, after subtracting uncontended
//! increment and shared read/write baselines.
//!
//! ## Running
//!
//! ```bash
//! cargo run --release --bin contention_cost
//! RUST_LOG=debug cargo run --release --bin contention_cost   # per-run detail + JSON report
//! ```

use anyhow::Context;
use coherence_bench::{
    calibrate, detect_platform, run_contention_experiment, BenchmarkConfig, CalibrationStrategy,
    ExperimentReport, MonotonicClock, Tsc,
};
use std::time::Duration;

const THREADS: u32 = 2;
const ITERATIONS: u32 = 1 << 24;
const RUNS: usize = 10;
const CALIBRATION_SLEEP: Duration = Duration::from_secs(10);

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let config = BenchmarkConfig {
        threads: THREADS,
        iterations: ITERATIONS,
        runs: RUNS,
        calibration: CalibrationStrategy::Sleep {
            duration: CALIBRATION_SLEEP,
        },
        ..Default::default()
    };
    config.validate()?;

    let platform = detect_platform();
    log::info!(
        "Platform: {} ({} logical cores)",
        platform.cpu.model,
        platform.cpu.logical_cores
    );
    platform.warn_on_timing_hazards();

    let calibration = calibrate(&Tsc, &MonotonicClock::new(), &config.calibration)
        .context("calibrating cycle counter")?;

    let report = run_contention_experiment(&config, &Tsc, &calibration)
        .context("running contention benchmark")?;

    if log::log_enabled!(log::Level::Debug) {
        let record = ExperimentReport::new("contention", &platform, &config, &calibration, &report);
        log::debug!("{}", record.to_json()?);
    }

    report.print_summary()?;
    Ok(())
}
