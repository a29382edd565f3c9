//! Cache-line ping-pong latency.
//!
//! Estimates how long a store on one core takes to become visible on another
//! by bouncing timestamps through a shared cache line. The reported figure is
//! half the round trip, an estimate rather than an exact one-way measurement.
//!
//! ## Running
//!
//! ```bash
//! cargo run --release --bin ping_pong_latency
//! RUST_LOG=debug cargo run --release --bin ping_pong_latency
//! ```

use anyhow::Context;
use coherence_bench::{
    calibrate, detect_platform, run_ping_pong_experiment, BenchmarkConfig, CalibrationStrategy,
    ExperimentReport, MonotonicClock, SlotLayout, Tsc,
};
use std::time::Duration;

const TRIALS: usize = 500;
const WARMUP_TRIALS: usize = 10;
const CALIBRATION_CYCLES: u64 = 1_000_000_000;
const STARTUP_DELAY: Duration = Duration::from_millis(1);

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let config = BenchmarkConfig {
        trials: TRIALS,
        warmup_trials: WARMUP_TRIALS,
        calibration: CalibrationStrategy::BusyWait {
            target_cycles: CALIBRATION_CYCLES,
        },
        startup_delay: STARTUP_DELAY,
        slot_layout: SlotLayout::SharedLine,
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

    let report = run_ping_pong_experiment(&config, &Tsc, &calibration)
        .context("running ping-pong benchmark")?;

    if log::log_enabled!(log::Level::Debug) {
        let record = ExperimentReport::new("ping_pong", &platform, &config, &calibration, &report);
        log::debug!("{}", record.to_json()?);
    }

    report.print_summary()?;
    Ok(())
}
