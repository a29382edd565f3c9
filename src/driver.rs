//! Experiment drivers.
//!
//! Each experiment has one reduction policy, fixed here and named in its
//! output. The calibration is passed in so every run of a process converts
//! with the same factor.

use crate::contention::{run_contention, ContentionSample};
use crate::error::{BenchError, Result};
use crate::output::format_duration_ns;
use crate::ping_pong::{run_ping_pong, PingPongTrial};
use crate::stats::{reduce, ReductionPolicy, SampleSeries, Summary};
use crate::timing::{CycleCalibration, CycleCounter};
use crate::BenchmarkConfig;
use serde::Serialize;

/// Contention runs are whole-benchmark estimates; trim both tails
pub const CONTENTION_POLICY: ReductionPolicy = ReductionPolicy::InterquartileMean;

/// Ping-pong trials are individual handshakes; take the median
pub const PING_PONG_POLICY: ReductionPolicy = ReductionPolicy::Median;

/// Outcome of the repeated contention benchmark
#[derive(Debug, Clone, Serialize)]
pub struct ContentionReport {
    /// Raw phase timings, one per run
    pub runs: Vec<ContentionSample>,
    /// Per-operation cost of each run in nanoseconds, sorted by reduction
    pub per_op_ns: SampleSeries,
    /// Reduction of `per_op_ns` under [`CONTENTION_POLICY`]
    pub summary: Summary,
    /// Runs whose own estimate came out negative
    pub noise_dominated_runs: usize,
}

impl ContentionReport {
    /// Reduced cost is negative: noise exceeds the signal
    pub fn is_noise_dominated(&self) -> bool {
        self.summary.value < 0.0
    }
}

/// Outcome of the ping-pong benchmark
#[derive(Debug, Clone, Serialize)]
pub struct PingPongReport {
    pub trials: Vec<PingPongTrial>,
    /// One-way estimates in nanoseconds
    pub one_way_ns: SampleSeries,
    /// Reduction of `one_way_ns` under [`PING_PONG_POLICY`]
    pub summary: Summary,
    /// Same reduction over the raw cycle estimates
    pub cycles_summary: Summary,
    /// Trials dropped because the responder's clock read behind the initiator's
    pub skewed_trials: usize,
}

/// Run the contention benchmark `config.runs` times and reduce
pub fn run_contention_experiment<C: CycleCounter + ?Sized>(
    config: &BenchmarkConfig,
    counter: &C,
    calibration: &CycleCalibration,
) -> Result<ContentionReport> {
    config.validate()?;

    log::info!(
        "Contention: {} threads, {} increments per phase, {} runs",
        config.threads,
        config.iterations,
        config.runs
    );

    let mut runs = Vec::with_capacity(config.runs);
    let mut per_op_ns = SampleSeries::with_capacity(config.runs);
    let mut noise_dominated_runs = 0;

    for run in 0..config.runs {
        let sample = run_contention(config, counter)?;
        let cost_ns = sample.per_op_ns(calibration);

        if sample.is_noise_dominated() {
            noise_dominated_runs += 1;
            log::warn!(
                "Run {}/{}: negative cost {:.2} ns/op, baselines exceed the contended phase",
                run + 1,
                config.runs,
                cost_ns
            );
        } else {
            log::debug!(
                "Run {}/{}: {:.2} ns/op (phase M {})",
                run + 1,
                config.runs,
                cost_ns,
                format_duration_ns(calibration.cycles_to_ns_f64(sample.multi_cycles as f64))
            );
        }

        per_op_ns.push(cost_ns);
        runs.push(sample);
    }

    let summary = reduce(&mut per_op_ns, CONTENTION_POLICY)?;
    if summary.value < 0.0 {
        log::warn!(
            "Reduced contention cost is negative ({:.2} ns); measurement noise exceeds the signal",
            summary.value
        );
    }

    Ok(ContentionReport {
        runs,
        per_op_ns,
        summary,
        noise_dominated_runs,
    })
}

/// Run the ping-pong trials and reduce the one-way estimates
pub fn run_ping_pong_experiment<C: CycleCounter + ?Sized>(
    config: &BenchmarkConfig,
    counter: &C,
    calibration: &CycleCalibration,
) -> Result<PingPongReport> {
    log::info!(
        "Ping-pong: {} trials ({} warmup), {:?} layout",
        config.trials,
        config.warmup_trials,
        config.slot_layout
    );

    let trials = run_ping_pong(config, counter)?;

    let mut one_way_ns = SampleSeries::with_capacity(trials.len());
    let mut one_way_cycles = SampleSeries::with_capacity(trials.len());
    let mut skewed_trials = 0;

    for trial in &trials {
        match trial.one_way_cycles() {
            Some(cycles) => {
                one_way_cycles.push(cycles as f64);
                one_way_ns.push(calibration.cycles_to_ns_f64(cycles as f64));
            }
            None => skewed_trials += 1,
        }
    }

    if skewed_trials > 0 {
        log::warn!(
            "{} of {} trials excluded: responder timestamp behind initiator (counter skew)",
            skewed_trials,
            trials.len()
        );
    }

    if one_way_ns.is_empty() {
        return Err(BenchError::AllTrialsSkewed {
            trials: trials.len(),
        });
    }

    let summary = reduce(&mut one_way_ns, PING_PONG_POLICY)?;
    let cycles_summary = reduce(&mut one_way_cycles, PING_PONG_POLICY)?;

    log::info!(
        "Median one-way estimate: {:.0} cycles ({})",
        cycles_summary.value,
        format_duration_ns(summary.value)
    );

    Ok(PingPongReport {
        trials,
        one_way_ns,
        summary,
        cycles_summary,
        skewed_trials,
    })
}
