//! End-to-end scenarios driven by deterministic counters.

use coherence_bench::ping_pong::run_trial;
use coherence_bench::{
    calibrate, reduce, run_contention, run_contention_experiment, run_ping_pong_experiment,
    BenchError, BenchmarkConfig, CacheLineSlot, CalibrationStrategy, MonotonicClock,
    ReductionPolicy, SampleSeries, SimulatedCounter, SlotLayout, Tsc,
};
use std::time::Duration;

fn unpinned() -> BenchmarkConfig {
    BenchmarkConfig {
        cpu_affinity: None,
        startup_delay: Duration::from_micros(100),
        warmup_trials: 0,
        ..Default::default()
    }
}

#[test]
fn test_contention_two_threads_eight_increments() {
    let counter = SimulatedCounter::new(1, 1);
    let config = BenchmarkConfig {
        threads: 2,
        iterations: 8,
        ..unpinned()
    };

    let sample = run_contention(&config, &counter).unwrap();

    assert_eq!(sample.final_count, 8);
    assert_eq!(sample.per_thread.iter().map(|t| t.increments).sum::<u32>(), 8);
    assert!(sample.per_thread.iter().all(|t| t.out_of_turn == 0));
}

#[test]
fn test_reduce_five_samples() {
    let mut median_series: SampleSeries = [5.0, 1.0, 9.0, 3.0, 7.0].into_iter().collect();
    let mut iqm_series = median_series.clone();

    let median = reduce(&mut median_series, ReductionPolicy::Median).unwrap();
    let iqm = reduce(&mut iqm_series, ReductionPolicy::InterquartileMean).unwrap();

    assert_eq!(median.value, 5.0);
    assert!((iqm.value - 5.0).abs() < 1e-12, "mean of {{3, 5, 7}} is 5");
}

#[test]
fn test_calibration_known_rate() {
    for (rate, strategy) in [
        (
            4u64,
            CalibrationStrategy::BusyWait {
                target_cycles: 4_000_000,
            },
        ),
        (
            2u64,
            CalibrationStrategy::Sleep {
                duration: Duration::from_millis(2),
            },
        ),
    ] {
        let step = match strategy {
            CalibrationStrategy::BusyWait { .. } => rate,
            // One step spans the whole sleep
            CalibrationStrategy::Sleep { duration } => rate * duration.as_nanos() as u64,
        };
        let counter = SimulatedCounter::new(rate * 1_000, step).with_cycles_per_ns(rate);

        let cal = calibrate(&counter, &counter, &strategy).unwrap();

        let rel = (cal.cycles_per_ns - rate as f64).abs() / rate as f64;
        assert!(rel < 1e-9, "{:?}: got {}", strategy, cal.cycles_per_ns);
        assert!(cal.cycles_per_ns.is_finite() && cal.cycles_per_ns > 0.0);
    }
}

#[test]
fn test_degenerate_calibration_is_distinct_error() {
    let counter = SimulatedCounter::new(1_000, 0);
    let err = calibrate(
        &counter,
        &counter,
        &CalibrationStrategy::Sleep {
            duration: Duration::from_millis(1),
        },
    )
    .unwrap_err();

    assert!(matches!(err, BenchError::DegenerateCalibration { .. }));
}

#[test]
fn test_ping_pong_handshake_exact() {
    let counter = SimulatedCounter::new(1_000, 30);
    let trial = run_trial(
        &CacheLineSlot::default(),
        &counter,
        Duration::from_micros(100),
        (None, None),
    )
    .unwrap();

    assert_eq!(trial.signal_b - trial.signal_a, 30);
    assert_eq!(trial.one_way_cycles(), Some(15));
}

#[test]
fn test_full_pipeline_on_hardware_counter() {
    let config = BenchmarkConfig {
        threads: 2,
        iterations: 20_000,
        runs: 4,
        trials: 16,
        slot_layout: SlotLayout::SplitLines,
        calibration: CalibrationStrategy::BusyWait {
            target_cycles: 20_000_000,
        },
        ..unpinned()
    };

    let cal = calibrate(&Tsc, &MonotonicClock::new(), &config.calibration).unwrap();

    let contention = run_contention_experiment(&config, &Tsc, &cal).unwrap();
    assert_eq!(contention.runs.len(), 4);
    assert!(contention.runs.iter().all(|r| r.final_count == 20_000));
    assert!(contention.summary.value.is_finite());

    let ping_pong = run_ping_pong_experiment(&config, &Tsc, &cal).unwrap();
    assert_eq!(ping_pong.trials.len(), 16);
    assert_eq!(ping_pong.summary.count + ping_pong.skewed_trials, 16);
}
