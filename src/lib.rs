//! # Coherence Benchmarks
//!
//! Two microbenchmarks of cross-core cost on a multi-core machine:
//!
//! - **ping-pong**: cycles for one core's store to become visible to another
//!   core through the cache-coherence protocol
//! - **contention**: per-operation overhead of atomic increments when a strict
//!   round-robin forces the cache line to migrate on every increment
//!
//! ## Methodology
//!
//! - **Cycle timing**: serializing RDTSCP reads, calibrated once per process
//! - **Spin synchronization**: threads hand off through acquire/release
//!   atomics only; blocking primitives would swamp sub-microsecond latencies
//! - **Baseline subtraction**: contention cost is the multithreaded phase minus
//!   single-threaded increment and shared read/write baselines
//! - **Robust reduction**: median or interquartile mean, fixed per experiment

#[cfg(not(all(target_has_atomic = "32", target_has_atomic = "64")))]
compile_error!("coherence-bench requires native 32- and 64-bit atomics");

pub mod contention;
pub mod driver;
pub mod error;
pub mod output;
pub mod ping_pong;
pub mod platform;
pub mod stats;
pub mod timing;

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::time::Duration;

// Re-exports for convenience
pub use contention::{
    run_contention, ContentionSample, ContentionState, RoundRobinGate, WorkerTally,
};
pub use driver::{
    run_contention_experiment, run_ping_pong_experiment, ContentionReport, PingPongReport,
};
pub use error::{BenchError, Result};
pub use output::{format_duration_ns, ExperimentReport};
pub use ping_pong::{run_ping_pong, CacheLineSlot, PingPongTrial, SignalSlot, SplitSlot};
pub use platform::{detect_platform, has_constant_tsc, has_rdtscp, set_cpu_affinity, PlatformInfo};
pub use stats::{reduce, ReductionPolicy, SampleSeries, Summary};
pub use timing::{
    calibrate, CalibrationStrategy, CycleCalibration, CycleCounter, MonotonicClock,
    SimulatedCounter, Tsc, WallClock,
};

/// Cache line size assumed for alignment (x86_64 and most aarch64 parts)
pub const CACHE_LINE_SIZE: usize = 64;

/// Value padded out to its own cache line
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Placement of the two ping-pong signal words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SlotLayout {
    /// Both signals in one 64-byte block: every access moves the same line
    #[default]
    SharedLine,
    /// Each signal on its own line
    SplitLines,
}

/// Benchmark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Round-robin worker threads `T`
    pub threads: u32,
    /// Total increments `N` per contention phase
    pub iterations: u32,
    /// Independent contention runs reduced by the driver
    pub runs: usize,
    /// Measured ping-pong trials
    pub trials: usize,
    /// Ping-pong trials run and discarded before measuring
    pub warmup_trials: usize,
    /// How the cycle counter is calibrated
    pub calibration: CalibrationStrategy,
    /// Delay between starting ping-pong thread A and thread B
    pub startup_delay: Duration,
    /// Ping-pong signal placement
    pub slot_layout: SlotLayout,
    /// CPU cores to pin workers to; worker `i` gets `cores[i % len]`
    pub cpu_affinity: Option<Vec<usize>>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            iterations: 1 << 24,
            runs: 10,
            trials: 500,
            warmup_trials: 10,
            calibration: CalibrationStrategy::default(),
            startup_delay: Duration::from_millis(1),
            slot_layout: SlotLayout::SharedLine,
            cpu_affinity: Some(vec![0, 1]),
        }
    }
}

impl BenchmarkConfig {
    /// Reject configurations the benchmarks cannot run faithfully
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(BenchError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.iterations == 0 {
            return Err(BenchError::InvalidConfig(
                "iteration count must be at least 1".to_string(),
            ));
        }
        if self.iterations % self.threads != 0 {
            return Err(BenchError::InvalidConfig(format!(
                "iterations ({}) must be divisible by threads ({})",
                self.iterations, self.threads
            )));
        }
        if self.runs == 0 {
            return Err(BenchError::InvalidConfig("runs must be at least 1".to_string()));
        }
        if self.trials == 0 {
            return Err(BenchError::InvalidConfig(
                "trials must be at least 1".to_string(),
            ));
        }
        if matches!(&self.cpu_affinity, Some(cores) if cores.is_empty()) {
            return Err(BenchError::InvalidConfig(
                "cpu_affinity must list at least one core".to_string(),
            ));
        }
        Ok(())
    }

    /// Core for worker `index`, if pinning is configured
    pub fn core_for(&self, index: usize) -> Option<usize> {
        self.cpu_affinity
            .as_ref()
            .filter(|cores| !cores.is_empty())
            .map(|cores| cores[index % cores.len()])
    }
}
