//! Round-robin atomic contention benchmark.
//!
//! `T` workers take strict turns on one shared counter: worker `i` may act only
//! when `gate % T == i`, increments the counter, then advances the gate. Every
//! increment therefore pulls the counter's cache line to a different core.
//!
//! Three phases run over the same `N`:
//! - **M**: the round-robin protocol across `T` threads
//! - **S**: one thread doing `N` uncontended atomic increments
//! - **R**: one thread doing `N` shared reads each followed by an increment
//!
//! `(M - S - R) / N` approximates the per-operation cost of moving the line.

use crate::error::{BenchError, Result};
use crate::platform::pin_current_thread;
use crate::timing::{CycleCalibration, CycleCounter};
use crate::{BenchmarkConfig, CacheAligned};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

/// Shared turn counter granting exclusive, rotating access
#[derive(Debug, Default)]
pub struct RoundRobinGate {
    turn: CacheAligned<AtomicU32>,
}

impl RoundRobinGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `thread_id` owns turn `turn` among `threads` workers
    #[inline(always)]
    pub fn is_turn(turn: u32, thread_id: u32, threads: u32) -> bool {
        turn % threads == thread_id
    }

    #[inline(always)]
    pub fn current(&self) -> u32 {
        self.turn.load(Ordering::Acquire)
    }

    /// Spin until it is `thread_id`'s turn
    #[inline(always)]
    pub fn wait_turn(&self, thread_id: u32, threads: u32) {
        while !Self::is_turn(self.current(), thread_id, threads) {
            std::hint::spin_loop();
        }
    }

    /// Hand the turn to the next worker
    #[inline(always)]
    pub fn advance(&self) {
        self.turn.fetch_add(1, Ordering::AcqRel);
    }

    pub fn reset(&self) {
        self.turn.store(0, Ordering::Release);
    }
}

/// Shared state for one contention run; both fields start at zero
#[derive(Debug, Default)]
pub struct ContentionState {
    counter: CacheAligned<AtomicU32>,
    gate: RoundRobinGate,
}

impl ContentionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current shared-counter tally
    pub fn counter_value(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn gate(&self) -> &RoundRobinGate {
        &self.gate
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::Release);
        self.gate.reset();
    }
}

/// What one round-robin worker observed during phase M
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTally {
    /// Increments performed
    pub increments: u32,
    /// Increments whose prior counter value belonged to another worker's turn
    pub out_of_turn: u32,
}

/// Wait/Act loop of worker `thread_id`.
///
/// Increment `k` of the shared counter belongs to worker `k % threads`; the
/// value returned by `fetch_add` tells the worker which increment it made.
fn round_robin_worker(
    state: &ContentionState,
    quota: u32,
    thread_id: u32,
    threads: u32,
) -> WorkerTally {
    let mut tally = WorkerTally::default();
    for _ in 0..quota {
        state.gate.wait_turn(thread_id, threads);
        let prev = state.counter.fetch_add(1, Ordering::SeqCst);
        state.gate.advance();

        tally.increments += 1;
        if !RoundRobinGate::is_turn(prev, thread_id, threads) {
            tally.out_of_turn += 1;
        }
    }
    tally
}

/// Run `iterations` increments round-robin across `threads` workers.
///
/// Returns per-worker tallies in worker order.
pub fn run_round_robin(
    state: &ContentionState,
    threads: u32,
    iterations: u32,
    config: &BenchmarkConfig,
) -> Result<Vec<WorkerTally>> {
    let quota = iterations / threads;

    thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|thread_id| {
                let core = config.core_for(thread_id as usize);
                s.spawn(move || {
                    pin_current_thread(core);
                    round_robin_worker(state, quota, thread_id, threads)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(BenchError::from_panic))
            .collect()
    })
}

/// Phase S body: uncontended atomic increments
#[inline(never)]
pub fn increment_single_thread(counter: &AtomicU32, iterations: u32) {
    for _ in 0..iterations {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Phase R body: read the shared gate, then increment it
#[inline(never)]
pub fn emulate_shared_reads_writes(gate: &RoundRobinGate, iterations: u32) {
    for _ in 0..iterations {
        std::hint::black_box(gate.current());
        gate.advance();
    }
}

/// Raw phase timings of one contention run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentionSample {
    pub threads: u32,
    pub iterations: u32,
    /// Phase M elapsed cycles (includes thread creation and join)
    pub multi_cycles: u64,
    /// Phase S elapsed cycles
    pub single_cycles: u64,
    /// Phase R elapsed cycles
    pub read_write_cycles: u64,
    /// Shared counter after phase M
    pub final_count: u32,
    /// What each worker observed in phase M
    pub per_thread: Vec<WorkerTally>,
}

impl ContentionSample {
    /// `(M - S - R) / N` in cycles; negative when noise exceeds the signal
    pub fn per_op_cycles(&self) -> f64 {
        (self.multi_cycles as f64 - self.single_cycles as f64 - self.read_write_cycles as f64)
            / self.iterations as f64
    }

    pub fn per_op_ns(&self, calibration: &CycleCalibration) -> f64 {
        calibration.cycles_to_ns_f64(self.per_op_cycles())
    }

    /// Baselines outweigh the contended phase; the run carries no usable signal
    pub fn is_noise_dominated(&self) -> bool {
        self.per_op_cycles() < 0.0
    }
}

fn check_tally(phase: &'static str, expected: u32, actual: u32) -> Result<()> {
    if expected != actual {
        return Err(BenchError::LostIncrements {
            phase,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Every worker did exactly `quota` increments, each on its own turn
fn check_schedule(quota: u32, per_thread: &[WorkerTally]) -> Result<()> {
    for (worker, tally) in per_thread.iter().enumerate() {
        if tally.increments != quota {
            return Err(BenchError::UnfairSchedule {
                thread: worker as u32,
                expected: quota,
                actual: tally.increments,
            });
        }
        if tally.out_of_turn != 0 {
            return Err(BenchError::OutOfTurn {
                thread: worker as u32,
                increments: tally.out_of_turn,
            });
        }
    }
    Ok(())
}

/// Run the three phases once with fresh shared state
pub fn run_contention<C: CycleCounter + ?Sized>(
    config: &BenchmarkConfig,
    counter: &C,
) -> Result<ContentionSample> {
    config.validate()?;

    let threads = config.threads;
    let iterations = config.iterations;
    let quota = iterations / threads;
    let state = ContentionState::new();

    // Phase M
    let start = counter.read();
    let per_thread = run_round_robin(&state, threads, iterations, config)?;
    let end = counter.read();
    let multi_cycles = end.wrapping_sub(start);

    let final_count = state.counter_value();
    check_tally("multithreaded", iterations, final_count)?;
    check_schedule(quota, &per_thread)?;

    // Phase S
    state.reset();
    let start = counter.read();
    increment_single_thread(&state.counter, iterations);
    let end = counter.read();
    let single_cycles = end.wrapping_sub(start);
    check_tally("single-threaded", iterations, state.counter_value())?;

    // Phase R
    state.gate.reset();
    let start = counter.read();
    emulate_shared_reads_writes(&state.gate, iterations);
    let end = counter.read();
    let read_write_cycles = end.wrapping_sub(start);

    let sample = ContentionSample {
        threads,
        iterations,
        multi_cycles,
        single_cycles,
        read_write_cycles,
        final_count,
        per_thread,
    };

    log::debug!(
        "Contention run: M={} S={} R={} cycles, {:.2} cycles/op",
        sample.multi_cycles,
        sample.single_cycles,
        sample.read_write_cycles,
        sample.per_op_cycles()
    );

    Ok(sample)
}
