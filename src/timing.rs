//! Cycle counting and calibration.
//!
//! Provides:
//! - [`CycleCounter`]: the single "read hardware cycle counter" primitive
//! - RDTSCP-based [`Tsc`] for x86_64, monotonic-clock fallback elsewhere
//! - [`SimulatedCounter`]: deterministic stepping counter for tests and dry runs
//! - Calibration of cycles against wall-clock time (sleep or busy-wait)

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lowest accepted cycles-per-nanosecond factor (a 1 MHz counter).
pub const MIN_CYCLES_PER_NS: f64 = 1e-3;

/// Source of monotonically increasing cycle timestamps.
///
/// Implementations must be cheap and must not reorder the read with respect
/// to preceding instructions, otherwise interval measurements are corrupted.
pub trait CycleCounter: Send + Sync {
    /// Read the current cycle count
    fn read(&self) -> u64;
}

/// Wall-clock source used by busy-wait calibration
pub trait WallClock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin
    fn now_ns(&self) -> u64;
}

/// RDTSCP with serialization.
///
/// RDTSCP waits for all previous instructions to complete before reading,
/// which a plain RDTSC does not.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn rdtscp() -> u64 {
    let mut aux: u32 = 0;
    unsafe { core::arch::x86_64::__rdtscp(&mut aux) }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn rdtscp() -> u64 {
    use std::sync::OnceLock;

    // Fallback: nanoseconds since first use (less precise, no cycle semantics)
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    std::sync::atomic::fence(Ordering::SeqCst);
    // +1 keeps the fallback clear of the zero "not signaled" sentinel
    origin.elapsed().as_nanos() as u64 + 1
}

/// Serializing fence before a timing measurement
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn serialize() {
    unsafe {
        core::arch::x86_64::_mm_mfence();
        core::arch::x86_64::_mm_lfence();
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn serialize() {
    std::sync::atomic::fence(Ordering::SeqCst);
}

/// Hardware timestamp counter read through RDTSCP
#[derive(Debug, Clone, Copy, Default)]
pub struct Tsc;

impl CycleCounter for Tsc {
    #[inline(always)]
    fn read(&self) -> u64 {
        rdtscp()
    }
}

/// `Instant`-based wall clock
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for MonotonicClock {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Deterministic counter that advances by a fixed step on every read.
///
/// It doubles as a [`WallClock`] running at `cycles_per_ns`, so calibrating
/// against itself yields exactly that rate. Start values must be non-zero
/// for ping-pong use, where zero means "not yet signaled".
#[derive(Debug)]
pub struct SimulatedCounter {
    ticks: AtomicU64,
    step: u64,
    cycles_per_ns: u64,
}

impl SimulatedCounter {
    /// Counter whose first read returns `start`, then `start + step`, ...
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            ticks: AtomicU64::new(start),
            step,
            cycles_per_ns: 1,
        }
    }

    /// Set the rate reported through [`WallClock::now_ns`]
    pub fn with_cycles_per_ns(mut self, cycles_per_ns: u64) -> Self {
        self.cycles_per_ns = cycles_per_ns.max(1);
        self
    }

    /// Value the next read will return
    pub fn peek(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl CycleCounter for SimulatedCounter {
    fn read(&self) -> u64 {
        self.ticks.fetch_add(self.step, Ordering::SeqCst)
    }
}

impl WallClock for SimulatedCounter {
    fn now_ns(&self) -> u64 {
        self.peek() / self.cycles_per_ns
    }
}

/// How the cycle-to-nanosecond factor is derived
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CalibrationStrategy {
    /// Count cycles across an OS sleep of known length
    Sleep { duration: Duration },
    /// Spin until `target_cycles` have elapsed and time that with the wall clock
    BusyWait { target_cycles: u64 },
}

impl Default for CalibrationStrategy {
    fn default() -> Self {
        CalibrationStrategy::Sleep {
            duration: Duration::from_secs(10),
        }
    }
}

/// Calibration result, computed once per process and then only read
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CycleCalibration {
    /// Counter frequency in Hz
    pub freq_hz: f64,
    /// Nanoseconds per cycle
    pub ns_per_cycle: f64,
    /// Cycles per nanosecond
    pub cycles_per_ns: f64,
    /// Cost of two back-to-back counter reads (cycles)
    pub overhead_cycles: u64,
}

impl CycleCalibration {
    /// Build a calibration from `cycles` counted over `elapsed_ns`.
    ///
    /// Fails with [`BenchError::DegenerateCalibration`] if the factor is not
    /// finite or is below [`MIN_CYCLES_PER_NS`].
    pub fn from_measurement(cycles: u64, elapsed_ns: u64) -> Result<Self> {
        let cycles_per_ns = cycles as f64 / elapsed_ns as f64;
        if !cycles_per_ns.is_finite() || cycles_per_ns < MIN_CYCLES_PER_NS {
            return Err(BenchError::DegenerateCalibration {
                cycles,
                elapsed_ns,
                cycles_per_ns,
            });
        }

        Ok(Self {
            freq_hz: cycles_per_ns * 1e9,
            ns_per_cycle: elapsed_ns as f64 / cycles as f64,
            cycles_per_ns,
            overhead_cycles: 0,
        })
    }

    fn with_overhead(mut self, overhead_cycles: u64) -> Self {
        self.overhead_cycles = overhead_cycles;
        self
    }

    /// Convert cycles to nanoseconds
    #[inline(always)]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (cycles as f64 / self.cycles_per_ns) as u64
    }

    /// Convert a possibly negative cycle interval to nanoseconds
    #[inline(always)]
    pub fn cycles_to_ns_f64(&self, cycles: f64) -> f64 {
        cycles / self.cycles_per_ns
    }

    /// Convert nanoseconds to cycles
    #[inline(always)]
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        ((ns as f64) * self.cycles_per_ns) as u64
    }
}

/// Derive the cycle-to-nanosecond factor.
///
/// Call once per process and pass the result to every benchmark; recomputing
/// it per benchmark makes runs incomparable.
pub fn calibrate<C, W>(
    counter: &C,
    clock: &W,
    strategy: &CalibrationStrategy,
) -> Result<CycleCalibration>
where
    C: CycleCounter + ?Sized,
    W: WallClock + ?Sized,
{
    let (cycles, elapsed_ns) = match strategy {
        CalibrationStrategy::Sleep { duration } => {
            serialize();
            let start = counter.read();
            std::thread::sleep(*duration);
            let end = counter.read();
            (end.wrapping_sub(start), duration.as_nanos() as u64)
        }
        CalibrationStrategy::BusyWait { target_cycles } => {
            serialize();
            let start = counter.read();
            let wall_start = clock.now_ns();

            let mut now = counter.read();
            while now.wrapping_sub(start) < *target_cycles {
                std::hint::spin_loop();
                now = counter.read();
            }

            let wall_end = clock.now_ns();
            (now.wrapping_sub(start), wall_end.saturating_sub(wall_start))
        }
    };

    let calibration = CycleCalibration::from_measurement(cycles, elapsed_ns)?;
    let overhead = measure_counter_overhead(counter);

    log::info!(
        "Calibrated counter: {:.3} cycles/ns ({:.3} GHz), read overhead {} cycles",
        calibration.cycles_per_ns,
        calibration.freq_hz / 1e9,
        overhead
    );

    Ok(calibration.with_overhead(overhead))
}

/// Minimum cycles consumed by two back-to-back counter reads
pub fn measure_counter_overhead<C: CycleCounter + ?Sized>(counter: &C) -> u64 {
    let iterations = 10_000;
    let mut min_overhead = u64::MAX;

    // Warmup
    for _ in 0..1_000 {
        let start = counter.read();
        let end = counter.read();
        std::hint::black_box(end.wrapping_sub(start));
    }

    for _ in 0..iterations {
        serialize();
        let start = counter.read();
        let end = counter.read();

        let overhead = end.wrapping_sub(start);
        if overhead < min_overhead {
            min_overhead = overhead;
        }
    }

    min_overhead
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tsc_monotonic() {
        let a = Tsc.read();
        std::thread::sleep(Duration::from_micros(1));
        let b = Tsc.read();
        assert!(b > a, "cycle counter should be monotonically increasing");
    }

    #[test]
    fn test_busy_wait_calibration_real_counter() {
        let cal = calibrate(
            &Tsc,
            &MonotonicClock::new(),
            &CalibrationStrategy::BusyWait {
                target_cycles: 50_000_000,
            },
        )
        .expect("calibration on real hardware");

        assert!(cal.cycles_per_ns.is_finite());
        assert!(cal.cycles_per_ns > 0.0);
        assert!(cal.ns_per_cycle > 0.0);
    }

    #[test]
    fn test_simulated_counter_steps() {
        let counter = SimulatedCounter::new(100, 10);
        assert_eq!(counter.read(), 100);
        assert_eq!(counter.read(), 110);
        assert_eq!(counter.peek(), 120);
    }

    #[test]
    fn test_busy_wait_exact_ratio() {
        let counter = SimulatedCounter::new(3_000, 3).with_cycles_per_ns(3);
        let cal = calibrate(
            &counter,
            &counter,
            &CalibrationStrategy::BusyWait {
                target_cycles: 300_000,
            },
        )
        .unwrap();

        let rel = (cal.cycles_per_ns - 3.0).abs() / 3.0;
        assert!(rel < 1e-9, "expected 3 cycles/ns, got {}", cal.cycles_per_ns);
        assert_eq!(cal.overhead_cycles, 3);
    }

    #[test]
    fn test_sleep_exact_ratio() {
        let counter = SimulatedCounter::new(1_000, 2_500_000);
        let cal = calibrate(
            &counter,
            &counter,
            &CalibrationStrategy::Sleep {
                duration: Duration::from_millis(1),
            },
        )
        .unwrap();

        let rel = (cal.cycles_per_ns - 2.5).abs() / 2.5;
        assert!(rel < 1e-9, "expected 2.5 cycles/ns, got {}", cal.cycles_per_ns);
    }

    #[test]
    fn test_stalled_counter_is_degenerate() {
        let counter = SimulatedCounter::new(1_000, 0);
        let err = calibrate(
            &counter,
            &counter,
            &CalibrationStrategy::Sleep {
                duration: Duration::from_millis(1),
            },
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::DegenerateCalibration { cycles: 0, .. }));
    }

    #[test]
    fn test_zero_elapsed_is_degenerate() {
        assert!(matches!(
            CycleCalibration::from_measurement(1_000, 0),
            Err(BenchError::DegenerateCalibration { .. })
        ));
    }

    #[test]
    fn test_round_trip_conversion() {
        let cal = CycleCalibration::from_measurement(3_000_000, 1_000_000).unwrap();
        assert_eq!(cal.cycles_to_ns(3_000), 1_000);
        assert_eq!(cal.ns_to_cycles(1_000), 3_000);
        assert!((cal.cycles_to_ns_f64(-300.0) + 100.0).abs() < 1e-9);
        assert!((cal.freq_hz - 3e9).abs() < 1.0);
    }

    proptest! {
        #[test]
        fn prop_cycles_to_ns_monotonic(
            rate in 0.01f64..10.0,
            a in 0u64..u64::MAX / 2,
            b in 0u64..u64::MAX / 2,
        ) {
            let elapsed_ns = 1_000_000u64;
            let cal = CycleCalibration::from_measurement(
                (rate * elapsed_ns as f64) as u64,
                elapsed_ns,
            ).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(cal.cycles_to_ns(lo) <= cal.cycles_to_ns(hi));
        }
    }
}
