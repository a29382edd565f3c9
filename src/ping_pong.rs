//! Cache-line ping-pong latency benchmark.
//!
//! Two threads share one slot of two 64-bit signals, both zero at the start
//! of every trial (zero means "not yet signaled"):
//!
//! 1. Responder A spins on `signal_a`.
//! 2. Initiator B stores its timestamp into `signal_a` and spins on `signal_b`.
//! 3. A sees `signal_a`, stores its own timestamp into `signal_b`.
//! 4. B sees `signal_b` and records `(signal_b - signal_a) / 2`.
//!
//! Halving is a modeling approximation: it assumes the round trip splits
//! evenly and compares timestamps taken on two cores. Treat the result as an
//! estimate of one-way transfer latency, not an exact measurement.

use crate::error::{BenchError, Result};
use crate::platform::pin_current_thread;
use crate::timing::CycleCounter;
use crate::{BenchmarkConfig, CacheAligned, SlotLayout};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Pair of signal words passed between the two threads
pub trait SignalSlot: Sync {
    fn signal_a(&self) -> &AtomicU64;
    fn signal_b(&self) -> &AtomicU64;

    /// Zero both signals before a trial
    fn reset(&self) {
        self.signal_a().store(0, Ordering::Release);
        self.signal_b().store(0, Ordering::Release);
    }
}

/// Both signals in one cache-line-aligned block
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct CacheLineSlot {
    signal_a: AtomicU64,
    signal_b: AtomicU64,
}

impl SignalSlot for CacheLineSlot {
    fn signal_a(&self) -> &AtomicU64 {
        &self.signal_a
    }

    fn signal_b(&self) -> &AtomicU64 {
        &self.signal_b
    }
}

/// Each signal on its own cache line
#[derive(Debug, Default)]
pub struct SplitSlot {
    signal_a: CacheAligned<AtomicU64>,
    signal_b: CacheAligned<AtomicU64>,
}

impl SignalSlot for SplitSlot {
    fn signal_a(&self) -> &AtomicU64 {
        &self.signal_a
    }

    fn signal_b(&self) -> &AtomicU64 {
        &self.signal_b
    }
}

/// Signal values observed by the initiator at the end of one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPongTrial {
    /// Initiator timestamp
    pub signal_a: u64,
    /// Responder timestamp
    pub signal_b: u64,
}

impl PingPongTrial {
    /// Half the timestamp difference, or `None` when the responder's clock
    /// reads behind the initiator's (cross-core counter skew)
    pub fn one_way_cycles(&self) -> Option<u64> {
        self.signal_b
            .checked_sub(self.signal_a)
            .map(|round_trip| round_trip / 2)
    }
}

#[inline(never)]
fn respond<S, C>(slot: &S, counter: &C)
where
    S: SignalSlot + ?Sized,
    C: CycleCounter + ?Sized,
{
    while slot.signal_a().load(Ordering::Acquire) == 0 {
        std::hint::spin_loop();
    }
    slot.signal_b().store(counter.read(), Ordering::Release);
}

#[inline(never)]
fn initiate<S, C>(slot: &S, counter: &C) -> PingPongTrial
where
    S: SignalSlot + ?Sized,
    C: CycleCounter + ?Sized,
{
    let signal_a = counter.read();
    slot.signal_a().store(signal_a, Ordering::Release);

    let signal_b = loop {
        let value = slot.signal_b().load(Ordering::Acquire);
        if value != 0 {
            break value;
        }
        std::hint::spin_loop();
    };

    PingPongTrial { signal_a, signal_b }
}

/// Run one handshake on a freshly zeroed slot.
///
/// The responder is started first and given `startup_delay` to reach its
/// spin before the initiator starts; the delay is not part of the sample.
pub fn run_trial<S, C>(
    slot: &S,
    counter: &C,
    startup_delay: Duration,
    cores: (Option<usize>, Option<usize>),
) -> Result<PingPongTrial>
where
    S: SignalSlot + ?Sized,
    C: CycleCounter + ?Sized,
{
    slot.reset();

    thread::scope(|s| {
        let responder = s.spawn(move || {
            pin_current_thread(cores.0);
            respond(slot, counter);
        });

        thread::sleep(startup_delay);

        let initiator = s.spawn(move || {
            pin_current_thread(cores.1);
            initiate(slot, counter)
        });

        let trial = initiator.join().map_err(BenchError::from_panic)?;
        responder.join().map_err(BenchError::from_panic)?;
        Ok(trial)
    })
}

fn run_trials<S, C>(slot: &S, config: &BenchmarkConfig, counter: &C) -> Result<Vec<PingPongTrial>>
where
    S: SignalSlot,
    C: CycleCounter + ?Sized,
{
    let cores = (config.core_for(0), config.core_for(1));

    for _ in 0..config.warmup_trials {
        run_trial(slot, counter, config.startup_delay, cores)?;
    }

    let mut trials = Vec::with_capacity(config.trials);
    for index in 0..config.trials {
        let trial = run_trial(slot, counter, config.startup_delay, cores)?;
        log::trace!("Trial {}: a={} b={}", index, trial.signal_a, trial.signal_b);
        trials.push(trial);
    }
    Ok(trials)
}

/// Run warmup plus `config.trials` measured trials on the configured layout
pub fn run_ping_pong<C: CycleCounter + ?Sized>(
    config: &BenchmarkConfig,
    counter: &C,
) -> Result<Vec<PingPongTrial>> {
    config.validate()?;

    match config.slot_layout {
        SlotLayout::SharedLine => run_trials(&CacheLineSlot::default(), config, counter),
        SlotLayout::SplitLines => run_trials(&SplitSlot::default(), config, counter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{SimulatedCounter, Tsc};
    use crate::CACHE_LINE_SIZE;

    fn small_config(trials: usize, slot_layout: SlotLayout) -> BenchmarkConfig {
        BenchmarkConfig {
            trials,
            warmup_trials: 0,
            startup_delay: Duration::from_micros(100),
            slot_layout,
            cpu_affinity: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_slot_layouts() {
        assert_eq!(std::mem::align_of::<CacheLineSlot>(), CACHE_LINE_SIZE);
        assert_eq!(std::mem::size_of::<CacheLineSlot>(), CACHE_LINE_SIZE);

        let split = SplitSlot::default();
        let a = split.signal_a() as *const AtomicU64 as usize;
        let b = split.signal_b() as *const AtomicU64 as usize;
        assert!(b.abs_diff(a) >= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_reset_zeroes_signals() {
        let slot = CacheLineSlot::default();
        slot.signal_a().store(5, Ordering::Relaxed);
        slot.signal_b().store(7, Ordering::Relaxed);
        slot.reset();
        assert_eq!(slot.signal_a().load(Ordering::Relaxed), 0);
        assert_eq!(slot.signal_b().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_handshake_with_stepping_counter() {
        // Initiator reads 100, responder reads 110: (110 - 100) / 2 = 5
        let counter = SimulatedCounter::new(100, 10);
        let slot = CacheLineSlot::default();
        let trial = run_trial(&slot, &counter, Duration::from_micros(100), (None, None)).unwrap();

        assert_eq!(trial, PingPongTrial { signal_a: 100, signal_b: 110 });
        assert_eq!(trial.one_way_cycles(), Some(5));
    }

    #[test]
    fn test_consecutive_trials_reset_slot() {
        let counter = SimulatedCounter::new(1_000, 4);
        let trials = run_ping_pong(&small_config(3, SlotLayout::SplitLines), &counter).unwrap();

        assert_eq!(trials.len(), 3);
        for (i, trial) in trials.iter().enumerate() {
            let base = 1_000 + 8 * i as u64;
            assert_eq!(trial.signal_a, base);
            assert_eq!(trial.signal_b, base + 4);
            assert_eq!(trial.one_way_cycles(), Some(2));
        }
    }

    #[test]
    fn test_skewed_trial_has_no_estimate() {
        let trial = PingPongTrial {
            signal_a: 500,
            signal_b: 400,
        };
        assert_eq!(trial.one_way_cycles(), None);
    }

    #[test]
    fn test_real_counter_trials() {
        let trials = run_ping_pong(&small_config(20, SlotLayout::SharedLine), &Tsc).unwrap();
        assert_eq!(trials.len(), 20);
        assert!(trials.iter().all(|t| t.signal_a != 0 && t.signal_b != 0));
    }
}
