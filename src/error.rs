//! Error type for the coherence benchmarks.
//!
//! There is no retry path anywhere in the crate: a failed run is reported and
//! the caller decides whether to repeat the whole experiment.

use thiserror::Error;

/// Main error type for benchmark operations
#[derive(Debug, Error)]
pub enum BenchError {
    /// Configuration rejected by [`crate::BenchmarkConfig::validate`]
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Calibration produced a factor that cannot be used for conversion.
    ///
    /// Kept distinct from every measurement result: converting with a broken
    /// factor would corrupt all downstream numbers.
    #[error("Degenerate calibration: {cycles} cycles in {elapsed_ns} ns, {cycles_per_ns}/ns")]
    DegenerateCalibration {
        cycles: u64,
        elapsed_ns: u64,
        cycles_per_ns: f64,
    },

    /// The shared counter did not end at the expected tally
    #[error("Phase {phase}: expected {expected} increments, counter holds {actual}")]
    LostIncrements {
        phase: &'static str,
        expected: u32,
        actual: u32,
    },

    /// A round-robin worker did not perform its exact quota
    #[error("Worker {thread} performed {actual} increments, expected {expected}")]
    UnfairSchedule {
        thread: u32,
        expected: u32,
        actual: u32,
    },

    /// A round-robin worker incremented the counter outside its turn
    #[error("Worker {thread} made {increments} increments out of turn")]
    OutOfTurn { thread: u32, increments: u32 },

    /// Every ping-pong trial read the responder's clock behind the initiator's
    #[error("All {trials} ping-pong trials skewed: responder counter behind initiator")]
    AllTrialsSkewed { trials: usize },

    /// Reduction requested on a series with no samples
    #[error("Cannot reduce an empty sample series")]
    EmptySamples,

    /// A benchmark worker thread panicked before it could be joined
    #[error("Worker thread panicked: {0}")]
    ThreadPanicked(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, BenchError>;

impl BenchError {
    /// Build a [`BenchError::ThreadPanicked`] from a join payload
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        BenchError::ThreadPanicked(message)
    }
}
