//! Per-operation timing instrumentation.
//!
//! Timings are collected when the `profiling` feature is enabled.
//! Without the feature, [`Timer`] and the [`time_op!`] macro compile to no-ops
//! and [`KernelTiming`] stays zeroed.

use serde::{Deserialize, Serialize};
#[cfg(feature = "profiling")]
use std::time::Instant;

/// Kernel operation names, as recorded in [`KernelTiming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    MakeModel,
    FloatingIntensity,
    Main,
    ErrorReduce,
    MakeA012,
    FillB,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::MakeModel => "make_model",
            Operation::FloatingIntensity => "floating_intensity",
            Operation::Main => "main",
            Operation::ErrorReduce => "error_reduce",
            Operation::MakeA012 => "make_a012",
            Operation::FillB => "fill_b",
        }
    }
}

/// Accumulated wall-clock time per kernel operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelTiming {
    pub make_model_ms: f64,
    pub floating_intensity_ms: f64,
    pub main_ms: f64,
    pub error_reduce_ms: f64,
    pub make_a012_ms: f64,
    pub fill_b_ms: f64,
    /// Number of recorded calls across all operations.
    pub calls: usize,
}

impl KernelTiming {
    pub fn record(&mut self, op: Operation, duration_ms: f64) {
        let slot = match op {
            Operation::MakeModel => &mut self.make_model_ms,
            Operation::FloatingIntensity => &mut self.floating_intensity_ms,
            Operation::Main => &mut self.main_ms,
            Operation::ErrorReduce => &mut self.error_reduce_ms,
            Operation::MakeA012 => &mut self.make_a012_ms,
            Operation::FillB => &mut self.fill_b_ms,
        };
        *slot += duration_ms;
        self.calls += 1;
    }

    pub fn total_ms(&self) -> f64 {
        self.make_model_ms
            + self.floating_intensity_ms
            + self.main_ms
            + self.error_reduce_ms
            + self.make_a012_ms
            + self.fill_b_ms
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Timer that can be enabled/disabled at compile time.
#[cfg(feature = "profiling")]
pub struct Timer {
    start: Instant,
}

#[cfg(feature = "profiling")]
impl Timer {
    #[inline]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// No-op timer when profiling is disabled.
#[cfg(not(feature = "profiling"))]
pub struct Timer;

#[cfg(not(feature = "profiling"))]
impl Timer {
    #[inline(always)]
    pub fn start() -> Self {
        Self
    }

    #[inline(always)]
    pub fn elapsed_ms(&self) -> f64 {
        0.0
    }
}

/// Time a block and record it under an [`Operation`].
///
/// `$timing` is a `parking_lot::Mutex<KernelTiming>`.
///
/// ```ignore
/// let result = time_op!(self.timing, Operation::Main, {
///     self.run_main(exit, book, weight, measured)
/// });
/// ```
#[macro_export]
macro_rules! time_op {
    ($timing:expr, $op:expr, $block:expr) => {{
        let _timer = $crate::timing::Timer::start();

        let result = $block;

        #[cfg(feature = "profiling")]
        $timing.lock().record($op, _timer.elapsed_ms());
        #[cfg(not(feature = "profiling"))]
        let _ = $op;

        result
    }};
}
