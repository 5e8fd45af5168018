//! Kernel configuration.

use serde::{Deserialize, Serialize};

/// How `error_reduce` normalizes the per-pattern LLerr sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorNormalization {
    /// Plain sum over the frame.
    #[default]
    Sum,
    /// Sum divided by the number of pixels in a frame.
    PixelCount,
    /// Sum divided by the pattern's total weight.
    WeightMass,
}

/// Which implementation executes the kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Sequential, row-at-a-time reference.
    Reference,
    /// Batched rayon implementation with segmented reductions.
    Parallel,
    /// Parallel when more than one worker thread is available.
    #[default]
    Auto,
}

/// Configuration shared by both backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Positive floor applied to the model intensity before it enters the
    /// Poisson terms (`1 - I/Imodel`, `ln Imodel`).
    pub intensity_floor: f64,

    /// Normalization applied by `error_reduce`.
    pub error_normalization: ErrorNormalization,

    /// Pixels per leaf of the parallel reduction tree.
    pub reduction_chunk: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            intensity_floor: 1e-6,
            error_normalization: ErrorNormalization::Sum,
            reduction_chunk: 4096,
        }
    }
}

impl KernelConfig {
    /// Configuration with a custom intensity floor.
    pub fn with_intensity_floor(intensity_floor: f64) -> Self {
        Self {
            intensity_floor,
            ..Default::default()
        }
    }

    /// Configuration with a custom error normalization.
    pub fn with_error_normalization(error_normalization: ErrorNormalization) -> Self {
        Self {
            error_normalization,
            ..Default::default()
        }
    }

    /// Floor actually used; non-positive or non-finite values fall back to the default.
    pub(crate) fn floor(&self) -> f64 {
        if self.intensity_floor.is_finite() && self.intensity_floor > 0.0 {
            self.intensity_floor
        } else {
            Self::default().intensity_floor
        }
    }

    pub(crate) fn chunk(&self) -> usize {
        self.reduction_chunk.max(1)
    }
}
