//! Analytic step-length solutions of the quadratic step model.
//!
//! The conjugate-gradient engine minimizes the log-likelihood along a
//! search direction. Given the quadratic model
//!
//! `L(η) ≈ a·η² + b·η + c`
//!
//! the minimizer is `η* = −b / (2a)`, which only exists for positive
//! curvature. A non-positive or non-finite `a` (for example a
//! zero-magnitude direction) yields no proposal rather than a division by
//! zero; what to do then is the engine's decision.

use nalgebra::{Matrix2, Vector2};

use super::types::{QuadraticCoefficients, StepMatrix};

/// Why a step could not be proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRejection {
    /// Curvature is zero or negative.
    NonPositiveCurvature,
    /// A coefficient is NaN or infinite.
    NonFinite,
}

impl QuadraticCoefficients {
    /// Step length minimizing the model, if the curvature is positive.
    pub fn minimizing_step(&self) -> Option<f64> {
        self.try_minimizing_step().ok()
    }

    /// Like [`QuadraticCoefficients::minimizing_step`], reporting why no step exists.
    pub fn try_minimizing_step(&self) -> Result<f64, StepRejection> {
        if !(self.a.is_finite() && self.b.is_finite()) {
            return Err(StepRejection::NonFinite);
        }
        if self.a <= 0.0 {
            return Err(StepRejection::NonPositiveCurvature);
        }
        Ok(-0.5 * self.b / self.a)
    }

    /// Predicted decrease `L(0) − L(η*)`, if a step exists.
    pub fn predicted_decrease(&self) -> Option<f64> {
        self.minimizing_step()
            .map(|eta| self.evaluate(0.0) - self.evaluate(eta))
    }
}

impl StepMatrix {
    /// Joint `(ηo, ηp)` minimizing the form, if its step block is positive definite.
    ///
    /// With `g = [B01, B02]` and `H = B[1..3, 1..3]` the form is
    /// `B00 + 2·gᵀη + ηᵀHη`, minimized at `H·η = −g`.
    pub fn minimizing_steps(&self) -> Option<Vector2<f64>> {
        let b = &self.b;
        if b.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let h = Matrix2::new(b[(1, 1)], b[(1, 2)], b[(2, 1)], b[(2, 2)]);
        let g = Vector2::new(b[(0, 1)], b[(0, 2)]);
        h.cholesky().map(|chol| -chol.solve(&g))
    }

    /// Copy with NaN and infinite entries replaced by zero.
    ///
    /// Mirrors how the engine treats a step matrix polluted by a degenerate
    /// pattern: drop the offending terms and keep going.
    pub fn sanitized(&self) -> Self {
        let mut clean = *self;
        let mut replaced = 0usize;
        for value in clean.b.iter_mut() {
            if !value.is_finite() {
                *value = 0.0;
                replaced += 1;
            }
        }
        if replaced > 0 {
            tracing::warn!(replaced, "non-finite step matrix entries set to zero");
        }
        clean
    }
}

/// Renormalization scalar for `fill_b` from the total error of the
/// current iteration: `total_error²`, or `1` for a degenerate total.
pub fn brenorm_from_error(total_error: f64) -> f64 {
    let brenorm = total_error * total_error;
    if brenorm.is_finite() && brenorm > 0.0 {
        brenorm
    } else {
        1.0
    }
}
