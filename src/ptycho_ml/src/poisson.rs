//! Per-pixel Poisson likelihood terms shared by both backends.
//!
//! Backends differ only in how they schedule frames and reduce sums; every
//! pixel-level value is produced by the functions here, so elementwise
//! outputs agree exactly and only reductions depend on summation order.
//!
//! # Stabilized error
//!
//! With `M = max(Imodel, floor)` the per-pixel error is
//!
//! `L = w·(M − I − I·ln(M/I)) = w·I·(x − ln(1 + x)),  x = M/I − 1`
//!
//! and `L = w·M` for `I = 0`. This is `w·(M − I·ln M)` shifted by a
//! model-independent constant, so its derivatives are the usual
//! `∂L/∂M = w·(1 − I/M)` and `∂²L/∂M² = w·I/M²`, while the value itself is
//! non-negative and exactly zero at `M = I`.

use std::ops::Range;

use num_complex::Complex;

use crate::buffers::{KernelBuffers, PatternFrame};
use crate::config::ErrorNormalization;
use crate::real::{abs2, re_dot, Real};
use crate::step::types::{QuadraticCoefficients, StepFrames};

/// Model intensity clamped to the positive floor.
#[inline]
pub fn clamp_model(model: f64, floor: f64) -> f64 {
    if model > floor {
        model
    } else {
        floor
    }
}

/// Weighted Poisson error of a clamped model `model` against `measured`.
#[inline]
pub fn log_likelihood(model: f64, measured: f64, weight: f64) -> f64 {
    if weight == 0.0 {
        return 0.0;
    }
    if measured <= 0.0 {
        return weight * model;
    }
    let x = model / measured - 1.0;
    // Subnormal counts overflow the ratio; the error tends to w·M.
    if !x.is_finite() {
        return weight * model;
    }
    (weight * measured * (x - x.ln_1p())).max(0.0)
}

/// `∂L/∂M = w·(1 − I/M)`, the factor fed back into the exit waves.
#[inline]
pub fn gradient_factor(model: f64, measured: f64, weight: f64) -> f64 {
    weight * (1.0 - measured / model)
}

/// `∂²L/∂M² = w·I/M²`
#[inline]
pub fn curvature(model: f64, measured: f64, weight: f64) -> f64 {
    weight * measured / (model * model)
}

/// `dst += |exit|²`
pub(crate) fn add_intensity<T: Real>(dst: &mut [T], exit: &[Complex<T>]) {
    for (d, &z) in dst.iter_mut().zip(exit) {
        *d = *d + abs2(z);
    }
}

/// Weighted least-squares sums `(Σ w·I·Imodel, Σ w·Imodel²)` over pixels with `w ≠ 0`.
pub(crate) fn floating_sums<T: Real>(imodel: &[T], weight: &[T], measured: &[T]) -> (f64, f64) {
    let mut num = 0.0;
    let mut den = 0.0;
    for ((&im, &w), &i) in imodel.iter().zip(weight).zip(measured) {
        let w = w.widen();
        if w == 0.0 {
            continue;
        }
        let im = im.widen();
        num += w * i.widen() * im;
        den += w * im * im;
    }
    (num, den)
}

/// Outcome of one pattern's floating-intensity solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FicUpdate {
    /// Coefficient relative to the raw incoherent sum.
    pub fic: f64,
    /// Factor to apply to the current model.
    pub scale: f64,
    pub degenerate: bool,
}

/// Resolve the coefficient from the least-squares sums.
///
/// `applied` is the scale the current model already carries and `previous`
/// the caller's coefficient, kept when the solve is degenerate.
pub(crate) fn resolve_fic(num: f64, den: f64, applied: f64, previous: f64) -> FicUpdate {
    let ratio = num / den;
    if den > 0.0 && ratio.is_finite() && ratio > 0.0 {
        return FicUpdate {
            fic: applied * ratio,
            scale: ratio,
            degenerate: false,
        };
    }
    let scale = previous / applied;
    FicUpdate {
        fic: previous,
        scale: if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        },
        degenerate: true,
    }
}

pub(crate) fn scale_frame<T: Real>(frame: &mut [T], scale: f64) {
    if scale == 1.0 {
        return;
    }
    for v in frame.iter_mut() {
        *v = T::narrow(v.widen() * scale);
    }
}

/// Write LLerr and the gradient factor for one pattern. Returns `Σw`.
pub(crate) fn error_frame<T: Real>(
    frame: &mut PatternFrame<'_, T>,
    weight: &[T],
    measured: &[T],
    floor: f64,
) -> f64 {
    let mut mass = 0.0;
    let pixels = frame
        .imodel
        .iter()
        .zip(frame.ll_err.iter_mut())
        .zip(frame.grad_factor.iter_mut())
        .zip(weight.iter().zip(measured));
    for (((&im, err), grad), (&w, &i)) in pixels {
        let (w, i) = (w.widen(), i.widen());
        let m = clamp_model(im.widen(), floor);
        *err = T::narrow(log_likelihood(m, i, w));
        *grad = T::narrow(gradient_factor(m, i, w));
        mass += w;
    }
    mass
}

/// Multiply an exit frame by the gradient factor of its pattern.
pub(crate) fn apply_gradient<T: Real>(exit: &mut [Complex<T>], grad: &[T]) {
    for (z, &g) in exit.iter_mut().zip(grad) {
        *z = z.scale(g);
    }
}

/// Sequential f64 sum.
pub(crate) fn sum_widened<T: Real>(values: &[T]) -> f64 {
    values.iter().map(|v| v.widen()).sum()
}

/// Per-pattern error from the raw LLerr sum. Zero weight mass means zero error.
pub(crate) fn normalize_error(
    sum: f64,
    weight_mass: f64,
    frame_len: usize,
    normalization: ErrorNormalization,
) -> f64 {
    if weight_mass == 0.0 {
        return 0.0;
    }
    match normalization {
        ErrorNormalization::Sum => sum,
        ErrorNormalization::PixelCount => sum / frame_len as f64,
        ErrorNormalization::WeightMass => sum / weight_mass,
    }
}

/// Zero the model and step terms of a frame before accumulation.
pub(crate) fn clear_step_frame<T: Real>(frame: &mut PatternFrame<'_, T>) {
    for buffer in [
        &mut *frame.imodel,
        &mut *frame.ao,
        &mut *frame.ap,
        &mut *frame.aoo,
        &mut *frame.app,
        &mut *frame.aop,
    ] {
        buffer.fill(T::zero());
    }
}

/// Add one exit frame's contribution to the model expansion along the step.
pub(crate) fn add_step_terms<T: Real>(frame: &mut PatternFrame<'_, T>, waves: &StepFrames<'_, T>) {
    let two = T::narrow(2.0);
    for n in 0..waves.f.len() {
        let f = waves.f[n];
        let u = waves.u[n];
        frame.imodel[n] = frame.imodel[n] + abs2(f);
        frame.ao[n] = frame.ao[n] + two * re_dot(f, u);
        frame.aoo[n] = frame.aoo[n] + abs2(u);

        let mut cross = T::zero();
        if let Some(x) = waves.x {
            cross = cross + re_dot(f, x[n]);
        }
        if let Some(v) = waves.v {
            let v = v[n];
            frame.ap[n] = frame.ap[n] + two * re_dot(f, v);
            frame.app[n] = frame.app[n] + abs2(v);
            cross = cross + re_dot(u, v);
        }
        frame.aop[n] = frame.aop[n] + two * cross;
    }
}

/// Scale the accumulated expansion by `fic`, write LLerr and LLden and
/// return the pattern's step coefficients together with `Σw`.
pub(crate) fn finish_step_frame<T: Real>(
    frame: &mut PatternFrame<'_, T>,
    weight: &[T],
    measured: &[T],
    fic: f64,
    floor: f64,
) -> (QuadraticCoefficients, f64) {
    for buffer in [
        &mut *frame.imodel,
        &mut *frame.ao,
        &mut *frame.ap,
        &mut *frame.aoo,
        &mut *frame.app,
        &mut *frame.aop,
    ] {
        scale_frame(buffer, fic);
    }

    let mut coeffs = QuadraticCoefficients::zeros();
    let mut mass = 0.0;
    for n in 0..frame.imodel.len() {
        let w = weight[n].widen();
        let i = measured[n].widen();
        let m = clamp_model(frame.imodel[n].widen(), floor);

        let err = log_likelihood(m, i, w);
        let k = curvature(m, i, w);
        let s = gradient_factor(m, i, w);
        frame.ll_err[n] = T::narrow(err);
        frame.ll_den[n] = T::narrow(k);

        let first = frame.ao[n].widen() + frame.ap[n].widen();
        let second = frame.aoo[n].widen() + frame.app[n].widen() + frame.aop[n].widen();
        coeffs.c += err;
        coeffs.b += s * first;
        coeffs.a += s * second + 0.5 * k * first * first;
        mass += w;
    }
    (coeffs, mass)
}

/// Upper-triangle step matrix terms `[b00, b01, b02, b11, b12, b22]` over a
/// pixel range of the per-pattern buffers, not yet renormalized.
pub(crate) fn step_matrix_terms<T: Real>(
    buffers: &KernelBuffers<T>,
    weight: &[T],
    range: Range<usize>,
    floor: f64,
) -> [f64; 6] {
    let step = &buffers.step;
    let mut acc = [0.0; 6];
    for n in range {
        let w = weight[n].widen();
        let k = buffers.ll_den[n].widen();
        let m = clamp_model(buffers.imodel[n].widen(), floor);
        let s = w - k * m;

        let ao = step.ao[n].widen();
        let ap = step.ap[n].widen();
        acc[0] += buffers.ll_err[n].widen();
        acc[1] += 0.5 * s * ao;
        acc[2] += 0.5 * s * ap;
        acc[3] += s * step.aoo[n].widen() + 0.5 * k * ao * ao;
        acc[4] += 0.5 * s * step.aop[n].widen() + 0.5 * k * ao * ap;
        acc[5] += s * step.app[n].widen() + 0.5 * k * ap * ap;
    }
    acc
}

#[inline]
pub(crate) fn add_terms(mut a: [f64; 6], b: [f64; 6]) -> [f64; 6] {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_log_likelihood_minimum_is_zero() {
        for i in [0.5, 1.0, 37.0, 1e4] {
            assert_eq!(log_likelihood(i, i, 1.0), 0.0);
            assert_eq!(gradient_factor(i, i, 1.0), 0.0);
        }
    }

    #[test]
    fn test_log_likelihood_non_negative() {
        for (m, i) in [(1e-6, 5.0), (3.0, 1.0), (1.0, 3.0), (2.0, 0.0), (1.0 + 1e-12, 1.0)] {
            assert!(log_likelihood(m, i, 0.7) >= 0.0);
        }
    }

    #[test]
    fn test_log_likelihood_subnormal_measured() {
        // model / measured overflows to infinity
        assert_eq!(log_likelihood(2.0, 1e-310, 1.5), 3.0);
        // finite ratio, error still close to w·M
        assert_relative_eq!(log_likelihood(1e-6, 1e-310, 1.0), 1e-6, max_relative = 1e-9);
    }

    #[test]
    fn test_log_likelihood_matches_direct_form() {
        // w·(M − I·ln M) minus its value at M = I
        let (m, i, w) = (3.5f64, 2.0f64, 0.8f64);
        let direct = w * (m - i * m.ln()) - w * (i - i * i.ln());
        assert_relative_eq!(log_likelihood(m, i, w), direct, epsilon = 1e-12);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let (m, i, w) = (2.0f64, 3.0f64, 1.5f64);
        let h = 1e-5;
        let d1 = (log_likelihood(m + h, i, w) - log_likelihood(m - h, i, w)) / (2.0 * h);
        let d2 = (log_likelihood(m + h, i, w) - 2.0 * log_likelihood(m, i, w)
            + log_likelihood(m - h, i, w))
            / (h * h);
        assert_relative_eq!(gradient_factor(m, i, w), d1, epsilon = 1e-8);
        assert_relative_eq!(curvature(m, i, w), d2, epsilon = 1e-4);
    }

    #[test]
    fn test_zero_measured_error_is_model() {
        assert_eq!(log_likelihood(2.5, 0.0, 2.0), 5.0);
        assert_eq!(gradient_factor(2.5, 0.0, 2.0), 2.0);
        assert_eq!(curvature(2.5, 0.0, 2.0), 0.0);
    }

    #[test]
    fn test_clamp_model() {
        assert_eq!(clamp_model(0.0, 1e-6), 1e-6);
        assert_eq!(clamp_model(-3.0, 1e-6), 1e-6);
        assert_eq!(clamp_model(4.0, 1e-6), 4.0);
        assert!(log_likelihood(clamp_model(0.0, 1e-6), 10.0, 1.0).is_finite());
    }

    #[test]
    fn test_floating_sums_skip_zero_weight() {
        let imodel = [1.0f64, 2.0, 100.0];
        let weight = [1.0, 1.0, 0.0];
        let measured = [2.0, 4.0, 7.0];
        assert_eq!(floating_sums(&imodel, &weight, &measured), (10.0, 5.0));
    }

    #[test]
    fn test_resolve_fic() {
        let update = resolve_fic(10.0, 5.0, 1.0, 1.0);
        assert_eq!(update.fic, 2.0);
        assert_eq!(update.scale, 2.0);
        assert!(!update.degenerate);

        // Model already carries the scale.
        let update = resolve_fic(4.0, 4.0, 2.0, 2.0);
        assert_eq!(update.fic, 2.0);
        assert_eq!(update.scale, 1.0);
    }

    #[test]
    fn test_resolve_fic_degenerate_keeps_previous() {
        let update = resolve_fic(0.0, 0.0, 1.0, 1.5);
        assert!(update.degenerate);
        assert_eq!(update.fic, 1.5);
        assert_eq!(update.scale, 1.5);

        let update = resolve_fic(-3.0, 2.0, 2.0, 0.0);
        assert!(update.degenerate);
        assert_eq!(update.fic, 0.0);
        assert_eq!(update.scale, 1.0);
    }

    #[test]
    fn test_normalize_error() {
        assert_eq!(normalize_error(8.0, 0.0, 4, ErrorNormalization::Sum), 0.0);
        assert_eq!(normalize_error(8.0, 2.0, 4, ErrorNormalization::Sum), 8.0);
        assert_eq!(normalize_error(8.0, 2.0, 4, ErrorNormalization::PixelCount), 2.0);
        assert_eq!(normalize_error(8.0, 2.0, 4, ErrorNormalization::WeightMass), 4.0);
    }

    #[test]
    fn test_apply_gradient() {
        let mut exit = [Complex::new(1.0f64, -2.0), Complex::new(0.5, 0.5)];
        apply_gradient(&mut exit, &[0.0, -2.0]);
        assert_eq!(exit, [Complex::new(0.0, 0.0), Complex::new(-1.0, -1.0)]);
    }
}
