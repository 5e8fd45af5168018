//! Type definitions for the quadratic step model.

use std::ops::{Add, AddAssign};

use nalgebra::Matrix3;
use num_complex::Complex;

use crate::address::KernelGeometry;
use crate::error::{check_len, Result};
use crate::real::Real;

/// Propagated wavefields describing the current point and a candidate step.
///
/// All slices use the exit-wave layout. For a joint probe/object step
/// `(ΔP, ΔO)` of the exit wave `P·O`:
/// - `current` is `f = fw(P·O)`
/// - `object_step` is `u = fw(P·ΔO)`
/// - `probe_step` is `v = fw(ΔP·O)`
/// - `cross_step` is `x = fw(ΔP·ΔO)`
///
/// A single combined direction passes its first-order wave as `object_step`
/// and its second-order wave as `cross_step`.
#[derive(Debug, Clone, Copy)]
pub struct StepWaves<'a, T> {
    pub current: &'a [Complex<T>],
    pub object_step: &'a [Complex<T>],
    pub probe_step: Option<&'a [Complex<T>]>,
    pub cross_step: Option<&'a [Complex<T>]>,
}

impl<'a, T: Real> StepWaves<'a, T> {
    /// Waves for one direction with first-order wave `a` and second-order wave `b`.
    pub fn single(current: &'a [Complex<T>], a: &'a [Complex<T>], b: &'a [Complex<T>]) -> Self {
        Self {
            current,
            object_step: a,
            probe_step: None,
            cross_step: Some(b),
        }
    }

    /// Waves for independent object and probe steps.
    pub fn joint(
        current: &'a [Complex<T>],
        object_step: &'a [Complex<T>],
        probe_step: &'a [Complex<T>],
        cross_step: &'a [Complex<T>],
    ) -> Self {
        Self {
            current,
            object_step,
            probe_step: Some(probe_step),
            cross_step: Some(cross_step),
        }
    }

    pub(crate) fn check(&self, geometry: &KernelGeometry) -> Result<()> {
        let expected = geometry.exit_len();
        check_len("step current wave", expected, self.current.len())?;
        check_len("step object wave", expected, self.object_step.len())?;
        if let Some(v) = self.probe_step {
            check_len("step probe wave", expected, v.len())?;
        }
        if let Some(x) = self.cross_step {
            check_len("step cross wave", expected, x.len())?;
        }
        Ok(())
    }

    /// Frames of one exit index.
    pub(crate) fn frames(&self, exit: usize, frame_len: usize) -> StepFrames<'a, T> {
        let range = exit * frame_len..(exit + 1) * frame_len;
        StepFrames {
            f: &self.current[range.clone()],
            u: &self.object_step[range.clone()],
            v: self.probe_step.map(|v| &v[range.clone()]),
            x: self.cross_step.map(|x| &x[range]),
        }
    }
}

/// One exit frame of each [`StepWaves`] field.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepFrames<'a, T> {
    pub f: &'a [Complex<T>],
    pub u: &'a [Complex<T>],
    pub v: Option<&'a [Complex<T>]>,
    pub x: Option<&'a [Complex<T>]>,
}

/// Quadratic model `L(η) ≈ a·η² + b·η + c` of the error along a step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuadraticCoefficients {
    /// Curvature (half the second derivative at η = 0).
    pub a: f64,
    /// Slope at η = 0.
    pub b: f64,
    /// Value at η = 0.
    pub c: f64,
}

impl QuadraticCoefficients {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    pub fn zeros() -> Self {
        Self::default()
    }

    /// Model value at step length `eta`.
    pub fn evaluate(&self, eta: f64) -> f64 {
        (self.a * eta + self.b) * eta + self.c
    }

    /// Sum of per-pattern coefficients.
    pub fn sum<'a, I>(coeffs: I) -> Self
    where
        I: IntoIterator<Item = &'a QuadraticCoefficients>,
    {
        coeffs
            .into_iter()
            .fold(Self::zeros(), |acc, coeff| acc + *coeff)
    }
}

impl Add for QuadraticCoefficients {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            a: self.a + other.a,
            b: self.b + other.b,
            c: self.c + other.c,
        }
    }
}

impl AddAssign for QuadraticCoefficients {
    fn add_assign(&mut self, other: Self) {
        self.a += other.a;
        self.b += other.b;
        self.c += other.c;
    }
}

/// Homogeneous quadratic form of the error over `h = [1, ηo, ηp]`.
///
/// `L(ηo, ηp) ≈ hᵀ·B·h`, with `ηo` the object step length and `ηp` the
/// probe step length. The matrix is symmetric by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMatrix {
    pub b: Matrix3<f64>,
}

impl Default for StepMatrix {
    fn default() -> Self {
        Self::zeros()
    }
}

impl StepMatrix {
    pub fn zeros() -> Self {
        Self {
            b: Matrix3::zeros(),
        }
    }

    /// Add the upper-triangle terms `[b00, b01, b02, b11, b12, b22]`,
    /// mirroring them into the lower triangle.
    pub fn accumulate_upper(&mut self, upper: &[f64; 6]) {
        let [b00, b01, b02, b11, b12, b22] = *upper;
        self.b[(0, 0)] += b00;
        self.b[(1, 1)] += b11;
        self.b[(2, 2)] += b22;
        for (i, j, value) in [(0, 1, b01), (0, 2, b02), (1, 2, b12)] {
            self.b[(i, j)] += value;
            self.b[(j, i)] += value;
        }
    }

    /// Restriction to `ηo = ηp = η`.
    pub fn line_coefficients(&self) -> QuadraticCoefficients {
        let b = &self.b;
        QuadraticCoefficients {
            a: b[(1, 1)] + b[(2, 2)] + 2.0 * b[(1, 2)],
            b: 2.0 * (b[(0, 1)] + b[(0, 2)]),
            c: b[(0, 0)],
        }
    }

    /// Model value at `(eta_object, eta_probe)`.
    pub fn evaluate(&self, eta_object: f64, eta_probe: f64) -> f64 {
        let h = nalgebra::Vector3::new(1.0, eta_object, eta_probe);
        h.dot(&(self.b * h))
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        (self.b - self.b.transpose()).amax() <= tolerance
    }
}
