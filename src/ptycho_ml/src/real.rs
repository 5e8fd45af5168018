//! Scalar precision abstraction.
//!
//! Kernel buffers are either single or double precision, fixed when the
//! kernel is constructed. Reductions that cross many pixels are carried out
//! in `f64` regardless of `T`, so both widths convert through this trait.

use std::fmt::Debug;

use num_complex::Complex;
use num_traits::Float;

/// Real scalar type usable for kernel buffers (`f32` or `f64`).
pub trait Real: Float + Default + Debug + Send + Sync + 'static {
    /// Convert from an `f64` literal or accumulated value.
    fn narrow(value: f64) -> Self;

    /// Widen to `f64` for accumulation.
    fn widen(self) -> f64;
}

impl Real for f32 {
    #[inline]
    fn narrow(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn widen(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    #[inline]
    fn narrow(value: f64) -> Self {
        value
    }

    #[inline]
    fn widen(self) -> f64 {
        self
    }
}

/// `|z|²`
#[inline]
pub fn abs2<T: Real>(z: Complex<T>) -> T {
    z.re * z.re + z.im * z.im
}

/// `Re(a · conj(b))`
#[inline]
pub fn re_dot<T: Real>(a: Complex<T>, b: Complex<T>) -> T {
    a.re * b.re + a.im * b.im
}
