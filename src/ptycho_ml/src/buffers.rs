//! Kernel-owned buffers.
//!
//! All buffers are sized from the [`KernelGeometry`] once and zeroed on every
//! `allocate()` call. Allocation goes through `try_reserve_exact` so that an
//! oversized configuration surfaces as [`KernelError::ResourceExhaustion`]
//! instead of aborting the process.

use crate::address::KernelGeometry;
use crate::error::{KernelError, Result};
use crate::real::Real;

/// Per-pixel second-order terms of the model intensity along the object
/// and probe step directions, written by `make_a012` and read by `fill_b`.
#[derive(Debug, Clone, Default)]
pub struct StepTerms<T> {
    /// `Σ 2Re(f·conj(u))`
    pub ao: Vec<T>,
    /// `Σ 2Re(f·conj(v))`
    pub ap: Vec<T>,
    /// `Σ |u|²`
    pub aoo: Vec<T>,
    /// `Σ |v|²`
    pub app: Vec<T>,
    /// `Σ 2Re(f·conj(x) + u·conj(v))`
    pub aop: Vec<T>,
}

/// Buffers owned by one kernel instance.
#[derive(Debug, Clone, Default)]
pub struct KernelBuffers<T> {
    /// Model intensity, `[n_patterns, rows, cols]`.
    pub imodel: Vec<T>,
    /// Per-pixel weighted Poisson error.
    pub ll_err: Vec<T>,
    /// Per-pixel weighted curvature `w·I/Imodel²`.
    pub ll_den: Vec<T>,
    /// Per-pixel gradient factor from the last `main` pass.
    pub grad_factor: Vec<T>,
    pub step: StepTerms<T>,
    /// `Σ w` per pattern, from the last `main` or `make_a012` pass.
    pub weight_mass: Vec<f64>,
    /// Intensity scale already applied to each pattern's model.
    pub applied_fic: Vec<f64>,
}

impl<T: Real> KernelBuffers<T> {
    /// Allocate zeroed buffers for `geometry`.
    pub fn new(geometry: &KernelGeometry) -> Result<Self> {
        let mut buffers = Self::default();
        buffers.allocate(geometry)?;
        Ok(buffers)
    }

    /// Reserve and zero every buffer. Repeated calls leave no residue.
    pub fn allocate(&mut self, geometry: &KernelGeometry) -> Result<()> {
        geometry.validate()?;
        let n = geometry.pattern_len();
        let p = geometry.n_patterns;

        reset(&mut self.imodel, n, T::zero(), "imodel")?;
        reset(&mut self.ll_err, n, T::zero(), "ll_err")?;
        reset(&mut self.ll_den, n, T::zero(), "ll_den")?;
        reset(&mut self.grad_factor, n, T::zero(), "grad_factor")?;
        reset(&mut self.step.ao, n, T::zero(), "step.ao")?;
        reset(&mut self.step.ap, n, T::zero(), "step.ap")?;
        reset(&mut self.step.aoo, n, T::zero(), "step.aoo")?;
        reset(&mut self.step.app, n, T::zero(), "step.app")?;
        reset(&mut self.step.aop, n, T::zero(), "step.aop")?;
        reset(&mut self.weight_mass, p, 0.0, "weight_mass")?;
        reset(&mut self.applied_fic, p, 1.0, "applied_fic")?;

        tracing::debug!(
            patterns = p,
            frame_len = geometry.frame_len(),
            bytes = self.footprint_bytes(),
            "kernel buffers allocated"
        );
        Ok(())
    }

    /// Total bytes held by the buffers.
    pub fn footprint_bytes(&self) -> usize {
        let pixel = std::mem::size_of::<T>();
        let frames = self.imodel.len()
            + self.ll_err.len()
            + self.ll_den.len()
            + self.grad_factor.len()
            + self.step.ao.len()
            + self.step.ap.len()
            + self.step.aoo.len()
            + self.step.app.len()
            + self.step.aop.len();
        frames * pixel + (self.weight_mass.len() + self.applied_fic.len()) * 8
    }
}

/// Mutable view of one pattern's frame across the per-pattern buffers.
pub(crate) struct PatternFrame<'a, T> {
    pub pattern: usize,
    pub imodel: &'a mut [T],
    pub ll_err: &'a mut [T],
    pub ll_den: &'a mut [T],
    pub grad_factor: &'a mut [T],
    pub ao: &'a mut [T],
    pub ap: &'a mut [T],
    pub aoo: &'a mut [T],
    pub app: &'a mut [T],
    pub aop: &'a mut [T],
}

impl<T: Real> KernelBuffers<T> {
    /// Frame view of a single pattern.
    pub(crate) fn frame_mut(&mut self, pattern: usize, frame_len: usize) -> PatternFrame<'_, T> {
        let range = pattern * frame_len..(pattern + 1) * frame_len;
        PatternFrame {
            pattern,
            imodel: &mut self.imodel[range.clone()],
            ll_err: &mut self.ll_err[range.clone()],
            ll_den: &mut self.ll_den[range.clone()],
            grad_factor: &mut self.grad_factor[range.clone()],
            ao: &mut self.step.ao[range.clone()],
            ap: &mut self.step.ap[range.clone()],
            aoo: &mut self.step.aoo[range.clone()],
            app: &mut self.step.app[range.clone()],
            aop: &mut self.step.aop[range],
        }
    }

    /// Disjoint frame views of every pattern, in pattern order.
    pub(crate) fn frames_mut(&mut self, frame_len: usize) -> Vec<PatternFrame<'_, T>> {
        let mut imodel = self.imodel.chunks_mut(frame_len);
        let mut ll_err = self.ll_err.chunks_mut(frame_len);
        let mut ll_den = self.ll_den.chunks_mut(frame_len);
        let mut grad_factor = self.grad_factor.chunks_mut(frame_len);
        let mut ao = self.step.ao.chunks_mut(frame_len);
        let mut ap = self.step.ap.chunks_mut(frame_len);
        let mut aoo = self.step.aoo.chunks_mut(frame_len);
        let mut app = self.step.app.chunks_mut(frame_len);
        let mut aop = self.step.aop.chunks_mut(frame_len);

        let mut frames = Vec::with_capacity(self.weight_mass.len());
        for pattern in 0.. {
            let (
                Some(imodel),
                Some(ll_err),
                Some(ll_den),
                Some(grad_factor),
                Some(ao),
                Some(ap),
                Some(aoo),
                Some(app),
                Some(aop),
            ) = (
                imodel.next(),
                ll_err.next(),
                ll_den.next(),
                grad_factor.next(),
                ao.next(),
                ap.next(),
                aoo.next(),
                app.next(),
                aop.next(),
            )
            else {
                break;
            };
            frames.push(PatternFrame {
                pattern,
                imodel,
                ll_err,
                ll_den,
                grad_factor,
                ao,
                ap,
                aoo,
                app,
                aop,
            });
        }
        frames
    }
}

fn reset<V: Copy>(buffer: &mut Vec<V>, len: usize, value: V, name: &'static str) -> Result<()> {
    buffer.clear();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| KernelError::ResourceExhaustion {
            buffer: name,
            bytes: len.saturating_mul(std::mem::size_of::<V>()),
        })?;
    buffer.resize(len, value);
    Ok(())
}
