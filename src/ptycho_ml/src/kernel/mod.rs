//! Kernel operation surface and backend selection.
//!
//! Two backends implement [`GradientKernel`]:
//! - [`ReferenceKernel`]: sequential, processes address rows in table order
//! - [`ParallelKernel`]: rayon, one writer per pattern frame via the address
//!   book's destination segments, chunked reduction trees for sums
//!
//! Both share buffer management and input validation through [`KernelState`],
//! and all pixel math through [`crate::poisson`].
//!
//! # Example
//!
//! ```ignore
//! use ptycho_ml::{create_kernel, AddressBook, BackendKind, KernelConfig, KernelGeometry};
//!
//! let geometry = KernelGeometry::new(n_patterns, n_modes, 128, 128);
//! let book = AddressBook::mode_major(&geometry)?;
//! let mut kernel = create_kernel::<f32>(BackendKind::Auto, geometry, KernelConfig::default())?;
//!
//! kernel.make_model(&exit, &book)?;
//! kernel.floating_intensity(&book, &weight, &measured, &mut fic)?;
//! kernel.main(&mut exit, &book, &weight, &measured)?;
//! kernel.error_reduce(&book, &mut err_phot)?;
//! ```

mod parallel;
mod reference;

pub use parallel::ParallelKernel;
pub use reference::ReferenceKernel;

use num_complex::Complex;
use parking_lot::Mutex;

use crate::address::{AddressBook, KernelGeometry};
use crate::buffers::KernelBuffers;
use crate::config::{BackendKind, KernelConfig};
use crate::error::{check_len, KernelError, Result};
use crate::real::Real;
use crate::step::{QuadraticCoefficients, StepMatrix, StepWaves};
use crate::timing::KernelTiming;

/// Operations of the maximum-likelihood gradient kernel.
///
/// Operations are synchronous batch transforms. Sequencing
/// (`make_model` → `floating_intensity` → `main` → `error_reduce` →
/// `make_a012` / `fill_b`) is the caller's responsibility.
pub trait GradientKernel<T: Real>: Send {
    /// Which backend this is (never [`BackendKind::Auto`]).
    fn backend(&self) -> BackendKind;

    fn geometry(&self) -> &KernelGeometry;

    fn config(&self) -> &KernelConfig;

    /// Kernel-owned buffers (model intensity, LLerr, LLden, step terms).
    fn buffers(&self) -> &KernelBuffers<T>;

    /// Snapshot of the accumulated per-operation timing.
    fn timing(&self) -> KernelTiming;

    /// Reserve and zero all buffers. Repeated calls leave no residue.
    fn allocate(&mut self) -> Result<()>;

    /// Incoherent sum of `|exit|²` into the model intensity of every
    /// pattern referenced by `book`.
    fn make_model(&mut self, exit: &[Complex<T>], book: &AddressBook) -> Result<()>;

    /// Solve and apply the per-pattern intensity scale.
    ///
    /// Patterns whose solve is degenerate keep their previous coefficient
    /// and are listed in the report.
    fn floating_intensity(
        &mut self,
        book: &AddressBook,
        weight: &[T],
        measured: &[T],
        fic: &mut [T],
    ) -> Result<FloatingReport>;

    /// Write the Poisson error and scale every exit frame in place by its
    /// pattern's gradient factor.
    fn main(
        &mut self,
        exit: &mut [Complex<T>],
        book: &AddressBook,
        weight: &[T],
        measured: &[T],
    ) -> Result<()>;

    /// Reduce LLerr to one error per pattern.
    fn error_reduce(&self, book: &AddressBook, err_phot: &mut [T]) -> Result<()>;

    /// Quadratic step coefficients per pattern along the step in `waves`.
    fn make_a012(
        &mut self,
        waves: &StepWaves<'_, T>,
        coeffs: &mut [QuadraticCoefficients],
        book: &AddressBook,
        measured: &[T],
        weight: &[T],
        fic: &[T],
    ) -> Result<()>;

    /// Accumulate the joint probe/object step matrix, divided by `brenorm`, into `b`.
    fn fill_b(
        &self,
        book: &AddressBook,
        brenorm: f64,
        weight: &[T],
        b: &mut StepMatrix,
    ) -> Result<()>;
}

/// Outcome of [`GradientKernel::floating_intensity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FloatingReport {
    /// Patterns whose coefficient was retained because the solve was degenerate.
    pub degenerate_patterns: Vec<usize>,
}

impl FloatingReport {
    pub fn is_clean(&self) -> bool {
        self.degenerate_patterns.is_empty()
    }
}

/// Create a kernel for `kind`.
///
/// [`BackendKind::Auto`] selects the parallel backend when rayon has more
/// than one worker thread. Both backends own the same host buffers, so an
/// allocation failure is returned as [`KernelError::ResourceExhaustion`]
/// rather than retried.
pub fn create_kernel<T: Real>(
    kind: BackendKind,
    geometry: KernelGeometry,
    config: KernelConfig,
) -> Result<Box<dyn GradientKernel<T>>> {
    match kind {
        BackendKind::Reference => Ok(Box::new(ReferenceKernel::new(geometry, config)?)),
        BackendKind::Parallel => Ok(Box::new(ParallelKernel::new(geometry, config)?)),
        BackendKind::Auto => {
            if rayon::current_num_threads() <= 1 {
                return Ok(Box::new(ReferenceKernel::new(geometry, config)?));
            }
            Ok(Box::new(ParallelKernel::new(geometry, config)?))
        }
    }
}

/// State shared by both backends: geometry, configuration, buffers, timing.
#[derive(Debug)]
pub(crate) struct KernelState<T> {
    pub geometry: KernelGeometry,
    pub config: KernelConfig,
    pub buffers: KernelBuffers<T>,
    pub timing: Mutex<KernelTiming>,
}

impl<T: Real> KernelState<T> {
    pub fn new(geometry: KernelGeometry, config: KernelConfig) -> Result<Self> {
        Ok(Self {
            buffers: KernelBuffers::new(&geometry)?,
            geometry,
            config,
            timing: Mutex::new(KernelTiming::default()),
        })
    }

    pub fn allocate(&mut self) -> Result<()> {
        self.buffers.allocate(&self.geometry)?;
        self.timing.lock().reset();
        Ok(())
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.geometry.frame_len()
    }

    #[inline]
    pub fn floor(&self) -> f64 {
        self.config.floor()
    }

    pub fn timing_snapshot(&self) -> KernelTiming {
        self.timing.lock().clone()
    }

    pub fn check_book(&self, book: &AddressBook) -> Result<()> {
        book.check_geometry(&self.geometry)
    }

    pub fn check_exit(&self, buffer: &'static str, len: usize) -> Result<()> {
        check_len(buffer, self.geometry.exit_len(), len)
    }

    /// Per-pixel buffers shaped like the model intensity.
    pub fn check_frames(&self, buffer: &'static str, len: usize) -> Result<()> {
        check_len(buffer, self.geometry.pattern_len(), len)
    }

    /// One value per pattern.
    pub fn check_patterns(&self, buffer: &'static str, len: usize) -> Result<()> {
        check_len(buffer, self.geometry.n_patterns, len)
    }

    /// Coefficients applied to an active pattern's model must be positive.
    pub fn check_fic(&self, book: &AddressBook, fic: &[T]) -> Result<()> {
        self.check_patterns("fic", fic.len())?;
        for pattern in book.active_patterns() {
            let value = fic[pattern].widen();
            if !(value.is_finite() && value > 0.0) {
                return Err(KernelError::NumericalDegeneracy {
                    operation: "make_a012",
                    detail: format!("fic[{pattern}] = {value} is not a positive scale"),
                });
            }
        }
        Ok(())
    }

    pub fn check_brenorm(&self, brenorm: f64) -> Result<()> {
        if brenorm.is_finite() && brenorm > 0.0 {
            Ok(())
        } else {
            Err(KernelError::NumericalDegeneracy {
                operation: "fill_b",
                detail: format!("brenorm = {brenorm} is not a positive scale"),
            })
        }
    }
}

/// Log patterns whose floating-intensity solve fell back to the previous coefficient.
pub(crate) fn warn_degenerate(report: &FloatingReport) {
    if let Some(&first) = report.degenerate_patterns.first() {
        tracing::warn!(
            count = report.degenerate_patterns.len(),
            first,
            "floating intensity degenerate, previous coefficient kept"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_kernel_explicit_backends() {
        let geometry = KernelGeometry::new(2, 1, 2, 2);
        let reference =
            create_kernel::<f64>(BackendKind::Reference, geometry, KernelConfig::default())
                .unwrap();
        assert_eq!(reference.backend(), BackendKind::Reference);

        let parallel =
            create_kernel::<f32>(BackendKind::Parallel, geometry, KernelConfig::default())
                .unwrap();
        assert_eq!(parallel.backend(), BackendKind::Parallel);
        assert_eq!(parallel.buffers().imodel.len(), 8);
    }

    #[test]
    fn test_create_kernel_auto_is_concrete() {
        let geometry = KernelGeometry::new(1, 1, 2, 2);
        let kernel =
            create_kernel::<f64>(BackendKind::Auto, geometry, KernelConfig::default()).unwrap();
        assert_ne!(kernel.backend(), BackendKind::Auto);
    }

    #[test]
    fn test_create_kernel_rejects_invalid_geometry() {
        let geometry = KernelGeometry::new(1, 0, 2, 2);
        assert!(matches!(
            create_kernel::<f64>(BackendKind::Auto, geometry, KernelConfig::default()),
            Err(KernelError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_create_kernel_reports_allocation_failure() {
        let geometry = KernelGeometry::new(1 << 31, 1, 1 << 31, 1);
        for kind in [BackendKind::Reference, BackendKind::Parallel, BackendKind::Auto] {
            let result = create_kernel::<f64>(kind, geometry, KernelConfig::default());
            assert!(matches!(result, Err(KernelError::ResourceExhaustion { .. })));
        }
    }

    #[test]
    fn test_check_brenorm() {
        let state = KernelState::<f64>::new(KernelGeometry::new(1, 1, 1, 1), KernelConfig::default())
            .unwrap();
        assert!(state.check_brenorm(2.0).is_ok());
        assert!(state.check_brenorm(0.0).is_err());
        assert!(state.check_brenorm(f64::INFINITY).is_err());
    }

    #[test]
    fn test_floating_report() {
        assert!(FloatingReport::default().is_clean());
        let report = FloatingReport {
            degenerate_patterns: vec![3],
        };
        assert!(!report.is_clean());
    }
}
