//! Sequential reference backend.
//!
//! Address rows are processed one at a time in table order and every sum is
//! accumulated left to right. This is the numerical baseline the parallel
//! backend is tested against.

use num_complex::Complex;

use super::{warn_degenerate, FloatingReport, GradientKernel, KernelState};
use crate::address::{AddressBook, KernelGeometry};
use crate::buffers::KernelBuffers;
use crate::config::{BackendKind, KernelConfig};
use crate::error::Result;
use crate::poisson;
use crate::real::Real;
use crate::step::{QuadraticCoefficients, StepMatrix, StepWaves};
use crate::time_op;
use crate::timing::{KernelTiming, Operation};

/// Single-threaded implementation of [`GradientKernel`].
#[derive(Debug)]
pub struct ReferenceKernel<T> {
    state: KernelState<T>,
}

impl<T: Real> ReferenceKernel<T> {
    /// Allocate a kernel for `geometry`.
    pub fn new(geometry: KernelGeometry, config: KernelConfig) -> Result<Self> {
        Ok(Self {
            state: KernelState::new(geometry, config)?,
        })
    }
}

impl<T: Real> GradientKernel<T> for ReferenceKernel<T> {
    fn backend(&self) -> BackendKind {
        BackendKind::Reference
    }

    fn geometry(&self) -> &KernelGeometry {
        &self.state.geometry
    }

    fn config(&self) -> &KernelConfig {
        &self.state.config
    }

    fn buffers(&self) -> &KernelBuffers<T> {
        &self.state.buffers
    }

    fn timing(&self) -> KernelTiming {
        self.state.timing_snapshot()
    }

    fn allocate(&mut self) -> Result<()> {
        self.state.allocate()
    }

    fn make_model(&mut self, exit: &[Complex<T>], book: &AddressBook) -> Result<()> {
        self.state.check_book(book)?;
        self.state.check_exit("exit waves", exit.len())?;

        let n = self.state.frame_len();
        let buffers = &mut self.state.buffers;
        time_op!(self.state.timing, Operation::MakeModel, {
            for pattern in book.active_patterns() {
                buffers.imodel[pattern * n..(pattern + 1) * n].fill(T::zero());
                buffers.applied_fic[pattern] = 1.0;
            }
            for row in book.rows() {
                let (p, e) = (row.pattern as usize, row.exit as usize);
                poisson::add_intensity(
                    &mut buffers.imodel[p * n..(p + 1) * n],
                    &exit[e * n..(e + 1) * n],
                );
            }
        });

        tracing::debug!(rows = book.len(), "make_model");
        Ok(())
    }

    fn floating_intensity(
        &mut self,
        book: &AddressBook,
        weight: &[T],
        measured: &[T],
        fic: &mut [T],
    ) -> Result<FloatingReport> {
        self.state.check_book(book)?;
        self.state.check_frames("weight", weight.len())?;
        self.state.check_frames("measured", measured.len())?;
        self.state.check_patterns("fic", fic.len())?;

        let n = self.state.frame_len();
        let buffers = &mut self.state.buffers;
        let report = time_op!(self.state.timing, Operation::FloatingIntensity, {
            let mut report = FloatingReport::default();
            for pattern in book.active_patterns() {
                let range = pattern * n..(pattern + 1) * n;
                let imodel = &mut buffers.imodel[range.clone()];

                let (num, den) =
                    poisson::floating_sums(imodel, &weight[range.clone()], &measured[range]);
                let update = poisson::resolve_fic(
                    num,
                    den,
                    buffers.applied_fic[pattern],
                    fic[pattern].widen(),
                );
                poisson::scale_frame(imodel, update.scale);

                buffers.applied_fic[pattern] *= update.scale;
                fic[pattern] = T::narrow(update.fic);
                if update.degenerate {
                    report.degenerate_patterns.push(pattern);
                }
            }
            report
        });

        warn_degenerate(&report);
        Ok(report)
    }

    fn main(
        &mut self,
        exit: &mut [Complex<T>],
        book: &AddressBook,
        weight: &[T],
        measured: &[T],
    ) -> Result<()> {
        self.state.check_book(book)?;
        self.state.check_exit("exit waves", exit.len())?;
        self.state.check_frames("weight", weight.len())?;
        self.state.check_frames("measured", measured.len())?;

        let n = self.state.frame_len();
        let floor = self.state.floor();
        let buffers = &mut self.state.buffers;
        time_op!(self.state.timing, Operation::Main, {
            for pattern in book.active_patterns() {
                let range = pattern * n..(pattern + 1) * n;
                let mass = {
                    let mut frame = buffers.frame_mut(pattern, n);
                    poisson::error_frame(
                        &mut frame,
                        &weight[range.clone()],
                        &measured[range],
                        floor,
                    )
                };
                buffers.weight_mass[pattern] = mass;
            }
            for row in book.rows() {
                let (p, e) = (row.pattern as usize, row.exit as usize);
                poisson::apply_gradient(
                    &mut exit[e * n..(e + 1) * n],
                    &buffers.grad_factor[p * n..(p + 1) * n],
                );
            }
        });
        Ok(())
    }

    fn error_reduce(&self, book: &AddressBook, err_phot: &mut [T]) -> Result<()> {
        self.state.check_book(book)?;
        self.state.check_patterns("err_phot", err_phot.len())?;

        let n = self.state.frame_len();
        let buffers = &self.state.buffers;
        let normalization = self.state.config.error_normalization;
        time_op!(self.state.timing, Operation::ErrorReduce, {
            for (pattern, out) in err_phot.iter_mut().enumerate() {
                let error = if book.is_active(pattern) {
                    let sum = poisson::sum_widened(&buffers.ll_err[pattern * n..(pattern + 1) * n]);
                    poisson::normalize_error(sum, buffers.weight_mass[pattern], n, normalization)
                } else {
                    0.0
                };
                *out = T::narrow(error);
            }
        });
        Ok(())
    }

    fn make_a012(
        &mut self,
        waves: &StepWaves<'_, T>,
        coeffs: &mut [QuadraticCoefficients],
        book: &AddressBook,
        measured: &[T],
        weight: &[T],
        fic: &[T],
    ) -> Result<()> {
        self.state.check_book(book)?;
        waves.check(&self.state.geometry)?;
        self.state.check_patterns("coefficients", coeffs.len())?;
        self.state.check_frames("measured", measured.len())?;
        self.state.check_frames("weight", weight.len())?;
        self.state.check_fic(book, fic)?;

        let n = self.state.frame_len();
        let floor = self.state.floor();
        let buffers = &mut self.state.buffers;
        time_op!(self.state.timing, Operation::MakeA012, {
            for pattern in book.active_patterns() {
                poisson::clear_step_frame(&mut buffers.frame_mut(pattern, n));
            }
            for row in book.rows() {
                let frames = waves.frames(row.exit as usize, n);
                poisson::add_step_terms(&mut buffers.frame_mut(row.pattern as usize, n), &frames);
            }

            coeffs.fill(QuadraticCoefficients::zeros());
            for pattern in book.active_patterns() {
                let range = pattern * n..(pattern + 1) * n;
                let scale = fic[pattern].widen();
                let (coeff, mass) = poisson::finish_step_frame(
                    &mut buffers.frame_mut(pattern, n),
                    &weight[range.clone()],
                    &measured[range],
                    scale,
                    floor,
                );
                coeffs[pattern] = coeff;
                buffers.weight_mass[pattern] = mass;
                buffers.applied_fic[pattern] = scale;
            }
        });

        tracing::debug!(rows = book.len(), "make_a012");
        Ok(())
    }

    fn fill_b(
        &self,
        book: &AddressBook,
        brenorm: f64,
        weight: &[T],
        b: &mut StepMatrix,
    ) -> Result<()> {
        self.state.check_book(book)?;
        self.state.check_frames("weight", weight.len())?;
        self.state.check_brenorm(brenorm)?;

        let n = self.state.frame_len();
        let floor = self.state.floor();
        let buffers = &self.state.buffers;
        time_op!(self.state.timing, Operation::FillB, {
            let mut terms = [0.0; 6];
            for pattern in book.active_patterns() {
                let pattern_terms = poisson::step_matrix_terms(
                    buffers,
                    weight,
                    pattern * n..(pattern + 1) * n,
                    floor,
                );
                terms = poisson::add_terms(terms, pattern_terms);
            }
            b.accumulate_upper(&terms.map(|v| v / brenorm));
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressEntry;
    use approx::assert_relative_eq;

    fn kernel(geometry: KernelGeometry) -> ReferenceKernel<f64> {
        ReferenceKernel::new(geometry, KernelConfig::default()).unwrap()
    }

    #[test]
    fn test_make_model_sums_modes() {
        let geometry = KernelGeometry::new(1, 2, 1, 2);
        let book = AddressBook::mode_major(&geometry).unwrap();
        let exit = vec![
            Complex::new(1.0, 0.0),
            Complex::new(0.0, 2.0),
            Complex::new(3.0, 4.0),
            Complex::new(1.0, 1.0),
        ];

        let mut kernel = kernel(geometry);
        kernel.make_model(&exit, &book).unwrap();
        assert_eq!(kernel.buffers().imodel, vec![26.0, 6.0]);
    }

    #[test]
    fn test_make_model_leaves_unreferenced_patterns() {
        let geometry = KernelGeometry::new(2, 1, 1, 1);
        let book = AddressBook::new(vec![AddressEntry::new(0, 0, 1, 1)], &geometry).unwrap();
        let exit = vec![Complex::new(9.0, 0.0), Complex::new(2.0, 0.0)];

        let mut kernel = kernel(geometry);
        kernel.make_model(&exit, &book).unwrap();
        assert_eq!(kernel.buffers().imodel, vec![0.0, 4.0]);
    }

    #[test]
    fn test_main_scales_exit_by_gradient() {
        let geometry = KernelGeometry::new(1, 1, 1, 2);
        let book = AddressBook::mode_major(&geometry).unwrap();
        let mut exit = vec![Complex::new(2.0, 0.0), Complex::new(0.0, 1.0)];

        let mut kernel = kernel(geometry);
        kernel.make_model(&exit, &book).unwrap();
        // Imodel = [4, 1], measured = [2, 1]
        kernel.main(&mut exit, &book, &[1.0, 1.0], &[2.0, 1.0]).unwrap();

        assert_relative_eq!(exit[0].re, 2.0 * 0.5);
        assert_eq!(exit[1], Complex::new(0.0, 0.0));
        assert_eq!(kernel.buffers().ll_err[1], 0.0);
        assert_relative_eq!(
            kernel.buffers().ll_err[0],
            4.0 - 2.0 - 2.0 * 2.0f64.ln(),
            epsilon = 1e-12
        );
        assert_eq!(kernel.buffers().weight_mass, vec![2.0]);
    }

    #[test]
    fn test_fill_b_rejects_bad_brenorm() {
        let geometry = KernelGeometry::new(1, 1, 1, 1);
        let book = AddressBook::mode_major(&geometry).unwrap();
        let kernel = kernel(geometry);
        let mut b = StepMatrix::zeros();
        assert!(kernel.fill_b(&book, 0.0, &[1.0], &mut b).is_err());
        assert!(kernel.fill_b(&book, f64::NAN, &[1.0], &mut b).is_err());
        assert_eq!(b, StepMatrix::zeros());
    }

    #[test]
    fn test_allocate_resets_timing_and_buffers() {
        let geometry = KernelGeometry::new(1, 1, 1, 1);
        let book = AddressBook::mode_major(&geometry).unwrap();
        let mut kernel = kernel(geometry);
        kernel.make_model(&[Complex::new(3.0, 0.0)], &book).unwrap();
        assert_eq!(kernel.buffers().imodel, vec![9.0]);

        kernel.allocate().unwrap();
        assert_eq!(kernel.buffers().imodel, vec![0.0]);
        assert_eq!(kernel.timing(), KernelTiming::default());
    }
}
