//! Rayon backend with segmented reductions.
//!
//! Several address rows (modes) write the same pattern frame. Instead of
//! scattering into shared buffers, work is partitioned by destination:
//!
//! 1. The per-pattern buffers are split into disjoint frame views
//! 2. Each active pattern frame is processed by one task, which walks its
//!    destination segment (rows sorted by pattern, table order preserved)
//! 3. Exit frames are partitioned by exit index; no two rows share one
//!
//! Within a pattern the rows are visited in the same order as the reference
//! backend, so elementwise outputs match it exactly. Spatial sums
//! (`error_reduce`, `fill_b`) use chunked fold/reduce trees and match it only
//! to floating-point tolerance.

use std::ops::Range;

use num_complex::Complex;
use rayon::prelude::*;

use super::{warn_degenerate, FloatingReport, GradientKernel, KernelState};
use crate::address::{AddressBook, KernelGeometry};
use crate::buffers::KernelBuffers;
use crate::config::{BackendKind, KernelConfig};
use crate::error::Result;
use crate::poisson::{self, FicUpdate};
use crate::real::Real;
use crate::step::{QuadraticCoefficients, StepMatrix, StepWaves};
use crate::time_op;
use crate::timing::{KernelTiming, Operation};

/// Multi-threaded implementation of [`GradientKernel`].
#[derive(Debug)]
pub struct ParallelKernel<T> {
    state: KernelState<T>,
}

impl<T: Real> ParallelKernel<T> {
    /// Allocate a kernel for `geometry`.
    pub fn new(geometry: KernelGeometry, config: KernelConfig) -> Result<Self> {
        let state = KernelState::new(geometry, config)?;
        tracing::debug!(
            threads = rayon::current_num_threads(),
            chunk = state.config.chunk(),
            "parallel kernel created"
        );
        Ok(Self { state })
    }
}

/// Pixel ranges of every active pattern, split into reduction leaves.
fn reduction_leaves(book: &AddressBook, frame_len: usize, chunk: usize) -> Vec<Range<usize>> {
    book.active_patterns()
        .flat_map(|pattern| {
            let start = pattern * frame_len;
            (0..frame_len)
                .step_by(chunk)
                .map(move |offset| start + offset..start + (offset + chunk).min(frame_len))
        })
        .collect()
}

impl<T: Real> GradientKernel<T> for ParallelKernel<T> {
    fn backend(&self) -> BackendKind {
        BackendKind::Parallel
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
            let rows = book.rows();
            let segments = book.segments();
            buffers
                .frames_mut(n)
                .into_par_iter()
                .filter(|frame| book.is_active(frame.pattern))
                .for_each(|frame| {
                    frame.imodel.fill(T::zero());
                    for &row in segments.segment(frame.pattern) {
                        let e = rows[row as usize].exit as usize;
                        poisson::add_intensity(frame.imodel, &exit[e * n..(e + 1) * n]);
                    }
                });

            for pattern in book.active_patterns() {
                buffers.applied_fic[pattern] = 1.0;
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
            let applied = buffers.applied_fic.clone();
            let previous: &[T] = fic;

            let updates: Vec<(usize, FicUpdate)> = buffers
                .frames_mut(n)
                .into_par_iter()
                .filter(|frame| book.is_active(frame.pattern))
                .map(|frame| {
                    let pattern = frame.pattern;
                    let range = pattern * n..(pattern + 1) * n;
                    let (num, den) = poisson::floating_sums(
                        frame.imodel,
                        &weight[range.clone()],
                        &measured[range],
                    );
                    let update = poisson::resolve_fic(
                        num,
                        den,
                        applied[pattern],
                        previous[pattern].widen(),
                    );
                    poisson::scale_frame(frame.imodel, update.scale);
                    (pattern, update)
                })
                .collect();

            let mut report = FloatingReport::default();
            for (pattern, update) in updates {
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
            let masses: Vec<(usize, f64)> = buffers
                .frames_mut(n)
                .into_par_iter()
                .filter(|frame| book.is_active(frame.pattern))
                .map(|mut frame| {
                    let pattern = frame.pattern;
                    let range = pattern * n..(pattern + 1) * n;
                    let mass = poisson::error_frame(
                        &mut frame,
                        &weight[range.clone()],
                        &measured[range],
                        floor,
                    );
                    (pattern, mass)
                })
                .collect();
            for (pattern, mass) in masses {
                buffers.weight_mass[pattern] = mass;
            }

            let grad = &buffers.grad_factor;
            exit.par_chunks_mut(n)
                .enumerate()
                .for_each(|(e, frame)| {
                    if let Some(p) = book.pattern_of_exit(e) {
                        poisson::apply_gradient(frame, &grad[p * n..(p + 1) * n]);
                    }
                });
        });
        Ok(())
    }

    fn error_reduce(&self, book: &AddressBook, err_phot: &mut [T]) -> Result<()> {
        self.state.check_book(book)?;
        self.state.check_patterns("err_phot", err_phot.len())?;

        let n = self.state.frame_len();
        let chunk = self.state.config.chunk();
        let buffers = &self.state.buffers;
        let normalization = self.state.config.error_normalization;
        time_op!(self.state.timing, Operation::ErrorReduce, {
            err_phot
                .par_iter_mut()
                .enumerate()
                .for_each(|(pattern, out)| {
                    let error = if book.is_active(pattern) {
                        let sum: f64 = buffers.ll_err[pattern * n..(pattern + 1) * n]
                            .par_chunks(chunk)
                            .map(poisson::sum_widened)
                            .sum();
                        poisson::normalize_error(
                            sum,
                            buffers.weight_mass[pattern],
                            n,
                            normalization,
                        )
                    } else {
                        0.0
                    };
                    *out = T::narrow(error);
                });
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
            let rows = book.rows();
            let segments = book.segments();
            let results: Vec<(usize, QuadraticCoefficients, f64)> = buffers
                .frames_mut(n)
                .into_par_iter()
                .filter(|frame| book.is_active(frame.pattern))
                .map(|mut frame| {
                    let pattern = frame.pattern;
                    poisson::clear_step_frame(&mut frame);
                    for &row in segments.segment(pattern) {
                        let frames = waves.frames(rows[row as usize].exit as usize, n);
                        poisson::add_step_terms(&mut frame, &frames);
                    }

                    let range = pattern * n..(pattern + 1) * n;
                    let (coeff, mass) = poisson::finish_step_frame(
                        &mut frame,
                        &weight[range.clone()],
                        &measured[range],
                        fic[pattern].widen(),
                        floor,
                    );
                    (pattern, coeff, mass)
                })
                .collect();

            coeffs.fill(QuadraticCoefficients::zeros());
            for (pattern, coeff, mass) in results {
                coeffs[pattern] = coeff;
                buffers.weight_mass[pattern] = mass;
                buffers.applied_fic[pattern] = fic[pattern].widen();
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
        let leaves = reduction_leaves(book, n, self.state.config.chunk());
        time_op!(self.state.timing, Operation::FillB, {
            let terms = leaves
                .into_par_iter()
                .map(|range| poisson::step_matrix_terms(buffers, weight, range, floor))
                .reduce(|| [0.0; 6], poisson::add_terms);
            b.accumulate_upper(&terms.map(|v| v / brenorm));
        });
        Ok(())
    }
}
