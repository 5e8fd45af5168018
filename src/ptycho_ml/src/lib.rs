//! Poisson maximum-likelihood gradient kernel for ptychographic reconstruction.
//!
//! This library computes, for a batch of multi-mode exit waves, the predicted
//! detector intensity, the Poisson log-likelihood error, the gradient fed
//! back into the wavefields and the quadratic step model used by a
//! conjugate-gradient line search.
//!
//! # Architecture
//!
//! The kernel is split into phases, called in order by the reconstruction engine:
//! - `make_model`: incoherent mode sum into the model intensity
//! - `floating_intensity`: per-pattern detector scale
//! - `main` / `error_reduce`: gradient factor, per-pixel and per-pattern error
//! - `make_a012` / `fill_b`: quadratic step coefficients and joint step matrix
//!
//! Two backends implement [`GradientKernel`]: a sequential [`ReferenceKernel`]
//! and a rayon [`ParallelKernel`] that reduces through the address book's
//! destination segments.
//!
//! # Usage
//!
//! ```ignore
//! use ptycho_ml::{create_kernel, AddressBook, BackendKind, KernelConfig, KernelGeometry};
//!
//! let geometry = KernelGeometry::new(n_patterns, n_modes, 256, 256);
//! let book = AddressBook::mode_major(&geometry)?;
//! let mut kernel = create_kernel::<f32>(BackendKind::Auto, geometry, KernelConfig::default())?;
//!
//! kernel.make_model(&exit, &book)?;
//! kernel.floating_intensity(&book, &weight, &measured, &mut fic)?;
//! kernel.main(&mut exit, &book, &weight, &measured)?;
//! kernel.error_reduce(&book, &mut err_phot)?;
//!
//! kernel.make_a012(&waves, &mut coeffs, &book, &measured, &weight, &fic)?;
//! if let Some(eta) = QuadraticCoefficients::sum(&coeffs).minimizing_step() {
//!     // step along the search direction
//! }
//! ```

pub mod address;
pub mod buffers;
pub mod config;
pub mod error;
pub mod kernel;
pub mod poisson;
pub mod real;
pub mod step;
pub mod test_utils;
pub mod timing;

pub use address::{AddressBook, AddressEntry, KernelGeometry, ObjectExtent, Placement};
pub use buffers::{KernelBuffers, StepTerms};
pub use config::{BackendKind, ErrorNormalization, KernelConfig};
pub use error::{AddressField, KernelError, Result};
pub use kernel::{create_kernel, FloatingReport, GradientKernel, ParallelKernel, ReferenceKernel};
pub use real::Real;
pub use step::{brenorm_from_error, QuadraticCoefficients, StepMatrix, StepRejection, StepWaves};
pub use timing::{KernelTiming, Operation};
