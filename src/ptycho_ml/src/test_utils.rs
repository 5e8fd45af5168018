//! Synthetic batches for tests and benchmarks.
//!
//! Provides exit-wave, mask and photon-count generators with known ground
//! truth, so kernel behavior can be checked without detector data files.
//! All generators are seeded for reproducibility.

use anyhow::{Context, Result};
use num_complex::Complex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};

use crate::address::{AddressBook, KernelGeometry};
use crate::real::{abs2, Real};

/// Inputs for one batch of kernel calls.
#[derive(Debug, Clone)]
pub struct SyntheticBatch<T> {
    pub geometry: KernelGeometry,
    pub book: AddressBook,
    /// Exit waves, `[n_patterns × n_modes, rows, cols]`.
    pub exit: Vec<Complex<T>>,
    /// Noise-free incoherent intensity per pattern (f64 ground truth).
    pub intensity: Vec<f64>,
    pub weight: Vec<T>,
    /// Poisson counts drawn from `photons × intensity`.
    pub measured: Vec<T>,
}

/// Exit waves of uniform amplitude and zero phase.
pub fn make_uniform_exit<T: Real>(geometry: &KernelGeometry, amplitude: f64) -> Vec<Complex<T>> {
    vec![Complex::new(T::narrow(amplitude), T::zero()); geometry.exit_len()]
}

/// Exit waves with independent normal real and imaginary parts.
pub fn make_random_exit<T: Real>(
    geometry: &KernelGeometry,
    amplitude: f64,
    seed: u64,
) -> Result<Vec<Complex<T>>> {
    let normal = Normal::new(0.0, amplitude).context("invalid exit-wave amplitude")?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok((0..geometry.exit_len())
        .map(|_| {
            Complex::new(
                T::narrow(normal.sample(&mut rng)),
                T::narrow(normal.sample(&mut rng)),
            )
        })
        .collect())
}

/// Per-pixel weights of 1 with a random fraction of dead (zero-weight) pixels.
pub fn make_mask<T: Real>(geometry: &KernelGeometry, dead_fraction: f64, seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dead = dead_fraction.clamp(0.0, 1.0);
    (0..geometry.pattern_len())
        .map(|_| if rng.gen_bool(dead) { T::zero() } else { T::one() })
        .collect()
}

/// Ground-truth incoherent intensity, summed in f64 in table order.
pub fn incoherent_intensity<T: Real>(exit: &[Complex<T>], book: &AddressBook) -> Vec<f64> {
    let geometry = book.geometry();
    let n = geometry.frame_len();
    let mut intensity = vec![0.0; geometry.pattern_len()];
    for row in book.rows() {
        let (p, e) = (row.pattern as usize, row.exit as usize);
        for (dst, &z) in intensity[p * n..(p + 1) * n]
            .iter_mut()
            .zip(&exit[e * n..(e + 1) * n])
        {
            *dst += abs2(z).widen();
        }
    }
    intensity
}

/// Poisson photon counts with mean `photons × intensity`.
pub fn make_poisson_counts<T: Real>(intensity: &[f64], photons: f64, seed: u64) -> Result<Vec<T>> {
    let mut rng = StdRng::seed_from_u64(seed);
    intensity
        .iter()
        .map(|&i| {
            let lambda = photons * i;
            if lambda <= 0.0 {
                return Ok(T::zero());
            }
            let poisson = Poisson::new(lambda)
                .with_context(|| format!("invalid Poisson mean {lambda}"))?;
            Ok(T::narrow(poisson.sample(&mut rng)))
        })
        .collect()
}

/// Same rows in a random order.
pub fn shuffled_book(book: &AddressBook, seed: u64) -> Result<AddressBook> {
    let mut rows = book.rows().to_vec();
    rows.shuffle(&mut StdRng::seed_from_u64(seed));
    AddressBook::new(rows, book.geometry()).context("shuffled address book failed validation")
}

/// Mode-major batch with random exit waves and Poisson-distributed counts.
///
/// Exit-wave components have standard deviation `sqrt(photons)`, so each
/// mode contributes about `2·photons` counts per pixel and the raw model is
/// already on the scale of the measurement.
pub fn make_batch<T: Real>(
    geometry: KernelGeometry,
    photons: f64,
    seed: u64,
) -> Result<SyntheticBatch<T>> {
    let book = AddressBook::mode_major(&geometry).context("building mode-major address book")?;
    let exit = make_random_exit::<T>(&geometry, photons.sqrt(), seed)?;
    let intensity = incoherent_intensity(&exit, &book);
    let measured = make_poisson_counts(&intensity, 1.0, seed.wrapping_add(1))?;
    let weight = make_mask(&geometry, 0.1, seed.wrapping_add(2));

    Ok(SyntheticBatch {
        geometry,
        book,
        exit,
        intensity,
        weight,
        measured,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressEntry;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_exit_intensity() {
        let geometry = KernelGeometry::new(2, 3, 2, 2);
        let book = AddressBook::mode_major(&geometry).unwrap();
        let exit = make_uniform_exit::<f64>(&geometry, 0.5);

        let intensity = incoherent_intensity(&exit, &book);
        assert_eq!(intensity.len(), 8);
        for value in intensity {
            assert_relative_eq!(value, 0.75, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_random_exit_is_seeded() {
        let geometry = KernelGeometry::new(2, 1, 3, 3);
        let a = make_random_exit::<f32>(&geometry, 1.0, 7).unwrap();
        let b = make_random_exit::<f32>(&geometry, 1.0, 7).unwrap();
        let c = make_random_exit::<f32>(&geometry, 1.0, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_mask_extremes() {
        let geometry = KernelGeometry::new(1, 1, 4, 4);
        assert!(make_mask::<f64>(&geometry, 0.0, 1).iter().all(|&w| w == 1.0));
        assert!(make_mask::<f64>(&geometry, 1.0, 1).iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_poisson_counts_are_integral() {
        let counts = make_poisson_counts::<f64>(&[0.0, 3.0, 100.0], 1.0, 3).unwrap();
        assert_eq!(counts[0], 0.0);
        assert!(counts.iter().all(|c| c.fract() == 0.0 && *c >= 0.0));
    }

    #[test]
    fn test_shuffled_book_keeps_rows() {
        let geometry = KernelGeometry::new(4, 2, 1, 1);
        let book = AddressBook::mode_major(&geometry).unwrap();
        let shuffled = shuffled_book(&book, 11).unwrap();

        let mut a: Vec<AddressEntry> = book.rows().to_vec();
        let mut b: Vec<AddressEntry> = shuffled.rows().to_vec();
        a.sort_by_key(|row| row.exit);
        b.sort_by_key(|row| row.exit);
        assert_eq!(a, b);
    }

    #[test]
    fn test_make_batch_shapes() {
        let batch = make_batch::<f64>(KernelGeometry::new(3, 2, 4, 4), 100.0, 5).unwrap();
        assert_eq!(batch.exit.len(), batch.geometry.exit_len());
        assert_eq!(batch.measured.len(), batch.geometry.pattern_len());
        assert_eq!(batch.weight.len(), batch.geometry.pattern_len());
        assert!(batch.intensity.iter().all(|&i| i >= 0.0));
    }
}
