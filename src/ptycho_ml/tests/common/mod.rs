//! Helpers shared by the backend contract tests.
#![allow(dead_code)]

use num_complex::Complex;
use ptycho_ml::poisson::{clamp_model, log_likelihood};
use ptycho_ml::test_utils::incoherent_intensity;
use ptycho_ml::{create_kernel, AddressBook, BackendKind, GradientKernel, KernelConfig, KernelGeometry, Real};

/// Every concrete backend; each contract test runs against all of them.
pub const BACKENDS: [BackendKind; 2] = [BackendKind::Reference, BackendKind::Parallel];

pub fn kernel<T: Real>(kind: BackendKind, geometry: KernelGeometry) -> Box<dyn GradientKernel<T>> {
    kernel_with(kind, geometry, KernelConfig::default())
}

pub fn kernel_with<T: Real>(
    kind: BackendKind,
    geometry: KernelGeometry,
    config: KernelConfig,
) -> Box<dyn GradientKernel<T>> {
    create_kernel(kind, geometry, config).expect("kernel construction")
}

/// Small reduction leaves so the parallel trees have more than one level.
pub fn small_chunks() -> KernelConfig {
    KernelConfig {
        reduction_chunk: 3,
        ..Default::default()
    }
}

/// `|a − b| ≤ atol + rtol·|b|` elementwise.
pub fn assert_close<T: Real>(actual: &[T], expected: &[T], rtol: f64, atol: f64, what: &str) {
    assert_eq!(actual.len(), expected.len(), "{what}: length");
    for (index, (a, b)) in actual.iter().zip(expected).enumerate() {
        let (a, b) = (a.widen(), b.widen());
        assert!(
            (a - b).abs() <= atol + rtol * b.abs(),
            "{what}[{index}]: {a} vs {b}"
        );
    }
}

pub fn assert_complex_close<T: Real>(
    actual: &[Complex<T>],
    expected: &[Complex<T>],
    rtol: f64,
    atol: f64,
    what: &str,
) {
    let re = |v: &[Complex<T>]| v.iter().map(|z| z.re).collect::<Vec<T>>();
    let im = |v: &[Complex<T>]| v.iter().map(|z| z.im).collect::<Vec<T>>();
    assert_close(&re(actual), &re(expected), rtol, atol, what);
    assert_close(&im(actual), &im(expected), rtol, atol, what);
}

/// Total Poisson error of `exit` evaluated directly from the incoherent sum.
pub fn direct_error(
    exit: &[Complex<f64>],
    book: &AddressBook,
    weight: &[f64],
    measured: &[f64],
    fic: &[f64],
) -> f64 {
    let n = book.geometry().frame_len();
    let floor = KernelConfig::default().intensity_floor;
    incoherent_intensity(exit, book)
        .iter()
        .enumerate()
        .map(|(k, &im)| {
            let model = clamp_model(fic[k / n] * im, floor);
            log_likelihood(model, measured[k], weight[k])
        })
        .sum()
}

/// `f + ηo·u + ηp·v + ηo·ηp·x`, or `f + η·u + η²·x` when `v` is `None` and `eta_o == eta_p`.
pub fn stepped_exit(
    f: &[Complex<f64>],
    u: &[Complex<f64>],
    v: Option<&[Complex<f64>]>,
    x: &[Complex<f64>],
    eta_o: f64,
    eta_p: f64,
) -> Vec<Complex<f64>> {
    (0..f.len())
        .map(|k| {
            let probe = v.map(|v| v[k] * eta_p).unwrap_or_default();
            f[k] + u[k] * eta_o + probe + x[k] * (eta_o * eta_p)
        })
        .collect()
}
