//! Point spread function helpers: construction of simple PSFs and normalisation checks.
//!
//! A physical PSF conserves energy, its voxels sum to one. The deconvolver only warns about PSFs
//! that do not (unless it runs in strict mode), so these helpers let callers build or repair
//! normalised kernels up front.

use crate::errors::{DeconvolutionError, DeconvolutionResult, ShapeIssue};
use crate::math_tools::Voxel;
use ndarray::{Array1, Array3};

/// Default tolerance on `|sum(psf) - 1|`.
pub const PSF_SUM_TOLERANCE: f64 = 1e-6;

fn check_extent(extent: [usize; 3]) -> DeconvolutionResult<()> {
    match extent.iter().position(|&e| e == 0) {
        Some(axis) => Err(DeconvolutionError::InvalidShape(ShapeIssue::EmptyAxis {
            array: "psf",
            axis,
            shape: extent,
        })),
        None => Ok(()),
    }
}

/// Box PSF with every voxel equal to `1 / (ex * ey * ez)`.
pub fn uniform_psf<T: Voxel>(extent: [usize; 3]) -> DeconvolutionResult<Array3<T>> {
    check_extent(extent)?;
    let n = extent.iter().product::<usize>() as f64;
    Ok(Array3::from_elem(
        (extent[0], extent[1], extent[2]),
        T::from_f64_c(1.0 / n),
    ))
}

/// Gaussian beam profile with center `x0` and 1/e² radius `w`.
///
/// # Returns
/// `sqrt(2 / pi) * exp(-2 (x - x0)² / w²) / w` for every element of `x`.
pub fn gaussian(x: &Array1<f64>, x0: f64, w: f64) -> Array1<f64> {
    x.mapv(|xi| {
        (2.0 / std::f64::consts::PI).sqrt() * (-2.0 * (xi - x0).powi(2) / (w * w)).exp() / w
    })
}

/// Voxel coordinates centred on the middle of an axis of length `n`.
fn centred_axis(n: usize) -> Array1<f64> {
    let centre = (n as f64 - 1.0) / 2.0;
    Array1::from_shape_fn(n, |i| i as f64 - centre)
}

/// Separable Gaussian PSF, normalised to unit sum.
///
/// # Arguments
/// - `width`: 1/e² radius per axis, in voxels.
/// - `extent`: number of voxels per axis. Odd extents keep the peak on a voxel.
pub fn gaussian_psf<T: Voxel>(width: [f64; 3], extent: [usize; 3]) -> DeconvolutionResult<Array3<T>> {
    check_extent(extent)?;
    if let Some(w) = width.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
        return Err(DeconvolutionError::invalid_argument(
            "width",
            format!("gaussian width must be finite and positive, got {w}"),
        ));
    }

    let profiles: Vec<Array1<f64>> = (0..3)
        .map(|axis| gaussian(&centred_axis(extent[axis]), 0.0, width[axis]))
        .collect();
    let psf = Array3::from_shape_fn((extent[0], extent[1], extent[2]), |(x, y, z)| {
        profiles[0][x] * profiles[1][y] * profiles[2][z]
    });
    normalize_psf(&psf.mapv(T::from_f64_c))
}

/// Sum of all PSF voxels, accumulated in `f64`.
pub fn psf_sum<T: Voxel>(psf: &Array3<T>) -> f64 {
    psf.iter().map(|v| v.as_f64()).sum()
}

/// Checks that the PSF sums to one within `tolerance`.
///
/// # Errors
/// [`DeconvolutionError::InvalidArgument`] naming the actual sum.
pub fn check_normalization<T: Voxel>(psf: &Array3<T>, tolerance: f64) -> DeconvolutionResult<()> {
    let sum = psf_sum(psf);
    if (sum - 1.0).abs() <= tolerance {
        Ok(())
    } else {
        Err(DeconvolutionError::invalid_argument(
            "psf",
            format!("psf sums to {sum}, expected 1 within {tolerance}"),
        ))
    }
}

/// Rescales the PSF so that its voxels sum to one.
///
/// # Errors
/// [`DeconvolutionError::InvalidArgument`] if the sum is zero, negative or not finite.
pub fn normalize_psf<T: Voxel>(psf: &Array3<T>) -> DeconvolutionResult<Array3<T>> {
    let sum = psf_sum(psf);
    if !(sum.is_finite() && sum > 0.0) {
        return Err(DeconvolutionError::invalid_argument(
            "psf",
            format!("cannot normalise a psf with sum {sum}"),
        ));
    }
    let scale = T::from_f64_c(sum);
    Ok(psf.mapv(|v| v / scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn uniform_psf_matches_box_average() {
        let psf = uniform_psf::<f64>([5, 5, 5]).unwrap();
        assert_eq!(psf.dim(), (5, 5, 5));
        assert_relative_eq!(psf[[0, 0, 0]], 1.0 / 125.0);
        assert_abs_diff_eq!(psf_sum(&psf), 1.0, epsilon = 1e-12);
        assert!(check_normalization(&psf, PSF_SUM_TOLERANCE).is_ok());
    }

    #[test]
    fn uniform_psf_rejects_empty_extent() {
        assert!(matches!(
            uniform_psf::<f32>([3, 0, 3]),
            Err(DeconvolutionError::InvalidShape(ShapeIssue::EmptyAxis { axis: 1, .. }))
        ));
    }

    #[test]
    fn gaussian_psf_is_normalised_symmetric_and_peaked() {
        let psf = gaussian_psf::<f64>([1.5, 2.0, 1.0], [5, 7, 3]).unwrap();
        assert_eq!(psf.dim(), (5, 7, 3));
        assert_abs_diff_eq!(psf_sum(&psf), 1.0, epsilon = 1e-12);

        let peak = psf.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(psf[[2, 3, 1]], peak);
        assert_relative_eq!(psf[[0, 3, 1]], psf[[4, 3, 1]], max_relative = 1e-12);
        assert_relative_eq!(psf[[2, 0, 0]], psf[[2, 6, 2]], max_relative = 1e-12);
        assert!(psf.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn gaussian_psf_rejects_invalid_width() {
        let err = gaussian_psf::<f64>([1.0, 0.0, 1.0], [3, 3, 3]).unwrap_err();
        assert!(matches!(
            err,
            DeconvolutionError::InvalidArgument { name: "width", .. }
        ));
        assert!(gaussian_psf::<f64>([f64::NAN, 1.0, 1.0], [3, 3, 3]).is_err());
    }

    #[test]
    fn gaussian_profile_matches_closed_form() {
        let x = Array1::from(vec![-1.0, 0.0, 2.0]);
        let g = gaussian(&x, 0.0, 2.0);
        let norm = (2.0 / std::f64::consts::PI).sqrt() / 2.0;
        assert_relative_eq!(g[1], norm);
        assert_relative_eq!(g[0], norm * (-0.5f64).exp());
        assert_relative_eq!(g[2], norm * (-2.0f64).exp());
    }

    #[test]
    fn normalisation_rescales_and_rejects_zero_sum() {
        let psf = Array3::<f32>::from_elem((2, 2, 2), 0.5);
        assert!(check_normalization(&psf, PSF_SUM_TOLERANCE).is_err());

        let normalised = normalize_psf(&psf).unwrap();
        assert_abs_diff_eq!(psf_sum(&normalised), 1.0, epsilon = 1e-6);

        let zero = Array3::<f32>::zeros((2, 2, 2));
        assert!(matches!(
            normalize_psf(&zero),
            Err(DeconvolutionError::InvalidArgument { name: "psf", .. })
        ));
    }
}
