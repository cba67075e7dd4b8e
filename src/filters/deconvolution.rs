//! Richardson-Lucy deconvolution of 3D volumes.
//!
//! Every iteration blurs the current estimate with the PSF, compares it with the observed image
//! and blurs the relative error back with the coordinate transpose of the PSF:
//!
//! ```text
//! blurred  = convolve(estimate, psf) + epsilon
//! ratio    = image / blurred
//! estimate = estimate * convolve(ratio, transpose(psf))
//! ```
//!
//! Both convolutions use half-extent padding so that every intermediate volume has the shape of
//! the image. The estimate starts as all ones and the loop runs for a fixed number of iterations,
//! there is no convergence check.

use crate::errors::{DeconvolutionError, DeconvolutionResult, ShapeIssue, Stage};
use crate::filters::convolution::{ConvolutionOptions, Convolver, EdgeMode, Padding};
use crate::filters::psf::{check_normalization, PSF_SUM_TOLERANCE};
use crate::math_tools::{coordinate_transpose, first_non_finite, shape3, Voxel};
use ndarray::{Array3, ArrayView3, Zip};

/// Default floor added to the blurred estimate before dividing.
pub const DEFAULT_EPSILON: f64 = 1e-12;

/// Configured Richardson-Lucy deconvolver.
///
/// # Fields
/// - `iterations`: fixed number of updates.
/// - `epsilon`: added to the blurred estimate to keep the division away from zero.
/// - `edge_mode`: edge handling of the underlying convolutions.
/// - `strict`: reject a non-positive epsilon and PSFs that do not sum to one, instead of only
///   logging a warning for the latter.
/// - `psf_tolerance`: allowed deviation of the PSF sum from one.
#[derive(Debug, Clone, PartialEq)]
pub struct RichardsonLucy<T> {
    pub iterations: usize,
    pub epsilon: T,
    pub edge_mode: EdgeMode,
    pub strict: bool,
    pub psf_tolerance: f64,
}

impl<T: Voxel> RichardsonLucy<T> {
    /// Creates a deconvolver with the default epsilon (`1e-12`), reference edge handling and
    /// non-strict checks.
    pub fn new(iterations: usize) -> Self {
        RichardsonLucy {
            iterations,
            epsilon: T::from_f64_c(DEFAULT_EPSILON),
            edge_mode: EdgeMode::default(),
            strict: false,
            psf_tolerance: PSF_SUM_TOLERANCE,
        }
    }

    pub fn with_epsilon(mut self, epsilon: T) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_psf_tolerance(mut self, psf_tolerance: f64) -> Self {
        self.psf_tolerance = psf_tolerance;
        self
    }

    /// Checks the scalar parameters.
    ///
    /// # Errors
    /// [`DeconvolutionError::InvalidArgument`] if epsilon is not finite, or if it is not positive
    /// in strict mode.
    pub fn validate(&self) -> DeconvolutionResult<()> {
        if !self.epsilon.is_finite() {
            return Err(DeconvolutionError::invalid_argument(
                "epsilon",
                format!("must be finite, got {}", self.epsilon),
            ));
        }
        if self.strict && self.epsilon <= T::zero() {
            return Err(DeconvolutionError::invalid_argument(
                "epsilon",
                format!("must be positive in strict mode, got {}", self.epsilon),
            ));
        }
        if !(self.psf_tolerance.is_finite() && self.psf_tolerance >= 0.0) {
            return Err(DeconvolutionError::invalid_argument(
                "psf_tolerance",
                format!("must be finite and non-negative, got {}", self.psf_tolerance),
            ));
        }
        Ok(())
    }

    fn options(&self) -> ConvolutionOptions {
        ConvolutionOptions::new(Padding::HalfExtent, self.edge_mode)
    }

    /// Deconvolves `image` with `psf`.
    ///
    /// # Returns
    /// The estimate after `iterations` updates, shaped like `image`. With zero iterations this
    /// is the all-ones starting estimate.
    ///
    /// # Errors
    /// - [`DeconvolutionError::InvalidArgument`] for invalid parameters (see [`Self::validate`])
    ///   or, in strict mode, a PSF that does not sum to one.
    /// - [`DeconvolutionError::InvalidShape`] if the PSF does not fit into the image or differs
    ///   in shape from its transpose.
    /// - [`DeconvolutionError::NumericAnomaly`] as soon as a non-finite value appears in the
    ///   input, the blurred estimate, the ratio or the updated estimate. Iterations count from 0.
    pub fn deconvolve(
        &self,
        image: ArrayView3<T>,
        psf: ArrayView3<T>,
    ) -> DeconvolutionResult<Array3<T>> {
        self.validate()?;

        let psf_owned = psf.to_owned();
        if let Err(err) = check_normalization(&psf_owned, self.psf_tolerance) {
            if self.strict {
                return Err(err);
            }
            log::warn!("{err}");
        }

        let psf_t = coordinate_transpose(psf.view());
        let psf_shape = shape3(&psf);
        let transposed_shape = shape3(&psf_t.view());
        if psf_shape != transposed_shape {
            return Err(DeconvolutionError::InvalidShape(
                ShapeIssue::TransposeMismatch {
                    psf: psf_shape,
                    transposed: transposed_shape,
                },
            ));
        }

        let forward = Convolver::new(psf, self.options())?;
        let backward = Convolver::new(psf_t.view(), self.options())?;

        let image_shape = shape3(&image);
        let blurred_shape = forward.output_shape(image_shape)?;
        if blurred_shape != image_shape {
            return Err(DeconvolutionError::InvalidShape(
                ShapeIssue::EstimateMismatch {
                    image: image_shape,
                    blurred: blurred_shape,
                },
            ));
        }
        ensure_finite(image, Stage::Input, 0)?;

        let mut estimate = Array3::<T>::ones(image.raw_dim());
        let epsilon = self.epsilon;

        for iteration in 0..self.iterations {
            let mut blurred = forward.convolve(estimate.view())?;
            blurred.par_mapv_inplace(|v| v + epsilon);
            ensure_finite(blurred.view(), Stage::Blurred, iteration)?;

            let ratio = Zip::from(&image)
                .and(&blurred)
                .par_map_collect(|&observed, &b| observed / b);
            ensure_finite(ratio.view(), Stage::Ratio, iteration)?;

            let correction = backward.convolve(ratio.view())?;
            Zip::from(&mut estimate)
                .and(&correction)
                .par_for_each(|e, &c| *e *= c);
            ensure_finite(estimate.view(), Stage::Estimate, iteration)?;

            log::debug!(
                "richardson-lucy iteration {}/{} done",
                iteration + 1,
                self.iterations
            );
        }

        Ok(estimate)
    }
}

fn ensure_finite<T: Voxel>(
    volume: ArrayView3<T>,
    stage: Stage,
    iteration: usize,
) -> DeconvolutionResult<()> {
    match first_non_finite(volume) {
        Some((index, value)) => Err(DeconvolutionError::NumericAnomaly {
            stage,
            iteration,
            index,
            value: value.as_f64(),
        }),
        None => Ok(()),
    }
}

/// Richardson-Lucy deconvolution with default edge handling and non-strict checks.
///
/// # Arguments
/// - `image`: observed volume.
/// - `psf`: point spread function, expected to sum to one.
/// - `iterations`: number of updates.
/// - `epsilon`: floor added to the blurred estimate.
pub fn richardson_lucy<T: Voxel>(
    image: ArrayView3<T>,
    psf: ArrayView3<T>,
    iterations: usize,
    epsilon: T,
) -> DeconvolutionResult<Array3<T>> {
    RichardsonLucy::new(iterations)
        .with_epsilon(epsilon)
        .deconvolve(image, psf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::convolution::convolve3d;
    use crate::filters::psf::{gaussian_psf, uniform_psf};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{s, Array3};

    fn pattern(shape: (usize, usize, usize)) -> Array3<f64> {
        Array3::from_shape_fn(shape, |(x, y, z)| 1.0 + ((x * 5 + y * 3 + z) % 7) as f64)
    }

    #[test]
    fn zero_iterations_return_initial_estimate() {
        let image = pattern((4, 5, 6));
        let psf = uniform_psf::<f64>([3, 3, 3]).unwrap();
        let estimate = richardson_lucy(image.view(), psf.view(), 0, 1e-12).unwrap();
        assert_eq!(estimate, Array3::<f64>::ones((4, 5, 6)));
    }

    #[test]
    fn unit_psf_recovers_image_after_one_iteration() {
        let image = pattern((5, 4, 3));
        let psf = Array3::<f64>::ones((1, 1, 1));
        let estimate = richardson_lucy(image.view(), psf.view(), 1, 1e-12).unwrap();
        for (e, i) in estimate.iter().zip(image.iter()) {
            assert_relative_eq!(*e, *i, max_relative = 1e-9);
        }
    }

    #[test]
    fn flat_field_interior_stays_close_to_level() {
        let image = Array3::<f64>::from_elem((8, 8, 8), 10.0);
        let psf = Array3::<f64>::from_elem((5, 5, 5), 1.0 / 125.0);
        let estimate = richardson_lucy(image.view(), psf.view(), 5, 1e-12).unwrap();

        let interior = estimate.slice(s![3..5, 3..5, 3..5]);
        let min = interior.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = interior.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_abs_diff_eq!(min, max, epsilon = 1e-9);
        assert_abs_diff_eq!(min, 10.0, epsilon = 0.5);
    }

    #[test]
    fn zero_image_is_a_fixed_point() {
        let image = Array3::<f64>::zeros((6, 6, 6));
        let psf = uniform_psf::<f64>([3, 3, 3]).unwrap();
        let estimate = richardson_lucy(image.view(), psf.view(), 20, 1e-12).unwrap();
        assert!(estimate.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn zero_epsilon_on_zero_image_reports_numeric_anomaly() {
        let image = Array3::<f64>::zeros((6, 6, 6));
        let psf = uniform_psf::<f64>([3, 3, 3]).unwrap();
        let err = richardson_lucy(image.view(), psf.view(), 20, 0.0).unwrap_err();
        match err {
            DeconvolutionError::NumericAnomaly {
                stage,
                iteration,
                index,
                value,
            } => {
                assert_eq!(stage, Stage::Ratio);
                assert_eq!(iteration, 1);
                assert_eq!(index, [0, 0, 0]);
                assert!(value.is_nan());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let mut image = pattern((4, 4, 4));
        image[[1, 2, 3]] = f64::INFINITY;
        let psf = uniform_psf::<f64>([3, 3, 3]).unwrap();
        let err = richardson_lucy(image.view(), psf.view(), 3, 1e-12).unwrap_err();
        assert_eq!(
            err,
            DeconvolutionError::NumericAnomaly {
                stage: Stage::Input,
                iteration: 0,
                index: [1, 2, 3],
                value: f64::INFINITY,
            }
        );
    }

    #[test]
    fn strict_mode_validates_epsilon_and_psf_sum() {
        let image = pattern((5, 5, 5));
        let psf = uniform_psf::<f64>([3, 3, 3]).unwrap();

        let err = RichardsonLucy::new(2)
            .with_epsilon(0.0)
            .strict(true)
            .deconvolve(image.view(), psf.view())
            .unwrap_err();
        assert!(matches!(
            err,
            DeconvolutionError::InvalidArgument { name: "epsilon", .. }
        ));

        let unnormalised = Array3::<f64>::ones((3, 3, 3));
        let err = RichardsonLucy::new(2)
            .strict(true)
            .deconvolve(image.view(), unnormalised.view())
            .unwrap_err();
        assert!(matches!(
            err,
            DeconvolutionError::InvalidArgument { name: "psf", .. }
        ));

        // only advisory outside of strict mode
        assert!(RichardsonLucy::new(2)
            .deconvolve(image.view(), unnormalised.view())
            .is_ok());
    }

    #[test]
    fn non_finite_epsilon_is_always_rejected() {
        let image = pattern((3, 3, 3));
        let psf = uniform_psf::<f64>([1, 1, 1]).unwrap();
        let err = richardson_lucy(image.view(), psf.view(), 1, f64::NAN).unwrap_err();
        assert!(matches!(
            err,
            DeconvolutionError::InvalidArgument { name: "epsilon", .. }
        ));
    }

    #[test]
    fn psf_must_match_its_transpose() {
        let image = pattern((6, 6, 6));
        let psf = uniform_psf::<f64>([3, 3, 1]).unwrap();
        let err = richardson_lucy(image.view(), psf.view(), 1, 1e-12).unwrap_err();
        assert_eq!(
            err,
            DeconvolutionError::InvalidShape(ShapeIssue::TransposeMismatch {
                psf: [3, 3, 1],
                transposed: [1, 3, 3],
            })
        );
    }

    #[test]
    fn psf_larger_than_image_is_rejected() {
        let image = pattern((4, 4, 4));
        let psf = uniform_psf::<f64>([5, 5, 5]).unwrap();
        assert!(matches!(
            richardson_lucy(image.view(), psf.view(), 1, 1e-12),
            Err(DeconvolutionError::InvalidShape(
                ShapeIssue::KernelExceedsVolume { .. }
            ))
        ));
    }

    #[test]
    fn edge_modes_give_identical_estimates() {
        let image = pattern((7, 7, 7));
        let psf = gaussian_psf::<f64>([1.2, 1.2, 1.2], [3, 3, 3]).unwrap();
        let reference = RichardsonLucy::new(4)
            .deconvolve(image.view(), psf.view())
            .unwrap();
        let full = RichardsonLucy::new(4)
            .with_edge_mode(EdgeMode::Full)
            .deconvolve(image.view(), psf.view())
            .unwrap();
        assert_eq!(reference, full);
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let image = pattern((6, 5, 7));
        let psf = gaussian_psf::<f64>([2.0, 1.5, 2.0], [5, 3, 5]).unwrap();
        let deconvolver = RichardsonLucy::new(6);
        let first = deconvolver.deconvolve(image.view(), psf.view()).unwrap();
        let second = deconvolver.deconvolve(image.view(), psf.view()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn blurred_point_source_is_sharpened() {
        let mut source = Array3::<f64>::zeros((9, 9, 9));
        source[[4, 4, 4]] = 100.0;
        let psf = gaussian_psf::<f64>([1.5, 1.5, 1.5], [5, 5, 5]).unwrap();
        let observed =
            convolve3d(source.view(), psf.view(), ConvolutionOptions::default()).unwrap();

        let estimate = richardson_lucy(observed.view(), psf.view(), 15, 1e-12).unwrap();

        assert!(estimate[[4, 4, 4]] > observed[[4, 4, 4]]);
        let peak = estimate.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(estimate[[4, 4, 4]], peak);
    }

    #[test]
    fn single_precision_volumes_are_supported() {
        let image = Array3::<f32>::from_elem((5, 5, 5), 2.0);
        let psf = uniform_psf::<f32>([3, 3, 3]).unwrap();
        let estimate = RichardsonLucy::<f32>::new(3)
            .deconvolve(image.view(), psf.view())
            .unwrap();
        assert_eq!(estimate.dim(), (5, 5, 5));
        assert!(estimate.iter().all(|v| v.is_finite() && *v > 0.0));
    }
}
