//! Direct (spatial domain) 3D convolution with explicit zero-padding.
//!
//! The kernel is flipped once along every axis and then correlated with a zero-padded copy of the
//! volume, which makes the net operation a true convolution. The output shape follows a
//! parity-dependent rule per axis:
//!
//! - even kernel extent: `image - kernel + 2 * padding`
//! - odd kernel extent: `image - kernel + 2 * padding + 1`
//!
//! With the default half-extent padding (`kernel / 2`) both cases give back the image extent.
//!
//! The scan over output coordinates is bounded per axis by `min(image extent, output extent)`
//! in [`EdgeMode::Reference`]. When the padding is larger than half the kernel the output is
//! bigger than the image and the trailing cells keep their zero value. [`EdgeMode::Full`] scans
//! the complete output instead.

use crate::errors::{DeconvolutionError, DeconvolutionResult, ShapeIssue};
use crate::math_tools::{flip_all_axes, shape3, Voxel};
use ndarray::{s, Array3, ArrayView3, Zip};
use serde::{Deserialize, Serialize};

/// Amount of zero-padding added on both sides of every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Padding {
    /// `floor(kernel_extent / 2)` per axis.
    #[default]
    HalfExtent,
    /// Fixed padding per axis.
    Explicit([usize; 3]),
}

impl Padding {
    /// Resolves the padding amounts for a kernel of the given shape.
    pub fn resolve(&self, kernel: [usize; 3]) -> [usize; 3] {
        match self {
            Padding::HalfExtent => [kernel[0] / 2, kernel[1] / 2, kernel[2] / 2],
            Padding::Explicit(padding) => *padding,
        }
    }
}

/// Which output cells the sliding window visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Scan at most the unpadded image extent per axis; cells beyond stay zero.
    #[default]
    Reference,
    /// Scan every cell of the output.
    Full,
}

/// Options of a single convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvolutionOptions {
    pub padding: Padding,
    pub edge_mode: EdgeMode,
}

impl ConvolutionOptions {
    pub fn new(padding: Padding, edge_mode: EdgeMode) -> Self {
        ConvolutionOptions { padding, edge_mode }
    }
}

/// Output extent along one axis. May be zero or negative for incompatible inputs.
pub fn output_extent(image: usize, kernel: usize, padding: usize) -> isize {
    let extent = image as isize - kernel as isize + 2 * padding as isize;
    if kernel % 2 == 0 {
        extent
    } else {
        extent + 1
    }
}

/// Validated output shape for a convolution of `image` with `kernel` using `padding`.
///
/// # Errors
/// [`DeconvolutionError::InvalidShape`] if an axis is empty, the kernel is larger than the image
/// on some axis, or the resulting extent is not positive.
pub fn output_shape(
    image: [usize; 3],
    kernel: [usize; 3],
    padding: [usize; 3],
) -> DeconvolutionResult<[usize; 3]> {
    check_not_empty("volume", image)?;
    check_not_empty("kernel", kernel)?;

    let mut shape = [0; 3];
    for axis in 0..3 {
        if kernel[axis] > image[axis] {
            return Err(DeconvolutionError::InvalidShape(
                ShapeIssue::KernelExceedsVolume {
                    axis,
                    kernel: kernel[axis],
                    volume: image[axis],
                },
            ));
        }
        let extent = output_extent(image[axis], kernel[axis], padding[axis]);
        if extent <= 0 {
            return Err(DeconvolutionError::InvalidShape(
                ShapeIssue::DegenerateOutput { axis, extent },
            ));
        }
        shape[axis] = extent as usize;
    }
    Ok(shape)
}

/// Number of output cells visited per axis.
pub fn scan_extent(image: [usize; 3], output: [usize; 3], edge_mode: EdgeMode) -> [usize; 3] {
    match edge_mode {
        EdgeMode::Reference => [
            image[0].min(output[0]),
            image[1].min(output[1]),
            image[2].min(output[2]),
        ],
        EdgeMode::Full => output,
    }
}

fn check_not_empty(array: &'static str, shape: [usize; 3]) -> DeconvolutionResult<()> {
    match shape.iter().position(|&extent| extent == 0) {
        Some(axis) => Err(DeconvolutionError::InvalidShape(ShapeIssue::EmptyAxis {
            array,
            axis,
            shape,
        })),
        None => Ok(()),
    }
}

/// Copies `volume` into the centre of a zero-filled buffer grown by `padding` on both sides.
fn zero_pad<T: Voxel>(volume: ArrayView3<T>, padding: [usize; 3]) -> Array3<T> {
    let [x, y, z] = shape3(&volume);
    let [px, py, pz] = padding;
    let mut padded = Array3::zeros((x + 2 * px, y + 2 * py, z + 2 * pz));
    padded
        .slice_mut(s![px..px + x, py..py + y, pz..pz + z])
        .assign(&volume);
    padded
}

/// A kernel prepared for repeated convolutions.
///
/// The kernel is flipped once on construction, so the Richardson-Lucy loop can reuse the same
/// `Convolver` for every iteration.
#[derive(Debug, Clone)]
pub struct Convolver<T> {
    flipped: Array3<T>,
    kernel_shape: [usize; 3],
    options: ConvolutionOptions,
}

impl<T: Voxel> Convolver<T> {
    /// Prepares `kernel` for convolution.
    ///
    /// # Errors
    /// [`DeconvolutionError::InvalidShape`] if the kernel has an empty axis.
    pub fn new(kernel: ArrayView3<T>, options: ConvolutionOptions) -> DeconvolutionResult<Self> {
        let kernel_shape = shape3(&kernel);
        check_not_empty("kernel", kernel_shape)?;
        Ok(Convolver {
            flipped: flip_all_axes(kernel),
            kernel_shape,
            options,
        })
    }

    pub fn kernel_shape(&self) -> [usize; 3] {
        self.kernel_shape
    }

    pub fn options(&self) -> ConvolutionOptions {
        self.options
    }

    /// Padding amounts applied around the volume.
    pub fn padding(&self) -> [usize; 3] {
        self.options.padding.resolve(self.kernel_shape)
    }

    /// Output shape for a volume of shape `image`.
    pub fn output_shape(&self, image: [usize; 3]) -> DeconvolutionResult<[usize; 3]> {
        output_shape(image, self.kernel_shape, self.padding())
    }

    /// Convolves `volume` with the kernel.
    ///
    /// Output voxels are independent and computed in parallel; each one is a sequential fold over
    /// the kernel, so the result does not depend on the thread count.
    pub fn convolve(&self, volume: ArrayView3<T>) -> DeconvolutionResult<Array3<T>> {
        let image_shape = shape3(&volume);
        let padding = self.padding();
        let out_shape = self.output_shape(image_shape)?;
        let [nx, ny, nz] = scan_extent(image_shape, out_shape, self.options.edge_mode);
        let [kx, ky, kz] = self.kernel_shape;

        let padded = zero_pad(volume, padding);
        let flipped = &self.flipped;
        let mut output = Array3::zeros((out_shape[0], out_shape[1], out_shape[2]));

        Zip::indexed(output.slice_mut(s![..nx, ..ny, ..nz])).par_for_each(|(x, y, z), out| {
            let window = padded.slice(s![x..x + kx, y..y + ky, z..z + kz]);
            *out = Zip::from(flipped)
                .and(&window)
                .fold(T::zero(), |acc, &k, &v| acc + k * v);
        });

        Ok(output)
    }
}

/// Convolves `volume` with `kernel` in a single call.
///
/// # Arguments
/// - `volume`: the 3D volume.
/// - `kernel`: the 3D kernel, flipped internally.
/// - `options`: padding and edge handling.
///
/// # Returns
/// A new array with the shape given by [`output_shape`].
pub fn convolve3d<T: Voxel>(
    volume: ArrayView3<T>,
    kernel: ArrayView3<T>,
    options: ConvolutionOptions,
) -> DeconvolutionResult<Array3<T>> {
    Convolver::new(kernel, options)?.convolve(volume)
}
