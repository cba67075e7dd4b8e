//! Numeric helpers shared by the convolution and deconvolution filters: the [`Voxel`] float
//! abstraction and a few whole-array transforms on 3D volumes.

use ndarray::{s, Array3, ArrayView3};
use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::{Debug, Display};
use std::iter::Sum;

/// Floating point types a volume can be made of.
///
/// Bundles the bounds the filters need so that signatures stay readable. Implemented for
/// `f32` and `f64`.
pub trait Voxel:
    Float + FromPrimitive + NumAssign + Sum + Debug + Display + Send + Sync + 'static
{
    /// Converts an `f64` constant into this type.
    fn from_f64_c(val: f64) -> Self;

    /// Widens the value to `f64` for diagnostics.
    fn as_f64(self) -> f64;
}

impl Voxel for f32 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Voxel for f64 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}

/// Returns the shape of a 3D view as a fixed size array.
pub fn shape3<T>(volume: &ArrayView3<T>) -> [usize; 3] {
    let (x, y, z) = volume.dim();
    [x, y, z]
}

/// Reverses the kernel along all three axes, turning correlation into true convolution.
///
/// The result is in standard layout so that sums over it always run in (x, y, z) order.
pub fn flip_all_axes<T: Clone>(kernel: ArrayView3<T>) -> Array3<T> {
    kernel
        .slice(s![..;-1, ..;-1, ..;-1])
        .as_standard_layout()
        .into_owned()
}

/// Coordinate transpose of a 3D array: the axis order is reversed, `out[i, j, k] = a[k, j, i]`.
///
/// This is not a flip of the values; it is the adjoint used by the backward step of
/// Richardson-Lucy.
pub fn coordinate_transpose<T: Clone>(volume: ArrayView3<T>) -> Array3<T> {
    volume.reversed_axes().as_standard_layout().into_owned()
}

/// Finds the first non-finite voxel in logical (x, y, z) order.
pub fn first_non_finite<T: Voxel>(volume: ArrayView3<T>) -> Option<([usize; 3], T)> {
    volume
        .indexed_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|((x, y, z), v)| ([x, y, z], *v))
}
