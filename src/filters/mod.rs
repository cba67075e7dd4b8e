//! Volume filters for 3D image restoration.
//!
//! # Filter Implementations
//!
//! * **Convolution**: direct spatial-domain 3D convolution, the primitive everything else is
//!   built on.
//!
//! * **Deconvolution**: Richardson-Lucy iterations on top of the convolution.
//!
//! * **PSF**: construction and normalisation of point spread functions.

/// Direct 3D convolution with zero-padding and parity-dependent output shapes.
pub mod convolution;

/// Richardson-Lucy deconvolution.
/// Sharpens a volume by iteratively undoing the blur described by a point spread function.
pub mod deconvolution;

/// Point Spread Function utilities for deconvolution operations.
pub mod psf;
