//! Error types for the convolution/deconvolution core and for the channel pipeline around it.
//!
//! [`DeconvolutionError`] is the taxonomy of the numeric core: shape problems, invalid arguments
//! and numeric anomalies. [`PipelineError`] adds everything that can go wrong while reading,
//! processing and writing a batch of channels.

use ndarray_npy::{ReadNpyError, ReadNpzError, WriteNpyError, WriteNpzError};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Result alias for the convolution and deconvolution core.
pub type DeconvolutionResult<T> = Result<T, DeconvolutionError>;

/// Result alias for the channel pipeline and its I/O.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by a single convolution or deconvolution call. All of them are terminal for
/// that call; nothing is retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeconvolutionError {
    /// Kernel and volume extents are incompatible, or the PSF and its transpose disagree.
    #[error("invalid shape: {0}")]
    InvalidShape(ShapeIssue),

    /// A parameter is outside of its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A non-finite value showed up in the input or in an intermediate result.
    #[error(
        "non-finite value {value} in {stage} at voxel {index:?} (iteration {iteration})"
    )]
    NumericAnomaly {
        stage: Stage,
        iteration: usize,
        index: [usize; 3],
        value: f64,
    },
}

impl DeconvolutionError {
    pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        DeconvolutionError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

/// Detailed reason behind [`DeconvolutionError::InvalidShape`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeIssue {
    /// An array has an axis of length zero.
    #[error("{array} has an empty axis {axis} (shape {shape:?})")]
    EmptyAxis {
        array: &'static str,
        axis: usize,
        shape: [usize; 3],
    },

    /// The kernel does not fit into the volume along `axis`.
    #[error("kernel extent {kernel} exceeds volume extent {volume} on axis {axis}")]
    KernelExceedsVolume {
        axis: usize,
        kernel: usize,
        volume: usize,
    },

    /// The output extent computed from the shape rule is zero or negative.
    #[error("output extent {extent} on axis {axis} is not positive")]
    DegenerateOutput { axis: usize, extent: isize },

    /// The coordinate transpose of the PSF has a different shape than the PSF.
    #[error("psf shape {psf:?} differs from its transpose {transposed:?}")]
    TransposeMismatch {
        psf: [usize; 3],
        transposed: [usize; 3],
    },

    /// Forward blurring did not reproduce the shape of the observed image.
    #[error("blurred estimate has shape {blurred:?}, image has {image:?}")]
    EstimateMismatch {
        image: [usize; 3],
        blurred: [usize; 3],
    },
}

/// Where in the Richardson-Lucy update a numeric anomaly was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The observed image handed to the deconvolver.
    Input,
    /// `convolve(estimate, psf) + epsilon`.
    Blurred,
    /// `image / blurred`.
    Ratio,
    /// The estimate after the multiplicative correction.
    Estimate,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Input => write!(f, "input image"),
            Stage::Blurred => write!(f, "blurred estimate"),
            Stage::Ratio => write!(f, "relative blur"),
            Stage::Estimate => write!(f, "estimate"),
        }
    }
}

/// Errors raised while running a batch of channels through the deconvolver.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("channel {channel}: {source}")]
    Channel {
        channel: usize,
        #[source]
        source: DeconvolutionError,
    },

    #[error(transparent)]
    Deconvolution(#[from] DeconvolutionError),

    #[error("channel {channel} has shape {found:?}, expected {expected:?}")]
    ChannelShape {
        channel: usize,
        expected: [usize; 3],
        found: [usize; 3],
    },

    #[error("the volume source did not provide any channel")]
    NoChannels,

    #[error("expected a 3D or 4D array in {path:?}, found {ndim} dimensions")]
    Dimensionality { path: PathBuf, ndim: usize },

    #[error("unsupported volume file {0:?} (expected .npy or .npz)")]
    UnsupportedFile(PathBuf),

    #[error("processing was aborted")]
    Aborted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    ReadNpy(#[from] ReadNpyError),

    #[error(transparent)]
    WriteNpy(#[from] WriteNpyError),

    #[error(transparent)]
    ReadNpz(#[from] ReadNpzError),

    #[error(transparent)]
    WriteNpz(#[from] WriteNpzError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
