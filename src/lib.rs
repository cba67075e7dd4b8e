//! 3D Richardson-Lucy deconvolution on top of a direct spatial convolution.
//!
//! The core lives in [`filters`]: [`filters::convolution`] implements the zero-padded 3D
//! convolution and [`filters::deconvolution`] runs Richardson-Lucy iterations with it. The
//! [`pipeline`] applies one deconvolver to every channel of a multi-channel acquisition, reading
//! and writing through the [`io`] formats.

pub mod config;
pub mod data_container;
pub mod errors;
pub mod filters;
pub mod io;
pub mod math_tools;
pub mod pipeline;

pub use errors::{
    DeconvolutionError, DeconvolutionResult, PipelineError, PipelineResult, ShapeIssue, Stage,
};
pub use filters::convolution::{convolve3d, ConvolutionOptions, Convolver, EdgeMode, Padding};
pub use filters::deconvolution::{richardson_lucy, RichardsonLucy};
pub use pipeline::{ChannelPipeline, PipelineReport};
