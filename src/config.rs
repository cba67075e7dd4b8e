//! Persistent settings of the deconvolution pipeline.
//!
//! Settings are stored with the `preferences` crate under [`APP_INFO`] / [`PREFS_KEY`]. The first
//! run writes the defaults, which mirror the classic processing script: a uniform 5x5x5 PSF,
//! 20 iterations and an epsilon of `1e-12`.

use crate::errors::{DeconvolutionError, DeconvolutionResult, PipelineError, PipelineResult};
use crate::filters::convolution::EdgeMode;
use crate::filters::deconvolution::{RichardsonLucy, DEFAULT_EPSILON};
use crate::filters::psf::{gaussian_psf, normalize_psf, uniform_psf, PSF_SUM_TOLERANCE};
use crate::io::{open_psf, NpyVoxel};
use crate::math_tools::Voxel;
use ndarray::Array3;
use preferences::{AppInfo, Preferences};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const APP_INFO: AppInfo = AppInfo {
    name: "deconv3d",
    author: "deconv3d",
};

pub const PREFS_KEY: &str = "config/deconvolution";

/// How the PSF is obtained.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PsfModel {
    /// Box PSF, every voxel `1 / n`.
    Uniform { extent: [usize; 3] },
    /// Separable Gaussian with the given 1/e² radius per axis, in voxels.
    Gaussian { width: [f64; 3], extent: [usize; 3] },
    /// A 3D array stored in an `.npy` file.
    File { path: PathBuf },
}

impl Default for PsfModel {
    fn default() -> Self {
        PsfModel::Uniform { extent: [5, 5, 5] }
    }
}

impl PsfModel {
    /// Builds the PSF array described by this model.
    pub fn build<T: NpyVoxel>(&self) -> PipelineResult<Array3<T>> {
        let psf = match self {
            PsfModel::Uniform { extent } => uniform_psf(*extent)?,
            PsfModel::Gaussian { width, extent } => gaussian_psf(*width, *extent)?,
            PsfModel::File { path } => open_psf(path)?,
        };
        Ok(psf)
    }
}

/// What the pipeline does when a single channel fails.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFailurePolicy {
    /// Stop the whole batch at the first failing channel.
    #[default]
    Abort,
    /// Log the failure and keep the unprocessed input in that channel's output slot.
    PassThrough,
}

/// All user adjustable settings.
///
/// `iterations` is signed on purpose: a negative count read from a settings file is reported as
/// an invalid argument instead of a parse error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SettingsContainer {
    pub iterations: i64,
    pub epsilon: f64,
    pub strict: bool,
    pub edge_mode: EdgeMode,
    pub psf: PsfModel,
    pub psf_tolerance: f64,
    pub normalize_psf: bool,
    pub failure_policy: ChannelFailurePolicy,
    pub parallel_channels: bool,
}

impl Default for SettingsContainer {
    fn default() -> Self {
        SettingsContainer {
            iterations: 20,
            epsilon: DEFAULT_EPSILON,
            strict: false,
            edge_mode: EdgeMode::Reference,
            psf: PsfModel::default(),
            psf_tolerance: PSF_SUM_TOLERANCE,
            normalize_psf: false,
            failure_policy: ChannelFailurePolicy::Abort,
            parallel_channels: true,
        }
    }
}

impl SettingsContainer {
    /// Loads the stored settings. If there are none (or they cannot be read) the defaults are
    /// stored and returned.
    pub fn load_or_default(app_info: &AppInfo, key: &str) -> Self {
        match SettingsContainer::load(app_info, key) {
            Ok(settings) => settings,
            Err(err) => {
                log::info!("no stored settings ({err}), using defaults");
                let settings = SettingsContainer::default();
                if let Err(err) = settings.save(app_info, key) {
                    log::error!("error in saving settings: {err:?}");
                }
                settings
            }
        }
    }

    /// Reads settings from a JSON file. Missing fields take their default value.
    pub fn from_json_file(path: &Path) -> PipelineResult<Self> {
        let mut file = File::open(path)?;
        SettingsContainer::load_from(&mut file)
            .map_err(|err| PipelineError::Config(format!("{path:?}: {err}")))
    }

    /// Builds the deconvolver described by these settings.
    ///
    /// # Errors
    /// [`DeconvolutionError::InvalidArgument`] for a negative iteration count or invalid epsilon.
    pub fn deconvolver<T: Voxel>(&self) -> DeconvolutionResult<RichardsonLucy<T>> {
        let iterations = usize::try_from(self.iterations).map_err(|_| {
            DeconvolutionError::invalid_argument(
                "iterations",
                format!("must not be negative, got {}", self.iterations),
            )
        })?;
        let deconvolver = RichardsonLucy::new(iterations)
            .with_epsilon(T::from_f64_c(self.epsilon))
            .with_edge_mode(self.edge_mode)
            .with_psf_tolerance(self.psf_tolerance)
            .strict(self.strict);
        deconvolver.validate()?;
        Ok(deconvolver)
    }

    /// Builds the PSF, normalising it first if `normalize_psf` is set.
    pub fn psf<T: NpyVoxel>(&self) -> PipelineResult<Array3<T>> {
        let psf = self.psf.build()?;
        if self.normalize_psf {
            Ok(normalize_psf(&psf)?)
        } else {
            Ok(psf)
        }
    }
}
