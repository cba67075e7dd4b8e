use clap::{Parser, ValueEnum};
use deconv3d::config::{ChannelFailurePolicy, PsfModel, SettingsContainer, APP_INFO, PREFS_KEY};
use deconv3d::io::VolumeFile;
use deconv3d::{ChannelPipeline, EdgeMode};
use preferences::Preferences;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EdgeArg {
    Reference,
    Full,
}

impl From<EdgeArg> for EdgeMode {
    fn from(edge: EdgeArg) -> Self {
        match edge {
            EdgeArg::Reference => EdgeMode::Reference,
            EdgeArg::Full => EdgeMode::Full,
        }
    }
}

/// Richardson-Lucy deconvolution of 3D volumes.
///
/// Reads `(x, y, z)` or `(channels, x, y, z)` arrays from `.npy` / `.npz` files and writes the
/// deconvolved channels in the same order.
#[derive(Parser, Debug)]
#[command(name = "deconv3d", version, about)]
struct Args {
    /// Input volume stack (.npy or .npz)
    input: PathBuf,

    /// Output file (.npy or .npz)
    output: PathBuf,

    /// JSON settings file, used instead of the stored settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of Richardson-Lucy iterations
    #[arg(short, long, allow_negative_numbers = true)]
    iterations: Option<i64>,

    /// Floor added to the blurred estimate before dividing
    #[arg(long)]
    epsilon: Option<f64>,

    /// PSF stored as a 3D .npy array
    #[arg(long)]
    psf_file: Option<PathBuf>,

    /// Extent of a uniform box PSF, e.g. `--psf-extent 5 5 5`
    #[arg(long, num_args = 3, conflicts_with = "psf_file")]
    psf_extent: Option<Vec<usize>>,

    /// Rescale the PSF to unit sum before use
    #[arg(long)]
    normalize_psf: bool,

    /// Reject non-positive epsilon and unnormalised PSFs
    #[arg(long)]
    strict: bool,

    /// Edge handling of the convolutions
    #[arg(long, value_enum)]
    edge_mode: Option<EdgeArg>,

    /// Keep failing channels unprocessed instead of aborting
    #[arg(long)]
    pass_through: bool,

    /// Process channels one after another
    #[arg(long)]
    sequential: bool,

    /// Store the resulting settings as the new defaults
    #[arg(long)]
    save_settings: bool,
}

impl Args {
    fn apply(&self, settings: &mut SettingsContainer) {
        if let Some(iterations) = self.iterations {
            settings.iterations = iterations;
        }
        if let Some(epsilon) = self.epsilon {
            settings.epsilon = epsilon;
        }
        if let Some(path) = &self.psf_file {
            settings.psf = PsfModel::File { path: path.clone() };
        }
        if let Some([x, y, z]) = self.psf_extent.as_deref() {
            settings.psf = PsfModel::Uniform {
                extent: [*x, *y, *z],
            };
        }
        if let Some(edge) = self.edge_mode {
            settings.edge_mode = edge.into();
        }
        settings.normalize_psf |= self.normalize_psf;
        settings.strict |= self.strict;
        if self.pass_through {
            settings.failure_policy = ChannelFailurePolicy::PassThrough;
        }
        if self.sequential {
            settings.parallel_channels = false;
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => SettingsContainer::from_json_file(path)?,
        None => SettingsContainer::load_or_default(&APP_INFO, PREFS_KEY),
    };
    args.apply(&mut settings);
    log::debug!("settings: {settings:?}");

    if args.save_settings {
        if let Err(err) = settings.save(&APP_INFO, PREFS_KEY) {
            log::error!("error in saving settings: {err:?}");
        }
    }

    let pipeline = ChannelPipeline::<f64>::from_settings(&settings)?;
    let mut source = VolumeFile::from_path(&args.input)?;
    let mut sink = VolumeFile::from_path(&args.output)?;
    pipeline.run(&mut source, &mut sink)?;
    Ok(())
}
