//! Reading and writing of volume stacks and PSFs in NumPy formats.
//!
//! - `.npy`: a single array, either `(x, y, z)` for one channel or `(channels, x, y, z)`.
//! - `.npz`: one `(x, y, z)` array per channel, in archive order.

use crate::data_container::{ChannelStack, VolumeSink, VolumeSource};
use crate::errors::{PipelineError, PipelineResult};
use crate::math_tools::Voxel;
use ndarray::{Array3, ArrayD, Ix3, Ix4};
use ndarray_npy::{read_npy, write_npy, NpzReader, NpzWriter, ReadableElement, WritableElement};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Voxel types that can be stored in `.npy` files.
pub trait NpyVoxel: Voxel + ReadableElement + WritableElement {}

impl<T: Voxel + ReadableElement + WritableElement> NpyVoxel for T {}

/// A volume stack on disk, selected by file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeFile {
    Npy(PathBuf),
    Npz(PathBuf),
}

impl VolumeFile {
    /// Picks the format from the extension of `path` (case insensitive).
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("npy") => Ok(VolumeFile::Npy(path.to_path_buf())),
            Some("npz") => Ok(VolumeFile::Npz(path.to_path_buf())),
            _ => Err(PipelineError::UnsupportedFile(path.to_path_buf())),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            VolumeFile::Npy(path) | VolumeFile::Npz(path) => path,
        }
    }
}

impl<T: NpyVoxel> VolumeSource<T> for VolumeFile {
    fn read_channels(&mut self) -> PipelineResult<ChannelStack<T>> {
        let stack = match self {
            VolumeFile::Npy(path) => open_from_npy(path)?,
            VolumeFile::Npz(path) => open_from_npz(path)?,
        };
        log::info!(
            "opened {:?}: {} channel(s) of shape {:?}",
            self.path(),
            stack.len(),
            stack.shape()
        );
        Ok(stack)
    }
}

impl<T: NpyVoxel> VolumeSink<T> for VolumeFile {
    fn write_channels(&mut self, channels: &ChannelStack<T>) -> PipelineResult<()> {
        match self {
            VolumeFile::Npy(path) => save_to_npy(channels, path)?,
            VolumeFile::Npz(path) => save_to_npz(channels, path)?,
        }
        log::info!("saved {} channel(s) to {:?}", channels.len(), self.path());
        Ok(())
    }
}

/// Reads a 3D (one channel) or 4D (channels first) `.npy` file.
pub fn open_from_npy<T: NpyVoxel>(path: &Path) -> PipelineResult<ChannelStack<T>> {
    let array: ArrayD<T> = read_npy(path)?;
    match array.ndim() {
        3 => ChannelStack::new(vec![array.into_dimensionality::<Ix3>()?]),
        4 => ChannelStack::from_array4(array.into_dimensionality::<Ix4>()?),
        ndim => Err(PipelineError::Dimensionality {
            path: path.to_path_buf(),
            ndim,
        }),
    }
}

/// Sort key for archive entries: `arr_2` comes before `arr_10`.
fn entry_order(name: &str) -> (&str, u64, &str) {
    let stem = name.strip_suffix(".npy").unwrap_or(name);
    let prefix = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    let index = stem[prefix.len()..].parse().unwrap_or(0);
    (prefix, index, name)
}

/// Reads every array of an `.npz` archive as one channel, ordered by entry name.
pub fn open_from_npz<T: NpyVoxel>(path: &Path) -> PipelineResult<ChannelStack<T>> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    let mut names = npz.names()?;
    names.sort_by(|a, b| entry_order(a).cmp(&entry_order(b)));
    let mut channels = Vec::new();
    for name in names {
        let channel: Array3<T> = npz.by_name(&name)?;
        channels.push(channel);
    }
    ChannelStack::new(channels)
}

/// Writes the stack as a single `(channels, x, y, z)` array.
pub fn save_to_npy<T: NpyVoxel>(channels: &ChannelStack<T>, path: &Path) -> PipelineResult<()> {
    write_npy(path, &channels.to_array4()?)?;
    Ok(())
}

/// Writes one array per channel, named `channel_000`, `channel_001`, ...
pub fn save_to_npz<T: NpyVoxel>(channels: &ChannelStack<T>, path: &Path) -> PipelineResult<()> {
    let mut npz = NpzWriter::new(File::create(path)?);
    for (i, channel) in channels.channels().iter().enumerate() {
        npz.add_array(format!("channel_{i:03}"), channel)?;
    }
    npz.finish()?;
    Ok(())
}

/// Reads a 3D PSF from an `.npy` file.
pub fn open_psf<T: NpyVoxel>(path: &Path) -> PipelineResult<Array3<T>> {
    let array: ArrayD<T> = read_npy(path)?;
    let ndim = array.ndim();
    array
        .into_dimensionality::<Ix3>()
        .map_err(|_| PipelineError::Dimensionality {
            path: path.to_path_buf(),
            ndim,
        })
}
