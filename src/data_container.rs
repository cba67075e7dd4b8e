//! Containers for multi-channel volume data and the source/sink interfaces the channel pipeline
//! reads from and writes to.

use crate::errors::{PipelineError, PipelineResult};
use crate::math_tools::{shape3, Voxel};
use ndarray::{stack, Array3, Array4, ArrayView3, Axis};

/// A non-empty set of equally shaped 3D volumes, one per imaging channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStack<T> {
    channels: Vec<Array3<T>>,
    shape: [usize; 3],
}

impl<T: Voxel> ChannelStack<T> {
    /// Wraps `channels` after checking that there is at least one and that all share a shape.
    ///
    /// # Errors
    /// [`PipelineError::NoChannels`] or [`PipelineError::ChannelShape`] for the first channel
    /// that differs from channel 0.
    pub fn new(channels: Vec<Array3<T>>) -> PipelineResult<Self> {
        let first = channels.first().ok_or(PipelineError::NoChannels)?;
        let shape = shape3(&first.view());
        for (channel, volume) in channels.iter().enumerate().skip(1) {
            let found = shape3(&volume.view());
            if found != shape {
                return Err(PipelineError::ChannelShape {
                    channel,
                    expected: shape,
                    found,
                });
            }
        }
        Ok(ChannelStack { channels, shape })
    }

    /// Splits a `(channels, x, y, z)` array along its first axis.
    pub fn from_array4(array: Array4<T>) -> PipelineResult<Self> {
        let channels = array
            .outer_iter()
            .map(|channel| channel.to_owned())
            .collect();
        ChannelStack::new(channels)
    }

    /// Stacks the channels into a `(channels, x, y, z)` array.
    pub fn to_array4(&self) -> PipelineResult<Array4<T>> {
        let views: Vec<ArrayView3<T>> = self.channels.iter().map(|c| c.view()).collect();
        Ok(stack(Axis(0), &views)?)
    }

    /// Shape shared by all channels.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Always `false`, a stack holds at least one channel.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> &[Array3<T>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Array3<T>> {
        self.channels
    }
}

/// Supplies the channels to deconvolve, however they are stored.
pub trait VolumeSource<T> {
    fn read_channels(&mut self) -> PipelineResult<ChannelStack<T>>;
}

/// Receives the deconvolved channels, in the order they were supplied.
pub trait VolumeSink<T> {
    fn write_channels(&mut self, channels: &ChannelStack<T>) -> PipelineResult<()>;
}

/// Channels held in memory, usable both as a source and as a sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryVolumes<T> {
    pub channels: Vec<Array3<T>>,
}

impl<T> MemoryVolumes<T> {
    pub fn new(channels: Vec<Array3<T>>) -> Self {
        MemoryVolumes { channels }
    }
}

impl<T: Voxel> VolumeSource<T> for MemoryVolumes<T> {
    fn read_channels(&mut self) -> PipelineResult<ChannelStack<T>> {
        ChannelStack::new(self.channels.clone())
    }
}

impl<T: Voxel> VolumeSink<T> for MemoryVolumes<T> {
    fn write_channels(&mut self, channels: &ChannelStack<T>) -> PipelineResult<()> {
        self.channels = channels.channels().to_vec();
        Ok(())
    }
}
