//! The channel pipeline: reads a stack of channels from a [`VolumeSource`], deconvolves every
//! channel with the same PSF and hands the results to a [`VolumeSink`] in input order.
//!
//! Channels are processed in parallel by default. Progress is published through a shared
//! `Arc<RwLock<Option<f32>>>` (`Some(fraction)` while running, `None` when idle) and the run can
//! be cancelled between channels with an `Arc<AtomicBool>`.

use crate::config::{ChannelFailurePolicy, SettingsContainer};
use crate::data_container::{ChannelStack, VolumeSink, VolumeSource};
use crate::errors::{DeconvolutionError, PipelineError, PipelineResult};
use crate::filters::deconvolution::RichardsonLucy;
use crate::io::NpyVoxel;
use crate::math_tools::Voxel;
use cancellable_loops::{try_map_cancellable, try_par_map_cancellable};
use ndarray::Array3;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Result of processing one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    pub channel: usize,
    pub elapsed: Duration,
    /// Set when the channel failed and its input was passed through.
    pub failure: Option<DeconvolutionError>,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineReport {
    pub outcomes: Vec<ChannelOutcome>,
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Indices of the channels that were passed through unprocessed.
    pub fn failed_channels(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.failure.is_some())
            .map(|outcome| outcome.channel)
            .collect()
    }
}

/// Runs a [`RichardsonLucy`] deconvolver over every channel of a stack.
#[derive(Debug, Clone)]
pub struct ChannelPipeline<T> {
    deconvolver: RichardsonLucy<T>,
    psf: Array3<T>,
    failure_policy: ChannelFailurePolicy,
    parallel_channels: bool,
    progress_lock: Arc<RwLock<Option<f32>>>,
    abort_flag: Arc<AtomicBool>,
}

impl<T: Voxel> ChannelPipeline<T> {
    pub fn new(deconvolver: RichardsonLucy<T>, psf: Array3<T>) -> Self {
        ChannelPipeline {
            deconvolver,
            psf,
            failure_policy: ChannelFailurePolicy::default(),
            parallel_channels: true,
            progress_lock: Arc::new(RwLock::new(None)),
            abort_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_failure_policy(mut self, failure_policy: ChannelFailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_parallel_channels(mut self, parallel_channels: bool) -> Self {
        self.parallel_channels = parallel_channels;
        self
    }

    /// Shares an existing progress slot, e.g. one polled by another thread.
    pub fn with_progress_lock(mut self, progress_lock: Arc<RwLock<Option<f32>>>) -> Self {
        self.progress_lock = progress_lock;
        self
    }

    /// Shares an existing abort flag.
    pub fn with_abort_flag(mut self, abort_flag: Arc<AtomicBool>) -> Self {
        self.abort_flag = abort_flag;
        self
    }

    pub fn progress_lock(&self) -> Arc<RwLock<Option<f32>>> {
        self.progress_lock.clone()
    }

    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort_flag.clone()
    }

    pub fn psf(&self) -> &Array3<T> {
        &self.psf
    }

    fn set_progress(&self, progress: Option<f32>) {
        if let Ok(mut write_guard) = self.progress_lock.write() {
            *write_guard = progress;
        }
    }

    /// Deconvolves one channel, applying the failure policy.
    fn process_channel(
        &self,
        channel: usize,
        image: &Array3<T>,
        completed: &AtomicUsize,
        total: usize,
    ) -> Result<(Array3<T>, ChannelOutcome), (usize, DeconvolutionError)> {
        let start = Instant::now();
        let result = self.deconvolver.deconvolve(image.view(), self.psf.view());
        let elapsed = start.elapsed();

        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.set_progress(Some(done as f32 / total as f32));

        match result {
            Ok(estimate) => {
                log::info!("channel {channel} deconvolved in {elapsed:?}");
                Ok((
                    estimate,
                    ChannelOutcome {
                        channel,
                        elapsed,
                        failure: None,
                    },
                ))
            }
            Err(err) => match self.failure_policy {
                ChannelFailurePolicy::Abort => Err((channel, err)),
                ChannelFailurePolicy::PassThrough => {
                    log::error!("channel {channel} failed, passing input through: {err}");
                    Ok((
                        image.clone(),
                        ChannelOutcome {
                            channel,
                            elapsed,
                            failure: Some(err),
                        },
                    ))
                }
            },
        }
    }

    /// Deconvolves every channel of `channels`.
    ///
    /// # Returns
    /// The deconvolved stack, in input order, and a report of the run.
    ///
    /// # Errors
    /// - [`PipelineError::Channel`] for the failing channel under [`ChannelFailurePolicy::Abort`].
    /// - [`PipelineError::Aborted`] if the abort flag was raised.
    pub fn process(
        &self,
        channels: &ChannelStack<T>,
    ) -> PipelineResult<(ChannelStack<T>, PipelineReport)> {
        let start = Instant::now();
        let total = channels.len();
        let completed = AtomicUsize::new(0);
        self.set_progress(Some(0.0));

        let run_channel = |(channel, image): (usize, &Array3<T>)| {
            self.process_channel(channel, image, &completed, total)
        };
        let outcome = if self.parallel_channels {
            try_par_map_cancellable(
                channels.channels().par_iter().enumerate(),
                &self.abort_flag,
                run_channel,
            )
        } else {
            try_map_cancellable(
                channels.channels().iter().enumerate(),
                &self.abort_flag,
                run_channel,
            )
        };
        self.set_progress(None);

        let results = match outcome {
            None => {
                log::warn!("deconvolution aborted");
                return Err(PipelineError::Aborted);
            }
            Some(Err((channel, source))) => {
                return Err(PipelineError::Channel { channel, source });
            }
            Some(Ok(results)) => results,
        };

        let (estimates, outcomes): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        let report = PipelineReport {
            outcomes,
            elapsed: start.elapsed(),
        };
        Ok((ChannelStack::new(estimates)?, report))
    }

    /// Reads all channels from `source`, deconvolves them and writes the results to `sink`.
    pub fn run<S, K>(&self, source: &mut S, sink: &mut K) -> PipelineResult<PipelineReport>
    where
        S: VolumeSource<T> + ?Sized,
        K: VolumeSink<T> + ?Sized,
    {
        let channels = source.read_channels()?;
        log::info!(
            "deconvolving {} channel(s) of shape {:?} with a {:?} psf, {} iteration(s)",
            channels.len(),
            channels.shape(),
            self.psf.dim(),
            self.deconvolver.iterations
        );

        let (deconvolved, report) = self.process(&channels)?;
        sink.write_channels(&deconvolved)?;

        let failed = report.failed_channels();
        if failed.is_empty() {
            log::info!("finished in {:?}", report.elapsed);
        } else {
            log::warn!(
                "finished in {:?}, channel(s) {:?} passed through unprocessed",
                report.elapsed,
                failed
            );
        }
        Ok(report)
    }
}

impl<T: NpyVoxel> ChannelPipeline<T> {
    /// Builds a pipeline from stored settings, loading or generating the PSF.
    pub fn from_settings(settings: &SettingsContainer) -> PipelineResult<Self> {
        let deconvolver = settings.deconvolver()?;
        let psf = settings.psf()?;
        Ok(ChannelPipeline::new(deconvolver, psf)
            .with_failure_policy(settings.failure_policy)
            .with_parallel_channels(settings.parallel_channels))
    }
}
