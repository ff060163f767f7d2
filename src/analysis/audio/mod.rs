//! Audio loading for the embedding pipeline.
//!
//! Decodes a compressed file, folds it to mono and resamples it to the
//! analysis rate so every later stage sees the same [`PcmBuffer`] layout.

mod decode;
mod downmix;
mod resample;

use std::ops::Range;
use std::path::Path;

use crate::config::AudioConfig;

pub use decode::DecodeError;
pub use resample::{ResampleError, resample};

pub(crate) use downmix::downmix_to_mono;

/// Sample rate the reference embedding model was trained on.
pub const DEFAULT_TARGET_SAMPLE_RATE: u32 = 44_100;

/// Mono PCM samples normalized to `[-1, 1]`, tagged with their sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PcmBuffer {
    /// Wrap already-mono samples.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Always 1; multi-channel input is averaged during loading.
    pub fn channels(&self) -> u16 {
        1
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Copy a sample range into a new buffer at the same rate.
    ///
    /// The range is clamped to the buffer bounds.
    pub fn slice(&self, range: Range<usize>) -> PcmBuffer {
        let end = range.end.min(self.samples.len());
        let start = range.start.min(end);
        PcmBuffer::mono(self.samples[start..end].to_vec(), self.sample_rate)
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Decoder front-end producing mono PCM at a fixed target rate.
#[derive(Clone, Debug)]
pub struct AudioSource {
    target_sample_rate: u32,
    max_seconds: Option<f32>,
}

impl Default for AudioSource {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_SAMPLE_RATE)
    }
}

impl AudioSource {
    pub fn new(target_sample_rate: u32) -> Self {
        Self {
            target_sample_rate: target_sample_rate.max(1),
            max_seconds: None,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.target_sample_rate).with_max_seconds(config.max_seconds)
    }

    /// Stop decoding after this many seconds of source audio.
    pub fn with_max_seconds(mut self, max_seconds: Option<f32>) -> Self {
        self.max_seconds = max_seconds.filter(|limit| *limit > 0.0);
        self
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Decode `path` into mono PCM at the target rate.
    pub fn load(&self, path: &Path) -> Result<PcmBuffer, DecodeError> {
        let decoded = decode::decode_file(path, self.max_seconds)?;
        tracing::debug!(
            "Decoded {}: {} samples, {} Hz, {} channels",
            path.display(),
            decoded.samples.len(),
            decoded.sample_rate,
            decoded.channels
        );
        self.from_samples(&decoded.samples, decoded.sample_rate, decoded.channels)
    }

    /// Prepare interleaved samples decoded elsewhere.
    pub fn from_samples(
        &self,
        interleaved: &[f32],
        sample_rate: u32,
        channels: u16,
    ) -> Result<PcmBuffer, DecodeError> {
        if sample_rate == 0 || channels == 0 {
            return Err(DecodeError::InvalidFormat {
                sample_rate,
                channels,
            });
        }
        let mono = downmix_to_mono(interleaved, channels);
        if mono.is_empty() {
            return Err(DecodeError::Empty { path: None });
        }
        let samples = resample(&mono, sample_rate, self.target_sample_rate)?;
        if samples.is_empty() {
            return Err(DecodeError::Empty { path: None });
        }
        Ok(PcmBuffer::mono(samples, self.target_sample_rate))
    }
}
