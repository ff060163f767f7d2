use rubato::{FftFixedInOut, Resampler};
use thiserror::Error;

/// Input chunk length handed to the FFT resampler.
const CHUNK_FRAMES: usize = 1024;

/// Errors raised by sample-rate conversion.
#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("Invalid resample rates: {from} Hz -> {to} Hz")]
    InvalidRate { from: u32, to: u32 },
    #[error("Failed to build resampler for {from} Hz -> {to} Hz: {source}")]
    Construction {
        from: u32,
        to: u32,
        source: rubato::ResamplerConstructionError,
    },
    #[error("Resampler failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Resample mono samples with a synchronous FFT sinc resampler.
///
/// The output is delay-compensated and has exactly
/// `round(len * to / from)` samples, so identical input always yields
/// identical output.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, ResampleError> {
    if from == 0 || to == 0 {
        return Err(ResampleError::InvalidRate { from, to });
    }
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = FftFixedInOut::<f32>::new(from as usize, to as usize, CHUNK_FRAMES, 1)
        .map_err(|source| ResampleError::Construction { from, to, source })?;
    let delay = resampler.output_delay();
    let expected = output_len(samples.len(), from, to);
    let wanted = expected + delay;

    let mut out = Vec::with_capacity(wanted + resampler.output_frames_max());
    let mut chunk = Vec::with_capacity(resampler.input_frames_max());
    let mut pos = 0usize;
    while out.len() < wanted {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(samples.len());
        chunk.clear();
        chunk.extend_from_slice(&samples[pos..end]);
        chunk.resize(needed, 0.0);
        pos = end;
        let processed = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(channel) = processed.first() {
            out.extend_from_slice(channel);
        }
    }
    out.truncate(wanted);
    out.drain(..delay);
    Ok(out)
}

fn output_len(len: usize, from: u32, to: u32) -> usize {
    let scaled = len as u128 * to as u128;
    ((scaled + from as u128 / 2) / from as u128) as usize
}
