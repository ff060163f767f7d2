use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
    io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use thiserror::Error;

use super::resample::ResampleError;

/// Errors raised while turning an audio file into PCM.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The file could not be opened.
    #[error("Failed to open audio file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    /// No demuxer recognised the container.
    #[error("Unsupported or corrupt audio container {path}: {source}")]
    Probe { path: PathBuf, source: Error },
    /// The container holds no decodable track.
    #[error("No default audio track in {path}")]
    NoTrack { path: PathBuf },
    /// The codec could not be instantiated or failed fatally.
    #[error("Audio codec failure for {path}: {source}")]
    Codec { path: PathBuf, source: Error },
    /// Reading a packet failed before end of stream.
    #[error("Failed to read audio packet from {path}: {source}")]
    Packet { path: PathBuf, source: Error },
    /// Decoding finished without producing samples.
    #[error("Decoded 0 samples{}", .path.as_ref().map(|p| format!(" for {}", p.display())).unwrap_or_default())]
    Empty { path: Option<PathBuf> },
    /// Sample rate or channel count is unusable.
    #[error("Invalid PCM format: {sample_rate} Hz, {channels} channels")]
    InvalidFormat { sample_rate: u32, channels: u16 },
    /// Conversion to the target rate failed.
    #[error(transparent)]
    Resample(#[from] ResampleError),
}

/// Raw decoded audio in interleaved `f32` samples.
pub(super) struct DecodedAudio {
    pub(super) samples: Vec<f32>,
    pub(super) sample_rate: u32,
    pub(super) channels: u16,
}

/// Decode the default track of `path` into interleaved samples.
pub(super) fn decode_file(path: &Path, max_seconds: Option<f32>) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|source| DecodeError::Probe {
            path: path.to_path_buf(),
            source,
        })?;
    let mut format = probed.format;
    let track = format.default_track().ok_or_else(|| DecodeError::NoTrack {
        path: path.to_path_buf(),
    })?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|layout| layout.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|source| DecodeError::Codec {
            path: path.to_path_buf(),
            source,
        })?;

    let mut samples = Vec::new();
    let mut max_samples = None;
    let mut skipped_packets = 0usize;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break,
            Err(source) => {
                return Err(DecodeError::Packet {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(Error::DecodeError(_)) => {
                skipped_packets += 1;
                continue;
            }
            Err(source) => {
                return Err(DecodeError::Codec {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let spec = *audio_buf.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;
        if max_samples.is_none() {
            max_samples = sample_limit(max_seconds, sample_rate, channels);
        }
        let mut sample_buf = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        samples.extend_from_slice(sample_buf.samples());
        if let Some(limit) = max_samples {
            if samples.len() >= limit {
                samples.truncate(limit);
                break;
            }
        }
    }

    if skipped_packets > 0 {
        tracing::warn!(
            "Skipped {skipped_packets} undecodable packets in {}",
            path.display()
        );
    }
    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(DecodeError::Empty {
            path: Some(path.to_path_buf()),
        });
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn sample_limit(max_seconds: Option<f32>, sample_rate: u32, channels: u16) -> Option<usize> {
    max_seconds.filter(|limit| *limit > 0.0).map(|limit| {
        let frames = (limit * sample_rate as f32).ceil().max(1.0);
        (frames as usize).saturating_mul(channels.max(1) as usize)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_stereo_wav(path: &Path, frames: usize) {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let value = ((i % 100) as i16 - 50) * 200;
            writer.write_sample(value).unwrap();
            writer.write_sample(-value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_wav_into_interleaved_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_stereo_wav(&path, 1_000);
        let decoded = decode_file(&path, None).unwrap();
        assert_eq!(decoded.sample_rate, 22_050);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.samples.len(), 2_000);
    }

    #[test]
    fn honours_max_seconds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_stereo_wav(&path, 22_050);
        let decoded = decode_file(&path, Some(0.5)).unwrap();
        assert_eq!(decoded.samples.len(), 11_025 * 2);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let dir = tempdir().unwrap();
        let err = decode_file(&dir.path().join("missing.wav"), None).err().unwrap();
        assert!(matches!(err, DecodeError::Open { .. }));
    }

    #[test]
    fn garbage_bytes_fail_to_probe() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();
        let err = decode_file(&path, None).err().unwrap();
        assert!(matches!(
            err,
            DecodeError::Probe { .. } | DecodeError::Empty { .. } | DecodeError::Packet { .. }
        ));
    }
}
