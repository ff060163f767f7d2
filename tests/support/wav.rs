use std::f32::consts::PI;
use std::path::Path;

/// Write interleaved float samples as a WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create wav parent dirs");
    }
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav writer");
    for &sample in samples {
        writer.write_sample(sample).expect("write wav sample");
    }
    writer.finalize().expect("finalize wav");
}

/// A few harmonics over a 120 BPM amplitude pulse, so every feature family has content.
pub fn music_like(seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    let beat = sample_rate as f32 * 0.5;
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let phase = (i as f32 % beat) / beat;
            let envelope = 0.3 + 0.7 * (-8.0 * phase).exp();
            let tone = (2.0 * PI * 220.0 * t).sin()
                + 0.5 * (2.0 * PI * 330.0 * t).sin()
                + 0.25 * (2.0 * PI * 440.0 * t).sin();
            0.25 * envelope * tone
        })
        .collect()
}

/// Duplicate mono samples into interleaved stereo.
pub fn to_stereo(mono: &[f32]) -> Vec<f32> {
    mono.iter().flat_map(|&sample| [sample, sample]).collect()
}
