use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::analysis::chroma::ChromaMapping;
use crate::analysis::embedding::AssemblyPolicy;
use crate::analysis::frames::{TrailingPolicy, WindowKind};
use crate::analysis::spectral::{LogScale, MelNorm, MelScale, SpectrumScale};

/// Every tunable of the embedding pipeline, as stored in `resonance.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub segments: SegmentConfig,
    #[serde(default)]
    pub logmel: LogMelConfig,
    #[serde(default)]
    pub chroma: ChromaConfig,
    #[serde(default)]
    pub tempo: TempoConfig,
    #[serde(default)]
    pub hpss: HpssConfig,
    #[serde(default)]
    pub assembly: AssemblyPolicy,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub parity: ParityConfig,
}

impl PipelineConfig {
    /// Clamp values that would make a stage degenerate.
    pub fn normalized(mut self) -> Self {
        let audio_defaults = AudioConfig::default();
        if self.audio.target_sample_rate == 0 {
            self.audio.target_sample_rate = audio_defaults.target_sample_rate;
        }
        self.audio.max_seconds = self.audio.max_seconds.filter(|limit| *limit > 0.0);

        self.segments.segment_seconds = positive_or(self.segments.segment_seconds, default_segment_seconds());
        self.segments.hop_seconds = positive_or(self.segments.hop_seconds, default_segment_hop_seconds());
        self.segments.max_segments = self.segments.max_segments.max(1);

        if self.logmel.n_fft == 0 {
            self.logmel.n_fft = default_logmel_n_fft();
        }
        self.logmel.hop_ms = positive_or(self.logmel.hop_ms, default_logmel_hop_ms());
        self.logmel.window_len = self
            .logmel
            .window_len
            .filter(|len| *len > 0)
            .map(|len| len.min(self.logmel.n_fft));
        if self.logmel.n_mels == 0 {
            self.logmel.n_mels = default_n_mels();
        }
        self.logmel.fmin = self.logmel.fmin.max(0.0);
        self.logmel.fmax = self.logmel.fmax.filter(|fmax| *fmax > self.logmel.fmin);
        self.logmel.epsilon = positive_or(self.logmel.epsilon, default_log_epsilon());
        self.logmel.top_db = self.logmel.top_db.filter(|db| *db > 0.0);

        if self.chroma.n_fft == 0 {
            self.chroma.n_fft = default_chroma_n_fft();
        }
        self.chroma.hop = match self.chroma.hop {
            0 => default_chroma_hop(),
            hop => hop.min(self.chroma.n_fft),
        };

        self.tempo.win_length = self.tempo.win_length.max(2);
        if self.tempo.tempo_len == 0 {
            self.tempo.tempo_len = default_tempo_len();
        }

        if self.hpss.n_fft < 2 {
            self.hpss.n_fft = default_hpss_n_fft();
        }
        self.hpss.hop = match self.hpss.hop {
            0 => default_hpss_hop(),
            hop => hop.min(self.hpss.n_fft),
        };
        self.hpss.harmonic_kernel = self.hpss.harmonic_kernel.max(1);
        self.hpss.percussive_kernel = self.hpss.percussive_kernel.max(1);
        self.hpss.mask_power = positive_or(self.hpss.mask_power, default_hpss_mask_power());

        self.model.embedding_dim = self.model.embedding_dim.max(1);
        self.model.intra_threads = self.model.intra_threads.max(1);
        self.similarity.threshold = if self.similarity.threshold.is_finite() {
            self.similarity.threshold.clamp(-1.0, 1.0)
        } else {
            default_similarity_threshold()
        };
        self
    }

    /// Reject combinations that cannot be repaired by clamping.
    pub fn validate(&self) -> Result<(), String> {
        if self.chroma.min_hz >= self.chroma.max_hz {
            return Err(format!(
                "chroma.min_hz ({}) must be below chroma.max_hz ({})",
                self.chroma.min_hz, self.chroma.max_hz
            ));
        }
        if self.tempo.min_bpm <= 0.0 || self.tempo.min_bpm >= self.tempo.max_bpm {
            return Err(format!(
                "tempo.min_bpm ({}) must be positive and below tempo.max_bpm ({})",
                self.tempo.min_bpm, self.tempo.max_bpm
            ));
        }
        if self.model.chroma_bins == 0 {
            return Err("model.chroma_bins must be positive".to_string());
        }
        Ok(())
    }
}

fn positive_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 { value } else { fallback }
}

/// Decoding and resampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_target_sample_rate")]
    pub target_sample_rate: u32,
    /// Stop decoding after this many seconds.
    #[serde(default)]
    pub max_seconds: Option<f32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: default_target_sample_rate(),
            max_seconds: None,
        }
    }
}

/// Song excerpts fed to the model as one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: f32,
    #[serde(default = "default_segment_hop_seconds")]
    pub hop_seconds: f32,
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            segment_seconds: default_segment_seconds(),
            hop_seconds: default_segment_hop_seconds(),
            max_segments: default_max_segments(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMelConfig {
    #[serde(default = "default_logmel_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_logmel_hop_ms")]
    pub hop_ms: f32,
    /// Analysis window length; `n_fft` when unset.
    #[serde(default)]
    pub window_len: Option<usize>,
    #[serde(default)]
    pub window: WindowKind,
    #[serde(default = "default_true")]
    pub center: bool,
    #[serde(default)]
    pub trailing: TrailingPolicy,
    #[serde(default)]
    pub spectrum: SpectrumScale,
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,
    #[serde(default)]
    pub fmin: f32,
    /// Upper filterbank edge; Nyquist when unset.
    #[serde(default)]
    pub fmax: Option<f32>,
    #[serde(default)]
    pub mel_scale: MelScale,
    #[serde(default)]
    pub norm: MelNorm,
    #[serde(default)]
    pub log: LogScale,
    #[serde(default = "default_log_epsilon")]
    pub epsilon: f32,
    #[serde(default)]
    pub top_db: Option<f32>,
}

impl LogMelConfig {
    /// Hop in samples, `floor(sr * hop_ms / 1000)` and at least one.
    pub fn hop_samples(&self, sample_rate: u32) -> usize {
        ((sample_rate as f64 * self.hop_ms as f64 / 1000.0).floor() as usize).max(1)
    }
}

impl Default for LogMelConfig {
    fn default() -> Self {
        Self {
            n_fft: default_logmel_n_fft(),
            hop_ms: default_logmel_hop_ms(),
            window_len: None,
            window: WindowKind::default(),
            center: default_true(),
            trailing: TrailingPolicy::default(),
            spectrum: SpectrumScale::default(),
            n_mels: default_n_mels(),
            fmin: 0.0,
            fmax: None,
            mel_scale: MelScale::default(),
            norm: MelNorm::default(),
            log: LogScale::default(),
            epsilon: default_log_epsilon(),
            top_db: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChromaConfig {
    #[serde(default = "default_chroma_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_chroma_hop")]
    pub hop: usize,
    #[serde(default)]
    pub window: WindowKind,
    #[serde(default)]
    pub center: bool,
    #[serde(default = "default_chroma_spectrum")]
    pub spectrum: SpectrumScale,
    #[serde(default = "default_chroma_min_hz")]
    pub min_hz: f32,
    #[serde(default = "default_chroma_max_hz")]
    pub max_hz: f32,
    #[serde(default)]
    pub mapping: ChromaMapping,
}

fn default_chroma_spectrum() -> SpectrumScale {
    SpectrumScale::Magnitude
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            n_fft: default_chroma_n_fft(),
            hop: default_chroma_hop(),
            window: WindowKind::default(),
            center: false,
            spectrum: default_chroma_spectrum(),
            min_hz: default_chroma_min_hz(),
            max_hz: default_chroma_max_hz(),
            mapping: ChromaMapping::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoConfig {
    /// Onset frames per autocorrelation window.
    #[serde(default = "default_tempo_win_length")]
    pub win_length: usize,
    /// Tempogram lags kept per excerpt.
    #[serde(default = "default_tempo_len")]
    pub tempo_len: usize,
    #[serde(default = "default_min_bpm")]
    pub min_bpm: f32,
    #[serde(default = "default_max_bpm")]
    pub max_bpm: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            win_length: default_tempo_win_length(),
            tempo_len: default_tempo_len(),
            min_bpm: default_min_bpm(),
            max_bpm: default_max_bpm(),
        }
    }
}

/// Harmonic/percussive separation ahead of chroma and tempo.
///
/// When enabled, chroma reads the harmonic half and tempo the percussive
/// half; log-mel always reads the unseparated excerpt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpssConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hpss_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_hpss_hop")]
    pub hop: usize,
    /// Frames in the median filter along time.
    #[serde(default = "default_hpss_kernel")]
    pub harmonic_kernel: usize,
    /// Bins in the median filter along frequency.
    #[serde(default = "default_hpss_kernel")]
    pub percussive_kernel: usize,
    #[serde(default = "default_hpss_mask_power")]
    pub mask_power: f32,
}

impl Default for HpssConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            n_fft: default_hpss_n_fft(),
            hop: default_hpss_hop(),
            harmonic_kernel: default_hpss_kernel(),
            percussive_kernel: default_hpss_kernel(),
            mask_power: default_hpss_mask_power(),
        }
    }
}

/// Model artifact location and tensor contract.
///
/// Unset dimensions follow the feature settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model definition; `RESONANCE_MODEL_PATH` takes precedence.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Weights file next to the definition; `<definition>.data` when unset.
    #[serde(default)]
    pub data_file: Option<String>,
    #[serde(default = "default_mel_input")]
    pub mel_input: String,
    #[serde(default = "default_chroma_input")]
    pub chroma_input: String,
    #[serde(default = "default_tempo_input")]
    pub tempo_input: String,
    #[serde(default = "default_output_name")]
    pub output: String,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default)]
    pub n_mels: Option<usize>,
    #[serde(default = "default_chroma_bins")]
    pub chroma_bins: usize,
    #[serde(default)]
    pub tempo_len: Option<usize>,
    #[serde(default)]
    pub target_frames: Option<usize>,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            data_file: None,
            mel_input: default_mel_input(),
            chroma_input: default_chroma_input(),
            tempo_input: default_tempo_input(),
            output: default_output_name(),
            embedding_dim: default_embedding_dim(),
            n_mels: None,
            chroma_bins: default_chroma_bins(),
            tempo_len: None,
            target_frames: None,
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityConfig {
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_similarity_threshold(),
        }
    }
}

/// Reference server used for cross-implementation checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParityConfig {
    #[serde(default = "default_parity_base_url")]
    pub base_url: String,
    #[serde(default = "default_parity_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ParityConfig {
    fn default() -> Self {
        Self {
            base_url: default_parity_base_url(),
            timeout_secs: default_parity_timeout_secs(),
        }
    }
}
