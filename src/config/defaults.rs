use crate::analysis::audio::DEFAULT_TARGET_SAMPLE_RATE;
use crate::analysis::embedding::DEFAULT_EMBEDDING_DIM;
use crate::analysis::similarity::DEFAULT_SIMILARITY_THRESHOLD;

pub(super) fn default_target_sample_rate() -> u32 {
    DEFAULT_TARGET_SAMPLE_RATE
}

pub(super) fn default_segment_seconds() -> f32 {
    18.6
}

pub(super) fn default_segment_hop_seconds() -> f32 {
    6.4
}

pub(super) fn default_max_segments() -> usize {
    3
}

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_logmel_n_fft() -> usize {
    2048
}

pub(super) fn default_logmel_hop_ms() -> f32 {
    25.0
}

pub(super) fn default_n_mels() -> usize {
    128
}

pub(super) fn default_log_epsilon() -> f32 {
    1e-10
}

pub(super) fn default_chroma_n_fft() -> usize {
    8192
}

pub(super) fn default_chroma_hop() -> usize {
    512
}

/// C1
pub(super) fn default_chroma_min_hz() -> f32 {
    32.70
}

/// C8
pub(super) fn default_chroma_max_hz() -> f32 {
    4186.01
}

pub(super) fn default_chroma_bins() -> usize {
    crate::analysis::chroma::PITCH_CLASSES
}

pub(super) fn default_tempo_win_length() -> usize {
    384
}

pub(super) fn default_tempo_len() -> usize {
    160
}

pub(super) fn default_min_bpm() -> f32 {
    40.0
}

pub(super) fn default_max_bpm() -> f32 {
    240.0
}

pub(super) fn default_hpss_n_fft() -> usize {
    2048
}

pub(super) fn default_hpss_hop() -> usize {
    512
}

pub(super) fn default_hpss_kernel() -> usize {
    31
}

pub(super) fn default_hpss_mask_power() -> f32 {
    2.0
}

pub(super) fn default_embedding_dim() -> usize {
    DEFAULT_EMBEDDING_DIM
}

pub(super) fn default_mel_input() -> String {
    "mel".to_string()
}

pub(super) fn default_chroma_input() -> String {
    "chroma".to_string()
}

pub(super) fn default_tempo_input() -> String {
    "tempo".to_string()
}

pub(super) fn default_output_name() -> String {
    "embedding".to_string()
}

pub(super) fn default_intra_threads() -> usize {
    1
}

pub(super) fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

pub(super) fn default_parity_base_url() -> String {
    "http://localhost:8080".to_string()
}

pub(super) fn default_parity_timeout_secs() -> u64 {
    30
}
