use serde::{Deserialize, Serialize};

/// Hz to mel conversion formula.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelScale {
    /// Linear below 1 kHz, logarithmic above (Slaney's Auditory Toolbox).
    #[default]
    Slaney,
    /// `2595 * log10(1 + f / 700)`
    Htk,
}

/// Per-filter weighting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelNorm {
    /// Scale each triangle to unit area in Hz.
    #[default]
    Slaney,
    None,
}

const SLANEY_F_SP: f64 = 200.0 / 3.0;
const SLANEY_MIN_LOG_HZ: f64 = 1_000.0;
const SLANEY_MIN_LOG_MEL: f64 = SLANEY_MIN_LOG_HZ / SLANEY_F_SP;

fn slaney_logstep() -> f64 {
    6.4_f64.ln() / 27.0
}

impl MelScale {
    pub fn hz_to_mel(self, hz: f64) -> f64 {
        match self {
            MelScale::Htk => 2595.0 * (1.0 + hz / 700.0).log10(),
            MelScale::Slaney => {
                if hz >= SLANEY_MIN_LOG_HZ {
                    SLANEY_MIN_LOG_MEL + (hz / SLANEY_MIN_LOG_HZ).ln() / slaney_logstep()
                } else {
                    hz / SLANEY_F_SP
                }
            }
        }
    }

    pub fn mel_to_hz(self, mel: f64) -> f64 {
        match self {
            MelScale::Htk => 700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0),
            MelScale::Slaney => {
                if mel >= SLANEY_MIN_LOG_MEL {
                    SLANEY_MIN_LOG_HZ * (slaney_logstep() * (mel - SLANEY_MIN_LOG_MEL)).exp()
                } else {
                    mel * SLANEY_F_SP
                }
            }
        }
    }
}

/// Triangular mel filterbank over `fft_len / 2 + 1` spectrum bins.
///
/// Filter edges are placed on continuous frequencies, so narrow low bands
/// still receive weight from the bins they straddle.
#[derive(Clone, Debug)]
pub struct MelFilterbank {
    filters: Vec<Vec<(usize, f32)>>,
}

impl MelFilterbank {
    pub fn new(
        sample_rate: u32,
        fft_len: usize,
        bands: usize,
        f_min: f32,
        f_max: f32,
        scale: MelScale,
        norm: MelNorm,
    ) -> Self {
        let sr = sample_rate.max(1) as f64;
        let nyquist = sr * 0.5;
        let f_min = (f_min as f64).clamp(0.0, nyquist);
        let f_max = (f_max as f64).clamp(f_min, nyquist);
        let bin_count = fft_len / 2 + 1;
        let fft_freqs: Vec<f64> = (0..bin_count)
            .map(|k| k as f64 * sr / fft_len.max(1) as f64)
            .collect();

        let mel_min = scale.hz_to_mel(f_min);
        let mel_max = scale.hz_to_mel(f_max);
        let edges: Vec<f64> = (0..bands + 2)
            .map(|i| {
                let t = i as f64 / (bands + 1) as f64;
                scale.mel_to_hz(mel_min + (mel_max - mel_min) * t)
            })
            .collect();

        let filters = (0..bands)
            .map(|m| build_filter(&fft_freqs, edges[m], edges[m + 1], edges[m + 2], norm))
            .collect();
        Self { filters }
    }

    pub fn bands(&self) -> usize {
        self.filters.len()
    }

    /// Weighted sums of `spectrum` per band, accumulated in `f64`.
    pub fn apply(&self, spectrum: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|filter| {
                let mut sum = 0.0_f64;
                for &(bin, weight) in filter {
                    let value = spectrum.get(bin).copied().unwrap_or(0.0).max(0.0) as f64;
                    sum += value * weight as f64;
                }
                sum as f32
            })
            .collect()
    }

    #[cfg(test)]
    fn filter(&self, band: usize) -> &[(usize, f32)] {
        &self.filters[band]
    }
}

fn build_filter(fft_freqs: &[f64], lower: f64, center: f64, upper: f64, norm: MelNorm) -> Vec<(usize, f32)> {
    let rising = (center - lower).max(f64::MIN_POSITIVE);
    let falling = (upper - center).max(f64::MIN_POSITIVE);
    let scale = match norm {
        MelNorm::Slaney if upper > lower => 2.0 / (upper - lower),
        _ => 1.0,
    };
    fft_freqs
        .iter()
        .enumerate()
        .filter_map(|(bin, &freq)| {
            let up = (freq - lower) / rising;
            let down = (upper - freq) / falling;
            let weight = up.min(down).max(0.0) * scale;
            (weight > 0.0).then_some((bin, weight as f32))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slaney_scale_is_linear_below_1khz() {
        assert!((MelScale::Slaney.hz_to_mel(500.0) - 7.5).abs() < 1e-9);
        assert!((MelScale::Slaney.hz_to_mel(1_000.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn scales_round_trip() {
        for scale in [MelScale::Slaney, MelScale::Htk] {
            for hz in [0.0, 220.0, 999.0, 1_000.0, 8_000.0, 22_050.0] {
                let back = scale.mel_to_hz(scale.hz_to_mel(hz));
                assert!((back - hz).abs() < 1e-6, "{scale:?} {hz} -> {back}");
            }
        }
    }

    #[test]
    fn filters_are_non_negative_and_cover_every_band() {
        let bank = MelFilterbank::new(44_100, 2048, 128, 0.0, 22_050.0, MelScale::Slaney, MelNorm::Slaney);
        assert_eq!(bank.bands(), 128);
        for band in 0..bank.bands() {
            let filter = bank.filter(band);
            assert!(!filter.is_empty(), "band {band} is empty");
            assert!(filter.iter().all(|(_, w)| *w > 0.0));
        }
    }

    #[test]
    fn slaney_norm_gives_unit_area_in_hz() {
        let sr = 16_000;
        let fft_len = 4096;
        let bank = MelFilterbank::new(sr, fft_len, 40, 0.0, 8_000.0, MelScale::Htk, MelNorm::Slaney);
        let bin_hz = sr as f32 / fft_len as f32;
        for band in [10, 20, 35] {
            let area: f32 = bank.filter(band).iter().map(|(_, w)| w * bin_hz).sum();
            assert!((area - 1.0).abs() < 0.05, "band {band} area {area}");
        }
    }

    #[test]
    fn flat_spectrum_without_norm_peaks_near_one() {
        let bank = MelFilterbank::new(22_050, 1024, 32, 0.0, 11_025.0, MelScale::Htk, MelNorm::None);
        let spectrum = vec![1.0_f32; 513];
        let energies = bank.apply(&spectrum);
        assert!(energies.iter().all(|e| *e > 0.0));
    }
}
