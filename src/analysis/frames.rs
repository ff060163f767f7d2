//! Lazy framing of PCM into overlapping windowed blocks.
//!
//! Frames always span `fft_len` samples. When the analysis window is shorter
//! than the FFT it sits in the middle of the frame and the rest stays zero.
//! Centered framing pads `fft_len / 2` virtual zeros on both ends of the
//! signal; nothing is copied, samples outside the buffer read as zero.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Analysis window applied to every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Periodic Hann window.
    #[default]
    Hann,
    Rectangular,
}

/// What happens to samples after the last full frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingPolicy {
    /// Only emit frames that fit entirely inside the (padded) signal.
    #[default]
    Drop,
    /// Emit one more zero-padded frame covering any leftover samples.
    ZeroPad,
}

/// Framing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSpec {
    pub window_len: usize,
    pub hop: usize,
    pub fft_len: usize,
    pub center: bool,
    pub window: WindowKind,
    pub trailing: TrailingPolicy,
}

impl FrameSpec {
    /// Uncentered Hann framing with the window filling the whole FFT.
    pub fn new(fft_len: usize, hop: usize) -> Self {
        Self {
            window_len: fft_len,
            hop,
            fft_len,
            center: false,
            window: WindowKind::Hann,
            trailing: TrailingPolicy::Drop,
        }
    }

    pub fn centered(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn with_window(mut self, window: WindowKind) -> Self {
        self.window = window;
        self
    }

    pub fn with_window_len(mut self, window_len: usize) -> Self {
        self.window_len = window_len;
        self
    }

    pub fn with_trailing(mut self, trailing: TrailingPolicy) -> Self {
        self.trailing = trailing;
        self
    }
}

/// Invalid framing parameters.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame window length must be non-zero")]
    EmptyWindow,
    #[error("Hop length {hop} must be between 1 and the window length {window_len}")]
    InvalidHop { hop: usize, window_len: usize },
    #[error("FFT size {fft_len} is smaller than the window length {window_len}")]
    FftTooSmall { fft_len: usize, window_len: usize },
}

/// One windowed analysis block.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Offset of `samples[0]` in the source signal; negative when centered.
    pub start: isize,
    /// `fft_len` windowed samples.
    pub samples: Vec<f32>,
}

/// Slices PCM into windowed frames on demand.
#[derive(Clone, Debug)]
pub struct FrameSegmenter {
    spec: FrameSpec,
    window: Vec<f32>,
    window_offset: usize,
}

impl FrameSegmenter {
    pub fn new(spec: FrameSpec) -> Result<Self, FrameError> {
        if spec.window_len == 0 {
            return Err(FrameError::EmptyWindow);
        }
        if spec.hop == 0 || spec.hop > spec.window_len {
            return Err(FrameError::InvalidHop {
                hop: spec.hop,
                window_len: spec.window_len,
            });
        }
        if spec.fft_len < spec.window_len {
            return Err(FrameError::FftTooSmall {
                fft_len: spec.fft_len,
                window_len: spec.window_len,
            });
        }
        Ok(Self {
            spec,
            window: build_window(spec.window, spec.window_len),
            window_offset: (spec.fft_len - spec.window_len) / 2,
        })
    }

    pub fn spec(&self) -> &FrameSpec {
        &self.spec
    }

    /// Number of frames [`frames`](Self::frames) yields for `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        let padded = len + if self.spec.center { 2 * (self.spec.fft_len / 2) } else { 0 };
        let span = self.spec.fft_len;
        let hop = self.spec.hop;
        match self.spec.trailing {
            TrailingPolicy::Drop => {
                if padded < span {
                    0
                } else {
                    1 + (padded - span) / hop
                }
            }
            TrailingPolicy::ZeroPad => {
                if len == 0 {
                    0
                } else if padded <= span {
                    1
                } else {
                    1 + (padded - span).div_ceil(hop)
                }
            }
        }
    }

    /// Start a fresh pass over `pcm`. Call again to restart.
    pub fn frames<'a>(&'a self, pcm: &'a [f32]) -> Frames<'a> {
        Frames {
            segmenter: self,
            pcm,
            next: 0,
            count: self.frame_count(pcm.len()),
        }
    }

    fn origin(&self, index: usize) -> isize {
        let pad = if self.spec.center { self.spec.fft_len / 2 } else { 0 };
        (index * self.spec.hop) as isize - pad as isize
    }

    fn fill(&self, pcm: &[f32], origin: isize, out: &mut [f32]) {
        out.fill(0.0);
        for (i, weight) in self.window.iter().enumerate() {
            let idx = origin + (self.window_offset + i) as isize;
            if idx >= 0 {
                if let Some(sample) = pcm.get(idx as usize) {
                    out[self.window_offset + i] = sample * weight;
                }
            }
        }
    }
}

/// Finite iterator over the frames of one signal.
pub struct Frames<'a> {
    segmenter: &'a FrameSegmenter,
    pcm: &'a [f32],
    next: usize,
    count: usize,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.next >= self.count {
            return None;
        }
        let start = self.segmenter.origin(self.next);
        let mut samples = vec![0.0_f32; self.segmenter.spec.fft_len];
        self.segmenter.fill(self.pcm, start, &mut samples);
        self.next += 1;
        Some(Frame { start, samples })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames<'_> {}

pub(crate) fn build_window(kind: WindowKind, len: usize) -> Vec<f32> {
    match kind {
        WindowKind::Hann => hann_periodic(len),
        WindowKind::Rectangular => vec![1.0; len],
    }
}

/// Periodic Hann window, as used for spectral analysis.
pub(crate) fn hann_periodic(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denom = len as f64;
    (0..len)
        .map(|i| (0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos()) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(fft_len: usize, hop: usize) -> FrameSpec {
        FrameSpec::new(fft_len, hop).with_window(WindowKind::Rectangular)
    }

    #[test]
    fn rejects_hop_longer_than_window() {
        let err = FrameSegmenter::new(FrameSpec::new(4, 5)).unwrap_err();
        assert_eq!(err, FrameError::InvalidHop { hop: 5, window_len: 4 });
    }

    #[test]
    fn rejects_fft_smaller_than_window() {
        let spec = FrameSpec::new(4, 2).with_window_len(8);
        assert!(matches!(
            FrameSegmenter::new(spec),
            Err(FrameError::FftTooSmall { .. })
        ));
    }

    #[test]
    fn drop_policy_discards_partial_tail() {
        let segmenter = FrameSegmenter::new(rect(4, 2)).unwrap();
        let pcm: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let frames: Vec<Frame> = segmenter.frames(&pcm).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].start, 4);
        assert_eq!(frames[2].samples, vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn zero_pad_policy_keeps_partial_tail() {
        let segmenter =
            FrameSegmenter::new(rect(4, 2).with_trailing(TrailingPolicy::ZeroPad)).unwrap();
        let pcm: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let frames: Vec<Frame> = segmenter.frames(&pcm).collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3].samples, vec![6.0, 7.0, 8.0, 0.0]);
    }

    #[test]
    fn short_signal_yields_nothing_when_dropping() {
        let segmenter = FrameSegmenter::new(rect(8, 4)).unwrap();
        assert_eq!(segmenter.frames(&[1.0; 5]).count(), 0);
    }

    #[test]
    fn centered_frames_pad_virtually() {
        let segmenter = FrameSegmenter::new(rect(4, 2).centered(true)).unwrap();
        let pcm = [1.0_f32, 2.0, 3.0, 4.0];
        let frames: Vec<Frame> = segmenter.frames(&pcm).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].start, -2);
        assert_eq!(frames[0].samples, vec![0.0, 0.0, 1.0, 2.0]);
        assert_eq!(frames[2].samples, vec![3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn short_window_is_centered_in_fft_frame() {
        let spec = rect(8, 2).with_window_len(4);
        let segmenter = FrameSegmenter::new(spec).unwrap();
        let pcm = [1.0_f32; 8];
        let first = segmenter.frames(&pcm).next().unwrap();
        assert_eq!(first.samples, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn frames_restart_from_the_beginning() {
        let segmenter = FrameSegmenter::new(FrameSpec::new(4, 2)).unwrap();
        let pcm = [0.5_f32; 12];
        let first: Vec<Frame> = segmenter.frames(&pcm).collect();
        let second: Vec<Frame> = segmenter.frames(&pcm).collect();
        assert_eq!(first, second);
        assert_eq!(segmenter.frames(&pcm).len(), segmenter.frame_count(pcm.len()));
    }

    #[test]
    fn hann_window_is_periodic() {
        let window = hann_periodic(4);
        let expected = [0.0_f32, 0.5, 1.0, 0.5];
        for (a, b) in window.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn reference_logmel_geometry_yields_745_frames() {
        let spec = FrameSpec::new(2048, 1102).centered(true);
        let segmenter = FrameSegmenter::new(spec).unwrap();
        assert_eq!(segmenter.frame_count(820_260), 745);
    }
}
