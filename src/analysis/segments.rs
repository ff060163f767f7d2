use std::ops::Range;

use crate::config::SegmentConfig;

/// Chooses the song excerpts that are embedded as one batch.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentPlanner {
    segment_seconds: f32,
    hop_seconds: f32,
    max_segments: usize,
}

impl SegmentPlanner {
    pub fn new(config: &SegmentConfig) -> Self {
        Self {
            segment_seconds: config.segment_seconds.max(0.0),
            hop_seconds: config.hop_seconds.max(0.0),
            max_segments: config.max_segments.max(1),
        }
    }

    /// Excerpt length in samples.
    pub fn segment_len(&self, sample_rate: u32) -> usize {
        (self.segment_seconds as f64 * sample_rate as f64) as usize
    }

    /// Sample ranges of the excerpts for a signal of `total` samples.
    ///
    /// Candidate starts step by the hop while a full excerpt still fits. When
    /// there are more candidates than `max_segments`, they are subsampled at
    /// an even stride. Signals shorter than one excerpt give a single range.
    pub fn plan(&self, total: usize, sample_rate: u32) -> Vec<Range<usize>> {
        let seg_len = self.segment_len(sample_rate);
        let hop = ((self.hop_seconds as f64 * sample_rate as f64) as usize).max(1);
        let last_start = total.saturating_sub(seg_len);
        let starts: Vec<usize> = (0..=last_start).step_by(hop).collect();
        let chosen: Vec<usize> = if starts.len() > self.max_segments {
            let step = starts.len() as f64 / self.max_segments as f64;
            (0..self.max_segments)
                .map(|i| starts[(i as f64 * step) as usize])
                .collect()
        } else {
            starts
        };
        chosen
            .into_iter()
            .map(|start| start..(start + seg_len).min(total))
            .collect()
    }
}
