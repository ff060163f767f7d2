/// Row-major `frames x features` matrix for one feature family.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureMatrix {
    features: usize,
    frames: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(features: usize) -> Self {
        Self::with_capacity(features, 0)
    }

    pub fn with_capacity(features: usize, frames: usize) -> Self {
        Self {
            features,
            frames: 0,
            data: Vec::with_capacity(features.saturating_mul(frames)),
        }
    }

    /// Build from rows; short rows are zero-filled and long rows cut.
    pub fn from_rows<R: AsRef<[f32]>>(features: usize, rows: &[R]) -> Self {
        let mut matrix = Self::with_capacity(features, rows.len());
        for row in rows {
            matrix.push_row(row.as_ref());
        }
        matrix
    }

    /// Append one frame; values beyond `features` are ignored.
    pub fn push_row(&mut self, row: &[f32]) {
        self.data
            .extend((0..self.features).map(|i| row.get(i).copied().unwrap_or(0.0)));
        self.frames += 1;
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn row(&self, frame: usize) -> Option<&[f32]> {
        let start = frame.checked_mul(self.features)?;
        self.data.get(start..start + self.features)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.features.max(1))
    }

    pub fn get(&self, frame: usize, feature: usize) -> f32 {
        if feature >= self.features {
            return 0.0;
        }
        self.data
            .get(frame * self.features + feature)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Flatten feature-major: all frames of feature 0, then feature 1, ...
    pub fn to_feature_major(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.data.len());
        for feature in 0..self.features {
            out.extend((0..self.frames).map(|frame| self.data[frame * self.features + feature]));
        }
        out
    }
}
