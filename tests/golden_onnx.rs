//! Runs the real ONNX model when `RESONANCE_MODEL_PATH` and
//! `RESONANCE_GOLDEN_PATH` point at artifacts; skipped otherwise.
//!
//! The golden file is JSON: `{"audio": "<path>", "embedding": [..]}`, with a
//! relative audio path resolved against the golden file's directory.

use std::path::PathBuf;

use resonance::{Pipeline, PipelineConfig};
use serde::Deserialize;

const GOLDEN_MIN_SIMILARITY: f64 = 0.99;

#[derive(Deserialize)]
struct Golden {
    audio: PathBuf,
    embedding: Vec<f32>,
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

#[test]
fn onnx_embedding_matches_golden_vector() {
    let (Some(_model), Some(golden_path)) = (
        env_path("RESONANCE_MODEL_PATH"),
        env_path("RESONANCE_GOLDEN_PATH"),
    ) else {
        eprintln!("Skipping golden test: RESONANCE_MODEL_PATH or RESONANCE_GOLDEN_PATH unset");
        return;
    };
    let golden: Golden =
        serde_json::from_str(&std::fs::read_to_string(&golden_path).unwrap()).unwrap();
    let audio = match golden_path.parent() {
        Some(dir) if golden.audio.is_relative() => dir.join(&golden.audio),
        _ => golden.audio.clone(),
    };

    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let embedding = pipeline.embed(&audio).unwrap();
    let report = pipeline
        .verifier()
        .verify_embedding(&embedding, &golden.embedding)
        .unwrap();

    assert!(
        report.cosine_similarity >= GOLDEN_MIN_SIMILARITY,
        "golden similarity {}",
        report.cosine_similarity
    );
}
