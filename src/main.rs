//! `resonance` command-line front end.

use std::path::{Path, PathBuf};

use resonance::analysis::embedding::ModelArtifact;
use resonance::analysis::similarity::SimilarityVerifier;
use resonance::{FeatureKind, Pipeline, PipelineConfig, config, logging};
use serde::Serialize;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Embed {
        audio: PathBuf,
        model: Option<PathBuf>,
        out: Option<PathBuf>,
    },
    Feature {
        audio: PathBuf,
        kind: FeatureKind,
        out: Option<PathBuf>,
    },
    Compare {
        left: PathBuf,
        right: PathBuf,
        threshold: Option<f64>,
    },
    Tempo {
        audio: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    command: Command,
    config: Option<PathBuf>,
    verbose: bool,
}

#[derive(Serialize)]
struct TempoSummary {
    excerpt: usize,
    bpm: f32,
    confidence: f32,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let filter = if options.verbose { "debug" } else { "warn" };
    if let Err(err) = logging::init_with_default(filter) {
        eprintln!("Logging disabled: {err}");
    }
    let config = load_config(options.config.as_deref())?;

    match options.command {
        Command::Embed { audio, model, out } => {
            let pipeline = build_pipeline(config)?;
            let embedding = match model {
                Some(path) => {
                    let artifact =
                        ModelArtifact::new(path, pipeline.config().model.data_file.as_deref());
                    let model = pipeline.load_model(&artifact).map_err(|err| err.to_string())?;
                    pipeline.embed_with(&audio, model.as_ref())
                }
                None => pipeline.embed(&audio),
            }
            .map_err(|err| err.to_string())?;
            emit_json(&embedding, out.as_deref())
        }
        Command::Feature { audio, kind, out } => {
            let feature = build_pipeline(config)?
                .extract_feature(&audio, kind)
                .map_err(|err| err.to_string())?;
            emit_json(&feature, out.as_deref())
        }
        Command::Compare {
            left,
            right,
            threshold,
        } => {
            let verifier =
                SimilarityVerifier::new(threshold.unwrap_or(config.similarity.threshold));
            let left = read_vector(&left)?;
            let right = read_vector(&right)?;
            let report = verifier
                .compare(&left, &right)
                .map_err(|err| err.to_string())?;
            emit_json(&report, None)
        }
        Command::Tempo { audio } => {
            let pipeline = build_pipeline(config)?;
            let pcm = pipeline.load(&audio).map_err(|err| err.to_string())?;
            let summary: Vec<TempoSummary> = pipeline
                .segment_features(&pcm)
                .iter()
                .enumerate()
                .map(|(excerpt, features)| TempoSummary {
                    excerpt,
                    bpm: features.tempo.bpm,
                    confidence: features.tempo.confidence,
                })
                .collect();
            emit_json(&summary, None)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, String> {
    let loaded = match path {
        Some(path) => config::load_from(path),
        None => config::load_or_default(),
    };
    loaded.map_err(|err| format!("Failed to load config: {err}"))
}

fn build_pipeline(config: PipelineConfig) -> Result<Pipeline, String> {
    Pipeline::new(config).map_err(|err| err.to_string())
}

fn read_vector(path: &Path) -> Result<Vec<f32>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read {}: {err}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|err| format!("{} is not a JSON number array: {err}", path.display()))
}

fn emit_json(value: &impl Serialize, out: Option<&Path>) -> Result<(), String> {
    let json = serde_json::to_string(value).map_err(|err| err.to_string())?;
    match out {
        Some(path) => std::fs::write(path, json)
            .map_err(|err| format!("Failed to write {}: {err}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut positional: Vec<String> = Vec::new();
    let mut model = None;
    let mut out = None;
    let mut kind = None;
    let mut threshold = None;
    let mut config = None;
    let mut verbose = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(help_text().to_string()),
            "-v" | "--verbose" => verbose = true,
            "--model" => model = Some(PathBuf::from(take_value(&mut iter, "--model")?)),
            "--out" => out = Some(PathBuf::from(take_value(&mut iter, "--out")?)),
            "--config" => config = Some(PathBuf::from(take_value(&mut iter, "--config")?)),
            "--kind" => {
                let value = take_value(&mut iter, "--kind")?;
                kind = Some(value.parse::<FeatureKind>().map_err(|err| err.to_string())?);
            }
            "--threshold" => {
                let value = take_value(&mut iter, "--threshold")?;
                let parsed = value
                    .parse::<f64>()
                    .map_err(|_| format!("Invalid --threshold value: {value}"))?;
                threshold = Some(parsed);
            }
            flag if flag.starts_with("--") => {
                return Err(format!("Unknown argument: {flag}\n\n{}", help_text()));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let subcommand = positional
        .next()
        .ok_or_else(|| format!("Missing command\n\n{}", help_text()))?;
    let mut required = |name: &str| {
        positional
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| format!("{subcommand} requires <{name}>\n\n{}", help_text()))
    };
    let command = match subcommand.as_str() {
        "embed" => Command::Embed {
            audio: required("audio")?,
            model,
            out,
        },
        "feature" => Command::Feature {
            audio: required("audio")?,
            kind: kind.ok_or_else(|| "feature requires --kind L|C|T".to_string())?,
            out,
        },
        "compare" => Command::Compare {
            left: required("a.json")?,
            right: required("b.json")?,
            threshold,
        },
        "tempo" => Command::Tempo {
            audio: required("audio")?,
        },
        other => return Err(format!("Unknown command: {other}\n\n{}", help_text())),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("Unexpected argument: {extra}"));
    }
    Ok(CliOptions {
        command,
        config,
        verbose,
    })
}

fn take_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    iter.next().ok_or_else(|| format!("{flag} requires a value"))
}

fn help_text() -> &'static str {
    "Usage: resonance <command> [options]\n\n\
Commands:\n\
  embed <audio> [--model PATH] [--out FILE]     Print the song embedding as JSON\n\
  feature <audio> --kind L|C|T [--out FILE]     Print a flattened feature as JSON\n\
  compare <a.json> <b.json> [--threshold X]     Cosine similarity of two vectors\n\
  tempo <audio>                                 Per-excerpt BPM and confidence\n\n\
Options:\n\
  --config <path>  Config file (default: <config dir>/.resonance/resonance.toml)\n\
  -v, --verbose    Debug logging on stderr\n\
  -h, --help       Show this help\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_feature_command() {
        let options = parse_args(args(&["feature", "song.mp3", "--kind", "c", "-v"])).unwrap();
        assert!(options.verbose);
        assert_eq!(
            options.command,
            Command::Feature {
                audio: PathBuf::from("song.mp3"),
                kind: FeatureKind::Chroma,
                out: None,
            }
        );
    }

    #[test]
    fn compare_needs_two_files() {
        let err = parse_args(args(&["compare", "a.json"])).unwrap_err();
        assert!(err.starts_with("compare requires <b.json>"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = parse_args(args(&["feature", "song.mp3", "--kind", "X"])).unwrap_err();
        assert!(err.contains("Unknown feature kind"));
    }

    #[test]
    fn embed_accepts_model_and_config() {
        let options = parse_args(args(&[
            "--config", "custom.toml", "embed", "song.flac", "--model", "m.onnx",
        ]))
        .unwrap();
        assert_eq!(options.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(
            options.command,
            Command::Embed { model: Some(ref path), .. } if path == Path::new("m.onnx")
        ));
    }
}
