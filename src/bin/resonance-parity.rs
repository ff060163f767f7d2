//! Send locally computed vectors to a reference server and report agreement.

use std::path::PathBuf;

use resonance::analysis::embedding::ModelArtifact;
use resonance::parity::ParityClient;
use resonance::{FeatureKind, Pipeline, PipelineError, SimilarityReport, config, logging};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Embedding,
    Feature(FeatureKind),
}

#[derive(Debug, Clone)]
struct CliOptions {
    audio: PathBuf,
    server: String,
    target: Target,
    model: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    let config = match &options.config {
        Some(path) => config::load_from(path),
        None => config::load_or_default(),
    }
    .map_err(|err| format!("Failed to load config: {err}"))?;
    let mut parity = config.parity.clone();
    parity.base_url = options.server.clone();
    let client = ParityClient::from_config(&parity);
    let pipeline = Pipeline::new(config).map_err(|err| err.to_string())?;

    let report = exchange(&pipeline, &client, &options).map_err(|err| match err.kind() {
        resonance::ErrorKind::Data => format!("Data error: {err}"),
        resonance::ErrorKind::Configuration => format!("Configuration error: {err}"),
        resonance::ErrorKind::Environment => format!("Environment error: {err}"),
    })?;
    let json = serde_json::to_string(&report).map_err(|err| err.to_string())?;
    println!("{json}");
    if !report.is_above_threshold {
        return Err(format!(
            "Similarity {:.6} is below the server threshold",
            report.cosine_similarity
        ));
    }
    Ok(())
}

fn exchange(
    pipeline: &Pipeline,
    client: &ParityClient,
    options: &CliOptions,
) -> Result<SimilarityReport, PipelineError> {
    match options.target {
        Target::Embedding => {
            let artifact = match &options.model {
                Some(path) => ModelArtifact::new(path, pipeline.config().model.data_file.as_deref()),
                None => pipeline.model_artifact()?,
            };
            let model = pipeline.load_model(&artifact)?;
            let embedding = pipeline.embed_with(&options.audio, model.as_ref())?;
            Ok(client.compare_embedding(&embedding)?)
        }
        Target::Feature(kind) => {
            let feature = pipeline.extract_feature(&options.audio, kind)?;
            Ok(client.compare_feature(kind, &feature)?)
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut audio = None;
    let mut server = None;
    let mut target = Target::Embedding;
    let mut model = None;
    let mut config = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(help_text().to_string()),
            "--server" => {
                server = Some(iter.next().ok_or_else(|| "--server requires a value".to_string())?);
            }
            "--kind" => {
                let value = iter.next().ok_or_else(|| "--kind requires a value".to_string())?;
                target = parse_target(&value)?;
            }
            "--model" => {
                let value = iter.next().ok_or_else(|| "--model requires a value".to_string())?;
                model = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = iter.next().ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            flag if flag.starts_with("--") => {
                return Err(format!("Unknown argument: {flag}\n\n{}", help_text()));
            }
            _ if audio.is_none() => audio = Some(PathBuf::from(arg)),
            _ => return Err(format!("Unexpected argument: {arg}")),
        }
    }

    Ok(CliOptions {
        audio: audio.ok_or_else(|| format!("<audio> is required\n\n{}", help_text()))?,
        server: server.ok_or_else(|| format!("--server is required\n\n{}", help_text()))?,
        target,
        model,
        config,
    })
}

fn parse_target(value: &str) -> Result<Target, String> {
    if value.trim().eq_ignore_ascii_case("e") {
        return Ok(Target::Embedding);
    }
    value
        .parse::<FeatureKind>()
        .map(Target::Feature)
        .map_err(|err| format!("{err} (or E for the embedding)"))
}

fn help_text() -> &'static str {
    "Usage: resonance-parity <audio> --server <url> [options]\n\n\
Options:\n\
  --server <url>   Reference server base URL, e.g. http://localhost:8080\n\
  --kind <L|C|T|E> Feature family to compare, E for the embedding (default: E)\n\
  --model <path>   Model definition for E (default: configured model)\n\
  --config <path>  Config file\n\
  -h, --help       Show this help\n"
}
