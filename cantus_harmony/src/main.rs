// Cantus command-line front end.
//
// Reads tokens, calibration samples and mappings as JSON files and prints JSON
// results to stdout. Logging goes to stderr, filtered by `RUST_LOG`
// (default `info`).
//
// Usage:
//   cantus analyze --tokens song.json [--library patterns.json] [--profile jazz]
//                  [--mapping mapping.json] [--config config.json]
//   cantus fit --samples samples.json [--method auto] [--out mapping.json]
//   cantus evaluate --samples samples.json --mapping mapping.json [--bins 10]
//   cantus patterns [--library patterns.json]
//
// Samples files hold `[{"raw": 0.42, "target": 1.0}, ...]`.

use anyhow::{Context, Result};
use cantus_harmony::calibration::{self, CalibrationMapping, CalibrationMethod, CalibrationSample};
use cantus_harmony::config::AnalysisConfig;
use cantus_harmony::engine::Engine;
use cantus_harmony::library::PatternLibrary;
use cantus_harmony::token::Token;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cantus", version)]
#[command(about = "Harmonic pattern matching and confidence calibration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match a token sequence and report selected patterns and confidence
    Analyze {
        /// JSON array of tokens
        #[arg(long, value_name = "FILE")]
        tokens: PathBuf,
        /// Pattern library (defaults to the bundled one)
        #[arg(long, value_name = "FILE")]
        library: Option<PathBuf>,
        /// Style profile (defaults to the config's profile)
        #[arg(long)]
        profile: Option<String>,
        /// Calibration mapping produced by `fit`
        #[arg(long, value_name = "FILE")]
        mapping: Option<PathBuf>,
        /// Analysis config
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Fit a calibration mapping from labelled samples
    Fit {
        #[arg(long, value_name = "FILE")]
        samples: PathBuf,
        /// identity, logistic, isotonic or auto
        #[arg(long, default_value = "auto")]
        method: String,
        /// Write the mapping here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Analysis config supplying the quality gates
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Compare a mapping against the identity on labelled samples
    Evaluate {
        #[arg(long, value_name = "FILE")]
        samples: PathBuf,
        #[arg(long, value_name = "FILE")]
        mapping: PathBuf,
        #[arg(long, default_value_t = 10)]
        bins: usize,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// List the patterns of a library
    Patterns {
        #[arg(long, value_name = "FILE")]
        library: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Analyze {
            tokens,
            library,
            profile,
            mapping,
            config,
        } => analyze(&tokens, library.as_deref(), profile, mapping.as_deref(), config.as_deref()),
        Command::Fit {
            samples,
            method,
            out,
            config,
        } => fit(&samples, &method, out.as_deref(), config.as_deref()),
        Command::Evaluate {
            samples,
            mapping,
            bins,
            config,
        } => evaluate(&samples, &mapping, bins, config.as_deref()),
        Command::Patterns { library } => patterns(library.as_deref()),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {what} {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {what} {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::load(path).context("loading analysis config"),
        None => Ok(AnalysisConfig::default()),
    }
}

fn load_library(path: Option<&Path>) -> Result<PatternLibrary> {
    match path {
        Some(path) => PatternLibrary::load(path).context("loading pattern library"),
        None => PatternLibrary::builtin().context("loading bundled pattern library"),
    }
}

fn load_samples(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let samples: Vec<CalibrationSample> = read_json(path, "samples")?;
    Ok(CalibrationSample::split(&samples))
}

fn analyze(
    tokens: &Path,
    library: Option<&Path>,
    profile: Option<String>,
    mapping: Option<&Path>,
    config: Option<&Path>,
) -> Result<()> {
    let config = load_config(config)?;
    let profile = profile.unwrap_or_else(|| config.profile.clone());
    let engine = Engine::new(Arc::new(load_library(library)?)).with_config(config);
    let tokens: Vec<Token> = read_json(tokens, "tokens")?;
    let mapping: Option<CalibrationMapping> = mapping.map(|p| read_json(p, "mapping")).transpose()?;

    let analysis = engine.analyze(&tokens, &profile, mapping.as_ref(), None);
    tracing::info!(
        selected = analysis.selected.len(),
        raw = analysis.raw_confidence,
        calibrated = analysis.calibrated_confidence,
        "analysis finished"
    );
    print_json(&analysis)
}

fn fit(samples: &Path, method: &str, out: Option<&Path>, config: Option<&Path>) -> Result<()> {
    let method: CalibrationMethod = method.parse()?;
    let gates = load_config(config)?.calibration;
    let (raw, targets) = load_samples(samples)?;
    let mapping = calibration::fit(&raw, &targets, method, &gates);

    match out {
        Some(path) => {
            let json = serde_json::to_string_pretty(&mapping)?;
            std::fs::write(path, json).with_context(|| format!("writing mapping {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                passed = mapping.passed_gates,
                "wrote calibration mapping"
            );
            Ok(())
        }
        None => print_json(&mapping),
    }
}

fn evaluate(samples: &Path, mapping: &Path, bins: usize, config: Option<&Path>) -> Result<()> {
    let gates = load_config(config)?.calibration;
    let mapping: CalibrationMapping = read_json(mapping, "mapping")?;
    let (raw, targets) = load_samples(samples)?;
    let report = calibration::evaluate(&mapping, &raw, &targets, bins, &gates);
    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
    print_json(&report)
}

#[derive(Serialize)]
struct PatternSummary<'a> {
    id: &'a str,
    name: &'a str,
    family: &'a str,
    tracks: &'a [String],
    profiles: &'a [String],
    window: (usize, usize),
    structural: bool,
}

fn patterns(library: Option<&Path>) -> Result<()> {
    let library = load_library(library)?;
    let summaries: Vec<PatternSummary<'_>> = library
        .patterns()
        .iter()
        .map(|p| PatternSummary {
            id: p.id(),
            name: &p.def.name,
            family: p.def.family(),
            tracks: &p.def.tracks,
            profiles: &p.def.scope.profiles,
            window: (p.min_window, p.max_window),
            structural: p.def.is_structural(),
        })
        .collect();
    print_json(&summaries)
}
