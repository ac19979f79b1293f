//! `recognizer` - identify clips against a song corpus and blend songs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recognizer_rust::{Recognition, Recognizer, RecognizerConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "recognizer")]
#[command(about = "Spectrogram fingerprinting and song matching")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RECOGNIZER_CONFIG")]
    config: Option<PathBuf>,

    /// Corpus root holding one folder per song
    #[arg(long, env = "RECOGNIZER_CORPUS")]
    corpus: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete the feature, fingerprint and spectrogram caches
    Clean,
    /// Analyse new corpus files and refresh the caches
    Scan,
    /// Rank the corpus against an audio clip
    Match {
        file: PathBuf,
    },
    /// Blend two files, then match the blend
    Mix {
        first: PathBuf,
        second: PathBuf,
        /// Share of the first file, 0-100
        #[arg(short, long, default_value_t = 50.0)]
        weight: f64,
        /// Output WAV path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recognizer_rust=info,recognizer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RecognizerConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RecognizerConfig::default(),
    };
    if let Some(root) = args.corpus {
        config = config.with_corpus_root(root);
    }
    info!("Corpus root: {}", config.corpus.root.display());

    let mut recognizer = Recognizer::new(config).context("Invalid configuration")?;
    if matches!(args.command, Command::Clean) {
        let removed = recognizer.clean().context("Failed to remove caches")?;
        println!("Removed {} cache directories", removed);
        return Ok(());
    }

    let report = recognizer.scan().context("Corpus scan failed")?;

    match args.command {
        Command::Clean => {}
        Command::Scan => {
            println!(
                "{} songs, {} files: {} computed, {} cached, {} skipped, {} caches rebuilt",
                recognizer.index().song_count(),
                recognizer.index().file_count(),
                report.computed,
                report.cached,
                report.skipped,
                report.recovered
            );
        }
        Command::Match { file } => {
            let recognition = recognizer
                .recognize(&file)
                .with_context(|| format!("Failed to match {}", file.display()))?;
            print_recognition(&recognition);
        }
        Command::Mix {
            first,
            second,
            weight,
            output,
        } => {
            let path = match output {
                Some(output) => recognizer.mix_to(&first, &second, weight, output),
                None => recognizer.mix(&first, &second, weight),
            }
            .context("Failed to mix songs")?;
            println!("Mixed song written to {}", path.display());

            let recognition = recognizer
                .recognize(&path)
                .context("Failed to match the mixed song")?;
            print_recognition(&recognition);
        }
    }

    Ok(())
}

fn print_recognition(recognition: &Recognition) {
    for (i, result) in recognition.ranked.iter().enumerate() {
        println!(
            "  {:>3}. {:<30} {:<15} {:>8}",
            i + 1,
            result.song,
            result.label,
            result.percentage()
        );
    }
    println!("{}", recognition);
}
