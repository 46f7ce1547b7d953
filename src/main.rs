use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tunescope::analyzer::mood::{MOOD_TABLE, quadrant_description};
use tunescope::analyzer::{AnalysisOutcome, AudioAnalyzer, analyze_file, analyze_files, decode};

#[derive(Parser)]
#[command(name = "tunescope", version, about = "Audio feature, mood and voice analyzer")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze audio files and print one JSON result per file
    Analyze {
        /// Files or directories (searched recursively for .wav/.flac)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Include sections, bars, beats, segments and tatums
        #[arg(long)]
        detailed: bool,

        /// Descriptor backend (overrides config)
        #[arg(long)]
        backend: Option<String>,

        /// Skip speech recognition even if configured
        #[arg(long)]
        no_speech: bool,

        /// Write <stem>.json files into this directory instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Show the mood reference table
    Moods,

    /// List available descriptor backends
    Backends,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = tunescope::config::AppConfig::load();

    match cli.command {
        Commands::Analyze {
            paths,
            jobs,
            detailed,
            backend,
            no_speech,
            output,
            pretty,
        } => {
            if let Some(name) = backend {
                config.backend = name;
            }
            if detailed {
                config.detailed = true;
            }
            if no_speech {
                config.speech.enabled = false;
            }
            if jobs > 0 {
                config.workers = jobs;
            }

            let analyzer =
                AudioAnalyzer::from_config(&config).context("Failed to set up analyzer")?;
            log::info!("Backend: {}", analyzer.backend_name());

            let files = decode::collect_audio_files(&paths);
            if files.is_empty() {
                anyhow::bail!("No .wav or .flac files found in the given paths");
            }
            if let Some(dir) = &output {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }

            let writer = OutputWriter { dir: output, pretty };

            if let [file] = files.as_slice() {
                let outcome = analyze_single(&analyzer, file);
                writer.write(file, &outcome)?;
                if outcome.is_failed() {
                    anyhow::bail!("Analysis of {} failed", file.display());
                }
            } else {
                let mut write_error = None;
                let summary = analyze_files(
                    &analyzer,
                    &files,
                    config.resolve_workers(),
                    |path, outcome| {
                        if write_error.is_none() {
                            write_error = writer.write(path, outcome).err();
                        }
                    },
                )
                .context("Batch analysis failed")?;
                if let Some(e) = write_error {
                    return Err(e);
                }
                eprintln!(
                    "Analysis complete: {} analyzed, {} failed",
                    summary.analyzed, summary.failed
                );
            }
        }

        Commands::Moods => {
            println!(
                "{:<12} {:>8} {:>8}  {}",
                "Mood", "Valence", "Arousal", "Quadrant"
            );
            println!("{}", "-".repeat(60));
            for tag in MOOD_TABLE.iter() {
                println!(
                    "{:<12} {:>8.3} {:>8.3}  {} ({})",
                    tag.name,
                    tag.valence,
                    tag.arousal,
                    tag.quadrant,
                    quadrant_description(tag.quadrant)
                );
            }
        }

        Commands::Backends => {
            for name in tunescope::backend::available_backends() {
                let marker = if name.eq_ignore_ascii_case(&config.backend) {
                    " (configured)"
                } else {
                    ""
                };
                println!("{name}{marker}");
            }
        }
    }

    Ok(())
}

/// Single-file run with a per-stage progress bar.
fn analyze_single(analyzer: &AudioAnalyzer, path: &Path) -> AnalysisOutcome {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    let mut sink = |percent: u8, label: &str| {
        pb.set_position(percent as u64);
        pb.set_message(label.to_string());
    };
    let outcome = analyze_file(analyzer, path, &mut sink);
    pb.finish_and_clear();
    outcome
}

struct OutputWriter {
    dir: Option<PathBuf>,
    pretty: bool,
}

impl OutputWriter {
    fn write(&self, path: &Path, outcome: &AnalysisOutcome) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(outcome)
        } else {
            serde_json::to_string(outcome)
        }
        .context("Failed to serialize result")?;

        match &self.dir {
            Some(dir) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "track".to_string());
                let out = dir.join(format!("{stem}.json"));
                std::fs::write(&out, json)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
                log::info!("Wrote {}", out.display());
            }
            None => println!("{json}"),
        }
        Ok(())
    }
}
