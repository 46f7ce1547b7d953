pub mod decode;
pub mod detail;
pub mod features;
pub mod mood;
pub mod voice;

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;

use crate::backend::{self, BackendError, SignalBackend};
use crate::config::AppConfig;
use crate::progress::{NoProgress, ProgressSink, ScaledProgress};
use crate::signal::{Signal, SignalError};
use crate::speech::HttpSpeechRecognizer;
use detail::DetailedAnalysis;
use features::{FeatureExtractor, FeatureVector, MIN_SAMPLE_RATE};
use mood::{MoodAnalyzer, MoodProfile};
use voice::{VoiceAnalyzer, VoiceProfile};

/// A run that cannot proceed at all.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unsupported sample rate: {0} Hz (minimum {MIN_SAMPLE_RATE} Hz)")]
    UnsupportedSampleRate(u32),
    #[error("Invalid signal: {0}")]
    Signal(#[from] SignalError),
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Everything known about one track after a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct TrackAnalysis {
    /// RFC 3339, UTC.
    pub timestamp: String,
    /// Seconds.
    pub duration: f64,
    pub technical_features: FeatureVector,
    pub voice_features: VoiceProfile,
    pub mood_scores: MoodProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_analysis: Option<DetailedAnalysis>,
}

impl TrackAnalysis {
    pub fn is_complete(&self) -> bool {
        self.technical_features.is_complete() && self.mood_scores.is_known()
    }
}

/// Result of one run as emitted to callers: the analysis, or `{"error": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalysisOutcome {
    Complete(Box<TrackAnalysis>),
    Failed { error: String },
}

impl AnalysisOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, AnalysisOutcome::Failed { .. })
    }
}

/// Feature extraction, voice and mood analysis for one signal at a time.
/// Holds no per-run state; share one instance across worker threads.
pub struct AudioAnalyzer {
    extractor: FeatureExtractor,
    voice: VoiceAnalyzer,
    mood: MoodAnalyzer,
    detailed: bool,
}

impl AudioAnalyzer {
    pub fn new(backend: Box<dyn SignalBackend>) -> Self {
        Self {
            extractor: FeatureExtractor::new(backend),
            voice: VoiceAnalyzer::new(),
            mood: MoodAnalyzer::new(),
            detailed: false,
        }
    }

    /// Backend, detail level and speech service from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, BackendError> {
        let backend = backend::create_backend(&config.backend)?;
        let voice = match HttpSpeechRecognizer::from_config(&config.speech) {
            Some(recognizer) => VoiceAnalyzer::with_recognizer(Box::new(recognizer)),
            None => VoiceAnalyzer::new(),
        };
        Ok(Self::new(backend)
            .with_voice_analyzer(voice)
            .with_detailed(config.detailed))
    }

    pub fn with_voice_analyzer(mut self, voice: VoiceAnalyzer) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_detailed(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.extractor.backend().name()
    }

    /// Features (0-80%), voice (85%), mood (95%), then the optional detailed
    /// structure.
    pub fn analyze_track(
        &self,
        signal: &Signal,
        progress: &mut dyn ProgressSink,
    ) -> Result<TrackAnalysis, PipelineError> {
        let technical_features = {
            let mut scaled = ScaledProgress::new(&mut *progress, 0, 80);
            self.extractor.extract_features(signal, &mut scaled)?
        };

        progress.report(85, "Analyzing voice");
        let voice_features = self.voice.analyze(signal);

        progress.report(95, "Analyzing mood");
        let mood_scores = self.mood.analyze(&technical_features);

        let detailed_analysis = self
            .detailed
            .then(|| self.extractor.detailed_analysis(signal, &technical_features));

        progress.report(100, "Analysis complete");

        Ok(TrackAnalysis {
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration: signal.duration_secs(),
            technical_features,
            voice_features,
            mood_scores,
            detailed_analysis,
        })
    }

    /// Like [`Self::analyze_track`], with fatal errors folded into the outcome.
    pub fn analyze(&self, signal: &Signal, progress: &mut dyn ProgressSink) -> AnalysisOutcome {
        match self.analyze_track(signal, progress) {
            Ok(analysis) => AnalysisOutcome::Complete(Box::new(analysis)),
            Err(e) => {
                log::error!("Analysis failed: {e}");
                AnalysisOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Decode a file and analyze it. Decode failures become a failed outcome.
pub fn analyze_file(
    analyzer: &AudioAnalyzer,
    path: &Path,
    progress: &mut dyn ProgressSink,
) -> AnalysisOutcome {
    log::debug!(
        "Analyzing: {}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );
    match decode::load_signal(path) {
        Ok(signal) => analyzer.analyze(&signal, progress),
        Err(e) => {
            log::error!("Could not decode {}: {}", path.display(), e);
            AnalysisOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

pub struct BatchSummary {
    pub analyzed: u64,
    pub failed: u64,
}

/// Analyze files in parallel on a dedicated rayon pool.
///
/// Files are processed in chunks of `jobs * 2`: each chunk is analyzed in
/// parallel, then its outcomes are handed to `emit` in input order before
/// the next chunk starts, so only one chunk of results is held in memory.
pub fn analyze_files(
    analyzer: &AudioAnalyzer,
    paths: &[PathBuf],
    jobs: usize,
    mut emit: impl FnMut(&Path, &AnalysisOutcome),
) -> Result<BatchSummary, AnalyzeError> {
    if paths.is_empty() {
        log::info!("No audio files to analyze");
        return Ok(BatchSummary {
            analyzed: 0,
            failed: 0,
        });
    }

    let jobs = jobs.max(1);
    log::info!("Analyzing {} files with {} workers", paths.len(), jobs);

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    let mut analyzed: u64 = 0;
    let mut failed: u64 = 0;

    for chunk in paths.chunks(jobs * 2) {
        let outcomes: Vec<AnalysisOutcome> = pool.install(|| {
            use rayon::prelude::*;
            chunk
                .par_iter()
                .map(|path| {
                    let outcome = analyze_file(analyzer, path, &mut NoProgress);
                    pb.inc(1);
                    outcome
                })
                .collect()
        });

        for (path, outcome) in chunk.iter().zip(&outcomes) {
            if outcome.is_failed() {
                failed += 1;
            } else {
                analyzed += 1;
            }
            emit(path, outcome);
        }

        pb.set_message(format!("{} analyzed, {} failed", analyzed, failed));
    }

    pb.finish_with_message(format!("Done: {} analyzed, {} failed", analyzed, failed));

    Ok(BatchSummary { analyzed, failed })
}
