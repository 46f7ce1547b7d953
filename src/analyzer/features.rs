use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::backend::{Descriptor, ExtractionError, SignalBackend, fallback};
use crate::progress::ProgressSink;
use crate::signal::Signal;

use super::PipelineError;
use super::detail::{self, DetailedAnalysis};

/// Lowest sample rate the extractor accepts.
pub const MIN_SAMPLE_RATE: u32 = 4000;
/// Upper bound for every ratio-style descriptor.
pub const RATIO_CEILING: f64 = 0.95;

/// Flat audio-features record. `None` means "unknown" (serialized as `null`),
/// never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub duration_ms: Option<i64>,
    pub tempo: Option<f64>,
    pub energy: Option<f64>,
    pub loudness: Option<f64>,
    pub key: Option<i32>,
    pub mode: Option<i32>,
    pub time_signature: Option<i32>,
    pub acousticness: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub speechiness: Option<f64>,
    pub danceability: Option<f64>,
    pub valence: Option<f64>,
    pub liveness: Option<f64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: Option<String>,
    pub id: Option<String>,
    pub track_href: Option<String>,
    pub analysis_url: Option<String>,
}

impl FeatureVector {
    pub const KIND: &'static str = "audio_features";

    /// Every descriptor unknown.
    pub fn unknown() -> Self {
        Self {
            duration_ms: None,
            tempo: None,
            energy: None,
            loudness: None,
            key: None,
            mode: None,
            time_signature: None,
            acousticness: None,
            instrumentalness: None,
            speechiness: None,
            danceability: None,
            valence: None,
            liveness: None,
            kind: Self::KIND.to_string(),
            uri: None,
            id: None,
            track_href: None,
            analysis_url: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.duration_ms.is_some()
            && self.tempo.is_some()
            && self.energy.is_some()
            && self.loudness.is_some()
            && self.key.is_some()
            && self.mode.is_some()
            && self.time_signature.is_some()
            && self.acousticness.is_some()
            && self.instrumentalness.is_some()
            && self.speechiness.is_some()
            && self.danceability.is_some()
            && self.valence.is_some()
            && self.liveness.is_some()
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::unknown()
    }
}

fn ratio(value: f64) -> Option<f64> {
    Some(value.clamp(0.0, RATIO_CEILING))
}

/// Runs a backend over a signal in the fixed descriptor order, substituting
/// the documented fallback for any descriptor that fails.
pub struct FeatureExtractor {
    backend: Box<dyn SignalBackend>,
}

impl FeatureExtractor {
    pub fn new(backend: Box<dyn SignalBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn SignalBackend {
        self.backend.as_ref()
    }

    /// Extract every descriptor. Only an input the pipeline cannot interpret
    /// at all is an error; descriptor failures are absorbed.
    pub fn extract_features(
        &self,
        signal: &Signal,
        progress: &mut dyn ProgressSink,
    ) -> Result<FeatureVector, PipelineError> {
        if signal.sample_rate() < MIN_SAMPLE_RATE {
            return Err(PipelineError::UnsupportedSampleRate(signal.sample_rate()));
        }
        log::debug!(
            "Extracting features with '{}' backend: {} samples at {} Hz",
            self.backend.name(),
            signal.len(),
            signal.sample_rate()
        );
        progress.report(0, "Starting feature extraction");

        let b = self.backend.as_ref();
        let tempo = resolve(Descriptor::Tempo, fallback::TEMPO, progress, || b.tempo(signal));
        let energy = resolve(Descriptor::Energy, fallback::ENERGY, progress, || b.energy(signal));
        let loudness = resolve(Descriptor::Loudness, fallback::LOUDNESS, progress, || {
            b.loudness(signal)
        });
        let key = resolve(Descriptor::Key, fallback::KEY, progress, || b.key(signal));
        let mode = resolve(Descriptor::Mode, fallback::MODE, progress, || b.mode(signal));
        let time_signature = resolve(
            Descriptor::TimeSignature,
            fallback::TIME_SIGNATURE,
            progress,
            || b.time_signature(signal),
        );
        let acousticness = resolve(
            Descriptor::Acousticness,
            fallback::ACOUSTICNESS,
            progress,
            || b.acousticness(signal),
        );
        let instrumentalness = resolve(
            Descriptor::Instrumentalness,
            fallback::INSTRUMENTALNESS,
            progress,
            || b.instrumentalness(signal),
        );
        let speechiness = resolve(
            Descriptor::Speechiness,
            fallback::SPEECHINESS,
            progress,
            || b.speechiness(signal),
        );
        let danceability = resolve(
            Descriptor::Danceability,
            fallback::DANCEABILITY,
            progress,
            || b.danceability(signal, tempo),
        );
        let valence = resolve(Descriptor::Valence, fallback::VALENCE, progress, || {
            b.valence(signal)
        });
        let liveness = resolve(Descriptor::Liveness, fallback::LIVENESS, progress, || {
            b.liveness(signal)
        });

        Ok(FeatureVector {
            duration_ms: Some(signal.duration_ms()),
            tempo: Some(tempo),
            energy: ratio(energy),
            loudness: Some(loudness.clamp(-60.0, 0.0)),
            key: Some(key.clamp(0, 11)),
            mode: Some(mode.clamp(0, 1)),
            time_signature: Some(time_signature.clamp(3, 12)),
            acousticness: ratio(acousticness),
            instrumentalness: ratio(instrumentalness),
            speechiness: ratio(speechiness),
            danceability: ratio(danceability),
            valence: ratio(valence),
            liveness: ratio(liveness),
            ..FeatureVector::unknown()
        })
    }

    /// Structural breakdown (sections, bars, beats, tatums, segments) of the
    /// signal, using already-extracted features for the track summary.
    pub fn detailed_analysis(&self, signal: &Signal, features: &FeatureVector) -> DetailedAnalysis {
        detail::analyze(signal, features, self.backend.name())
    }
}

/// Run one descriptor, report its progress step and fall back on failure.
fn resolve<T: Display + Copy>(
    descriptor: Descriptor,
    fallback: T,
    progress: &mut dyn ProgressSink,
    extract: impl FnOnce() -> Result<T, ExtractionError>,
) -> T {
    let value = match extract() {
        Ok(v) => v,
        Err(e) => {
            log::warn!("{descriptor} extraction failed, using fallback {fallback}: {e}");
            fallback
        }
    };
    progress.report(descriptor.cumulative_percent(), &descriptor.progress_label());
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DspBackend, ExtractionResult};
    use crate::progress::NoProgress;

    /// Backend returning fixed values, optionally failing one descriptor.
    struct FixedBackend {
        fail: Option<Descriptor>,
        value: f64,
    }

    impl FixedBackend {
        fn new(value: f64) -> Self {
            Self { fail: None, value }
        }

        fn failing(descriptor: Descriptor) -> Self {
            Self {
                fail: Some(descriptor),
                value: 0.3,
            }
        }

        fn get<T>(&self, d: Descriptor, v: T) -> ExtractionResult<T> {
            if self.fail == Some(d) {
                Err(ExtractionError::Degenerate(format!("{d} forced to fail")))
            } else {
                Ok(v)
            }
        }
    }

    impl SignalBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn tempo(&self, _: &Signal) -> ExtractionResult<f64> {
            self.get(Descriptor::Tempo, 100.0)
        }
        fn energy(&self, _: &Signal) -> ExtractionResult<f64> {
            self.get(Descriptor::Energy, self.value)
        }
        fn loudness(&self, _: &Signal) -> ExtractionResult<f64> {
            self.get(Descriptor::Loudness, -75.0)
        }
        fn key(&self, _: &Signal) -> ExtractionResult<i32> {
            self.get(Descriptor::Key, 14)
        }
        fn mode(&self, _: &Signal) -> ExtractionResult<i32> {
            self.get(Descriptor::Mode, 0)
        }
        fn time_signature(&self, _: &Signal) -> ExtractionResult<i32> {
            self.get(Descriptor::TimeSignature, 20)
        }
        fn acousticness(&self, _: &Signal) -> ExtractionResult<f64> {
            self.get(Descriptor::Acousticness, self.value)
        }
        fn instrumentalness(&self, _: &Signal) -> ExtractionResult<f64> {
            self.get(Descriptor::Instrumentalness, self.value)
        }
        fn speechiness(&self, _: &Signal) -> ExtractionResult<f64> {
            self.get(Descriptor::Speechiness, self.value)
        }
        fn danceability(&self, _: &Signal, tempo: f64) -> ExtractionResult<f64> {
            self.get(Descriptor::Danceability, tempo / 1000.0)
        }
        fn valence(&self, _: &Signal) -> ExtractionResult<f64> {
            self.get(Descriptor::Valence, self.value)
        }
        fn liveness(&self, _: &Signal) -> ExtractionResult<f64> {
            self.get(Descriptor::Liveness, self.value)
        }
    }

    fn signal() -> Signal {
        Signal::new(vec![0.0; 8000], 8000).unwrap()
    }

    #[test]
    fn values_are_clamped_to_documented_ranges() {
        let extractor = FeatureExtractor::new(Box::new(FixedBackend::new(1.7)));
        let fv = extractor.extract_features(&signal(), &mut NoProgress).unwrap();
        assert_eq!(fv.duration_ms, Some(1000));
        assert_eq!(fv.key, Some(11));
        assert_eq!(fv.time_signature, Some(12));
        assert_eq!(fv.loudness, Some(-60.0));
        assert_eq!(fv.energy, Some(0.95));
        assert_eq!(fv.valence, Some(0.95));
        assert_eq!(fv.kind, "audio_features");
        assert!(fv.is_complete());
    }

    #[test]
    fn failing_descriptor_gets_its_fallback_only() {
        let extractor = FeatureExtractor::new(Box::new(FixedBackend::failing(Descriptor::Energy)));
        let fv = extractor.extract_features(&signal(), &mut NoProgress).unwrap();
        assert_eq!(fv.energy, Some(fallback::ENERGY));
        assert_eq!(fv.tempo, Some(100.0));
        assert_eq!(fv.valence, Some(0.3));
        assert_eq!(fv.speechiness, Some(0.3));
        assert!(fv.is_complete());
    }

    #[test]
    fn danceability_sees_the_fallback_tempo() {
        let extractor = FeatureExtractor::new(Box::new(FixedBackend::failing(Descriptor::Tempo)));
        let fv = extractor.extract_features(&signal(), &mut NoProgress).unwrap();
        assert_eq!(fv.tempo, Some(fallback::TEMPO));
        assert!((fv.danceability.unwrap() - 0.12).abs() < 1e-12);
    }

    #[test]
    fn integer_fallbacks() {
        for (d, check) in [
            (Descriptor::Key, 0),
            (Descriptor::Mode, 1),
            (Descriptor::TimeSignature, 4),
        ] {
            let extractor = FeatureExtractor::new(Box::new(FixedBackend::failing(d)));
            let fv = extractor.extract_features(&signal(), &mut NoProgress).unwrap();
            let got = match d {
                Descriptor::Key => fv.key,
                Descriptor::Mode => fv.mode,
                _ => fv.time_signature,
            };
            assert_eq!(got, Some(check));
        }
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_one_hundred() {
        let extractor = FeatureExtractor::new(Box::new(FixedBackend::new(0.4)));
        let mut seen: Vec<(u8, String)> = Vec::new();
        let mut sink = |p: u8, l: &str| seen.push((p, l.to_string()));
        extractor.extract_features(&signal(), &mut sink).unwrap();
        assert_eq!(seen.len(), 13);
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen[1], (10, "Extracting tempo".to_string()));
        assert_eq!(seen.last().map(|s| s.0), Some(100));
    }

    #[test]
    fn low_sample_rate_is_a_pipeline_error() {
        let extractor = FeatureExtractor::new(Box::new(FixedBackend::new(0.4)));
        let s = Signal::new(vec![0.0; 100], 1000).unwrap();
        assert!(matches!(
            extractor.extract_features(&s, &mut NoProgress),
            Err(PipelineError::UnsupportedSampleRate(1000))
        ));
    }

    #[test]
    fn unknown_vector_serializes_nulls() {
        let json = serde_json::to_value(FeatureVector::unknown()).unwrap();
        assert_eq!(json["type"], "audio_features");
        assert!(json["tempo"].is_null());
        assert!(json["uri"].is_null());
        assert!(!FeatureVector::default().is_complete());
    }

    #[test]
    fn real_backend_output_is_in_range_and_repeatable() {
        let sr = 22050;
        let samples: Vec<f32> = (0..sr * 3)
            .map(|i| {
                let t = i as f32 / sr as f32;
                let beat = if (t * 2.0).fract() < 0.05 { 0.8 } else { 0.0 };
                0.3 * (2.0 * std::f32::consts::PI * 330.0 * t).sin() + beat
            })
            .collect();
        let s = Signal::new(samples, sr as u32).unwrap();
        let extractor = FeatureExtractor::new(Box::new(DspBackend::default()));
        let a = extractor.extract_features(&s, &mut NoProgress).unwrap();
        let b = extractor.extract_features(&s, &mut NoProgress).unwrap();
        assert_eq!(a, b);

        for v in [
            a.energy,
            a.acousticness,
            a.instrumentalness,
            a.speechiness,
            a.danceability,
            a.valence,
            a.liveness,
        ] {
            let v = v.unwrap();
            assert!((0.0..=RATIO_CEILING).contains(&v));
        }
        assert!((-60.0..=0.0).contains(&a.loudness.unwrap()));
        assert!((0..=11).contains(&a.key.unwrap()));
        assert!((0..=1).contains(&a.mode.unwrap()));
        assert!((3..=12).contains(&a.time_signature.unwrap()));
    }
}
