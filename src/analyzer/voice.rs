use serde::{Deserialize, Serialize};

use crate::dsp::pitch::strongest_pitches;
use crate::dsp::spectral;
use crate::dsp::stft::Spectrogram;
use crate::dsp::{HOP_LENGTH, N_FFT, summary};
use crate::signal::Signal;
use crate::speech::{self, SpeechError, SpeechRecognizer};

/// Mean pitch below this is classified as a male voice.
pub const MALE_MAX_HZ: f64 = 165.0;
/// Mean pitch above this is classified as a female voice.
pub const FEMALE_MIN_HZ: f64 = 255.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceType {
    Male,
    Female,
    Ambiguous,
    Instrumental,
}

/// Mean/min/max of a frame series; all `null` when unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Stats {
    fn of(values: &[f32]) -> Self {
        match summary(values) {
            Some((mean, min, max)) => Self {
                mean: Some(mean),
                min: Some(min),
                max: Some(max),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub has_voice: Option<bool>,
    pub voice_type: Option<VoiceType>,
    pub pitch_stats: Stats,
    pub intensity: Stats,
    pub harmonicity: Stats,
    pub detected_language: Option<String>,
    pub transcribed_text: Option<String>,
}

impl VoiceProfile {
    /// Profile for a signal without any pitched frames.
    pub fn no_voice() -> Self {
        Self {
            has_voice: Some(false),
            voice_type: Some(VoiceType::Instrumental),
            ..Self::default()
        }
    }
}

/// Strict thresholds: exactly 165 Hz and exactly 255 Hz are ambiguous.
pub fn classify_voice(mean_pitch: f64) -> VoiceType {
    if mean_pitch < MALE_MAX_HZ {
        VoiceType::Male
    } else if mean_pitch > FEMALE_MIN_HZ {
        VoiceType::Female
    } else {
        VoiceType::Ambiguous
    }
}

/// Pitch, intensity and harmonicity profile, optionally with a transcript
/// from a speech recognizer.
#[derive(Default)]
pub struct VoiceAnalyzer {
    recognizer: Option<Box<dyn SpeechRecognizer>>,
}

impl VoiceAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recognizer(recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer: Some(recognizer),
        }
    }

    pub fn analyze(&self, signal: &Signal) -> VoiceProfile {
        let spec = match Spectrogram::standard(signal.samples(), signal.sample_rate()) {
            Ok(spec) => spec,
            Err(e) => {
                log::warn!("Voice analysis failed: {e}");
                return VoiceProfile::default();
            }
        };

        let pitches: Vec<f32> = strongest_pitches(&spec)
            .into_iter()
            .filter(|&p| p > 0.0)
            .collect();
        if pitches.is_empty() {
            log::debug!("No pitched frames, treating as instrumental");
            return VoiceProfile::no_voice();
        }

        let pitch_stats = Stats::of(&pitches);
        let voice_type = pitch_stats.mean.map(classify_voice);
        let intensity = Stats::of(&spectral::rms(signal.samples(), N_FFT, HOP_LENGTH));
        let harmonicity = Stats::of(&spectral::flatness(&spec));
        let (detected_language, transcribed_text) = self.transcribe(signal);

        VoiceProfile {
            has_voice: Some(true),
            voice_type,
            pitch_stats,
            intensity,
            harmonicity,
            detected_language,
            transcribed_text,
        }
    }

    /// (language, truncated transcript); both `None` on any recognizer failure.
    fn transcribe(&self, signal: &Signal) -> (Option<String>, Option<String>) {
        let Some(recognizer) = &self.recognizer else {
            return (None, None);
        };
        let wav = match signal.to_pcm16_wav() {
            Ok(wav) => wav,
            Err(e) => {
                log::warn!("{}", SpeechError::Encode(e.to_string()));
                return (None, None);
            }
        };
        match recognizer.transcribe(&wav) {
            Ok(text) => (
                speech::detect_language(&text),
                Some(speech::truncate_transcript(&text)),
            ),
            Err(SpeechError::NotUnderstood) => {
                log::info!("Speech recognition could not understand audio");
                (None, None)
            }
            Err(e) => {
                log::warn!("Speech recognition failed: {e}");
                (None, None)
            }
        }
    }
}
