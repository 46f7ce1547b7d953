//! Speech recognition collaborator and transcript language detection.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::SpeechConfig;

/// Longest transcript kept in a voice profile, in characters.
pub const MAX_TRANSCRIPT_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Speech could not be understood")]
    NotUnderstood,
    #[error("Speech service unavailable: {0}")]
    Unavailable(String),
    #[error("Could not encode audio for transcription: {0}")]
    Encode(String),
}

/// Turns a 16-bit PCM mono WAV byte stream into text.
pub trait SpeechRecognizer: Send + Sync {
    fn transcribe(&self, wav: &[u8]) -> Result<String, SpeechError>;
}

/// Transcription service reached over HTTP. The WAV bytes are POSTed as-is and
/// the service answers with `{"text": "..."}`; 422 means nothing intelligible
/// was heard.
pub struct HttpSpeechRecognizer {
    agent: ureq::Agent,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    text: String,
}

impl HttpSpeechRecognizer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// `None` when speech recognition is disabled or has no endpoint.
    pub fn from_config(config: &SpeechConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let Some(endpoint) = config.endpoint.as_deref() else {
            log::warn!("Speech recognition enabled but no endpoint configured");
            return None;
        };
        Some(Self::new(
            endpoint,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }
}

impl SpeechRecognizer for HttpSpeechRecognizer {
    fn transcribe(&self, wav: &[u8]) -> Result<String, SpeechError> {
        log::debug!("Submitting {} bytes to {}", wav.len(), self.endpoint);
        let mut request = self
            .agent
            .post(&self.endpoint)
            .header("Content-Type", "audio/wav");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let mut response = request.send(wav).map_err(|e| match e {
            ureq::Error::StatusCode(422) => SpeechError::NotUnderstood,
            other => SpeechError::Unavailable(other.to_string()),
        })?;
        let body: TranscriptResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| SpeechError::Unavailable(format!("bad response: {e}")))?;

        let text = body.text.trim();
        if text.is_empty() {
            return Err(SpeechError::NotUnderstood);
        }
        Ok(text.to_string())
    }
}

/// ISO 639-3 code of the transcript's language, if one can be identified.
pub fn detect_language(text: &str) -> Option<String> {
    whatlang::detect(text).map(|info| info.lang().code().to_string())
}

/// First `MAX_TRANSCRIPT_CHARS` characters of a transcript.
pub fn truncate_transcript(text: &str) -> String {
    text.chars().take(MAX_TRANSCRIPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_languages() {
        let en = "The quick brown fox jumps over the lazy dog while the band keeps playing all night long";
        assert_eq!(detect_language(en).as_deref(), Some("eng"));
        let es = "El rápido zorro marrón salta sobre el perro perezoso mientras la banda sigue tocando toda la noche";
        assert_eq!(detect_language(es).as_deref(), Some("spa"));
    }

    #[test]
    fn empty_text_has_no_language() {
        assert_eq!(detect_language(""), None);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let long = "é".repeat(150);
        let short = truncate_transcript(&long);
        assert_eq!(short.chars().count(), MAX_TRANSCRIPT_CHARS);
        assert_eq!(truncate_transcript("hello"), "hello");
    }

    #[test]
    fn disabled_config_builds_no_recognizer() {
        let config = SpeechConfig::default();
        assert!(HttpSpeechRecognizer::from_config(&config).is_none());
        let enabled_without_endpoint = SpeechConfig {
            enabled: true,
            ..SpeechConfig::default()
        };
        assert!(HttpSpeechRecognizer::from_config(&enabled_without_endpoint).is_none());
    }

    #[test]
    fn unreachable_service_is_unavailable() {
        let recognizer =
            HttpSpeechRecognizer::new("http://127.0.0.1:9/transcribe", None, Duration::from_secs(2));
        assert!(matches!(
            recognizer.transcribe(b"RIFF"),
            Err(SpeechError::Unavailable(_))
        ));
    }
}
