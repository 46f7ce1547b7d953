//! Descriptor backends.
//!
//! A [`SignalBackend`] computes each of the twelve audio descriptors from a
//! [`Signal`]. Every operation returns a `Result`; deciding what to do with a
//! failure (substituting a fallback) is the caller's job, see
//! `analyzer::features`.

pub mod dsp;

use std::fmt;

use thiserror::Error;

use crate::dsp::DspError;
use crate::signal::Signal;

pub use self::dsp::DspBackend;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("DSP error: {0}")]
    Dsp(#[from] DspError),
    #[error("Not enough beats detected ({0})")]
    TooFewBeats(usize),
    #[error("No tempo could be estimated")]
    NoTempo,
    #[error("Degenerate input: {0}")]
    Degenerate(String),
    #[error("{0} produced a non-finite value")]
    NonFinite(&'static str),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Unknown backend '{name}' (available: {available})")]
    Unknown { name: String, available: String },
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Per-descriptor extraction operations. Implementations hold no per-run
/// state, so one instance can serve concurrent analyses.
pub trait SignalBackend: Send + Sync {
    /// Registry name of this backend.
    fn name(&self) -> &'static str;

    /// Beats per minute.
    fn tempo(&self, signal: &Signal) -> ExtractionResult<f64>;
    /// Square-root compressed blend of RMS, low-band contrast and onset strength, in [0, 1].
    fn energy(&self, signal: &Signal) -> ExtractionResult<f64>;
    /// Mean RMS in dB.
    fn loudness(&self, signal: &Signal) -> ExtractionResult<f64>;
    /// Dominant pitch class, 0 = C.
    fn key(&self, signal: &Signal) -> ExtractionResult<i32>;
    /// 1 = major, 0 = minor.
    fn mode(&self, signal: &Signal) -> ExtractionResult<i32>;
    fn time_signature(&self, signal: &Signal) -> ExtractionResult<i32>;
    fn acousticness(&self, signal: &Signal) -> ExtractionResult<f64>;
    fn instrumentalness(&self, signal: &Signal) -> ExtractionResult<f64>;
    fn speechiness(&self, signal: &Signal) -> ExtractionResult<f64>;
    /// Needs the tempo extracted earlier in the same run.
    fn danceability(&self, signal: &Signal, tempo: f64) -> ExtractionResult<f64>;
    fn valence(&self, signal: &Signal) -> ExtractionResult<f64>;
    fn liveness(&self, signal: &Signal) -> ExtractionResult<f64>;
}

/// Values substituted when a descriptor cannot be computed.
pub mod fallback {
    pub const TEMPO: f64 = 120.0;
    pub const ENERGY: f64 = 0.5;
    pub const LOUDNESS: f64 = -20.0;
    pub const KEY: i32 = 0;
    pub const MODE: i32 = 1;
    pub const TIME_SIGNATURE: i32 = 4;
    pub const ACOUSTICNESS: f64 = 0.5;
    pub const INSTRUMENTALNESS: f64 = 0.5;
    pub const SPEECHINESS: f64 = 0.1;
    pub const DANCEABILITY: f64 = 0.5;
    pub const VALENCE: f64 = 0.5;
    pub const LIVENESS: f64 = 0.5;
}

/// The twelve descriptors, in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Descriptor {
    Tempo,
    Energy,
    Loudness,
    Key,
    Mode,
    TimeSignature,
    Acousticness,
    Instrumentalness,
    Speechiness,
    Danceability,
    Valence,
    Liveness,
}

impl Descriptor {
    pub const EXTRACTION_ORDER: [Descriptor; 12] = [
        Descriptor::Tempo,
        Descriptor::Energy,
        Descriptor::Loudness,
        Descriptor::Key,
        Descriptor::Mode,
        Descriptor::TimeSignature,
        Descriptor::Acousticness,
        Descriptor::Instrumentalness,
        Descriptor::Speechiness,
        Descriptor::Danceability,
        Descriptor::Valence,
        Descriptor::Liveness,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Descriptor::Tempo => "tempo",
            Descriptor::Energy => "energy",
            Descriptor::Loudness => "loudness",
            Descriptor::Key => "key",
            Descriptor::Mode => "mode",
            Descriptor::TimeSignature => "time_signature",
            Descriptor::Acousticness => "acousticness",
            Descriptor::Instrumentalness => "instrumentalness",
            Descriptor::Speechiness => "speechiness",
            Descriptor::Danceability => "danceability",
            Descriptor::Valence => "valence",
            Descriptor::Liveness => "liveness",
        }
    }

    /// Share of the extraction progress bar, in percent. Ten descriptors carry
    /// 10% each; danceability and liveness carry none.
    pub fn progress_weight(self) -> u8 {
        match self {
            Descriptor::Danceability | Descriptor::Liveness => 0,
            _ => 10,
        }
    }

    /// Progress reached once this descriptor is done.
    pub fn cumulative_percent(self) -> u8 {
        Self::EXTRACTION_ORDER
            .iter()
            .take_while(|d| **d != self)
            .map(|d| d.progress_weight())
            .sum::<u8>()
            + self.progress_weight()
    }

    pub fn progress_label(self) -> String {
        format!("Extracting {}", self.name().replace('_', " "))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type Constructor = fn() -> Box<dyn SignalBackend>;

fn dsp_backend() -> Box<dyn SignalBackend> {
    Box::new(DspBackend::default())
}

/// Registered backend names and their constructors. `librosa` is an alias of `dsp`.
const REGISTRY: &[(&str, Constructor)] = &[("dsp", dsp_backend), ("librosa", dsp_backend)];

pub fn available_backends() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

/// Look up a backend by name (case-insensitive).
pub fn create_backend(name: &str) -> Result<Box<dyn SignalBackend>, BackendError> {
    REGISTRY
        .iter()
        .find(|(registered, _)| registered.eq_ignore_ascii_case(name.trim()))
        .map(|(_, construct)| construct())
        .ok_or_else(|| BackendError::Unknown {
            name: name.to_string(),
            available: available_backends().join(", "),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_progress_sums_to_one_hundred() {
        let total: u32 = Descriptor::EXTRACTION_ORDER
            .iter()
            .map(|d| d.progress_weight() as u32)
            .sum();
        assert_eq!(total, 100);
        assert_eq!(Descriptor::Liveness.cumulative_percent(), 100);
    }

    #[test]
    fn cumulative_percent_is_non_decreasing() {
        let percents: Vec<u8> = Descriptor::EXTRACTION_ORDER
            .iter()
            .map(|d| d.cumulative_percent())
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(Descriptor::Tempo.cumulative_percent(), 10);
        assert_eq!(Descriptor::Speechiness.cumulative_percent(), 90);
        assert_eq!(Descriptor::Danceability.cumulative_percent(), 90);
        assert_eq!(Descriptor::Valence.cumulative_percent(), 100);
    }

    #[test]
    fn labels_use_spaces() {
        assert_eq!(
            Descriptor::TimeSignature.progress_label(),
            "Extracting time signature"
        );
        assert_eq!(Descriptor::Key.to_string(), "key");
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        assert_eq!(create_backend("DSP").unwrap().name(), "dsp");
        assert_eq!(create_backend("librosa").unwrap().name(), "dsp");
        assert!(available_backends().contains(&"dsp"));
    }

    #[test]
    fn unknown_backend_lists_alternatives() {
        let err = create_backend("essentia").err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("essentia"));
        assert!(msg.contains("dsp, librosa"));
    }
}
