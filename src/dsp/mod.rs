//! Low-level signal processing primitives shared by the backends and the
//! detailed analysis: framing, STFT, spectral statistics, rhythm, tonality and
//! pitch tracking. Everything here operates on plain sample slices or on a
//! [`stft::Spectrogram`] and is free of any notion of tracks or features.

pub mod pitch;
pub mod rhythm;
pub mod spectral;
pub mod stft;
pub mod tonal;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DspError {
    #[error("FFT error: {0}")]
    Fft(String),
    #[error("Input too short: {0}")]
    TooShort(String),
}

pub type Result<T> = std::result::Result<T, DspError>;

/// FFT size used for every full-signal spectrogram.
pub const N_FFT: usize = 2048;
/// Hop between analysis frames, in samples.
pub const HOP_LENGTH: usize = 512;

/// How the signal is extended on both sides when frames are centered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pad {
    Zeros,
    Edge,
}

/// Overlapping analysis frames over a centered copy of the signal. Frame `t`
/// is centered on sample `t * hop`, so there is always at least one frame.
pub struct Frames {
    padded: Vec<f32>,
    frame_length: usize,
    hop: usize,
}

impl Frames {
    pub fn centered(samples: &[f32], frame_length: usize, hop: usize, pad: Pad) -> Self {
        let frame_length = frame_length.max(1);
        let hop = hop.max(1);
        let half = frame_length / 2;
        let (head, tail) = match pad {
            Pad::Zeros => (0.0, 0.0),
            Pad::Edge => (
                samples.first().copied().unwrap_or(0.0),
                samples.last().copied().unwrap_or(0.0),
            ),
        };
        let mut padded = Vec::with_capacity(samples.len() + 2 * half + 1);
        padded.extend(std::iter::repeat_n(head, half));
        padded.extend_from_slice(samples);
        padded.extend(std::iter::repeat_n(tail, half));
        if padded.len() < frame_length {
            padded.resize(frame_length, tail);
        }
        Self {
            padded,
            frame_length,
            hop,
        }
    }

    pub fn len(&self) -> usize {
        1 + (self.padded.len() - self.frame_length) / self.hop
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.len()).map(move |i| {
            let start = i * self.hop;
            &self.padded[start..start + self.frame_length]
        })
    }
}

/// Time in seconds of the center of frame `frame`.
pub fn frames_to_time(frame: usize, sample_rate: u32, hop: usize) -> f64 {
    (frame * hop) as f64 / sample_rate as f64
}

/// Power (energy) value to decibels with a floor of `amin`.
pub fn power_to_db(power: f32, amin: f32) -> f32 {
    10.0 * power.max(amin).log10()
}

/// Amplitude value to decibels with a floor of `amin`.
pub fn amplitude_to_db(amplitude: f64, amin: f64) -> f64 {
    20.0 * amplitude.max(amin).log10()
}

pub fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

pub fn mean_std(values: &[f32]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| {
            let diff = v as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// (mean, min, max) of a non-empty series.
pub fn summary(values: &[f32]) -> Option<(f64, f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min) as f64;
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    Some((mean(values), min, max))
}

pub fn max(values: &[f32]) -> f32 {
    values.iter().copied().fold(0.0_f32, f32::max)
}

/// Mean divided by maximum; 0 when the series is empty or never positive.
pub fn mean_over_max(values: &[f32]) -> f64 {
    let peak = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !(peak > 0.0) {
        return 0.0;
    }
    mean(values) / peak as f64
}

/// Indices `i` with `values[i-1] < values[i] >= values[i+1]`.
pub fn local_maxima(values: &[f32]) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }
    (1..values.len() - 1)
        .filter(|&i| values[i] > values[i - 1] && values[i] >= values[i + 1])
        .collect()
}
