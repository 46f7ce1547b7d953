//! Frame-level spectral and temporal statistics.
//!
//! All per-frame series are returned in frame order on the same hop grid as
//! the spectrogram they were computed from.

use super::stft::Spectrogram;
use super::{Frames, Pad, power_to_db};

/// Floor applied to power before logarithms.
pub const AMIN: f32 = 1e-10;
/// Dynamic range kept by [`power_to_db_frames`].
pub const TOP_DB: f32 = 80.0;

/// Number of spectral-contrast bands (6 octave bands plus the residual top band).
pub const CONTRAST_BANDS: usize = 7;
const CONTRAST_FMIN: f32 = 200.0;
const CONTRAST_QUANTILE: f32 = 0.02;

pub const N_MELS: usize = 128;
pub const N_MFCC: usize = 13;

/// Lowest frequency mapped onto a pitch class (C1).
const CHROMA_FMIN: f32 = 32.70;

pub fn rms(samples: &[f32], frame_length: usize, hop: usize) -> Vec<f32> {
    Frames::centered(samples, frame_length, hop, Pad::Zeros)
        .iter()
        .map(|frame| {
            let energy: f32 = frame.iter().map(|x| x * x).sum();
            (energy / frame.len() as f32).sqrt()
        })
        .collect()
}

/// Fraction of adjacent sample pairs per frame whose signs differ. Zero counts
/// as positive.
pub fn zero_crossing_rate(samples: &[f32], frame_length: usize, hop: usize) -> Vec<f32> {
    Frames::centered(samples, frame_length, hop, Pad::Edge)
        .iter()
        .map(|frame| {
            let crossings = frame
                .windows(2)
                .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
                .count();
            crossings as f32 / frame.len() as f32
        })
        .collect()
}

/// Magnitude-weighted mean frequency per frame; 0 for silent frames.
pub fn centroid(spec: &Spectrogram) -> Vec<f32> {
    let freqs = spec.frequencies();
    spec.frames()
        .iter()
        .map(|frame| {
            let total: f32 = frame.iter().sum();
            if total <= 0.0 {
                return 0.0;
            }
            frame.iter().zip(&freqs).map(|(m, f)| m * f).sum::<f32>() / total
        })
        .collect()
}

/// Second-order spectral bandwidth around the centroid; 0 for silent frames.
pub fn bandwidth(spec: &Spectrogram) -> Vec<f32> {
    let freqs = spec.frequencies();
    spec.frames()
        .iter()
        .map(|frame| {
            let total: f32 = frame.iter().sum();
            if total <= 0.0 {
                return 0.0;
            }
            let centroid = frame.iter().zip(&freqs).map(|(m, f)| m * f).sum::<f32>() / total;
            let spread: f32 = frame
                .iter()
                .zip(&freqs)
                .map(|(m, f)| (m / total) * (f - centroid).powi(2))
                .sum();
            spread.sqrt()
        })
        .collect()
}

/// Geometric over arithmetic mean of the power spectrum per frame.
pub fn flatness(spec: &Spectrogram) -> Vec<f32> {
    spec.frames()
        .iter()
        .map(|frame| {
            let n = frame.len() as f64;
            let mut log_sum = 0.0_f64;
            let mut sum = 0.0_f64;
            for &m in frame {
                let p = (m * m).max(AMIN) as f64;
                log_sum += p.ln();
                sum += p;
            }
            ((log_sum / n).exp() / (sum / n)) as f32
        })
        .collect()
}

/// Octave-band spectral contrast, `[band][frame]`, in dB. Bands are
/// [0,200], [200,400] ... [6400, nyquist]; bands above Nyquist are all zero.
pub fn contrast(spec: &Spectrogram) -> Vec<Vec<f32>> {
    let freqs = spec.frequencies();
    let nyquist = spec.nyquist();
    let mut edges = vec![0.0_f32];
    edges.extend((0..CONTRAST_BANDS).map(|k| CONTRAST_FMIN * 2f32.powi(k as i32)));

    let mut out = vec![vec![0.0_f32; spec.num_frames()]; CONTRAST_BANDS];
    let mut sorted = Vec::new();

    for (k, band) in out.iter_mut().enumerate() {
        let low = edges[k];
        let high = if k == CONTRAST_BANDS - 1 { nyquist } else { edges[k + 1] };
        if low >= nyquist {
            continue;
        }
        let bins: Vec<usize> = (0..freqs.len())
            .filter(|&b| freqs[b] >= low && freqs[b] <= high)
            .collect();
        let (Some(&first), Some(&last)) = (bins.first(), bins.last()) else {
            continue;
        };
        let alpha = ((CONTRAST_QUANTILE * bins.len() as f32).round() as usize).max(1);

        for (t, frame) in spec.frames().iter().enumerate() {
            sorted.clear();
            sorted.extend_from_slice(&frame[first..=last]);
            sorted.sort_by(|a, b| a.total_cmp(b));
            let take = alpha.min(sorted.len());
            let valley = sorted[..take].iter().sum::<f32>() / take as f32;
            let peak = sorted[sorted.len() - take..].iter().sum::<f32>() / take as f32;
            band[t] = power_to_db(peak, AMIN) - power_to_db(valley, AMIN);
        }
    }
    out
}

pub fn hz_to_mel(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f64.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f64.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// One triangular mel filter, stored sparsely from its first non-zero bin.
#[derive(Debug, Clone)]
pub struct MelFilter {
    start: usize,
    weights: Vec<f32>,
}

impl MelFilter {
    fn apply(&self, power: &[f32]) -> f32 {
        self.weights
            .iter()
            .zip(&power[self.start..])
            .map(|(w, p)| w * p)
            .sum()
    }
}

/// Area-normalized (Slaney) triangular filters between 0 Hz and Nyquist.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<MelFilter> {
    let n_bins = n_fft / 2 + 1;
    let fmax = sample_rate as f64 / 2.0;
    let mel_max = hz_to_mel(fmax);
    let centers: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, mid, hi) = (centers[m], centers[m + 1], centers[m + 2]);
            let enorm = 2.0 / (hi - lo);
            let mut start = None;
            let mut weights = Vec::new();
            for bin in 0..n_bins {
                let f = bin as f64 * sample_rate as f64 / n_fft as f64;
                let rising = (f - lo) / (mid - lo);
                let falling = (hi - f) / (hi - mid);
                let w = rising.min(falling).max(0.0) * enorm;
                if w > 0.0 {
                    start.get_or_insert(bin);
                    weights.push(w as f32);
                } else if start.is_some() {
                    break;
                }
            }
            MelFilter {
                start: start.unwrap_or(0),
                weights,
            }
        })
        .collect()
}

/// Mel power spectrogram, `[frame][mel]`.
pub fn mel_power(spec: &Spectrogram, n_mels: usize) -> Vec<Vec<f32>> {
    let filters = mel_filterbank(spec.sample_rate(), spec.n_fft(), n_mels);
    let mut power = vec![0.0_f32; spec.num_bins()];
    spec.frames()
        .iter()
        .map(|frame| {
            for (p, m) in power.iter_mut().zip(frame) {
                *p = m * m;
            }
            filters.iter().map(|f| f.apply(&power)).collect()
        })
        .collect()
}

/// Convert a power matrix to dB in place, keeping at most [`TOP_DB`] below
/// the global peak.
pub fn power_to_db_frames(frames: &mut [Vec<f32>]) {
    let mut peak = f32::NEG_INFINITY;
    for v in frames.iter_mut().flatten() {
        *v = power_to_db(*v, AMIN);
        peak = peak.max(*v);
    }
    let floor = peak - TOP_DB;
    for v in frames.iter_mut().flatten() {
        *v = v.max(floor);
    }
}

/// Mel-frequency cepstral coefficients, `[coefficient][frame]`.
pub fn mfcc(spec: &Spectrogram, n_mfcc: usize) -> Vec<Vec<f32>> {
    let mut mel = mel_power(spec, N_MELS);
    power_to_db_frames(&mut mel);

    let n = N_MELS as f32;
    let basis: Vec<Vec<f32>> = (0..n_mfcc)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..N_MELS)
                .map(|i| {
                    scale * (std::f32::consts::PI / n * (i as f32 + 0.5) * k as f32).cos()
                })
                .collect()
        })
        .collect();

    basis
        .iter()
        .map(|row| {
            mel.iter()
                .map(|frame| row.iter().zip(frame).map(|(b, x)| b * x).sum())
                .collect()
        })
        .collect()
}

/// Pitch class (0 = C) of a frequency, or `None` outside the mapped range.
pub fn pitch_class(freq: f32) -> Option<usize> {
    if freq < CHROMA_FMIN {
        return None;
    }
    let midi = 69.0 + 12.0 * (freq / 440.0).log2();
    Some((midi.round() as i64).rem_euclid(12) as usize)
}

/// Chromagram `[frame][pitch class]`; each frame is scaled so its maximum is 1
/// (silent frames stay zero).
pub fn chroma(spec: &Spectrogram) -> Vec<[f32; 12]> {
    let classes: Vec<Option<usize>> = spec.frequencies().into_iter().map(pitch_class).collect();
    spec.frames()
        .iter()
        .map(|frame| {
            let mut bins = [0.0_f32; 12];
            for (m, class) in frame.iter().zip(&classes) {
                if let Some(c) = class {
                    bins[*c] += m * m;
                }
            }
            let peak = bins.iter().copied().fold(0.0_f32, f32::max);
            if peak > 0.0 {
                bins.iter_mut().for_each(|b| *b /= peak);
            }
            bins
        })
        .collect()
}

/// Mean magnitude of bins at or below `max_hz` relative to the mean magnitude
/// of the whole spectrogram; 0 for silence.
pub fn low_band_ratio(spec: &Spectrogram, max_hz: f32) -> f64 {
    let cutoff = spec
        .frequencies()
        .iter()
        .take_while(|&&f| f <= max_hz)
        .count();
    if cutoff == 0 || spec.num_frames() == 0 {
        return 0.0;
    }
    let (mut low, mut total) = (0.0_f64, 0.0_f64);
    for frame in spec.frames() {
        low += frame[..cutoff].iter().map(|&m| m as f64).sum::<f64>();
        total += frame.iter().map(|&m| m as f64).sum::<f64>();
    }
    if total <= 0.0 {
        return 0.0;
    }
    let low_mean = low / cutoff as f64;
    let total_mean = total / spec.num_bins() as f64;
    low_mean / total_mean
}

/// Share of total power at or above `min_hz`; 0 for silence.
pub fn high_band_power_ratio(spec: &Spectrogram, min_hz: f32) -> f64 {
    let freqs = spec.frequencies();
    let (mut high, mut total) = (0.0_f64, 0.0_f64);
    for frame in spec.frames() {
        for (&m, &f) in frame.iter().zip(&freqs) {
            let p = (m as f64) * (m as f64);
            total += p;
            if f >= min_hz {
                high += p;
            }
        }
    }
    if total <= 0.0 { 0.0 } else { high / total }
}
