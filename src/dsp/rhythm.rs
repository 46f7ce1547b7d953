//! Onset strength, tempo estimation, beat tracking and predominant local pulse.

use realfft::RealFftPlanner;

use super::spectral::{N_MELS, mel_power, power_to_db_frames};
use super::stft::{Spectrogram, hann_window};
use super::{DspError, Frames, Pad, Result, local_maxima, mean_std};

/// Tempo search range for the global estimate, in BPM.
pub const TEMPO_MIN: f64 = 30.0;
pub const TEMPO_MAX: f64 = 320.0;
/// Center of the log-normal tempo prior.
const START_BPM: f64 = 120.0;
/// Width of the tempo prior, in octaves.
const PRIOR_STD_OCTAVES: f64 = 1.0;
/// Longest lag considered by the autocorrelation, in seconds.
const AC_SIZE_SECS: f64 = 8.0;

/// How strictly the beat tracker sticks to the estimated period.
const TIGHTNESS: f64 = 100.0;

/// Fourier tempogram window for the local pulse, in onset frames.
pub const PLP_WINDOW: usize = 384;
const PLP_TEMPO_MIN: f64 = 30.0;
const PLP_TEMPO_MAX: f64 = 300.0;

/// Spectral-flux onset strength on the spectrogram's frame grid.
#[derive(Debug, Clone)]
pub struct OnsetEnvelope {
    values: Vec<f32>,
    frame_rate: f64,
}

impl OnsetEnvelope {
    /// Mean over mel bands of the positive frame-to-frame increase in log-mel
    /// power. The first frame has no predecessor and is 0.
    pub fn from_spectrogram(spec: &Spectrogram) -> Self {
        let mut mel = mel_power(spec, N_MELS);
        power_to_db_frames(&mut mel);

        let mut values = vec![0.0_f32; mel.len()];
        for t in 1..mel.len() {
            let rise: f32 = mel[t]
                .iter()
                .zip(&mel[t - 1])
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum();
            values[t] = rise / N_MELS as f32;
        }

        Self {
            values,
            frame_rate: spec.frame_rate(),
        }
    }

    pub fn from_values(values: Vec<f32>, frame_rate: f64) -> Self {
        Self { values, frame_rate }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Envelope frames per second.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_silent(&self) -> bool {
        !self.values.iter().any(|&v| v > 0.0)
    }
}

fn tempo_prior(bpm: f64) -> f64 {
    let octaves = (bpm / START_BPM).log2() / PRIOR_STD_OCTAVES;
    (-0.5 * octaves * octaves).exp()
}

/// Global tempo in BPM from the autocorrelation of the onset envelope,
/// weighted by a log-normal prior around 120 BPM. `None` when the envelope has
/// no periodic structure (silence, too short).
pub fn estimate_tempo(env: &OnsetEnvelope) -> Option<f64> {
    let x = env.values();
    let fps = env.frame_rate();
    let max_lag = ((AC_SIZE_SECS * fps) as usize).min(x.len().saturating_sub(1));
    if max_lag < 2 {
        return None;
    }

    let (mean, _) = mean_std(x);
    let centered: Vec<f64> = x.iter().map(|&v| v as f64 - mean).collect();
    let energy: f64 = centered.iter().map(|v| v * v).sum();
    if energy <= f64::EPSILON {
        return None;
    }

    let scores: Vec<f64> = (0..=max_lag)
        .map(|lag| {
            if lag == 0 {
                return 0.0;
            }
            let bpm = 60.0 * fps / lag as f64;
            if !(TEMPO_MIN..=TEMPO_MAX).contains(&bpm) {
                return 0.0;
            }
            let ac: f64 = centered
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / energy;
            ac.max(0.0) * tempo_prior(bpm)
        })
        .collect();

    let (best, &best_score) = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if best_score <= 0.0 {
        return None;
    }

    // Parabolic interpolation between neighboring lags.
    let mut lag = best as f64;
    if best > 1 && best < max_lag {
        let (a, b, c) = (scores[best - 1], scores[best], scores[best + 1]);
        let denom = a - 2.0 * b + c;
        if denom.abs() > f64::EPSILON {
            lag += (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
        }
    }
    Some(60.0 * fps / lag)
}

/// Dynamic-programming beat tracker. Returns beat positions as envelope frame
/// indices, ascending. Empty when the envelope is silent.
pub fn track_beats(env: &OnsetEnvelope, bpm: f64) -> Vec<usize> {
    let x = env.values();
    let n = x.len();
    if n == 0 || env.is_silent() || !(bpm > 0.0) {
        return Vec::new();
    }
    let period = 60.0 * env.frame_rate() / bpm;
    if period < 1.0 {
        return Vec::new();
    }

    let (_, std) = mean_std(x);
    let scale = if std > 0.0 { std } else { 1.0 };
    let onset: Vec<f64> = x.iter().map(|&v| v as f64 / scale).collect();

    // Gaussian smoothing at the beat period.
    let half = period.round() as isize;
    let kernel: Vec<f64> = (-half..=half)
        .map(|k| (-0.5 * (k as f64 * 32.0 / period).powi(2)).exp())
        .collect();
    let localscore: Vec<f64> = (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(ki, w)| {
                    let j = i + ki as isize - half;
                    (0..n as isize).contains(&j).then(|| w * onset[j as usize])
                })
                .sum()
        })
        .collect();

    // Predecessors lie between two periods and half a period back.
    let lo = (-2.0 * period).round() as isize;
    let hi = -((period / 2.0).round() as isize).max(1);
    let offsets: Vec<isize> = (lo..=hi).collect();
    let txwt: Vec<f64> = offsets
        .iter()
        .map(|&o| -TIGHTNESS * ((-o as f64) / period).ln().powi(2))
        .collect();

    let score_thresh = 0.01 * localscore.iter().copied().fold(0.0, f64::max);
    let mut cumscore = vec![0.0_f64; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];
    let mut first_beat = true;

    for i in 0..n {
        let mut best: Option<(f64, Option<usize>)> = None;
        for (&o, &w) in offsets.iter().zip(&txwt) {
            let j = i as isize + o;
            let candidate = if j >= 0 {
                (cumscore[j as usize] + w, Some(j as usize))
            } else {
                (w, None)
            };
            if best.is_none_or(|(s, _)| candidate.0 > s) {
                best = Some(candidate);
            }
        }
        let (best_score, best_link) = best.unwrap_or((0.0, None));
        cumscore[i] = localscore[i] + best_score;
        if first_beat && localscore[i] < score_thresh {
            backlink[i] = None;
        } else {
            backlink[i] = best_link;
            first_beat = false;
        }
    }

    let last = last_beat(&cumscore);
    let mut beats = vec![last];
    while let Some(prev) = beats.last().and_then(|&b| backlink[b]) {
        beats.push(prev);
    }
    beats.reverse();

    trim_weak_beats(beats, &localscore)
}

fn last_beat(cumscore: &[f64]) -> usize {
    let as_f32: Vec<f32> = cumscore.iter().map(|&v| v as f32).collect();
    let maxima = local_maxima(&as_f32);
    if maxima.is_empty() {
        return cumscore.len() - 1;
    }
    let mut peaks: Vec<f64> = maxima.iter().map(|&i| cumscore[i]).collect();
    peaks.sort_by(|a, b| a.total_cmp(b));
    let median = peaks[peaks.len() / 2];
    maxima
        .iter()
        .rev()
        .copied()
        .find(|&i| cumscore[i] >= 0.5 * median)
        .unwrap_or(cumscore.len() - 1)
}

fn trim_weak_beats(beats: Vec<usize>, localscore: &[f64]) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }
    let rms = (beats.iter().map(|&b| localscore[b].powi(2)).sum::<f64>()
        / beats.len() as f64)
        .sqrt();
    let threshold = 0.5 * rms;
    let Some(start) = beats.iter().position(|&b| localscore[b] > threshold) else {
        return Vec::new();
    };
    let end = beats
        .iter()
        .rposition(|&b| localscore[b] > threshold)
        .map_or(beats.len(), |e| e + 1);
    beats[start..end].to_vec()
}

/// Onset frames picked from the envelope: local maxima that stand out from
/// their neighborhood average by a fixed margin, at least `wait` frames apart.
pub fn detect_onsets(env: &OnsetEnvelope) -> Vec<usize> {
    let x = env.values();
    let (min, max) = x
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if x.is_empty() || !(max > min) {
        return Vec::new();
    }
    let norm: Vec<f32> = x.iter().map(|&v| (v - min) / (max - min)).collect();

    let fps = env.frame_rate();
    let pre_max = ((0.03 * fps) as usize).max(1);
    let post_max = 1;
    let pre_avg = ((0.10 * fps) as usize).max(1);
    let post_avg = (0.10 * fps) as usize + 1;
    let wait = ((0.03 * fps) as usize).max(1);
    const DELTA: f32 = 0.07;

    let n = norm.len();
    let mut onsets: Vec<usize> = Vec::new();
    for i in 0..n {
        let max_window = &norm[i.saturating_sub(pre_max)..(i + post_max).min(n)];
        let local_max = max_window.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if norm[i] != local_max {
            continue;
        }
        let avg_window = &norm[i.saturating_sub(pre_avg)..(i + post_avg).min(n)];
        let local_avg = avg_window.iter().sum::<f32>() / avg_window.len() as f32;
        if norm[i] < local_avg + DELTA {
            continue;
        }
        if onsets.last().is_some_and(|&prev| i - prev <= wait) {
            continue;
        }
        onsets.push(i);
    }
    onsets
}

/// Predominant local pulse: for every envelope frame keep only the strongest
/// tempo component of a windowed Fourier tempogram, resynthesize, rectify and
/// normalize to a peak of 1. Same length as the envelope.
pub fn predominant_local_pulse(env: &OnsetEnvelope) -> Result<Vec<f32>> {
    let x = env.values();
    let n = x.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let win = PLP_WINDOW;
    let fps = env.frame_rate();
    let bin_bpm = |k: usize| 60.0 * k as f64 * fps / win as f64;
    let bins: Vec<usize> = (1..win / 2)
        .filter(|&k| (PLP_TEMPO_MIN..=PLP_TEMPO_MAX).contains(&bin_bpm(k)))
        .collect();
    if bins.is_empty() {
        return Err(DspError::TooShort(format!(
            "no tempo bins in range at {fps:.1} frames/s"
        )));
    }

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(win);
    let window = hann_window(win);
    let mut input = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();
    let mut scratch = fft.make_scratch_vec();

    let frames = Frames::centered(x, win, 1, Pad::Zeros);
    let mut pulse = vec![0.0_f64; n + win];
    let mut wsum = vec![0.0_f64; n + win];

    for (t, frame) in frames.iter().enumerate() {
        for (dst, (&s, &w)) in input.iter_mut().zip(frame.iter().zip(&window)) {
            *dst = s * w;
        }
        fft.process_with_scratch(&mut input, &mut spectrum, &mut scratch)
            .map_err(|e| DspError::Fft(format!("{e:?}")))?;

        let Some(&k) = bins
            .iter()
            .max_by(|&&a, &&b| spectrum[a].norm().total_cmp(&spectrum[b].norm()))
        else {
            continue;
        };
        let mag = spectrum[k].norm();
        for (m, &w) in window.iter().enumerate() {
            let w = w as f64;
            wsum[t + m] += w * w;
            if mag > 0.0 {
                let (re, im) = ((spectrum[k].re / mag) as f64, (spectrum[k].im / mag) as f64);
                let angle = 2.0 * std::f64::consts::PI * (k * m) as f64 / win as f64;
                pulse[t + m] += w * (re * angle.cos() - im * angle.sin());
            }
        }
    }

    let offset = win / 2;
    let mut out: Vec<f32> = (0..n)
        .map(|i| {
            let norm = wsum[i + offset];
            if norm > 1e-10 {
                (pulse[i + offset] / norm).max(0.0) as f32
            } else {
                0.0
            }
        })
        .collect();
    let peak = out.iter().copied().fold(0.0_f32, f32::max);
    if peak > 0.0 {
        out.iter_mut().for_each(|v| *v /= peak);
    }
    Ok(out)
}
