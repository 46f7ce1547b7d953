//! Time-aligned structural breakdown of a track: sections, bars, beats,
//! tatums and onset segments, plus a track-level summary.
//!
//! Every structural list is computed independently. A failure in one of them
//! is logged and leaves that list empty without touching the others; only a
//! failure to analyze the signal at all produces the error structure.

use std::time::Instant;

use serde::Serialize;

use crate::backend::{ExtractionError, fallback};
use crate::dsp::rhythm::{self, OnsetEnvelope};
use crate::dsp::spectral::{self, N_MFCC};
use crate::dsp::stft::Spectrogram;
use crate::dsp::tonal::{self, HPSS_KERNEL};
use crate::dsp::{self, DspError, HOP_LENGTH, N_FFT, frames_to_time, local_maxima, mean};
use crate::signal::Signal;

use super::features::FeatureVector;

/// Upper bound on the number of sections.
pub const MAX_SECTIONS: usize = 8;
/// Confidence attached to every section boundary.
const SECTION_CONFIDENCE: f64 = 0.8;
/// Chroma frames are block-averaged down to at most this many before clustering.
const MAX_CLUSTER_FRAMES: usize = 512;
/// Beats per bar.
const BEATS_PER_BAR: usize = 4;
/// Loudness curve resolution inside a segment.
const SEGMENT_FRAME: usize = 1024;
const SEGMENT_HOP: usize = 256;
/// Fade detection windows, in seconds.
const FADE_FRAME_SECS: f64 = 0.05;
const FADE_HOP_SECS: f64 = 0.025;
/// Confidence used when a confidence estimate cannot be computed.
const UNKNOWN_CONFIDENCE: f64 = 0.5;
const DB_FLOOR: f64 = 1e-5;

#[derive(Debug, Clone, Serialize)]
pub struct DetailedAnalysis {
    pub meta: AnalysisMeta,
    pub track: Option<TrackSummary>,
    pub bars: Vec<TimeInterval>,
    pub beats: Vec<TimeInterval>,
    pub sections: Vec<Section>,
    pub segments: Vec<Segment>,
    pub tatums: Vec<TimeInterval>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisMeta {
    pub analyzer_version: String,
    pub platform: String,
    pub detailed_status: String,
    pub status_code: i32,
    /// Unix seconds.
    pub timestamp: i64,
    /// Seconds spent building this structure.
    pub analysis_time: f64,
    pub input_process: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub num_samples: usize,
    pub duration: f64,
    pub offset_seconds: f64,
    pub window_seconds: f64,
    pub analysis_sample_rate: u32,
    pub analysis_channels: u32,
    pub end_of_fade_in: f64,
    pub start_of_fade_out: f64,
    pub loudness: f64,
    pub tempo: f64,
    pub tempo_confidence: f64,
    pub time_signature: i32,
    pub time_signature_confidence: f64,
    pub key: i32,
    pub key_confidence: f64,
    pub mode: i32,
    pub mode_confidence: f64,
}

/// Half-open interval `[start, start + duration)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeInterval {
    pub start: f64,
    pub duration: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub start: f64,
    pub duration: f64,
    pub confidence: f64,
    pub loudness: f64,
    pub tempo: f64,
    pub tempo_confidence: f64,
    pub key: i32,
    pub key_confidence: f64,
    pub mode: i32,
    pub mode_confidence: f64,
    pub time_signature: i32,
    pub time_signature_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub start: f64,
    pub duration: f64,
    pub confidence: f64,
    pub loudness_start: f64,
    pub loudness_max_time: f64,
    pub loudness_max: f64,
    pub loudness_end: f64,
    pub pitches: Vec<f32>,
    pub timbre: Vec<f32>,
}

impl DetailedAnalysis {
    fn failed(meta: AnalysisMeta) -> Self {
        Self {
            meta: AnalysisMeta {
                detailed_status: "ERROR".into(),
                status_code: 1,
                ..meta
            },
            track: None,
            bars: Vec::new(),
            beats: Vec::new(),
            sections: Vec::new(),
            segments: Vec::new(),
            tatums: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.meta.status_code == 0
    }
}

/// Whole-signal intermediates shared by the structural elements.
struct Context<'a> {
    signal: &'a Signal,
    spec: Spectrogram,
    env: OnsetEnvelope,
    rms: Vec<f32>,
    tempo: f64,
}

impl<'a> Context<'a> {
    fn new(signal: &'a Signal, features: &FeatureVector) -> Result<Self, DspError> {
        let spec = Spectrogram::standard(signal.samples(), signal.sample_rate())?;
        let env = OnsetEnvelope::from_spectrogram(&spec);
        let rms = spectral::rms(signal.samples(), N_FFT, HOP_LENGTH);
        let tempo = features
            .tempo
            .or_else(|| rhythm::estimate_tempo(&env))
            .unwrap_or(fallback::TEMPO);
        Ok(Self {
            signal,
            spec,
            env,
            rms,
            tempo,
        })
    }

    fn duration(&self) -> f64 {
        self.signal.duration_secs()
    }

    fn frame_time(&self, frame: usize) -> f64 {
        frames_to_time(frame, self.signal.sample_rate(), HOP_LENGTH)
    }

    /// Mean frame RMS over `[start, end)`, clipped to [0, 1].
    fn rms_confidence(&self, start: f64, end: f64) -> f64 {
        if self.rms.is_empty() {
            return 0.0;
        }
        let fps = self.spec.frame_rate();
        let last = self.rms.len() - 1;
        let lo = ((start * fps).ceil() as usize).min(last);
        let hi = ((end * fps).ceil() as usize).clamp(lo + 1, self.rms.len());
        mean(&self.rms[lo..hi]).clamp(0.0, 1.0)
    }
}

pub fn analyze(signal: &Signal, features: &FeatureVector, backend: &str) -> DetailedAnalysis {
    let started = Instant::now();
    let mut meta = AnalysisMeta {
        analyzer_version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        detailed_status: "OK".into(),
        status_code: 0,
        timestamp: chrono::Utc::now().timestamp(),
        analysis_time: 0.0,
        input_process: format!("{backend} {}Hz", signal.sample_rate()),
    };

    let ctx = match Context::new(signal, features) {
        Ok(ctx) => ctx,
        Err(e) => {
            log::warn!("Detailed analysis failed: {e}");
            meta.analysis_time = started.elapsed().as_secs_f64();
            return DetailedAnalysis::failed(meta);
        }
    };

    let beats = or_empty("beats", beats(&ctx));
    let bars = bars(&ctx, &beats);
    let sections = or_empty("sections", sections(&ctx, features));
    let segments = or_empty("segments", segments(&ctx));
    let tatums = or_empty("tatums", tatums(&ctx));
    let track = track_summary(&ctx, features);

    meta.analysis_time = started.elapsed().as_secs_f64();
    log::debug!(
        "Detailed analysis: {} sections, {} bars, {} beats, {} tatums, {} segments in {:.2}s",
        sections.len(),
        bars.len(),
        beats.len(),
        tatums.len(),
        segments.len(),
        meta.analysis_time
    );

    DetailedAnalysis {
        meta,
        track: Some(track),
        bars,
        beats,
        sections,
        segments,
        tatums,
    }
}

fn or_empty<T>(element: &str, result: Result<Vec<T>, ExtractionError>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        log::warn!("Could not compute {element}: {e}");
        Vec::new()
    })
}

/// Intervals between consecutive start times; the last one runs to `end`.
fn intervals(starts: &[f64], end: f64, confidence: impl Fn(f64, f64) -> f64) -> Vec<TimeInterval> {
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let next = starts.get(i + 1).copied().unwrap_or(end).max(start);
            TimeInterval {
                start,
                duration: next - start,
                confidence: confidence(start, next),
            }
        })
        .collect()
}

fn beats(ctx: &Context) -> Result<Vec<TimeInterval>, ExtractionError> {
    let times: Vec<f64> = rhythm::track_beats(&ctx.env, ctx.tempo)
        .into_iter()
        .map(|f| ctx.frame_time(f))
        .collect();
    Ok(intervals(&times, ctx.duration(), |s, e| ctx.rms_confidence(s, e)))
}

/// Groups of four consecutive beats; an incomplete trailing group is dropped.
fn bars(ctx: &Context, beats: &[TimeInterval]) -> Vec<TimeInterval> {
    beats
        .chunks_exact(BEATS_PER_BAR)
        .map(|group| {
            let start = group[0].start;
            let duration: f64 = group.iter().map(|b| b.duration).sum();
            TimeInterval {
                start,
                duration,
                confidence: ctx.rms_confidence(start, start + duration),
            }
        })
        .collect()
}

fn tatums(ctx: &Context) -> Result<Vec<TimeInterval>, ExtractionError> {
    let pulse = rhythm::predominant_local_pulse(&ctx.env)?;
    let threshold = mean(&pulse) as f32;
    let times: Vec<f64> = local_maxima(&pulse)
        .into_iter()
        .filter(|&i| pulse[i] > threshold)
        .map(|i| ctx.frame_time(i))
        .collect();
    Ok(intervals(&times, ctx.duration(), |s, e| ctx.rms_confidence(s, e)))
}

fn segments(ctx: &Context) -> Result<Vec<Segment>, ExtractionError> {
    let onsets = rhythm::detect_onsets(&ctx.env);
    let peak = dsp::max(ctx.env.values());
    let sr = ctx.signal.sample_rate();

    let mut out = Vec::with_capacity(onsets.len().saturating_sub(1));
    for pair in onsets.windows(2) {
        let (start, end) = (ctx.frame_time(pair[0]), ctx.frame_time(pair[1]));
        let slice = ctx.signal.slice_secs(start, end);
        if slice.is_empty() {
            continue;
        }
        let strength = if peak > 0.0 {
            (ctx.env.values()[pair[0]] / peak) as f64
        } else {
            0.0
        };
        out.push(segment(slice, sr, start, end - start, strength)?);
    }
    Ok(out)
}

fn segment(
    slice: &[f32],
    sample_rate: u32,
    start: f64,
    duration: f64,
    confidence: f64,
) -> Result<Segment, ExtractionError> {
    let loudness: Vec<f64> = spectral::rms(slice, SEGMENT_FRAME, SEGMENT_HOP)
        .into_iter()
        .map(|r| dsp::amplitude_to_db(r as f64, DB_FLOOR))
        .collect();
    let (max_idx, loudness_max) = loudness
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });

    let spec = Spectrogram::standard(slice, sample_rate)?;
    let chroma = spectral::chroma(&spec);
    let mut pitches = [0.0_f32; 12];
    for frame in &chroma {
        for (p, v) in pitches.iter_mut().zip(frame) {
            *p += v;
        }
    }
    let top = pitches.iter().copied().fold(0.0_f32, f32::max);
    if top > 0.0 {
        pitches.iter_mut().for_each(|p| *p /= top);
    }
    let timbre: Vec<f32> = spectral::mfcc(&spec, N_MFCC)
        .iter()
        .map(|c| mean(c) as f32)
        .collect();

    Ok(Segment {
        start,
        duration,
        confidence: confidence.clamp(0.0, 1.0),
        loudness_start: loudness.first().copied().unwrap_or(-100.0),
        loudness_max_time: (max_idx * SEGMENT_HOP) as f64 / sample_rate as f64,
        loudness_max,
        loudness_end: loudness.last().copied().unwrap_or(-100.0),
        pitches: pitches.to_vec(),
        timbre,
    })
}

fn sections(ctx: &Context, features: &FeatureVector) -> Result<Vec<Section>, ExtractionError> {
    let chroma = spectral::chroma(&ctx.spec);
    if chroma.is_empty() {
        return Err(ExtractionError::Degenerate("no chroma frames".into()));
    }
    let starts: Vec<f64> = section_starts(&chroma, MAX_SECTIONS)
        .into_iter()
        .map(|f| ctx.frame_time(f))
        .collect();
    let time_signature = features.time_signature.unwrap_or(fallback::TIME_SIGNATURE);
    let sr = ctx.signal.sample_rate();

    let spans = intervals(&starts, ctx.duration(), |_, _| SECTION_CONFIDENCE);
    spans
        .into_iter()
        .map(|span| {
            let slice = ctx
                .signal
                .slice_secs(span.start, span.start + span.duration);
            let spec = Spectrogram::standard(slice, sr)?;
            let env = OnsetEnvelope::from_spectrogram(&spec);
            let rhythm_conf = rhythm_confidence(&env);
            let tonal = TonalSummary::of(&spec);
            let rms = mean(&spectral::rms(slice, N_FFT, HOP_LENGTH));
            Ok(Section {
                start: span.start,
                duration: span.duration,
                confidence: span.confidence,
                loudness: dsp::amplitude_to_db(rms, DB_FLOOR),
                tempo: rhythm::estimate_tempo(&env).unwrap_or(ctx.tempo),
                tempo_confidence: rhythm_conf,
                key: tonal.key,
                key_confidence: tonal.confidence,
                mode: tonal.mode,
                mode_confidence: tonal.confidence,
                time_signature,
                time_signature_confidence: rhythm_conf,
            })
        })
        .collect()
}

/// Frame indices where sections begin, from temporally constrained Ward
/// clustering: adjacent clusters are merged, cheapest first, until at most
/// `max_sections` remain.
fn section_starts(frames: &[[f32; 12]], max_sections: usize) -> Vec<usize> {
    struct Cluster {
        start: usize,
        size: f64,
        sum: [f64; 12],
    }

    fn merge_cost(a: &Cluster, b: &Cluster) -> f64 {
        let dist: f64 = a
            .sum
            .iter()
            .zip(&b.sum)
            .map(|(x, y)| (x / a.size - y / b.size).powi(2))
            .sum();
        a.size * b.size / (a.size + b.size) * dist
    }

    let block = frames.len().div_ceil(MAX_CLUSTER_FRAMES).max(1);
    let mut clusters: Vec<Cluster> = frames
        .chunks(block)
        .enumerate()
        .map(|(i, chunk)| {
            let mut sum = [0.0_f64; 12];
            for frame in chunk {
                for (s, &v) in sum.iter_mut().zip(frame) {
                    *s += v as f64;
                }
            }
            Cluster {
                start: i * block,
                size: chunk.len() as f64,
                sum,
            }
        })
        .collect();

    while clusters.len() > max_sections.max(1) {
        let Some(i) = (0..clusters.len() - 1).min_by(|&a, &b| {
            merge_cost(&clusters[a], &clusters[a + 1])
                .total_cmp(&merge_cost(&clusters[b], &clusters[b + 1]))
        }) else {
            break;
        };
        let right = clusters.remove(i + 1);
        let left = &mut clusters[i];
        left.size += right.size;
        for (s, r) in left.sum.iter_mut().zip(right.sum) {
            *s += r;
        }
    }
    clusters.into_iter().map(|c| c.start).collect()
}

/// RMS of the peak-normalized onset envelope, in [0, 1].
fn rhythm_confidence(env: &OnsetEnvelope) -> f64 {
    let peak = dsp::max(env.values());
    if peak <= 0.0 || env.is_empty() {
        return 0.0;
    }
    let power = env
        .values()
        .iter()
        .map(|&v| ((v / peak) as f64).powi(2))
        .sum::<f64>()
        / env.len() as f64;
    power.sqrt().clamp(0.0, 1.0)
}

/// Key, mode and a tonal-clarity confidence of the harmonic component.
struct TonalSummary {
    key: i32,
    mode: i32,
    confidence: f64,
}

impl TonalSummary {
    fn of(spec: &Spectrogram) -> Self {
        let chroma = spectral::chroma(&tonal::harmonic(spec, HPSS_KERNEL));
        let tonnetz = tonal::tonnetz(&chroma);
        if chroma.is_empty() {
            return Self {
                key: fallback::KEY,
                mode: fallback::MODE,
                confidence: UNKNOWN_CONFIDENCE,
            };
        }
        let mut totals = [0.0_f64; 12];
        for frame in &chroma {
            for (t, &v) in totals.iter_mut().zip(frame) {
                *t += v as f64;
            }
        }
        let key = (0..12).fold(0, |best, pc| if totals[pc] > totals[best] { pc } else { best });
        let n = tonnetz.len() as f64;
        let first = tonnetz.iter().map(|t| t[0] as f64).sum::<f64>() / n;
        let second = tonnetz.iter().map(|t| t[1] as f64).sum::<f64>() / n;
        Self {
            key: key as i32,
            mode: if first > second { 1 } else { 0 },
            confidence: first.abs().clamp(0.0, 1.0),
        }
    }
}

/// (end of fade-in, start of fade-out) in seconds: first and last 50 ms frame
/// louder than half the mean frame RMS.
fn fade_points(signal: &Signal) -> (f64, f64) {
    let sr = signal.sample_rate() as f64;
    let frame = ((FADE_FRAME_SECS * sr) as usize).max(1);
    let hop = ((FADE_HOP_SECS * sr) as usize).max(1);
    let rms = spectral::rms(signal.samples(), frame, hop);
    let threshold = 0.5 * mean(&rms);
    let loud = |v: &f32| *v as f64 > threshold;
    let to_secs = |i: usize| (i * hop) as f64 / sr;
    let fade_in = rms.iter().position(loud).map_or(0.0, to_secs);
    let fade_out = rms
        .iter()
        .rposition(loud)
        .map_or(signal.duration_secs(), to_secs);
    (fade_in, fade_out.min(signal.duration_secs()))
}

fn track_summary(ctx: &Context, features: &FeatureVector) -> TrackSummary {
    let (end_of_fade_in, start_of_fade_out) = fade_points(ctx.signal);
    let rhythm_conf = rhythm_confidence(&ctx.env);
    let tonal = TonalSummary::of(&ctx.spec);
    TrackSummary {
        num_samples: ctx.signal.len(),
        duration: ctx.duration(),
        offset_seconds: 0.0,
        window_seconds: 0.0,
        analysis_sample_rate: ctx.signal.sample_rate(),
        analysis_channels: 1,
        end_of_fade_in,
        start_of_fade_out,
        loudness: features.loudness.unwrap_or(fallback::LOUDNESS),
        tempo: ctx.tempo,
        tempo_confidence: rhythm_conf,
        time_signature: features.time_signature.unwrap_or(fallback::TIME_SIGNATURE),
        time_signature_confidence: rhythm_conf,
        key: features.key.unwrap_or(tonal.key),
        key_confidence: tonal.confidence,
        mode: features.mode.unwrap_or(tonal.mode),
        mode_confidence: tonal.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    fn click_train(period: usize, secs: f32) -> Signal {
        let n = (SR as f32 * secs) as usize;
        let mut out = vec![0.0_f32; n];
        for start in (0..n).step_by(period) {
            for j in 0..400.min(n - start) {
                let decay = (-(j as f32) / 80.0).exp();
                out[start + j] =
                    0.9 * decay * (2.0 * std::f32::consts::PI * 1500.0 * j as f32 / SR as f32).sin();
            }
        }
        Signal::new(out, SR).unwrap()
    }

    #[test]
    fn click_train_structure() {
        let signal = click_train(20 * HOP_LENGTH, 10.0);
        let analysis = analyze(&signal, &FeatureVector::unknown(), "dsp");
        assert!(analysis.is_ok());
        assert_eq!(analysis.meta.input_process, "dsp 22050Hz");

        assert!(analysis.beats.len() >= 10);
        assert_eq!(analysis.bars.len(), analysis.beats.len() / 4);
        let first_bar: f64 = analysis.beats[..4].iter().map(|b| b.duration).sum();
        assert!((analysis.bars[0].duration - first_bar).abs() < 1e-9);
        for b in &analysis.beats {
            assert!(b.duration >= 0.0);
            assert!((0.0..=1.0).contains(&b.confidence));
        }

        assert!(!analysis.sections.is_empty() && analysis.sections.len() <= MAX_SECTIONS);
        assert_eq!(analysis.sections[0].start, 0.0);
        let last = analysis.sections.last().unwrap();
        assert!((last.start + last.duration - signal.duration_secs()).abs() < 1e-9);

        assert!(!analysis.segments.is_empty());
        for seg in &analysis.segments {
            assert_eq!(seg.pitches.len(), 12);
            assert_eq!(seg.timbre.len(), N_MFCC);
            assert!(seg.loudness_max >= seg.loudness_start);
        }
    }

    #[test]
    fn silence_yields_empty_rhythm_lists() {
        let signal = Signal::new(vec![0.0; SR as usize * 2], SR).unwrap();
        let analysis = analyze(&signal, &FeatureVector::unknown(), "dsp");
        assert!(analysis.is_ok());
        assert!(analysis.beats.is_empty());
        assert!(analysis.bars.is_empty());
        assert!(analysis.segments.is_empty());
        assert!(analysis.tatums.is_empty());
        let track = analysis.track.unwrap();
        assert_eq!(track.tempo, fallback::TEMPO);
        assert_eq!(track.end_of_fade_in, 0.0);
        assert_eq!(track.start_of_fade_out, 2.0);
    }

    #[test]
    fn fade_in_is_detected() {
        let mut samples = vec![0.0_f32; SR as usize];
        samples.extend((0..SR as usize).map(|i| {
            0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SR as f32).sin()
        }));
        let signal = Signal::new(samples, SR).unwrap();
        let (fade_in, fade_out) = fade_points(&signal);
        assert!((fade_in - 1.0).abs() < 0.06, "fade in at {fade_in}");
        assert!(fade_out > 1.9);
    }

    #[test]
    fn section_starts_split_distinct_halves() {
        let mut frames = vec![[0.0_f32; 12]; 100];
        for f in &mut frames[..50] {
            f[0] = 1.0;
        }
        for f in &mut frames[50..] {
            f[7] = 1.0;
        }
        assert_eq!(section_starts(&frames, 2), vec![0, 50]);
        assert_eq!(section_starts(&frames, 1), vec![0]);
        assert_eq!(section_starts(&frames[..3], 8), vec![0, 1, 2]);
    }

    #[test]
    fn interval_durations_reach_the_end() {
        let ivs = intervals(&[0.0, 1.0, 2.5], 4.0, |_, _| 1.0);
        let durations: Vec<f64> = ivs.iter().map(|i| i.duration).collect();
        assert_eq!(durations, vec![1.0, 1.5, 1.5]);
    }

    #[test]
    fn failed_structure_serializes_error_status() {
        let meta = AnalysisMeta {
            analyzer_version: "0".into(),
            platform: "linux".into(),
            detailed_status: "OK".into(),
            status_code: 0,
            timestamp: 0,
            analysis_time: 0.0,
            input_process: "dsp 22050Hz".into(),
        };
        let failed = DetailedAnalysis::failed(meta);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["meta"]["detailed_status"], "ERROR");
        assert_eq!(json["meta"]["status_code"], 1);
        assert!(json["track"].is_null());
        assert_eq!(json["beats"].as_array().map(Vec::len), Some(0));
    }
}
