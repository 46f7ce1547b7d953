use crate::dsp::rhythm::{self, OnsetEnvelope};
use crate::dsp::spectral::{self, N_MFCC};
use crate::dsp::stft::Spectrogram;
use crate::dsp::tonal::{self, HPSS_KERNEL, MAJOR_PROFILE, MINOR_PROFILE};
use crate::dsp::{self, HOP_LENGTH, N_FFT, mean, mean_over_max, mean_std};
use crate::signal::Signal;

use super::{ExtractionError, ExtractionResult, SignalBackend};

/// Upper edge of the "bass" band for danceability.
const BASS_MAX_HZ: f32 = 250.0;
/// Lower edge of the band whose energy share hints at a live room/audience.
const AIR_MIN_HZ: f32 = 8000.0;
/// Loudness floor for silent input, as an RMS amplitude.
const RMS_FLOOR: f64 = 1e-5;

/// Descriptor backend built on the crate's own STFT/onset/chroma primitives.
#[derive(Debug, Clone)]
pub struct DspBackend {
    n_fft: usize,
    hop: usize,
}

impl Default for DspBackend {
    fn default() -> Self {
        Self {
            n_fft: N_FFT,
            hop: HOP_LENGTH,
        }
    }
}

fn finite(name: &'static str, value: f64) -> ExtractionResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ExtractionError::NonFinite(name))
    }
}

impl DspBackend {
    fn spectrogram(&self, signal: &Signal) -> ExtractionResult<Spectrogram> {
        Ok(Spectrogram::compute(
            signal.samples(),
            signal.sample_rate(),
            self.n_fft,
            self.hop,
        )?)
    }

    fn rms(&self, signal: &Signal) -> Vec<f32> {
        spectral::rms(signal.samples(), self.n_fft, self.hop)
    }

    fn mean_zcr(&self, signal: &Signal) -> f64 {
        mean(&spectral::zero_crossing_rate(signal.samples(), self.n_fft, self.hop))
    }

    /// Beat frames after tempo estimation on the onset envelope.
    fn beats(&self, spec: &Spectrogram) -> ExtractionResult<Vec<usize>> {
        let env = OnsetEnvelope::from_spectrogram(spec);
        let bpm = rhythm::estimate_tempo(&env).ok_or(ExtractionError::NoTempo)?;
        Ok(rhythm::track_beats(&env, bpm))
    }
}

impl SignalBackend for DspBackend {
    fn name(&self) -> &'static str {
        "dsp"
    }

    fn tempo(&self, signal: &Signal) -> ExtractionResult<f64> {
        let spec = self.spectrogram(signal)?;
        let env = OnsetEnvelope::from_spectrogram(&spec);
        let bpm = rhythm::estimate_tempo(&env).ok_or(ExtractionError::NoTempo)?;
        finite("tempo", bpm)
    }

    fn energy(&self, signal: &Signal) -> ExtractionResult<f64> {
        let spec = self.spectrogram(signal)?;
        let rms = self.rms(signal);
        let contrast = spectral::contrast(&spec);
        let onset = OnsetEnvelope::from_spectrogram(&spec);

        let blend = 0.4 * mean_over_max(&rms)
            + 0.3 * mean_over_max(&contrast[0])
            + 0.3 * mean_over_max(onset.values());
        finite("energy", blend.max(0.0).sqrt().clamp(0.0, 1.0))
    }

    fn loudness(&self, signal: &Signal) -> ExtractionResult<f64> {
        let rms = mean(&self.rms(signal));
        finite("loudness", dsp::amplitude_to_db(rms, RMS_FLOOR))
    }

    fn key(&self, signal: &Signal) -> ExtractionResult<i32> {
        let spec = self.spectrogram(signal)?;
        let chroma = spectral::chroma(&spec);
        let mut totals = [0.0_f64; 12];
        for frame in &chroma {
            for (t, &v) in totals.iter_mut().zip(frame) {
                *t += v as f64;
            }
        }
        // First maximum wins, so silence resolves to C.
        let key = (0..12).fold(0, |best, pc| if totals[pc] > totals[best] { pc } else { best });
        Ok(key as i32)
    }

    fn mode(&self, signal: &Signal) -> ExtractionResult<i32> {
        let spec = self.spectrogram(signal)?;
        let harmonic = tonal::harmonic(&spec, HPSS_KERNEL);
        let tonnetz = tonal::tonnetz(&spectral::chroma(&harmonic));
        if tonnetz.is_empty() {
            return Err(ExtractionError::Degenerate("no chroma frames".into()));
        }
        let n = tonnetz.len() as f64;
        let fifths_sin = tonnetz.iter().map(|t| t[0] as f64).sum::<f64>() / n;
        let fifths_cos = tonnetz.iter().map(|t| t[1] as f64).sum::<f64>() / n;
        Ok(if fifths_sin > fifths_cos { 1 } else { 0 })
    }

    fn time_signature(&self, signal: &Signal) -> ExtractionResult<i32> {
        let spec = self.spectrogram(signal)?;
        let beats = self.beats(&spec)?;
        if beats.len() < 2 {
            return Err(ExtractionError::TooFewBeats(beats.len()));
        }
        let intervals: Vec<f32> = beats.windows(2).map(|w| (w[1] - w[0]) as f32).collect();
        let half = finite("time_signature", mean(&intervals) / 2.0)?;
        Ok(half.round() as i32 * 2)
    }

    fn acousticness(&self, signal: &Signal) -> ExtractionResult<f64> {
        let spec = self.spectrogram(signal)?;
        let bandwidth = mean(&spectral::bandwidth(&spec));
        let quarter_rate = signal.sample_rate() as f64 / 4.0;
        finite("acousticness", 1.0 - (bandwidth / quarter_rate).min(1.0))
    }

    fn instrumentalness(&self, signal: &Signal) -> ExtractionResult<f64> {
        finite("instrumentalness", (self.mean_zcr(signal) * 10.0).min(1.0))
    }

    fn speechiness(&self, signal: &Signal) -> ExtractionResult<f64> {
        let spec = self.spectrogram(signal)?;
        let mfcc = spectral::mfcc(&spec, N_MFCC);
        let spread = mfcc.iter().map(|c| mean_std(c).1).sum::<f64>() / mfcc.len() as f64;
        let zcr = self.mean_zcr(signal);
        let blend = 0.6 * (spread / 100.0) + 0.4 * (zcr * 10.0);
        finite("speechiness", blend.clamp(0.0, 1.0))
    }

    fn danceability(&self, signal: &Signal, tempo: f64) -> ExtractionResult<f64> {
        let spec = self.spectrogram(signal)?;
        let tempo_norm = ((tempo - 50.0) / 130.0).clamp(0.0, 1.0);

        let beats = self.beats(&spec)?;
        let regularity = if beats.len() > 1 {
            let intervals: Vec<f32> = beats.windows(2).map(|w| (w[1] - w[0]) as f32).collect();
            let (m, s) = mean_std(&intervals);
            if m > 0.0 { 1.0 - s / m } else { 0.0 }
        } else {
            0.0
        };

        let env = OnsetEnvelope::from_spectrogram(&spec);
        let pulse = rhythm::predominant_local_pulse(&env)?;
        let clarity = mean_over_max(&pulse);

        let bass = spectral::low_band_ratio(&spec, BASS_MAX_HZ).min(1.0);

        let blend = 0.3 * tempo_norm + 0.3 * regularity + 0.2 * clarity + 0.2 * bass;
        finite("danceability", blend.max(0.0).powf(0.7).clamp(0.0, 1.0))
    }

    fn valence(&self, signal: &Signal) -> ExtractionResult<f64> {
        let spec = self.spectrogram(signal)?;
        let chroma = spectral::chroma(&spec);
        let n = chroma.len().max(1) as f64;
        let major = chroma
            .iter()
            .map(|f| tonal::profile_correlation(f, &MAJOR_PROFILE) as f64)
            .sum::<f64>()
            / n;
        let minor = chroma
            .iter()
            .map(|f| tonal::profile_correlation(f, &MINOR_PROFILE) as f64)
            .sum::<f64>()
            / n;

        let nyquist = signal.sample_rate() as f64 / 2.0;
        let brightness = mean(&spectral::centroid(&spec)) / nyquist;
        let spread = mean(&spectral::bandwidth(&spec)) / nyquist;

        let score = 0.5 * (major - minor) + 0.3 * brightness + 0.2 * (1.0 - spread);
        finite("valence", ((score + 1.0) / 2.0).clamp(0.0, 1.0))
    }

    /// Blend of loudness fluctuation, spectral flatness and high-band energy.
    fn liveness(&self, signal: &Signal) -> ExtractionResult<f64> {
        let spec = self.spectrogram(signal)?;
        let (rms_mean, rms_std) = mean_std(&self.rms(signal));
        let fluctuation = if rms_mean > 0.0 {
            (rms_std / rms_mean).min(1.0)
        } else {
            0.0
        };
        let noisiness = (mean(&spectral::flatness(&spec)) * 10.0).min(1.0);
        let air = (spectral::high_band_power_ratio(&spec, AIR_MIN_HZ) * 4.0).min(1.0);

        let blend = 0.5 * fluctuation + 0.3 * noisiness + 0.2 * air;
        finite("liveness", blend.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    fn sine(freq: f32, secs: f32, amp: f32) -> Signal {
        let n = (SR as f32 * secs) as usize;
        let samples = (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect();
        Signal::new(samples, SR).unwrap()
    }

    fn silence(secs: f32) -> Signal {
        Signal::new(vec![0.0; (SR as f32 * secs) as usize], SR).unwrap()
    }

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
    fn silence_fails_rhythm_descriptors() {
        let backend = DspBackend::default();
        let s = silence(2.0);
        assert!(matches!(backend.tempo(&s), Err(ExtractionError::NoTempo)));
        assert!(backend.time_signature(&s).is_err());
        assert!(backend.danceability(&s, 120.0).is_err());
    }

    #[test]
    fn silence_loudness_hits_the_floor() {
        let backend = DspBackend::default();
        let loudness = backend.loudness(&silence(1.0)).unwrap();
        assert!((loudness + 100.0).abs() < 1e-9);
    }

    #[test]
    fn a440_is_key_of_a() {
        let backend = DspBackend::default();
        assert_eq!(backend.key(&sine(440.0, 2.0, 0.5)).unwrap(), 9);
        assert_eq!(backend.key(&silence(1.0)).unwrap(), 0);
    }

    #[test]
    fn click_train_tempo_and_meter() {
        let backend = DspBackend::default();
        let s = click_train(20 * HOP_LENGTH, 10.0);
        let tempo = backend.tempo(&s).unwrap();
        assert!((tempo - 129.2).abs() < 4.0, "tempo {tempo}");
        // Beats are 20 frames apart: 2 * round(20 / 2).
        assert_eq!(backend.time_signature(&s).unwrap(), 20);
        let dance = backend.danceability(&s, tempo).unwrap();
        assert!((0.0..=1.0).contains(&dance));
    }

    #[test]
    fn unit_range_descriptors_stay_in_range() {
        let backend = DspBackend::default();
        for signal in [sine(440.0, 1.0, 0.5), silence(1.0), click_train(8000, 3.0)] {
            for value in [
                backend.energy(&signal).unwrap(),
                backend.acousticness(&signal).unwrap(),
                backend.instrumentalness(&signal).unwrap(),
                backend.speechiness(&signal).unwrap(),
                backend.valence(&signal).unwrap(),
                backend.liveness(&signal).unwrap(),
            ] {
                assert!((0.0..=1.0).contains(&value), "value {value}");
            }
            let mode = backend.mode(&signal).unwrap();
            assert!(mode == 0 || mode == 1);
        }
    }

    #[test]
    fn pure_tone_is_acoustic_and_tonal() {
        let backend = DspBackend::default();
        let tone = sine(440.0, 1.0, 0.5);
        assert!(backend.acousticness(&tone).unwrap() > 0.9);
        assert!(backend.instrumentalness(&tone).unwrap() > 0.3);
    }

    #[test]
    fn steady_tone_is_less_live_than_clicks() {
        let backend = DspBackend::default();
        let tone = backend.liveness(&sine(440.0, 2.0, 0.5)).unwrap();
        let clicks = backend.liveness(&click_train(8000, 2.0)).unwrap();
        assert!(tone < clicks, "tone {tone} clicks {clicks}");
    }

    #[test]
    fn liveness_is_not_valence() {
        let backend = DspBackend::default();
        let s = sine(440.0, 1.0, 0.5);
        assert_ne!(backend.liveness(&s).unwrap(), backend.valence(&s).unwrap());
    }
}
