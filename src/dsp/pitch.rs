use super::stft::Spectrogram;

/// Frequency range searched for pitch peaks, in Hz.
pub const PITCH_FMIN: f32 = 150.0;
pub const PITCH_FMAX: f32 = 4000.0;
/// Peaks below this fraction of the frame's maximum magnitude are ignored.
pub const PITCH_THRESHOLD: f32 = 0.1;

/// A spectral peak refined by parabolic interpolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchPeak {
    pub frequency: f32,
    pub magnitude: f32,
}

/// All interpolated peaks of one magnitude frame within the pitch range.
pub fn frame_peaks(frame: &[f32], spec: &Spectrogram) -> Vec<PitchPeak> {
    let reference = frame.iter().copied().fold(0.0_f32, f32::max);
    if reference <= 0.0 || frame.len() < 3 {
        return Vec::new();
    }
    let bin_hz = spec.sample_rate() as f32 / spec.n_fft() as f32;

    (1..frame.len() - 1)
        .filter(|&i| {
            let f = i as f32 * bin_hz;
            (PITCH_FMIN..PITCH_FMAX).contains(&f)
        })
        .filter(|&i| {
            frame[i] > PITCH_THRESHOLD * reference
                && frame[i] > frame[i - 1]
                && frame[i] >= frame[i + 1]
        })
        .map(|i| {
            let avg = 0.5 * (frame[i + 1] - frame[i - 1]);
            let curvature = 2.0 * frame[i] - frame[i + 1] - frame[i - 1];
            let shift = if curvature.abs() < f32::EPSILON { 0.0 } else { avg / curvature };
            PitchPeak {
                frequency: (i as f32 + shift) * bin_hz,
                magnitude: frame[i] + 0.5 * avg * shift,
            }
        })
        .collect()
}

/// Frequency of the strongest peak per frame; 0 for frames without a peak.
pub fn strongest_pitches(spec: &Spectrogram) -> Vec<f32> {
    spec.frames()
        .iter()
        .map(|frame| {
            frame_peaks(frame, spec)
                .into_iter()
                .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
                .map_or(0.0, |p| p.frequency)
        })
        .collect()
}
