//! Harmonic/percussive separation and tonal-centroid features.

use super::stft::Spectrogram;

/// Median-filter length used for harmonic/percussive separation.
pub const HPSS_KERNEL: usize = 17;

/// Binary-like chord templates over pitch classes C..B.
pub const MAJOR_PROFILE: [f32; 12] = [1., 0., 1., 0., 1., 1., 0., 1., 0., 1., 0., 1.];
pub const MINOR_PROFILE: [f32; 12] = [1., 0., 1., 1., 0., 1., 0., 1., 1., 0., 1., 0.];

/// Median of a sliding window with reflected edges.
fn median_filter(values: &[f32], kernel: usize) -> Vec<f32> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let half = (kernel / 2) as isize;
    let reflect = |i: isize| -> usize {
        let last = n as isize - 1;
        if last == 0 {
            return 0;
        }
        let mut i = i;
        while i < 0 || i > last {
            i = if i < 0 { -i - 1 } else { 2 * last - i + 1 };
        }
        i as usize
    };
    let mut window = Vec::with_capacity(kernel);
    (0..n as isize)
        .map(|i| {
            window.clear();
            window.extend((i - half..=i + half).map(|j| values[reflect(j)]));
            let mid = window.len() / 2;
            *window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
        })
        .collect()
}

/// Harmonic part of a magnitude spectrogram: the input scaled by a soft mask
/// built from a time-direction median (harmonic) and a frequency-direction
/// median (percussive).
pub fn harmonic(spec: &Spectrogram, kernel: usize) -> Spectrogram {
    let frames = spec.frames();
    let n_frames = frames.len();
    let n_bins = spec.num_bins();

    // Median across time, per bin.
    let mut harm = vec![vec![0.0_f32; n_bins]; n_frames];
    let mut column = vec![0.0_f32; n_frames];
    for bin in 0..n_bins {
        for (t, frame) in frames.iter().enumerate() {
            column[t] = frame[bin];
        }
        for (t, v) in median_filter(&column, kernel).into_iter().enumerate() {
            harm[t][bin] = v;
        }
    }

    let masked = frames
        .iter()
        .zip(&harm)
        .map(|(frame, h)| {
            let perc = median_filter(frame, kernel);
            frame
                .iter()
                .zip(h.iter().zip(&perc))
                .map(|(&m, (&h, &p))| {
                    let (h2, p2) = (h * h, p * p);
                    let total = h2 + p2;
                    if total > f32::MIN_POSITIVE { m * h2 / total } else { 0.0 }
                })
                .collect()
        })
        .collect();

    spec.with_frames(masked)
}

/// Six-dimensional tonal centroid of each chroma frame (fifths, minor thirds,
/// major thirds as sin/cos pairs). Frames are L1-normalized first.
pub fn tonnetz(chroma: &[[f32; 12]]) -> Vec<[f32; 6]> {
    use std::f32::consts::PI;
    let phi: [[f32; 12]; 6] = std::array::from_fn(|row| {
        std::array::from_fn(|k| {
            let k = k as f32;
            match row {
                0 => (k * 7.0 * PI / 6.0).sin(),
                1 => (k * 7.0 * PI / 6.0).cos(),
                2 => (k * 3.0 * PI / 2.0).sin(),
                3 => (k * 3.0 * PI / 2.0).cos(),
                4 => 0.5 * (k * 2.0 * PI / 3.0).sin(),
                _ => 0.5 * (k * 2.0 * PI / 3.0).cos(),
            }
        })
    });

    chroma
        .iter()
        .map(|frame| {
            let l1: f32 = frame.iter().map(|v| v.abs()).sum();
            std::array::from_fn(|row| {
                if l1 <= 0.0 {
                    return 0.0;
                }
                phi[row].iter().zip(frame).map(|(p, c)| p * c / l1).sum()
            })
        })
        .collect()
}

/// Dot product of a chroma frame with a chord template.
pub fn profile_correlation(frame: &[f32; 12], profile: &[f32; 12]) -> f32 {
    frame.iter().zip(profile).map(|(c, p)| c * p).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_filter_removes_spikes() {
        let mut values = vec![1.0_f32; 21];
        values[10] = 100.0;
        let filtered = median_filter(&values, 5);
        assert!(filtered.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn median_filter_reflects_at_edges() {
        let filtered = median_filter(&[3.0, 1.0, 2.0], 3);
        // Reflected input: 3 | 3 1 2 | 2
        assert_eq!(filtered, vec![3.0, 2.0, 2.0]);
        assert_eq!(median_filter(&[5.0], 17), vec![5.0]);
    }

    #[test]
    fn steady_tone_survives_harmonic_mask() {
        let sr = 22050;
        let samples: Vec<f32> = (0..sr)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sr as f32).sin())
            .collect();
        let spec = Spectrogram::standard(&samples, sr as u32).unwrap();
        let harm = harmonic(&spec, HPSS_KERNEL);
        let t = spec.num_frames() / 2;
        let peak_bin = (440.0 * 2048.0 / sr as f32).round() as usize;
        let kept = harm.frames()[t][peak_bin] / spec.frames()[t][peak_bin];
        assert!(kept > 0.9, "kept {kept}");
    }

    #[test]
    fn tonnetz_of_silence_is_zero() {
        let out = tonnetz(&[[0.0; 12]]);
        assert_eq!(out, vec![[0.0; 6]]);
    }

    #[test]
    fn tonnetz_of_single_pitch_class_is_the_phi_column() {
        let mut frame = [0.0_f32; 12];
        frame[0] = 1.0;
        let out = tonnetz(&[frame])[0];
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!((out[5] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn c_major_triad_prefers_major_profile() {
        let mut frame = [0.0_f32; 12];
        for pc in [0, 4, 7] {
            frame[pc] = 1.0;
        }
        assert!(profile_correlation(&frame, &MAJOR_PROFILE) > profile_correlation(&frame, &MINOR_PROFILE));
    }
}
